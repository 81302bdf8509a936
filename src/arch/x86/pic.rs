//! The legacy 8259 PIC, remapped above the CPU exception range.
//!
//! Vectors 0-31 are reserved for CPU exceptions (`idt`'s fault handlers),
//! so the two cascaded PICs are reprogrammed to raise IRQs 0-15 at
//! vectors 32-47 instead of their power-on default of 8-15, which would
//! alias onto the exception vectors.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC1_OFFSET: u8 = 32;
pub const PIC2_OFFSET: u8 = 40;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    Timer = 0,
    Keyboard = 1,
    Cascade = 2,
    Com2 = 3,
    Com1 = 4,
    Lpt2 = 5,
    Floppy = 6,
    Lpt1 = 7,
    Rtc = 8,
    Free9 = 9,
    Free10 = 10,
    Free11 = 11,
    Mouse = 12,
    Fpu = 13,
    PrimaryAta = 14,
    SecondaryAta = 15,
}

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

/// # Safety
/// Must run once during boot, with interrupts disabled, before `sti`.
pub unsafe fn init() {
    PICS.lock().initialize();
}

/// Signals end-of-interrupt for the given IRQ. Must be called at the end
/// of every IRQ handler or the PIC stops delivering further interrupts on
/// that line (and, for IRQs 8-15, on the primary PIC's cascade line too).
pub fn end_of_interrupt(irq: Irq) {
    unsafe { PICS.lock().notify_end_of_interrupt(PIC1_OFFSET + irq as u8) };
}
