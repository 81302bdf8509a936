//! # Interrupt Descriptor Table (IDT)
//!
//! Routes the CPU exception vectors (0-31) to a fault handler — there is
//! no demand paging or user-space fault recovery in this kernel, so every
//! exception is fatal and the handler panics with the vector and trap
//! frame. Vector `0x80` is the `int 0x80` syscall gate, always present
//! regardless of which fast syscall mechanism `syscall_entry` ends up
//! selecting.
//!
//! The `x86-interrupt` calling convention doesn't thread a vector number
//! through to the handler body, so (as in any from-scratch IDT, 32- or
//! 64-bit) each vector gets its own small handler naming its vector as a
//! literal before delegating to the shared fault path.

use core::mem::size_of;
use spin::Once;

use super::trapframe::ExceptionFrame;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn new(handler: usize, selector: u16, dpl: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr: 0b1000_1110 | ((dpl & 0b11) << 5),
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

const IDT_ENTRIES: usize = 256;

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

static IDT: Once<Idt> = Once::new();

pub const SYSCALL_INT_VECTOR: usize = 0x80;

macro_rules! fault_handler {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(frame: ExceptionFrame) {
            crate::arch::x86::trapframe::fatal_exception($vector, &frame, None);
        }
    };
}

macro_rules! fault_handler_with_code {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(frame: ExceptionFrame, code: u32) {
            crate::arch::x86::trapframe::fatal_exception($vector, &frame, Some(code));
        }
    };
}

fault_handler!(divide_error, 0);
fault_handler!(debug_exception, 1);
fault_handler!(nmi, 2);
fault_handler!(breakpoint, 3);
fault_handler!(overflow, 4);
fault_handler!(bound_range_exceeded, 5);
fault_handler!(invalid_opcode, 6);
fault_handler!(device_not_available, 7);
fault_handler_with_code!(double_fault, 8);
fault_handler_with_code!(invalid_tss, 10);
fault_handler_with_code!(segment_not_present, 11);
fault_handler_with_code!(stack_fault, 12);
fault_handler_with_code!(general_protection, 13);
fault_handler_with_code!(page_fault, 14);

fn build() -> Idt {
    let mut idt = Idt { entries: [IdtEntry::missing(); IDT_ENTRIES] };

    let sel = super::gdt::KERNEL_CODE_SELECTOR;
    let mut set = |vector: usize, handler: usize, dpl: u8| {
        idt.entries[vector] = IdtEntry::new(handler, sel, dpl);
    };

    set(0, divide_error as usize, 0);
    set(1, debug_exception as usize, 0);
    set(2, nmi as usize, 0);
    set(3, breakpoint as usize, 0);
    set(4, overflow as usize, 0);
    set(5, bound_range_exceeded as usize, 0);
    set(6, invalid_opcode as usize, 0);
    set(7, device_not_available as usize, 0);
    set(8, double_fault as usize, 0);
    set(10, invalid_tss as usize, 0);
    set(11, segment_not_present as usize, 0);
    set(12, stack_fault as usize, 0);
    set(13, general_protection as usize, 0);
    set(14, page_fault as usize, 0);

    // DPL 3 so a ring-3 `int 0x80` doesn't itself fault with #GP. The gate
    // points at a naked assembly stub, not a `x86-interrupt` fn: that ABI
    // only exposes the CPU-pushed frame, not the general-purpose registers
    // the syscall argument convention is carried in.
    set(SYSCALL_INT_VECTOR, super::syscall_entry::int80_entry as usize, 3);

    idt
}

/// Loads the IDT. Must run after `gdt::init()`, since gate descriptors
/// reference the kernel code selector.
///
/// # Safety
/// Must be called once during boot with interrupts disabled.
pub unsafe fn init() {
    let idt = IDT.call_once(build);
    let ptr = DescriptorTablePointer {
        limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: idt.entries.as_ptr() as u32,
    };
    core::arch::asm!("lidt [{0}]", in(reg) &ptr, options(readonly, nostack));
}
