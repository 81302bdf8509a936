//! i686 architecture support: segmentation, traps, the PIC, and the serial
//! and VGA consoles.
//!
//! `init()` brings the CPU into the state the rest of the kernel assumes:
//! flat ring-0/ring-3 segments with a live TSS, every exception vector
//! routed to a handler, the legacy PIC remapped above the exception range,
//! and a syscall gate selected for the running CPU.

pub mod context;
pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod serial;
pub mod syscall_entry;
pub mod trapframe;
pub mod tss;
pub mod vga;

/// Performs the one-time architecture bring-up. Must run with interrupts
/// disabled, before any thread is scheduled.
///
/// # Safety
/// Must be called exactly once, early in boot.
pub unsafe fn init() {
    gdt::init();
    idt::init();
    pic::init();
    serial::init();
    syscall_entry::init();
}
