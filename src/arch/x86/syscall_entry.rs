//! System call entry points.
//!
//! `int 0x80` is always wired up, by `idt::init`, regardless of what this
//! module picks below — it's the fallback every other mechanism degrades
//! to. SYSENTER/SYSEXIT is enabled when CPUID reports it (practically
//! every post-Pentium-II Intel part and most AMD ones); SYSCALL/SYSRET is
//! a long-mode feature on the CPUs that advertise it, so on a 32-bit
//! protected-mode kernel it is left unused even when the CPUID bit is set.

use core::arch::naked_asm;
use core::sync::atomic::{AtomicU8, Ordering};

use super::trapframe::TrapFrame;
use x86::msr;

const IA32_SYSENTER_CS: u32 = 0x174;
const IA32_SYSENTER_ESP: u32 = 0x175;
const IA32_SYSENTER_EIP: u32 = 0x176;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallMechanism {
    Int0x80 = 0,
    SysenterSysexit = 1,
}

static SELECTED: AtomicU8 = AtomicU8::new(SyscallMechanism::Int0x80 as u8);

pub fn selected_mechanism() -> SyscallMechanism {
    match SELECTED.load(Ordering::Relaxed) {
        1 => SyscallMechanism::SysenterSysexit,
        _ => SyscallMechanism::Int0x80,
    }
}

/// Picks the fastest syscall mechanism the CPU supports and wires up the
/// SYSENTER MSRs if available. `int 0x80` stays registered regardless;
/// user-space always has it as a safe fallback even when the kernel would
/// prefer SYSENTER for an ABI upcall stub.
///
/// # Safety
/// Must run once, after `gdt::init()` and `tss::tss()` have initialized
/// the kernel stack selector this writes into `IA32_SYSENTER_ESP`.
pub unsafe fn init() {
    let features = super::cpu::detect();
    if features.has_sysenter {
        msr::wrmsr(IA32_SYSENTER_CS, super::gdt::KERNEL_CODE_SELECTOR as u64);
        msr::wrmsr(IA32_SYSENTER_EIP, sysenter_entry as usize as u64);
        // esp is repointed at the live kernel stack on every thread switch
        // by arch::x86::context::switch_to; this just establishes a valid
        // initial value so an early SYSENTER before the first switch can't
        // run off an uninitialized stack pointer.
        msr::wrmsr(IA32_SYSENTER_ESP, super::tss::tss().esp0 as u64);
        SELECTED.store(SyscallMechanism::SysenterSysexit as u8, Ordering::Relaxed);
    }
}

/// Updates the SYSENTER kernel stack pointer. Called by the scheduler
/// alongside `tss::set_kernel_stack` on every thread switch.
pub fn set_kernel_stack(esp0: u32) {
    if selected_mechanism() == SyscallMechanism::SysenterSysexit {
        unsafe { msr::wrmsr(IA32_SYSENTER_ESP, esp0 as u64) };
    }
}

/// The `int 0x80` gate. Registered directly in the IDT at vector 0x80,
/// bypassing the `x86-interrupt` ABI entirely: that calling convention
/// only exposes the CPU-pushed frame, not the general-purpose registers
/// the syscall argument convention is carried in, so this has to be a
/// naked stub that builds the full `TrapFrame` itself.
///
/// The CPU has already pushed `ss`, `esp`, `eflags`, `cs`, `eip` (in that
/// chronological order, a ring 3 -> ring 0 transition) before this runs;
/// the seven `push`es below extend that into a complete `TrapFrame`.
#[unsafe(naked)]
pub extern "C" fn int80_entry() {
    naked_asm!(
        "push eax",
        "push ecx",
        "push edx",
        "push ebx",
        "push ebp",
        "push esi",
        "push edi",
        "push esp", // pointer to the TrapFrame just built
        "call {handler}",
        "add esp, 4",
        "pop edi",
        "pop esi",
        "pop ebp",
        "pop ebx",
        "pop edx",
        "pop ecx",
        "pop eax",
        "iretd",
        handler = sym dispatch_trap_frame,
    );
}

/// SYSENTER always lands in ring 0 at a fixed `cs`/`eip` with nothing
/// pushed by hardware, unlike `int 0x80` — the ring-transition portion of
/// `TrapFrame` has to be synthesized by hand instead of read off the
/// stack. The return address travels in `edx` and the user stack pointer
/// in `ecx`, the calling convention this kernel publishes to user space
/// alongside the SYSENTER/SYSEXIT feature bit.
#[unsafe(naked)]
pub extern "C" fn sysenter_entry() {
    naked_asm!(
        "push {ss}",
        "push ecx",     // user esp
        "pushfd",
        "push {cs}",
        "push edx",     // user eip (return address)
        "push eax",
        "push ecx",
        "push edx",
        "push ebx",
        "push ebp",
        "push esi",
        "push edi",
        "push esp",
        "call {handler}",
        "add esp, 4",
        "pop edi",
        "pop esi",
        "pop ebp",
        "pop ebx",
        "pop edx",
        "pop ecx",
        "pop eax",
        "pop edx",      // user eip, restored for sysexit
        "add esp, 8",   // drop the synthesized cs/eflags slots
        "pop ecx",      // user esp, restored for sysexit
        "add esp, 4",   // drop the synthesized ss slot
        "sti",
        "sysexit",
        cs = const super::gdt::USER_CODE_SELECTOR,
        ss = const super::gdt::USER_DATA_SELECTOR,
        handler = sym dispatch_trap_frame,
    );
}

extern "C" fn dispatch_trap_frame(frame: *mut TrapFrame) {
    // Safety: the entry stubs above always push a fully-initialized
    // TrapFrame immediately before this call.
    let frame = unsafe { &mut *frame };
    crate::syscall::dispatch_from_trap(frame);
}
