//! # Task State Segment (TSS)
//!
//! On 32-bit x86 the TSS is what makes ring transitions possible at all:
//! when a `int 0x80` or IDT-routed exception moves execution from ring 3 to
//! ring 0, the CPU loads `esp`/`ss` from `tss.esp0`/`tss.ss0` before pushing
//! the trap frame. There is exactly one TSS; on every thread switch its
//! `esp0` is repointed at the top of the new thread's kernel stack.

use spin::Once;

#[repr(C, packed)]
pub struct Tss {
    pub link: u16,
    _link_hi: u16,
    pub esp0: u32,
    pub ss0: u16,
    _ss0_hi: u16,
    pub esp1: u32,
    pub ss1: u16,
    _ss1_hi: u16,
    pub esp2: u32,
    pub ss2: u16,
    _ss2_hi: u16,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u16,
    _es_hi: u16,
    pub cs: u16,
    _cs_hi: u16,
    pub ss: u16,
    _ss_hi: u16,
    pub ds: u16,
    _ds_hi: u16,
    pub fs: u16,
    _fs_hi: u16,
    pub gs: u16,
    _gs_hi: u16,
    pub ldt: u16,
    _ldt_hi: u16,
    pub trap: u16,
    pub iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        // SAFETY-relevant invariant: every field besides esp0/ss0 is unused
        // by this kernel (no hardware task switching, no per-ring stacks
        // beyond ring 0), so zero-initializing them is correct.
        Self {
            link: 0, _link_hi: 0,
            esp0: 0, ss0: super::gdt::KERNEL_DATA_SELECTOR, _ss0_hi: 0,
            esp1: 0, ss1: 0, _ss1_hi: 0,
            esp2: 0, ss2: 0, _ss2_hi: 0,
            cr3: 0, eip: 0, eflags: 0,
            eax: 0, ecx: 0, edx: 0, ebx: 0, esp: 0, ebp: 0, esi: 0, edi: 0,
            es: 0, _es_hi: 0, cs: 0, _cs_hi: 0, ss: 0, _ss_hi: 0,
            ds: 0, _ds_hi: 0, fs: 0, _fs_hi: 0, gs: 0, _gs_hi: 0,
            ldt: 0, _ldt_hi: 0,
            trap: 0,
            iomap_base: size_of_tss(),
        }
    }
}

const fn size_of_tss() -> u16 {
    core::mem::size_of::<Tss>() as u16
}

static TSS: Once<Tss> = Once::new();

pub fn tss() -> &'static Tss {
    TSS.call_once(Tss::new)
}

/// Repoints `esp0` at the top of a thread's kernel stack. Called by the
/// scheduler on every thread switch (`arch::x86::context::switch_to`).
pub fn set_kernel_stack(esp0: u32) {
    let tss_ptr = tss() as *const Tss as *mut Tss;
    // Safety: the TSS is never read by software except through this module
    // and is only written here, single-threaded (cooperative, uniprocessor).
    unsafe {
        (*tss_ptr).esp0 = esp0;
    }
}
