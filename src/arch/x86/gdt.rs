//! # Global Descriptor Table (GDT)
//!
//! i686 protected mode still requires a GDT even though this kernel uses it
//! only for flat segmentation: every code/data descriptor has base 0 and
//! limit 0xFFFFF (4 KiB granularity, so 4 GiB). What the GDT actually buys
//! us here is the ring-0/ring-3 split and the TSS descriptor.
//!
//! ```text
//! Index  Segment          DPL   Type   Usage
//! -----  ---------------  ---   ----   ----------------------------
//! 0      Null             -     -      required by the CPU, unused
//! 1      Kernel code      0     Code   ring-0 execution
//! 2      Kernel data      0     Data   ring-0 data/stack
//! 3      User code        3     Code   ring-3 execution
//! 4      User data        3     Data   ring-3 data/stack
//! 5      TSS              0     Sys    esp0 + per-thread TLS base
//! 6      Thread-local     3     Data   rewritten per thread by set_thread_local
//! ```
//!
//! There is no crate offering `x86_64`-style typed GDT construction for
//! 32-bit targets, so the entries are built by hand following the classic
//! segment descriptor layout.

use core::mem::size_of;
use spin::Once;

use super::tss::Tss;

pub const KERNEL_CODE_SELECTOR: u16 = 1 << 3;
pub const KERNEL_DATA_SELECTOR: u16 = 2 << 3;
pub const USER_CODE_SELECTOR: u16 = (3 << 3) | 3;
pub const USER_DATA_SELECTOR: u16 = (4 << 3) | 3;
pub const TSS_SELECTOR: u16 = 5 << 3;
pub const THREAD_LOCAL_SELECTOR: u16 = (6 << 3) | 3;

const GDT_ENTRIES: usize = 7;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (flags << 4),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

// Access byte: present | DPL(2 bits) | descriptor type | executable | dc | rw | accessed
const ACCESS_KERNEL_CODE: u8 = 0b1001_1010;
const ACCESS_KERNEL_DATA: u8 = 0b1001_0010;
const ACCESS_USER_CODE: u8 = 0b1111_1010;
const ACCESS_USER_DATA: u8 = 0b1111_0010;
const ACCESS_TSS: u8 = 0b1000_1001; // present, DPL0, 32-bit TSS (available)

// Granularity nibble: granularity(4KiB) | 32-bit | long-mode(0) | AVL(0)
const FLAGS_4K_32BIT: u8 = 0b1100;
const FLAGS_BYTE_32BIT: u8 = 0b0100; // TSS limit is a byte count, not page count

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

struct Gdt {
    entries: [GdtEntry; GDT_ENTRIES],
}

static GDT: Once<Gdt> = Once::new();

fn build(tss: &'static Tss) -> Gdt {
    let tss_base = tss as *const Tss as u32;
    let tss_limit = (size_of::<Tss>() - 1) as u32;

    Gdt {
        entries: [
            GdtEntry::null(),
            GdtEntry::new(0, 0xFFFFF, ACCESS_KERNEL_CODE, FLAGS_4K_32BIT),
            GdtEntry::new(0, 0xFFFFF, ACCESS_KERNEL_DATA, FLAGS_4K_32BIT),
            GdtEntry::new(0, 0xFFFFF, ACCESS_USER_CODE, FLAGS_4K_32BIT),
            GdtEntry::new(0, 0xFFFFF, ACCESS_USER_DATA, FLAGS_4K_32BIT),
            GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, FLAGS_BYTE_32BIT),
            // Thread-local segment: base/limit rewritten per thread by
            // set_thread_local(); starts out identical to user data.
            GdtEntry::new(0, 0xFFFFF, ACCESS_USER_DATA, FLAGS_4K_32BIT),
        ],
    }
}

/// Loads the GDT, reloads every segment register, and loads the TSS
/// selector into `tr`.
///
/// # Safety
/// Must run with interrupts disabled during early boot, before any thread
/// switch or trap can occur.
pub unsafe fn init() {
    let tss = super::tss::tss();
    let gdt = GDT.call_once(|| build(tss));

    let ptr = DescriptorTablePointer {
        limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
        base: gdt.entries.as_ptr() as u32,
    };

    core::arch::asm!("lgdt [{0}]", in(reg) &ptr, options(readonly, nostack));

    reload_data_segments(KERNEL_DATA_SELECTOR);
    reload_code_segment(KERNEL_CODE_SELECTOR);
    load_task_register(TSS_SELECTOR);
}

unsafe fn reload_data_segments(selector: u16) {
    core::arch::asm!(
        "mov ds, {0:x}",
        "mov es, {0:x}",
        "mov fs, {0:x}",
        "mov gs, {0:x}",
        "mov ss, {0:x}",
        in(reg) selector,
        options(nostack, preserves_flags),
    );
}

/// Reloading `cs` requires a far jump; we fake one with push+retf, the
/// standard trick for changing CS from inline asm on protected-mode x86.
unsafe fn reload_code_segment(selector: u16) {
    core::arch::asm!(
        "push {sel:e}",
        "lea {tmp:e}, [2f]",
        "push {tmp:e}",
        "retf",
        "2:",
        sel = in(reg) selector as u32,
        tmp = out(reg) _,
        options(nostack),
    );
}

unsafe fn load_task_register(selector: u16) {
    core::arch::asm!("ltr {0:x}", in(reg) selector, options(nostack, preserves_flags));
}

/// Rewrites the thread-local segment's base address, used by
/// `arch::x86::context::set_thread_local`.
pub fn set_thread_local_base(base: u32) {
    // Safety: GDT is only mutated here, and only the base/limit fields
    // of the already-initialized thread-local entry are touched; the CPU
    // doesn't cache descriptor contents beyond what's reloaded into a
    // segment register, and callers reload `gs` after this.
    unsafe {
        let gdt = GDT.get().expect("gdt not initialized") as *const Gdt as *mut Gdt;
        let entry = &mut (*gdt).entries[6];
        entry.base_low = (base & 0xFFFF) as u16;
        entry.base_mid = ((base >> 16) & 0xFF) as u8;
        entry.base_high = ((base >> 24) & 0xFF) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_rpl_matches_ring() {
        assert_eq!(KERNEL_CODE_SELECTOR & 0b11, 0);
        assert_eq!(USER_CODE_SELECTOR & 0b11, 3);
        assert_eq!(USER_DATA_SELECTOR & 0b11, 3);
    }

    #[test]
    fn gdt_entry_encodes_base_and_limit() {
        let e = GdtEntry::new(0x0012_3456, 0xABCDE, ACCESS_KERNEL_CODE, FLAGS_4K_32BIT);
        assert_eq!(e.base_low, 0x3456);
        assert_eq!(e.base_mid, 0x12);
        assert_eq!(e.base_high, 0x00);
        assert_eq!(e.limit_low, 0xCDE);
    }
}
