//! Shared scaffolding for tests that need a real object, not a fragment of
//! its logic reimplemented inline: a heap, a handful of physical pages for
//! the slab caches and page tables `Process`/`Thread`/`Endpoint`
//! construction pulls from, and a decided paging mode. None of this needs
//! a live scheduler — just the same bring-up `_start` does, minus the
//! parts that talk to actual firmware-provided memory or CPU state.

use spin::Once;

use crate::arch::x86::cpu::{CpuFeatures, CpuVendor};
use crate::mm::{decide_paging_mode, page_alloc, PAGE_SIZE};

const TEST_PAGES: usize = 64;

#[repr(align(4096))]
struct PageArena([u8; TEST_PAGES * PAGE_SIZE]);

static mut ARENA: PageArena = PageArena([0; TEST_PAGES * PAGE_SIZE]);

static SETUP: Once = Once::new();

/// Idempotent; call at the top of any test that constructs a real kernel
/// object.
pub(crate) fn setup() {
    SETUP.call_once(|| {
        crate::heap::init_heap();

        // Safety: runs once, guarded by `SETUP`, before any test takes a
        // second reference into this arena.
        unsafe {
            let base = core::ptr::addr_of_mut!(ARENA) as *mut u8;
            for i in 0..TEST_PAGES {
                page_alloc::seed(base.add(i * PAGE_SIZE));
            }
        }

        let cpu = CpuFeatures { vendor: CpuVendor::Other, has_sysenter: false, has_syscall: false, has_pae: false, has_apic: false };
        decide_paging_mode(&cpu, None);
    });
}
