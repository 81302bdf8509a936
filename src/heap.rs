//! Kernel heap.
//!
//! Backed by `linked_list_allocator` over a single static, cache-line
//! aligned arena. The physical page allocator in `mm::page_alloc` hands out
//! individual 4 KiB frames with no contiguity guarantee between them, so it
//! cannot back a general-purpose growable heap; this allocator stays fixed
//! size instead, sized generously up front.

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, Ordering};
use linked_list_allocator::LockedHeap;
use spin::Mutex;

use crate::{log_error, log_info};

#[repr(align(64))]
struct CacheAlignedArray([u8; HEAP_SIZE]);

static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub struct HeapStats {
    total_allocations: usize,
    total_deallocations: usize,
    current_allocated: usize,
    peak_allocated: usize,
    allocation_failures: usize,
}

impl HeapStats {
    pub fn total_allocations(&self) -> usize { self.total_allocations }
    pub fn total_deallocations(&self) -> usize { self.total_deallocations }
    pub fn current_allocated(&self) -> usize { self.current_allocated }
    pub fn peak_allocated(&self) -> usize { self.peak_allocated }
    pub fn allocation_failures(&self) -> usize { self.allocation_failures }
}

static HEAP_STATS: Mutex<HeapStats> = Mutex::new(HeapStats {
    total_allocations: 0,
    total_deallocations: 0,
    current_allocated: 0,
    peak_allocated: 0,
    allocation_failures: 0,
});

const HEAP_SIZE: usize = 8 * 1024 * 1024;

pub const fn heap_total_size() -> usize {
    HEAP_SIZE
}

static HEAP_INIT_DONE: AtomicBool = AtomicBool::new(false);

pub fn init_heap() {
    if HEAP_INIT_DONE
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    static mut HEAP_MEMORY: CacheAlignedArray = CacheAlignedArray([0; HEAP_SIZE]);
    // Safety: runs once, before any other thread or interrupt handler can
    // observe HEAP_MEMORY, guarded by the compare_exchange above.
    unsafe {
        let heap_arr_ptr = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut CacheAlignedArray;
        let heap_start = core::ptr::addr_of_mut!((*heap_arr_ptr).0) as *mut u8;
        ALLOCATOR.lock().init(heap_start, HEAP_SIZE);
        log_info!("heap initialized: {} KiB at {:p}", HEAP_SIZE / 1024, heap_start);
    }
}

pub struct StatsTrackingAllocator;

unsafe impl GlobalAlloc for StatsTrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = ALLOCATOR.alloc(layout);

        let mut stats = HEAP_STATS.lock();
        if !ptr.is_null() {
            stats.total_allocations += 1;
            stats.current_allocated += layout.size();
            stats.peak_allocated = stats.peak_allocated.max(stats.current_allocated);
        } else {
            stats.allocation_failures += 1;
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut stats = HEAP_STATS.lock();
        stats.total_deallocations += 1;
        stats.current_allocated = stats.current_allocated.saturating_sub(layout.size());
        drop(stats);

        ALLOCATOR.dealloc(ptr, layout);
    }
}

#[global_allocator]
static GLOBAL_ALLOC: StatsTrackingAllocator = StatsTrackingAllocator;

#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    log_error!("allocation failure: size={} align={}", layout.size(), layout.align());
    print_heap_stats();
    loop {}
}

pub fn print_heap_stats() {
    let stats = HEAP_STATS.lock();
    log_info!(
        "heap: allocs={} deallocs={} current={}KiB peak={}KiB failures={}",
        stats.total_allocations,
        stats.total_deallocations,
        stats.current_allocated / 1024,
        stats.peak_allocated / 1024,
        stats.allocation_failures,
    );
}

pub fn get_heap_stats() -> HeapStats {
    let stats = HEAP_STATS.lock();
    HeapStats {
        total_allocations: stats.total_allocations,
        total_deallocations: stats.total_deallocations,
        current_allocated: stats.current_allocated,
        peak_allocated: stats.peak_allocated,
        allocation_failures: stats.allocation_failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_total_size_matches_arena() {
        assert_eq!(heap_total_size(), HEAP_SIZE);
    }
}
