//! Process object.
//!
//! A process is a descriptor table plus an address space. It is destroyed
//! not when its reference count reaches zero — a process can hold a
//! descriptor that references itself, so that would never happen — but
//! when its running-thread count drops to zero, tracked separately by
//! [`add_running_thread`]/[`remove_running_thread`].

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::lib::error::Errno;
use crate::mm::AddressSpace;

use super::descriptor::DescriptorTable;
use super::{KernelObject, ObjRef, ObjectHeader};

pub struct Process {
    header: ObjectHeader,
    descriptors: DescriptorTable,
    address_space: Mutex<Option<AddressSpace>>,
    running_threads: AtomicUsize,
}

static PROCESS_CACHE: crate::mm::SlabCache<Process> = crate::mm::SlabCache::new(noop, noop);

fn noop(_: *mut Process) {}

impl Process {
    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    pub fn address_space(&self) -> &Mutex<Option<AddressSpace>> {
        &self.address_space
    }

    /// Called when a constructed thread actually starts running in this
    /// process, not at thread construction time: a thread that is built
    /// but never started must not keep the process alive on its account.
    pub fn add_running_thread(self_ref: &ObjRef<Process>) {
        self_ref.running_threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Called when a thread belonging to this process exits. If this was
    /// the last running thread, the process is destroyed: descriptors
    /// closed, address space released. Destruction here is driven by the
    /// running-thread count, not by `self_ref`'s own reference count,
    /// since a process can hold a descriptor referencing itself.
    pub fn remove_running_thread(self_ref: &ObjRef<Process>) {
        let prev = self_ref.running_threads.fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            self_ref.destroy();
        }
    }

    /// Runs once, the first time this process is destroyed (by
    /// `remove_running_thread` reaching zero, or by an explicit `DESTROY`
    /// syscall on a process descriptor). Idempotent.
    pub fn destroy(&self) {
        if !self.header.mark_destroyed() {
            return;
        }
        self.descriptors.close_all();
        if let Some(space) = self.address_space.lock().take() {
            crate::mm::destroy(space);
        }
    }
}

impl KernelObject for Process {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn on_zero_refs(this: NonNull<Process>) {
        unsafe {
            let ptr = this.as_ptr();
            // A process can be freed without `destroy` ever having run
            // (e.g. construction failed partway) — make sure the address
            // space and descriptors are torn down either way.
            (*ptr).destroy();
            core::ptr::drop_in_place(ptr);
            PROCESS_CACHE.free(NonNull::new_unchecked(ptr));
        }
    }
}

/// Builds a new process: a fresh address space and an empty descriptor
/// table. Fails with `ENOMEM` if either the address space or a slab page
/// for the process object itself cannot be allocated.
pub fn construct() -> Result<ObjRef<Process>, Errno> {
    construct_with_space(crate::mm::create()?)
}

/// Builds the very first process around an address space the caller
/// already built — `mm::create_initial`'s return value, for the boot
/// process, rather than a fresh `mm::create()`.
pub fn construct_with_space(space: AddressSpace) -> Result<ObjRef<Process>, Errno> {
    let ptr = PROCESS_CACHE.alloc().ok_or(Errno::ENOMEM)?;
    unsafe {
        ptr.as_ptr().write(Process {
            header: ObjectHeader::new(),
            descriptors: DescriptorTable::new(),
            address_space: Mutex::new(Some(space)),
            running_threads: AtomicUsize::new(0),
        });
        Ok(ObjRef::from_raw(ptr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_starts_with_no_running_threads() {
        // Exercised indirectly through add/remove_running_thread in the
        // sched integration tests; this just documents the invariant that
        // a freshly constructed process has not yet been destroyed.
        assert!(!ObjectHeader::new().is_destroyed());
    }
}
