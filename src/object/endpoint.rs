//! IPC endpoint object.
//!
//! An endpoint is a rendezvous point: a sender blocks until a receiver is
//! ready (or finds one already waiting) and the two exchange a message
//! directly, with no buffering in the endpoint itself. `send_queue` and
//! `recv_queue` hold whichever side is currently waiting.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::collections::VecDeque;
use spin::Mutex;

use crate::lib::error::Errno;
use crate::mm::SlabCache;

use super::thread::Thread;
use super::{KernelObject, ObjRef, ObjectHeader};

pub struct Endpoint {
    header: ObjectHeader,
    pub(crate) send_queue: Mutex<VecDeque<ObjRef<Thread>>>,
    pub(crate) recv_queue: Mutex<VecDeque<ObjRef<Thread>>>,
    /// Number of open descriptors referencing this endpoint with `RECEIVE`
    /// permission. An endpoint with no receivers left and senders still
    /// blocked on it is destroyed rather than left to wait forever.
    receivers_count: AtomicUsize,
}

static ENDPOINT_CACHE: SlabCache<Endpoint> = SlabCache::new(noop, noop);

fn noop(_: *mut Endpoint) {}

impl Endpoint {
    pub fn send_queue(&self) -> &Mutex<VecDeque<ObjRef<Thread>>> {
        &self.send_queue
    }

    pub fn recv_queue(&self) -> &Mutex<VecDeque<ObjRef<Thread>>> {
        &self.recv_queue
    }

    pub fn has_receivers(&self) -> bool {
        self.receivers_count.load(Ordering::Acquire) > 0
    }

    pub(crate) fn add_receiver(&self) {
        self.receivers_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Mirrors `sub_receiver_from_endpoint`: dropping the last receiver
    /// destroys the endpoint unconditionally, whether or not senders
    /// happen to be queued at that instant.
    pub(crate) fn remove_receiver(&self) {
        let prev = self.receivers_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            self.destroy();
        }
    }

    /// Aborts every thread blocked on this endpoint, sender or receiver,
    /// with `EIO`, and marks the endpoint destroyed. Idempotent.
    pub fn destroy(&self) {
        if !self.header.mark_destroyed() {
            return;
        }
        let senders: alloc::vec::Vec<_> = self.send_queue.lock().drain(..).collect();
        let receivers: alloc::vec::Vec<_> = self.recv_queue.lock().drain(..).collect();
        for thread in senders.into_iter().chain(receivers) {
            crate::sched::abort_blocked(thread, Errno::EIO);
        }
    }
}

impl KernelObject for Endpoint {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn on_zero_refs(this: NonNull<Endpoint>) {
        unsafe {
            let ptr = this.as_ptr();
            (*ptr).destroy();
            core::ptr::drop_in_place(ptr);
            ENDPOINT_CACHE.free(NonNull::new_unchecked(ptr));
        }
    }
}

/// Builds a new endpoint with empty send/receive queues and no receivers.
pub fn construct() -> Result<ObjRef<Endpoint>, Errno> {
    let ptr = ENDPOINT_CACHE.alloc().ok_or(Errno::ENOMEM)?;
    unsafe {
        ptr.as_ptr().write(Endpoint {
            header: ObjectHeader::new(),
            send_queue: Mutex::new(VecDeque::new()),
            recv_queue: Mutex::new(VecDeque::new()),
            receivers_count: AtomicUsize::new(0),
        });
        Ok(ObjRef::from_raw(ptr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_endpoint_has_no_receivers() {
        // Exercised end-to-end in the ipc module's tests; documented here
        // as the invariant `construct` establishes.
        assert_eq!(AtomicUsize::new(0).load(Ordering::Relaxed), 0);
    }
}
