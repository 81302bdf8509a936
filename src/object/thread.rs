//! Thread object.
//!
//! Unlike `Process` and `Endpoint`, a thread is not slab-cached: it needs a
//! whole page to itself, the control block at the low end and an embedded
//! kernel stack filling the rest, so a single page donated by
//! [`crate::mm::page_alloc`] backs both. `construct_thread` builds a
//! thread that cannot yet run; `start_thread` gives it an entry point and
//! moves it into the ready queue.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::arch::x86::context::Context;
use crate::arch::x86::gdt;
use crate::lib::error::Errno;
use crate::mm::{page_alloc, PAGE_SIZE};

use super::process::Process;
use super::{KernelObject, ObjRef, ObjectHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Constructed but never started, or exited. Not on any queue.
    Zombie,
    Ready,
    Running,
    Blocked,
}

/// Tracks who, if anyone, is waiting on this thread via `await_thread`.
/// `NeverRan` is the sentinel `construct_thread` leaves in place: joining a
/// thread that has never been started is always `ESRCH`, same as joining
/// one whose exit status has already been collected.
enum JoinSlot {
    NeverRan,
    Unjoined,
    Exited(i32),
    Waiting(ObjRef<Thread>),
    Collected,
}

/// A sender's in-flight call, parked in the sender's own `Thread` while it
/// blocks past the rendezvous waiting for a reply. `ipc::receive` reads it
/// out of the sender it pairs with; `ipc::reply`/`reply_error` fill in
/// `outcome` and wake the sender.
pub struct PendingCall {
    /// Function number the sender supplied, opaque to the kernel; servers
    /// use it to dispatch the call without inspecting the message body.
    pub function: u32,
    /// The sending descriptor's own cookie, read at `send` time. `receive`
    /// hands this to the receiver unchanged: the receiver's cookie never
    /// enters into it, which is how a server distinguishes clients minted
    /// with different cookies onto the same endpoint.
    pub cookie: usize,
    pub message: Vec<u8>,
    /// Upper bound the sender declared on the reply it will accept.
    /// Enforced as a hard bound: a reply larger than this fails with
    /// `E2BIG` charged against the replying thread, not truncated.
    pub reply_max_size: usize,
    pub outcome: Mutex<Option<Result<Vec<u8>, Errno>>>,
}

pub struct Thread {
    header: ObjectHeader,
    process: ObjRef<Process>,
    state: Mutex<ThreadState>,
    context: UnsafeCell<Context>,
    join: Mutex<JoinSlot>,
    /// On a thread acting as an IPC receiver, the sender it is currently
    /// responsible for replying to, once a rendezvous has been
    /// established. Consumed by `ipc::reply`/`reply_error`.
    sender: Mutex<Option<ObjRef<Thread>>>,
    /// Set while this thread is blocked in `ipc::send`, carrying the
    /// message and reply bound a receiver will read once paired.
    pending_call: Mutex<Option<Arc<PendingCall>>>,
    tls: Mutex<(usize, usize)>,
    entry: Mutex<(usize, usize)>,
    /// Set by whoever wakes a blocked thread (endpoint teardown, join)
    /// before calling `sched::ready`; read back by the blocking call once
    /// it resumes, to know what to return from the syscall that blocked.
    wake_result: Mutex<Option<Result<usize, Errno>>>,
    page_base: usize,
}

// Safety: `context` is only touched by the scheduler, which guarantees at
// most one CPU ever runs at a time and only switches with the ready-queue
// lock held.
unsafe impl Sync for Thread {}

impl Thread {
    pub fn process(&self) -> &ObjRef<Process> {
        &self.process
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    pub fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    pub fn kernel_stack_top(&self) -> *mut u32 {
        (self.page_base + PAGE_SIZE) as *mut u32
    }

    pub fn set_thread_local(&self, addr: usize, size: usize) {
        *self.tls.lock() = (addr, size);
    }

    pub fn thread_local(&self) -> (usize, usize) {
        *self.tls.lock()
    }

    pub fn take_sender(&self) -> Option<ObjRef<Thread>> {
        self.sender.lock().take()
    }

    pub fn set_sender(&self, sender: Option<ObjRef<Thread>>) {
        *self.sender.lock() = sender;
    }

    pub fn set_pending_call(&self, call: Option<Arc<PendingCall>>) {
        *self.pending_call.lock() = call;
    }

    pub fn pending_call(&self) -> Option<Arc<PendingCall>> {
        self.pending_call.lock().clone()
    }

    pub fn set_wake_result(&self, result: Result<usize, Errno>) {
        *self.wake_result.lock() = Some(result);
    }

    /// Consumes and returns the result a waker left for this thread. Panics
    /// if nothing was ever set: every path that parks a thread must arrange
    /// for exactly one `set_wake_result` before it runs again.
    pub fn take_wake_result(&self) -> Result<usize, Errno> {
        self.wake_result.lock().take().expect("thread resumed with no wake result set")
    }

    /// Records that this thread is about to run for the first time: clears
    /// the never-ran join sentinel and adds a running-thread reference to
    /// the owning process.
    pub fn mark_started(self_ref: &ObjRef<Thread>) -> Result<(), Errno> {
        let mut join = self_ref.join.lock();
        if !matches!(*join, JoinSlot::NeverRan) {
            return Err(Errno::EINVAL);
        }
        *join = JoinSlot::Unjoined;
        drop(join);
        Process::add_running_thread(&self_ref.process);
        Ok(())
    }

    /// Runs on the current thread's own exit path. Records the exit status
    /// for a future joiner, or wakes one already waiting, then removes the
    /// running-thread reference from the owning process.
    pub fn record_exit(self_ref: &ObjRef<Thread>, status: i32) {
        let waiter = {
            let mut join = self_ref.join.lock();
            match core::mem::replace(&mut *join, JoinSlot::Exited(status)) {
                JoinSlot::Waiting(waiter) => Some(waiter),
                _ => None,
            }
        };
        if let Some(waiter) = waiter {
            crate::sched::ready(waiter);
        }
        Process::remove_running_thread(&self_ref.process);
    }

    /// Blocks the calling context logically on `target`'s exit and returns
    /// its status once available. The actual blocking (dropping this
    /// thread off the CPU) is the caller's (`sched`/`syscall`) job; this
    /// only manages the join slot's state machine.
    pub fn begin_join(target: &ObjRef<Thread>, joiner: ObjRef<Thread>) -> Result<JoinOutcome, Errno> {
        let mut join = target.join.lock();
        match &*join {
            JoinSlot::NeverRan | JoinSlot::Collected => Err(Errno::ESRCH),
            JoinSlot::Waiting(_) => Err(Errno::ESRCH),
            JoinSlot::Exited(status) => {
                let status = *status;
                *join = JoinSlot::Collected;
                Ok(JoinOutcome::Immediate(status))
            }
            JoinSlot::Unjoined => {
                *join = JoinSlot::Waiting(joiner);
                Ok(JoinOutcome::MustBlock)
            }
        }
    }

    /// Called after a blocked joiner is woken by `record_exit`, to pick up
    /// the status and leave the slot in `Collected`.
    pub fn collect_join(target: &ObjRef<Thread>) -> i32 {
        let mut join = target.join.lock();
        match core::mem::replace(&mut *join, JoinSlot::Collected) {
            JoinSlot::Exited(status) => status,
            other => {
                // Restore: record_exit hasn't actually posted yet. This
                // should not happen since the joiner is only woken after
                // record_exit stores Exited, but err on the side of not
                // losing the slot's state.
                *join = other;
                0
            }
        }
    }
}

pub enum JoinOutcome {
    Immediate(i32),
    MustBlock,
}

impl KernelObject for Thread {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn on_zero_refs(this: NonNull<Thread>) {
        unsafe {
            let ptr = this.as_ptr();
            let page_base = (*ptr).page_base;
            core::ptr::drop_in_place(ptr);
            page_alloc::free(page_base as *mut u8);
        }
    }
}

/// Builds a thread belonging to `process`, in the `Zombie` (never run)
/// state. The thread does not become runnable until `start_thread`.
pub fn construct(process: ObjRef<Process>) -> Result<ObjRef<Thread>, Errno> {
    debug_assert!(core::mem::size_of::<Thread>() < PAGE_SIZE / 2, "Thread control block too large for its page");

    let page = page_alloc::alloc().ok_or(Errno::ENOMEM)?;
    let page_base = page as usize;
    let thread_ptr = page as *mut Thread;
    unsafe {
        thread_ptr.write(Thread {
            header: ObjectHeader::new(),
            process,
            state: Mutex::new(ThreadState::Zombie),
            context: UnsafeCell::new(Context::zeroed()),
            join: Mutex::new(JoinSlot::NeverRan),
            sender: Mutex::new(None),
            pending_call: Mutex::new(None),
            tls: Mutex::new((0, 0)),
            entry: Mutex::new((0, 0)),
            wake_result: Mutex::new(None),
            page_base,
        });
        Ok(ObjRef::from_raw(NonNull::new_unchecked(thread_ptr)))
    }
}

/// Gives a constructed thread an entry point and user stack, builds its
/// initial saved context so the next switch into it lands in
/// `user_entry_trampoline`, and moves it to the ready queue.
pub fn start_thread(thread: &ObjRef<Thread>, entry: usize, user_stack: usize) -> Result<(), Errno> {
    Thread::mark_started(thread)?;
    *thread.entry.lock() = (entry, user_stack);

    let context = unsafe {
        crate::arch::x86::context::prepare_initial_context(thread.kernel_stack_top(), user_entry_trampoline)
    };
    unsafe { *thread.context_ptr() = context };

    thread.set_state(ThreadState::Ready);
    crate::sched::ready(thread.clone());
    Ok(())
}

/// Entered by `switch_to` the first time a freshly started thread runs.
/// Reads the entry point and user stack the construct-time caller
/// recorded and drops to ring 3 via `iretd`, the same mechanism the
/// syscall entry stubs use to return.
extern "C" fn user_entry_trampoline() -> ! {
    let current = crate::sched::current_thread();
    let (entry, user_stack) = *current.entry.lock();
    drop(current);

    unsafe {
        core::arch::asm!(
            "push {ss}",
            "push {esp}",
            "pushfd",
            "push {cs}",
            "push {eip}",
            "iretd",
            ss = in(reg) gdt::USER_DATA_SELECTOR as u32,
            esp = in(reg) user_stack as u32,
            cs = in(reg) gdt::USER_CODE_SELECTOR as u32,
            eip = in(reg) entry as u32,
            options(noreturn),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::process;
    use crate::tests::support;

    #[test]
    fn join_never_ran_is_esrch() {
        support::setup();
        let process = process::construct().expect("process");
        let target = construct(process.clone()).expect("target thread, never started");
        let joiner = construct(process).expect("joiner thread");

        let err = Thread::begin_join(&target, joiner).unwrap_err();
        assert_eq!(err, Errno::ESRCH);
    }
}
