//! Cooperative single-CPU thread scheduler.
//!
//! There is exactly one ready queue and one current-thread slot, and no
//! preemption: a thread runs until it yields, blocks itself, or exits.
//! Lock ordering throughout the kernel is descriptor table innermost, then
//! endpoint queues, then this module's ready-queue lock last, released by
//! handing off to the next thread rather than by an explicit unlock ---
//! see [`block_current_and_unlock`].

use alloc::collections::VecDeque;
use spin::{Mutex, MutexGuard};

use crate::arch::x86::context;
use crate::arch::x86::tss;
use crate::lib::error::Errno;
use crate::object::thread::{Thread, ThreadState};
use crate::object::ObjRef;

static READY_QUEUE: Mutex<VecDeque<ObjRef<Thread>>> = Mutex::new(VecDeque::new());
static CURRENT: Mutex<Option<ObjRef<Thread>>> = Mutex::new(None);

/// Holds an exited thread's own reference between the point `exit_current`
/// hands off to the next thread and the point some later, live thread
/// reaps it. `exit_current` cannot drop this reference itself: doing so
/// might free the very kernel stack it is still running on, since nothing
/// else may hold a reference once the owning descriptor is closed. Parking
/// it here and reaping from a different thread's stack, one scheduling
/// decision later, is always safe.
static ZOMBIE: Mutex<Option<ObjRef<Thread>>> = Mutex::new(None);

fn reap_zombie() {
    drop(ZOMBIE.lock().take());
}

/// Pops the one thread `main` has readied so far and runs it with no prior
/// thread to save a context for. Used once, for the boot-built first
/// thread. Never returns: the boot stack this is called from is abandoned.
pub fn start_first_thread() -> ! {
    let thread = READY_QUEUE.lock().pop_front().expect("no thread readied before start_first_thread");
    thread.set_state(ThreadState::Running);
    tss::set_kernel_stack(thread.kernel_stack_top() as u32);
    let ctx = thread.context_ptr();
    *CURRENT.lock() = Some(thread);
    unsafe {
        let mut discard = context::Context::zeroed();
        context::switch_to(&mut discard, ctx);
    }
    unreachable!("the boot stack is never switched back to");
}

/// The thread currently running on this CPU. Panics before the first
/// call to `start_first_thread`.
pub fn current_thread() -> ObjRef<Thread> {
    CURRENT.lock().clone().expect("no current thread")
}

/// Moves the current-thread slot's own reference out, leaving the slot
/// empty. Used only by `exit_current`, which must not add a further clone
/// of its own thread that would then sit, undropped, in its abandoned
/// stack frame forever.
fn take_current() -> ObjRef<Thread> {
    CURRENT.lock().take().expect("no current thread")
}

/// Moves `thread` to the back of the ready queue and marks it `Ready`.
/// Safe to call on the thread that is itself currently running, e.g. from
/// `yield_current`.
pub fn ready(thread: ObjRef<Thread>) {
    thread.set_state(ThreadState::Ready);
    READY_QUEUE.lock().push_back(thread);
}

/// Pops the next ready thread. With single-CPU cooperative scheduling and
/// no preemption, a thread that blocks with nothing left ready means every
/// thread in the system is permanently stuck: there is no timer tick or
/// other event that will ever ready one, so this is a definitive deadlock
/// rather than a transient condition worth spinning on.
fn pick_next() -> ObjRef<Thread> {
    reap_zombie();
    READY_QUEUE.lock().pop_front().expect("ready queue empty: no thread can run")
}

/// Switches from `current` onto `next`, updating the current-thread slot
/// and the TSS/TLS state that must track whichever thread is actually
/// running. Does not touch the ready queue; callers decide what happens
/// to `current` before calling this.
fn switch(current: &ObjRef<Thread>, next: ObjRef<Thread>) {
    if ObjRef::ptr_eq(current, &next) {
        current.set_state(ThreadState::Running);
        return;
    }

    next.set_state(ThreadState::Running);
    tss::set_kernel_stack(next.kernel_stack_top() as u32);
    let (tls_addr, _) = next.thread_local();
    context::set_thread_local(tls_addr as u32);

    let current_ctx = current.context_ptr();
    let next_ctx = next.context_ptr();
    *CURRENT.lock() = Some(next);
    unsafe { context::switch_to(current_ctx, next_ctx) };
}

/// Puts `current` back on the ready queue and switches to whatever runs
/// next. If the ready queue was otherwise empty, `current` runs again
/// immediately without an actual context switch.
pub fn yield_current() {
    let current = current_thread();
    ready(current.clone());
    let next = pick_next();
    switch(&current, next);
}

/// Switches directly to `next` without putting `current` back on the
/// ready queue. The caller is responsible for having already recorded
/// wherever `current` needs to be found again --- an endpoint's wait
/// queue, a join slot --- before calling this.
pub fn switch_to_and_block(next: ObjRef<Thread>) {
    let current = current_thread();
    current.set_state(ThreadState::Blocked);
    switch(&current, next);
}

/// Marks `current` blocked, drops `guard`, then switches to the next
/// ready thread. `guard` is released only once `current`'s state is
/// `Blocked` and, in every caller, already linked onto whatever wait
/// queue it protects, so nothing can observe `current` as both
/// ready-to-run and still holding the lock.
pub fn block_current_and_unlock<T>(guard: MutexGuard<T>) {
    let current = current_thread();
    current.set_state(ThreadState::Blocked);
    drop(guard);
    let next = pick_next();
    switch(&current, next);
}

/// Marks `current` blocked and switches to the next ready thread, with no
/// lock to release: for callers that have already recorded everything a
/// waker needs (a queue entry, a sender reference) before calling this.
pub fn block_current() {
    let current = current_thread();
    current.set_state(ThreadState::Blocked);
    let next = pick_next();
    switch(&current, next);
}

/// Ends `current`'s life: records its exit status for any joiner, then
/// switches away for good. Never returns.
///
/// Unlike the other scheduling entry points this does not call
/// `current_thread`/`switch`: those leave an owning clone sitting in the
/// caller's stack frame for when it returns, which never happens here.
/// Instead the current-thread slot's own reference is moved into `ZOMBIE`
/// for a later, live thread to drop.
pub fn exit_current(status: i32) -> ! {
    let current = take_current();
    current.set_state(ThreadState::Zombie);
    Thread::record_exit(&current, status);

    let next = pick_next();
    next.set_state(ThreadState::Running);
    tss::set_kernel_stack(next.kernel_stack_top() as u32);
    let (tls_addr, _) = next.thread_local();
    context::set_thread_local(tls_addr as u32);

    let current_ctx = current.context_ptr();
    let next_ctx = next.context_ptr();
    *ZOMBIE.lock() = Some(current);
    *CURRENT.lock() = Some(next);
    unsafe { context::switch_to(current_ctx, next_ctx) };
    unreachable!("an exited thread is never switched back to");
}

/// Wakes a thread that was blocked waiting on something now gone wrong
/// (its endpoint destroyed, its receiver vanished): leaves `errno` as the
/// result its blocking call will see once it resumes, then readies it.
pub fn abort_blocked(thread: ObjRef<Thread>, errno: Errno) {
    thread.set_wake_result(Err(errno));
    ready(thread);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_queue_starts_empty() {
        assert!(READY_QUEUE.lock().is_empty());
    }
}
