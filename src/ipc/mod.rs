//! Synchronous message-passing IPC.
//!
//! A message exchange is a direct rendezvous between a sender and a
//! receiver blocked on the same endpoint: no buffering happens inside the
//! endpoint, so whichever side arrives first blocks until the other shows
//! up. `send` additionally blocks past the handoff, waiting for the
//! receiver's `reply`/`reply_error`, so a single `send` call carries both
//! the request and (eventually) the response.
//!
//! Open question resolved here: `reply_max_size` is enforced as a hard
//! bound on the reply, not a hint the receiver may exceed. A receiver
//! that tries to reply with more than the sender declared gets `E2BIG`
//! back from `reply` itself and can shrink its answer and retry, rather
//! than the oversized reply silently reaching the sender truncated.
//!
//! The scatter/gather lists a caller describes its send and reply buffers
//! with, and the function number and cookie a message carries, are a
//! syscall-layer concern (`crate::syscall::gather_from_user` and friends):
//! by the time a message reaches this module it is already one gathered
//! `Vec<u8>`, and the reply is scattered back into the sender's buffers
//! only once `send` returns to its own syscall handler.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::lib::error::Errno;
use crate::object::endpoint::Endpoint;
use crate::object::thread::PendingCall;
use crate::object::ObjRef;

/// Compile-time bound on a single message's total gathered size.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Function numbers below this are reserved for kernel-defined protocols
/// (none exist yet); user-defined servers dispatch on numbers at or above
/// it.
pub const USER_BASE: u32 = 0x1_0000;

/// Sends `message` to `endpoint`, tagged with `function` and the sending
/// descriptor's own `cookie`, and blocks until a receiver replies.
/// Rendezvous: if a receiver is already waiting, the two pair up
/// immediately and this call blocks only for the reply; otherwise it
/// queues itself and blocks for both a receiver and a reply. Returns the
/// reply bytes, or whatever error `reply_error` carried, or `EPIPE` if
/// the endpoint has no open receivers at all, or `EIO` if the endpoint
/// was destroyed while this call was blocked, or `EINVAL` if `message`
/// exceeds `MAX_MESSAGE_SIZE`.
pub fn send(
    endpoint: &ObjRef<Endpoint>,
    function: u32,
    cookie: usize,
    message: Vec<u8>,
    reply_max_size: usize,
) -> Result<Vec<u8>, Errno> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(Errno::EINVAL);
    }
    if !endpoint.has_receivers() {
        return Err(Errno::EPIPE);
    }

    let current = crate::sched::current_thread();
    let pending = Arc::new(PendingCall {
        function,
        cookie,
        message,
        reply_max_size,
        outcome: spin::Mutex::new(None),
    });
    current.set_pending_call(Some(pending.clone()));

    let paired_receiver = endpoint.recv_queue().lock().pop_front();
    match paired_receiver {
        Some(receiver) => {
            receiver.set_sender(Some(current.clone()));
            crate::sched::ready(receiver);
        }
        None => {
            endpoint.send_queue().lock().push_back(current.clone());
        }
    }
    crate::sched::block_current();

    current.set_pending_call(None);
    match pending.outcome.lock().take() {
        Some(result) => result,
        None => current.take_wake_result().map(|_| Vec::new()),
    }
}

/// Blocks until a message arrives on `endpoint`, rendezvousing with a
/// sender already waiting if there is one. `max_size` is the receive
/// buffer's total capacity: a pending message larger than it fails with
/// `E2BIG` on both sides at once (the sender's `send` sees the same
/// error), since neither side can make progress once the receiver can't
/// hold what was sent. On success, returns the message along with the
/// function number and the cookie attributed from the *sender's*
/// descriptor, not the receiver's.
pub fn receive(endpoint: &ObjRef<Endpoint>, max_size: usize) -> Result<(Vec<u8>, u32, usize), Errno> {
    let current = crate::sched::current_thread();

    let sender = match endpoint.send_queue().lock().pop_front() {
        Some(sender) => {
            current.set_sender(Some(sender.clone()));
            sender
        }
        None => {
            endpoint.recv_queue().lock().push_back(current.clone());
            crate::sched::block_current();
            match current.take_sender() {
                Some(sender) => {
                    current.set_sender(Some(sender.clone()));
                    sender
                }
                None => return Err(current.take_wake_result().err().unwrap_or(Errno::EIO)),
            }
        }
    };

    let pending = sender.pending_call().ok_or(Errno::EIO)?;
    if pending.message.len() > max_size {
        *pending.outcome.lock() = Some(Err(Errno::E2BIG));
        current.take_sender();
        crate::sched::ready(sender);
        return Err(Errno::E2BIG);
    }

    Ok((pending.message.clone(), pending.function, pending.cookie))
}

/// Replies to whichever sender `receive` last paired this thread with,
/// completing the rendezvous and waking the sender with `message`. Fails
/// with `E2BIG` if `message` exceeds the reply bound the sender declared,
/// without waking the sender or losing the pairing, so the receiver can
/// shrink its reply and try again.
pub fn reply(message: Vec<u8>) -> Result<(), Errno> {
    let current = crate::sched::current_thread();
    let sender = current.take_sender().ok_or(Errno::EINVAL)?;
    let pending = match sender.pending_call() {
        Some(pending) => pending,
        None => return Err(Errno::EIO),
    };

    if message.len() > pending.reply_max_size {
        current.set_sender(Some(sender));
        return Err(Errno::E2BIG);
    }

    *pending.outcome.lock() = Some(Ok(message));
    crate::sched::ready(sender);
    Ok(())
}

/// Replies to whichever sender `receive` last paired this thread with, an
/// error instead of a message, waking it with that error as `send`'s
/// result.
pub fn reply_error(errno: Errno) -> Result<(), Errno> {
    let current = crate::sched::current_thread();
    let sender = current.take_sender().ok_or(Errno::EINVAL)?;
    let pending = match sender.pending_call() {
        Some(pending) => pending,
        None => return Err(Errno::EIO),
    };

    *pending.outcome.lock() = Some(Err(errno));
    crate::sched::ready(sender);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support;

    #[test]
    fn send_without_receivers_is_epipe() {
        // send's has_receivers check runs before it ever touches the
        // current thread, so this is reachable with no scheduler at all.
        support::setup();
        let endpoint = crate::object::endpoint::construct().expect("endpoint construction");
        let err = send(&endpoint, 0, 0, Vec::new(), 0).unwrap_err();
        assert_eq!(err, Errno::EPIPE);
    }
}
