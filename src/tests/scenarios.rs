//! Regression seeds for the concrete IPC/descriptor scenarios. Each test
//! here builds the real objects the scenario is about and drives them
//! through the actual production entry point; only the pieces that need a
//! live scheduler actually running two threads at once (the rendezvous
//! handoff in `send`/`receive`, the mapped-frame aliasing in `mclone`) are
//! left for the host-side harness this kernel can eventually be driven
//! from.

use crate::lib::error::Errno;
use crate::object::descriptor::{mint, DescriptorTable};
use crate::object::thread::{JoinOutcome, Thread};
use crate::object::{endpoint, process, thread, Object, Permissions};
use crate::tests::support;

/// S1: the scatter/gather byte math `gather_from_user`/`scatter_to_user`
/// perform at the syscall layer, worked out directly on plain slices. The
/// two send chunks concatenate into one 13-byte message; the 17-byte
/// reply splits across buffers of 5, 4, 40 the same way `scatter_to_user`
/// would, stopping once it runs out of data.
#[test]
fn s1_scatter_gather_byte_math() {
    let send_chunks: [&[u8]; 2] = [b"Hello ", b"World!\0"];
    let mut message = alloc::vec::Vec::new();
    for chunk in send_chunks {
        message.extend_from_slice(chunk);
    }
    assert_eq!(message.len(), 13);
    assert_eq!(&message, b"Hello World!\0");

    let recv_buffer_sizes = [5usize, 4, 40];
    let mut scattered = alloc::vec::Vec::new();
    let mut offset = 0;
    for size in recv_buffer_sizes {
        if offset >= message.len() {
            break;
        }
        let take = core::cmp::min(size, message.len() - offset);
        scattered.push(message[offset..offset + take].to_vec());
        offset += take;
    }
    assert_eq!(scattered[0], b"Hello");
    assert_eq!(scattered[1], b" Wor");
    assert_eq!(scattered[2], b"ld!\0");

    let reply = b"Hi, Main Thread!\0";
    assert_eq!(reply.len(), 17);
    let concatenated: alloc::vec::Vec<u8> = scattered.concat();
    assert_eq!(concatenated, message);
}

/// S2: a `SEND`-only descriptor does not carry `RECEIVE`, the bit
/// `dereference_checked` requires before `sys_receive` ever touches the
/// endpoint's queues.
#[test]
fn s2_send_only_lacks_receive() {
    support::setup();
    let table = DescriptorTable::new();
    let ep = endpoint::construct().expect("endpoint construction");
    table.reserve(0).unwrap();
    table.open(0, Object::Endpoint(ep), Permissions::SEND, 0);

    let err = table.dereference_checked(0, Permissions::RECEIVE).unwrap_err();
    assert_eq!(err, Errno::EPERM);

    let (_, cookie) = table.dereference_checked(0, Permissions::SEND).expect("SEND is held");
    assert_eq!(cookie, 0);
}

/// S4: requesting permissions outside an object kind's `all_permissions`
/// is rejected by `mint` itself before it touches the target table, and a
/// request that does fit installs a possibly-attenuated copy there.
#[test]
fn s4_mint_rejects_bits_outside_all_permissions() {
    support::setup();
    let current = process::construct().expect("current process");
    let target = process::construct().expect("target process");
    let ep = endpoint::construct().expect("endpoint construction");

    const OWNER_FD: usize = 0;
    const TARGET_PROC_FD: usize = 1;
    const MINTED_FD: usize = 5;

    current.descriptors().reserve(OWNER_FD).unwrap();
    current.descriptors().open(OWNER_FD, Object::Endpoint(ep), Permissions::SEND | Permissions::RECEIVE | Permissions::OWNER, 0);
    current.descriptors().reserve(TARGET_PROC_FD).unwrap();
    current.descriptors().open(TARGET_PROC_FD, Object::Process(target.clone()), Permissions::OPEN, 0);

    let too_broad = Permissions::SEND | Permissions::RECEIVE | Permissions::from_bits_retain(0x100);
    let err = mint(&current, OWNER_FD, TARGET_PROC_FD, MINTED_FD, too_broad, 0).unwrap_err();
    assert_eq!(err, Errno::EINVAL);

    mint(&current, OWNER_FD, TARGET_PROC_FD, MINTED_FD, Permissions::SEND, 42).expect("SEND fits inside ALL_PERMISSIONS");
    let (_, cookie) = target.descriptors().dereference_checked(MINTED_FD, Permissions::SEND).expect("minted descriptor is open");
    assert_eq!(cookie, 42);
}

/// S5: once a started thread already has a waiter parked in its join slot,
/// a second `begin_join` sees `Waiting` and is rejected with `ESRCH` rather
/// than being queued behind the first joiner.
#[test]
fn s5_second_join_on_already_waited_thread_is_esrch() {
    support::setup();
    let process = process::construct().expect("process");
    let target = thread::construct(process.clone()).expect("target thread");
    thread::start_thread(&target, 0, 0).expect("start target");

    let first_joiner = thread::construct(process.clone()).expect("first joiner");
    let outcome = Thread::begin_join(&target, first_joiner).expect("first join parks a waiter");
    assert!(matches!(outcome, JoinOutcome::MustBlock));

    let second_joiner = thread::construct(process.clone()).expect("second joiner");
    let err = Thread::begin_join(&target, second_joiner).unwrap_err();
    assert_eq!(err, Errno::ESRCH);
}
