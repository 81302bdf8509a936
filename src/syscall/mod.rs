//! System call dispatch.
//!
//! `dispatch_from_trap` is the single entry point every trap mechanism in
//! `arch::x86::syscall_entry` converges on, whether it arrived through
//! `int 0x80` or SYSENTER. The four-register ABI (`eax` = function
//! number, `ebx`/`ecx`/`edx` = up to three arguments) covers most calls
//! directly; the handful that need more arguments than that take a
//! pointer to a small `#[repr(C)]` args struct in `ebx` instead.

pub mod uaccess;

use alloc::vec::Vec;

use crate::arch::x86::trapframe::TrapFrame;
use crate::ipc;
use crate::lib::error::Errno;
use crate::mm::PageFlags;
use crate::object::descriptor::mint as mint_object;
use crate::object::thread::Thread;
use crate::object::{endpoint, process, thread, Object, ObjRef, Permissions};
use crate::sched;

use uaccess::{copy_from_user, copy_string_from_user, copy_to_user};

/// Function numbers. Chosen for this kernel; nothing outside this module
/// depends on their specific values.
pub mod number {
    pub const REBOOT: u32 = 0;
    pub const PUTS: u32 = 1;
    pub const CREATE_THREAD: u32 = 2;
    pub const START_THREAD: u32 = 3;
    pub const EXIT_THREAD: u32 = 4;
    pub const YIELD_THREAD: u32 = 5;
    pub const AWAIT_THREAD: u32 = 6;
    pub const SET_THREAD_LOCAL: u32 = 7;
    pub const GET_THREAD_LOCAL: u32 = 8;
    pub const GET_ADDRESS_MAP: u32 = 9;
    pub const CREATE_ENDPOINT: u32 = 10;
    pub const CREATE_PROCESS: u32 = 11;
    pub const RECEIVE: u32 = 12;
    pub const REPLY: u32 = 13;
    pub const REPLY_ERROR: u32 = 14;
    pub const SEND: u32 = 15;
    pub const MMAP: u32 = 16;
    pub const MCLONE: u32 = 17;
    pub const DUP: u32 = 18;
    pub const CLOSE: u32 = 19;
    pub const DESTROY: u32 = 20;
    pub const MINT: u32 = 21;
}

/// One chunk of a scatter/gather list: `addr` in the caller's address
/// space, `len` bytes. `SendArgs`' two lists and `ReceiveArgs`' one are
/// each an array of these, read with `read_args`'s sibling
/// [`copy_from_user`].
#[repr(C)]
#[derive(Clone, Copy)]
struct IoVec {
    addr: u32,
    len: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SendArgs {
    endpoint_fd: u32,
    function: u32,
    send_list_ptr: u32,
    send_list_len: u32,
    reply_list_ptr: u32,
    reply_list_len: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ReceiveArgs {
    endpoint_fd: u32,
    buf_list_ptr: u32,
    buf_list_len: u32,
    /// Where the received function number and cookie are written back.
    meta_ptr: u32,
}

/// Function number and cookie `sys_receive` hands back to the caller
/// alongside the scattered message bytes.
#[repr(C)]
#[derive(Clone, Copy)]
struct ReceiveMeta {
    function: u32,
    cookie: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MmapArgs {
    process_fd: u32,
    vaddr: u32,
    size: u32,
    prot: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct McloneArgs {
    src_process_fd: u32,
    dest_process_fd: u32,
    src_addr: u32,
    dest_addr: u32,
    len: u32,
    prot: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MintArgs {
    owner_fd: u32,
    target_process_fd: u32,
    target_fd: u32,
    perms: u32,
    cookie: u32,
}

fn read_args<T: Copy>(ptr: u32) -> Result<T, Errno> {
    let vec = copy_from_user(ptr as *const T, 1)?;
    Ok(vec[0])
}

fn read_iovecs(list_ptr: u32, list_len: u32) -> Result<Vec<IoVec>, Errno> {
    copy_from_user(list_ptr as *const IoVec, list_len as usize)
}

/// Sum of a scatter/gather list's declared lengths, without touching the
/// memory it describes. Used up front to size the receive/reply bound
/// `ipc` enforces before any copying happens.
fn iovec_total_len(list_ptr: u32, list_len: u32) -> Result<usize, Errno> {
    Ok(read_iovecs(list_ptr, list_len)?.iter().map(|v| v.len as usize).sum())
}

/// Gathers a scatter list out of the caller's address space into one
/// contiguous buffer, in list order.
fn gather_from_user(list_ptr: u32, list_len: u32) -> Result<Vec<u8>, Errno> {
    let iovecs = read_iovecs(list_ptr, list_len)?;
    let mut message = Vec::new();
    for iovec in iovecs {
        let chunk: Vec<u8> = copy_from_user(iovec.addr as *const u8, iovec.len as usize)?;
        message.extend_from_slice(&chunk);
    }
    Ok(message)
}

/// Splits `data` across a buffer list, in list order, filling each buffer
/// up to its declared length before moving to the next. Callers must have
/// already checked `data.len()` fits the list's total capacity.
fn scatter_to_user(list_ptr: u32, list_len: u32, data: &[u8]) -> Result<(), Errno> {
    let iovecs = read_iovecs(list_ptr, list_len)?;
    let mut offset = 0usize;
    for iovec in iovecs {
        if offset >= data.len() {
            break;
        }
        let take = core::cmp::min(iovec.len as usize, data.len() - offset);
        copy_to_user(iovec.addr as *mut u8, &data[offset..offset + take])?;
        offset += take;
    }
    Ok(())
}

/// Entry point called by every syscall trap stub. Decodes the function
/// number and arguments from `frame`, dispatches, and writes the result
/// back as `frame`'s return value: a non-negative value on success, or
/// the negated `Errno` on failure, matching `Errno::as_isize`.
pub fn dispatch_from_trap(frame: &mut TrapFrame) {
    let (num, a0, a1, a2) = frame.syscall_args();
    let result = dispatch(num, a0, a1, a2);
    let value = match result {
        Ok(v) => v as i32,
        Err(e) => e.as_isize() as i32,
    };
    frame.set_return_value(value);
}

fn dispatch(num: u32, a0: u32, a1: u32, a2: u32) -> Result<usize, Errno> {
    match num {
        number::REBOOT => sys_reboot(),
        number::PUTS => sys_puts(a0, a1),
        number::CREATE_THREAD => sys_create_thread(a0, a1),
        number::START_THREAD => sys_start_thread(a0, a1, a2),
        number::EXIT_THREAD => sys_exit_thread(a0 as i32),
        number::YIELD_THREAD => sys_yield_thread(),
        number::AWAIT_THREAD => sys_await_thread(a0),
        number::SET_THREAD_LOCAL => sys_set_thread_local(a0, a1),
        number::GET_THREAD_LOCAL => sys_get_thread_local(),
        number::GET_ADDRESS_MAP => sys_get_address_map(a0, a1),
        number::CREATE_ENDPOINT => sys_create_endpoint(a0),
        number::CREATE_PROCESS => sys_create_process(a0),
        number::RECEIVE => sys_receive(a0),
        number::REPLY => sys_reply(a0, a1),
        number::REPLY_ERROR => sys_reply_error(a0),
        number::SEND => sys_send(a0),
        number::MMAP => sys_mmap(a0),
        number::MCLONE => sys_mclone(a0),
        number::DUP => sys_dup(a0, a1),
        number::CLOSE => sys_close(a0),
        number::DESTROY => sys_destroy(a0),
        number::MINT => sys_mint(a0),
        _ => Err(Errno::ENOSYS),
    }
}

fn current_process() -> ObjRef<process::Process> {
    sched::current_thread().process().clone()
}

fn sys_reboot() -> Result<usize, Errno> {
    crate::log_warn!("reboot requested via syscall");
    unsafe {
        // Pulse the keyboard controller's reset line: the standard way to
        // trigger a CPU reset from protected mode with no ACPI support.
        let mut status: u8;
        loop {
            core::arch::asm!("in al, 0x64", out("al") status, options(nomem, nostack));
            if status & 0x02 == 0 {
                break;
            }
        }
        core::arch::asm!("out 0x64, al", in("al") 0xFEu8, options(nomem, nostack));
    }
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

fn sys_puts(ptr: u32, len: u32) -> Result<usize, Errno> {
    let s = copy_string_from_user(ptr as *const u8, len as usize)?;
    crate::log_info!("{}", s);
    Ok(s.len())
}

fn sys_create_thread(fd: u32, target_process_fd: u32) -> Result<usize, Errno> {
    let current = current_process();
    let target = if target_process_fd == 0 {
        current.clone()
    } else {
        let (object, _cookie) = current.descriptors().dereference_checked(target_process_fd as usize, Permissions::CREATE_THREAD)?;
        object.as_process().ok_or(Errno::EBADF)?.clone()
    };

    let new_thread = thread::construct(target)?;
    reserve_and_open(&current, fd as usize, Object::Thread(new_thread), Permissions::START | Permissions::JOIN | Permissions::OWNER)
}

fn sys_start_thread(thread_fd: u32, entry: u32, user_stack: u32) -> Result<usize, Errno> {
    let current = current_process();
    let (object, _cookie) = current.descriptors().dereference_checked(thread_fd as usize, Permissions::START)?;
    let target = object.as_thread().ok_or(Errno::EBADF)?;
    thread::start_thread(target, entry as usize, user_stack as usize)?;
    Ok(0)
}

fn sys_exit_thread(status: i32) -> Result<usize, Errno> {
    sched::exit_current(status)
}

fn sys_yield_thread() -> Result<usize, Errno> {
    sched::yield_current();
    Ok(0)
}

fn sys_await_thread(thread_fd: u32) -> Result<usize, Errno> {
    let current_process = current_process();
    let (object, _cookie) = current_process.descriptors().dereference_checked(thread_fd as usize, Permissions::JOIN)?;
    let target = object.as_thread().ok_or(Errno::EBADF)?;

    let joiner = sched::current_thread();
    match Thread::begin_join(target, joiner)? {
        thread::JoinOutcome::Immediate(status) => Ok(status as usize),
        thread::JoinOutcome::MustBlock => {
            sched::block_current();
            Ok(Thread::collect_join(target) as usize)
        }
    }
}

fn sys_set_thread_local(addr: u32, size: u32) -> Result<usize, Errno> {
    let current = sched::current_thread();
    current.set_thread_local(addr as usize, size as usize);
    crate::arch::x86::context::set_thread_local(addr);
    Ok(0)
}

fn sys_get_thread_local() -> Result<usize, Errno> {
    let (addr, _) = sched::current_thread().thread_local();
    Ok(addr)
}

fn sys_get_address_map(buffer_ptr: u32, buffer_len: u32) -> Result<usize, Errno> {
    // One region descriptor: { base: u32, limit: u32 } describing the
    // process-private range below KLIMIT. A fuller address map (one
    // entry per actual mapping) would need the address space to track
    // per-region bookkeeping this kernel doesn't keep.
    #[repr(C)]
    struct Region {
        base: u32,
        limit: u32,
    }
    if (buffer_len as usize) < core::mem::size_of::<Region>() {
        return Err(Errno::E2BIG);
    }
    let region = Region { base: 0, limit: crate::mm::KLIMIT as u32 };
    copy_to_user(buffer_ptr as *mut Region, &[region])?;
    Ok(core::mem::size_of::<Region>())
}

fn sys_create_endpoint(fd: u32) -> Result<usize, Errno> {
    let current = current_process();
    let ep = endpoint::construct()?;
    reserve_and_open(&current, fd as usize, Object::Endpoint(ep), Permissions::SEND | Permissions::RECEIVE | Permissions::OWNER)
}

fn sys_create_process(fd: u32) -> Result<usize, Errno> {
    let current = current_process();
    let child = process::construct()?;
    reserve_and_open(&current, fd as usize, Object::Process(child), Permissions::CREATE_THREAD | Permissions::MAP | Permissions::OPEN | Permissions::OWNER)
}

fn sys_receive(args_ptr: u32) -> Result<usize, Errno> {
    let args: ReceiveArgs = read_args(args_ptr)?;
    let current = current_process();
    let (object, _cookie) = current.descriptors().dereference_checked(args.endpoint_fd as usize, Permissions::RECEIVE)?;
    let ep = object.as_endpoint().ok_or(Errno::EBADF)?;

    let capacity = iovec_total_len(args.buf_list_ptr, args.buf_list_len)?;
    let (message, function, cookie) = ipc::receive(ep, capacity)?;
    scatter_to_user(args.buf_list_ptr, args.buf_list_len, &message)?;
    copy_to_user(args.meta_ptr as *mut ReceiveMeta, &[ReceiveMeta { function, cookie: cookie as u32 }])?;
    Ok(message.len())
}

fn sys_reply(buf_ptr: u32, buf_len: u32) -> Result<usize, Errno> {
    let message: Vec<u8> = copy_from_user(buf_ptr as *const u8, buf_len as usize)?;
    ipc::reply(message)?;
    Ok(0)
}

fn sys_reply_error(errno: u32) -> Result<usize, Errno> {
    let errno = Errno::from_negated_i32(-(errno as i32));
    ipc::reply_error(errno)?;
    Ok(0)
}

fn sys_send(args_ptr: u32) -> Result<usize, Errno> {
    let args: SendArgs = read_args(args_ptr)?;
    let current = current_process();
    let (object, cookie) = current.descriptors().dereference_checked(args.endpoint_fd as usize, Permissions::SEND)?;
    let ep = object.as_endpoint().ok_or(Errno::EBADF)?;

    let message = gather_from_user(args.send_list_ptr, args.send_list_len)?;
    let reply_capacity = iovec_total_len(args.reply_list_ptr, args.reply_list_len)?;
    let reply = ipc::send(ep, args.function, cookie, message, reply_capacity)?;
    scatter_to_user(args.reply_list_ptr, args.reply_list_len, &reply)?;
    Ok(reply.len())
}

fn sys_mmap(args_ptr: u32) -> Result<usize, Errno> {
    let args: MmapArgs = read_args(args_ptr)?;
    let current = current_process();
    let (object, _cookie) = current.descriptors().dereference_checked(args.process_fd as usize, Permissions::MAP)?;
    let target = object.as_process().ok_or(Errno::EBADF)?;

    let flags = prot_to_flags(args.prot);
    let pages = (args.size as usize).div_ceil(crate::mm::PAGE_SIZE);
    let mut space_guard = target.address_space().lock();
    let space = space_guard.as_mut().ok_or(Errno::EINVAL)?;

    for i in 0..pages {
        let vaddr = args.vaddr as usize + i * crate::mm::PAGE_SIZE;
        let page = crate::mm::page_alloc::alloc().ok_or(Errno::ENOMEM)?;
        let paddr = match crate::mm::lookup_kernel_paddr(page as usize) {
            Some(paddr) => paddr,
            None => {
                crate::mm::page_alloc::free(page);
                return Err(Errno::ENOMEM);
            }
        };
        if let Err(e) = crate::mm::map_user(space, vaddr, paddr, flags) {
            crate::mm::page_alloc::free(page);
            return Err(e);
        }
    }
    Ok(0)
}

fn sys_mclone(args_ptr: u32) -> Result<usize, Errno> {
    let args: McloneArgs = read_args(args_ptr)?;
    let current = current_process();

    let src_object = current.descriptors().dereference(args.src_process_fd as usize)?;
    let src_process = src_object.as_process().ok_or(Errno::EBADF)?;
    let (dest_object, _cookie) = current.descriptors().dereference_checked(args.dest_process_fd as usize, Permissions::MAP)?;
    let dest_process = dest_object.as_process().ok_or(Errno::EBADF)?;

    let flags = prot_to_flags(args.prot);
    let src_guard = src_process.address_space().lock();
    let src_space = src_guard.as_ref().ok_or(Errno::EINVAL)?;
    let mut dest_guard = dest_process.address_space().lock();
    let dest_space = dest_guard.as_mut().ok_or(Errno::EINVAL)?;

    crate::mm::clone_range(dest_space, src_space, args.dest_addr as usize, args.src_addr as usize, args.len as usize, flags)?;
    Ok(0)
}

fn sys_dup(fd: u32, new_fd: u32) -> Result<usize, Errno> {
    current_process().descriptors().dup(fd as usize, new_fd as usize)?;
    Ok(0)
}

fn sys_close(fd: u32) -> Result<usize, Errno> {
    current_process().descriptors().close(fd as usize)?;
    Ok(0)
}

fn sys_destroy(fd: u32) -> Result<usize, Errno> {
    current_process().descriptors().destroy_referenced(fd as usize)?;
    Ok(0)
}

fn sys_mint(args_ptr: u32) -> Result<usize, Errno> {
    let args: MintArgs = read_args(args_ptr)?;
    let current = current_process();
    let perms = Permissions::from_bits(args.perms).ok_or(Errno::EINVAL)?;
    mint_object(&current, args.owner_fd as usize, args.target_process_fd as usize, args.target_fd as usize, perms, args.cookie as usize)?;
    Ok(0)
}

/// Reserves the caller-supplied slot `fd` and installs `object` into it.
/// `fd` names the slot the way the rest of the descriptor-table ABI does
/// (`DUP`, `CLOSE`, `MINT`, ...); callers choose their own layout rather
/// than learning it back from the kernel.
fn reserve_and_open(process: &process::Process, fd: usize, object: Object, perms: Permissions) -> Result<usize, Errno> {
    let descriptors = process.descriptors();
    descriptors.reserve(fd)?;
    descriptors.open(fd, object, perms, 0);
    Ok(fd)
}

fn prot_to_flags(prot: u32) -> PageFlags {
    const PROT_WRITE: u32 = 1 << 0;
    if prot & PROT_WRITE != 0 {
        PageFlags::user_rw()
    } else {
        PageFlags::user_ro()
    }
}
