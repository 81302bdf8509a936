//! User space memory access helpers.
//!
//! No demand paging or copy-on-write exists in this kernel, so "copying
//! from user space" is a direct read once the pointer is known to lie
//! below [`KLIMIT`](crate::mm::KLIMIT) — the boundary below which every
//! process's address space is private to it, above which the single
//! shared kernel mapping lives. These helpers exist so every syscall
//! handler checks that boundary the same way instead of each rolling its
//! own comparison.

use alloc::string::String;
use alloc::vec::Vec;
use core::ptr;

use crate::lib::error::Errno;
use crate::mm::KLIMIT;

/// Copies `count` elements of `T` out of user space into a fresh `Vec`.
pub fn copy_from_user<T: Copy>(user_ptr: *const T, count: usize) -> Result<Vec<T>, Errno> {
    let total_size = count.checked_mul(core::mem::size_of::<T>()).ok_or(Errno::EINVAL)?;
    validate_user_range(user_ptr as usize, total_size)?;

    if count == 0 {
        return Ok(Vec::new());
    }

    let mut buf = Vec::with_capacity(count);
    unsafe {
        ptr::copy_nonoverlapping(user_ptr, buf.as_mut_ptr(), count);
        buf.set_len(count);
    }
    Ok(buf)
}

/// Copies `data` into a user-space buffer at `user_ptr`.
pub fn copy_to_user<T: Copy>(user_ptr: *mut T, data: &[T]) -> Result<(), Errno> {
    let total_size = data.len() * core::mem::size_of::<T>();
    validate_user_range(user_ptr as usize, total_size)?;

    if data.is_empty() {
        return Ok(());
    }
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), user_ptr, data.len()) };
    Ok(())
}

/// Reads a NUL-terminated string from user space, up to `max_len` bytes.
pub fn copy_string_from_user(user_ptr: *const u8, max_len: usize) -> Result<String, Errno> {
    validate_user_range(user_ptr as usize, max_len)?;

    let mut bytes = Vec::new();
    unsafe {
        for i in 0..max_len {
            let byte = ptr::read(user_ptr.add(i));
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).map_err(|_| Errno::EINVAL)
}

fn validate_user_range(addr: usize, len: usize) -> Result<(), Errno> {
    if addr == 0 {
        return Err(Errno::EINVAL);
    }
    let end = addr.checked_add(len).ok_or(Errno::EINVAL)?;
    if addr >= KLIMIT || end > KLIMIT {
        return Err(Errno::EINVAL);
    }
    Ok(())
}

pub fn validate_user_read(ptr: *const u8, len: usize) -> Result<(), Errno> {
    validate_user_range(ptr as usize, len)
}

pub fn validate_user_write(ptr: *mut u8, len: usize) -> Result<(), Errno> {
    validate_user_range(ptr as usize, len)
}
