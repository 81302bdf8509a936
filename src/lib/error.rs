//! POSIX-style errno values exposed across the system call boundary.

/// Errno values returned (negated) from a system call. This is the exact
/// set the ABI uses; there is no not-yet-classified catch-all because every
/// failure path in this kernel is expected to name one of these explicitly.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EPERM = 1,
    ESRCH = 3,
    EIO = 5,
    E2BIG = 7,
    EBADF = 9,
    EAGAIN = 11,
    ENOMEM = 12,
    EINVAL = 22,
    EPIPE = 32,
    ENOSYS = 38,
}

impl Errno {
    /// Value as it is written into the syscall return register: negated.
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }

    pub fn description(self) -> &'static str {
        match self {
            Errno::EPERM => "operation not permitted",
            Errno::ESRCH => "no such process or thread",
            Errno::EIO => "I/O error",
            Errno::E2BIG => "argument list too long",
            Errno::EBADF => "bad descriptor",
            Errno::EAGAIN => "resource temporarily unavailable",
            Errno::ENOMEM => "out of memory",
            Errno::EINVAL => "invalid argument",
            Errno::EPIPE => "broken pipe",
            Errno::ENOSYS => "function not implemented",
        }
    }

    /// Recover an `Errno` from a negated return value, e.g. -9 -> EBADF.
    /// Unrecognized magnitudes fall back to EINVAL, since every internal
    /// failure path is supposed to produce one of the values above.
    pub fn from_negated_i32(value: i32) -> Self {
        match -value {
            1 => Errno::EPERM,
            3 => Errno::ESRCH,
            5 => Errno::EIO,
            7 => Errno::E2BIG,
            9 => Errno::EBADF,
            11 => Errno::EAGAIN,
            12 => Errno::ENOMEM,
            32 => Errno::EPIPE,
            38 => Errno::ENOSYS,
            _ => Errno::EINVAL,
        }
    }
}

pub type Result<T> = core::result::Result<T, Errno>;
