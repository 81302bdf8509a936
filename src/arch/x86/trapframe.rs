//! The register state saved on kernel entry.
//!
//! Two distinct shapes are needed here, not one. The `x86-interrupt`
//! calling convention rustc generates for the exception handlers in `idt`
//! controls its own frame layout and only exposes what the CPU itself
//! pushes (`eip`/`cs`/`eflags`, and conditionally `esp`/`ss` on a privilege
//! change) — [`ExceptionFrame`] mirrors exactly that. The syscall gate is
//! a hand-written naked stub instead, free to push whatever it likes
//! before calling into Rust, so [`TrapFrame`] carries the full
//! general-purpose register set the syscall argument convention needs.

use core::fmt;

/// Frame shape produced by the `x86-interrupt` ABI. There is no demand
/// paging or user-space fault recovery in this kernel, so every exception
/// handler does with this is log it and stop.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExceptionFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl fmt::Debug for ExceptionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (eip, cs, eflags) = (self.eip, self.cs, self.eflags);
        f.debug_struct("ExceptionFrame")
            .field("eip", &format_args!("{:#010x}", eip))
            .field("cs", &cs)
            .field("eflags", &format_args!("{:#010x}", eflags))
            .finish()
    }
}

/// Full register state saved by the `int 0x80` / SYSENTER entry stubs in
/// `syscall_entry`. Field order matches the push sequence there, last
/// pushed first: the general-purpose registers the stub saves explicitly,
/// followed by the ring-transition frame (`eip`, `cs`, `eflags`, `esp`,
/// `ss`) in the order the CPU itself would push them for `int 0x80`, with
/// SYSENTER synthesizing the equivalent values by hand since the CPU
/// doesn't push anything on that path.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// The four-register system call ABI: `eax` carries the function
    /// number, `ebx`/`ecx`/`edx` the three arguments. Mirrors the classic
    /// `int 0x80` convention rather than inventing a new one.
    pub fn syscall_args(&self) -> (u32, u32, u32, u32) {
        (self.eax, self.ebx, self.ecx, self.edx)
    }

    pub fn set_return_value(&mut self, value: i32) {
        self.eax = value as u32;
    }
}

impl fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (eax, ebx, ecx, edx, esi, edi, ebp) =
            (self.eax, self.ebx, self.ecx, self.edx, self.esi, self.edi, self.ebp);
        let (eip, cs, eflags) = (self.eip, self.cs, self.eflags);
        f.debug_struct("TrapFrame")
            .field("eax", &format_args!("{:#010x}", eax))
            .field("ebx", &format_args!("{:#010x}", ebx))
            .field("ecx", &format_args!("{:#010x}", ecx))
            .field("edx", &format_args!("{:#010x}", edx))
            .field("esi", &format_args!("{:#010x}", esi))
            .field("edi", &format_args!("{:#010x}", edi))
            .field("ebp", &format_args!("{:#010x}", ebp))
            .field("eip", &format_args!("{:#010x}", eip))
            .field("cs", &cs)
            .field("eflags", &format_args!("{:#010x}", eflags))
            .finish()
    }
}

/// The common handler for every unrecovered CPU exception. An exception
/// reaching this point is always a kernel or process bug; the only
/// correct response is to stop.
pub fn fatal_exception(vector: usize, frame: &ExceptionFrame, error_code: Option<u32>) -> ! {
    panic!(
        "unhandled CPU exception {} at eip={:#010x}, error_code={:?}, frame={:?}",
        vector, frame.eip, error_code, frame
    );
}
