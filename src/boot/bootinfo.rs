//! Boot information structure handed in by the (external) setup stage.
//!
//! The setup code — real-mode/assembly, not part of this kernel — builds
//! this structure in memory before jumping to the kernel entry point,
//! exactly as a bootloader hands an ELF kernel its command line and memory
//! map. `validate` is the kernel's only defense against a malformed or
//! version-skewed setup stage: everything downstream (the physical page
//! allocator's seed, the initial address space, the loader's argv/environ)
//! assumes the fields here are trustworthy once validation passes.

use core::ptr;

/// Magic value the setup stage stamps into `setup_signature`. Chosen for
/// this kernel; nothing outside boot validation depends on its exact bits.
pub const SETUP_MAGIC: u32 = 0x4a49_4e55; // "JINU"

/// One entry of the firmware-provided memory map, in the BIOS/ACPI
/// "address range descriptor" layout common to `INT 15h, E820h` and the
/// ACPI system address map.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AcpiAddrRange {
    pub base: u64,
    pub size: u64,
    pub range_type: u32,
}

impl AcpiAddrRange {
    pub const TYPE_USABLE: u32 = 1;

    pub fn is_usable(&self) -> bool {
        self.range_type == Self::TYPE_USABLE
    }
}

/// The structure itself, laid out the way the setup stage (assembly) must
/// write it: flat `u32` fields rather than pointers, since the kernel reads
/// it before any page table of its own is live.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BootInfo {
    pub kernel_start: u32,
    pub kernel_size: u32,
    pub loader_start: u32,
    pub loader_size: u32,
    pub image_start: u32,
    pub image_top: u32,
    pub ramdisk_start: u32,
    pub ramdisk_size: u32,
    pub acpi_addr_map: u32,
    pub addr_map_entries: u32,
    pub cmdline: u32,
    pub boot_heap: u32,
    pub boot_end: u32,
    pub page_tables: u32,
    pub page_directory: u32,
    pub cr3: u32,
    pub setup_signature: u32,
}

fn page_offset_of(addr: u32) -> u32 {
    addr & (crate::mm::PAGE_SIZE as u32 - 1)
}

/// Returns a description of the first failing check, or `None` if `info`
/// is well formed enough for the rest of boot to trust.
fn validation_error(info: &BootInfo) -> Option<&'static str> {
    if info.setup_signature != SETUP_MAGIC {
        return Some("bad setup header signature");
    }
    if page_offset_of(info.image_start) != 0 {
        return Some("kernel image start is not aligned on a page boundary");
    }
    if page_offset_of(info.image_top) != 0 {
        return Some("top of kernel image is not aligned on a page boundary");
    }
    if page_offset_of(info.kernel_start) != 0 {
        return Some("kernel ELF binary is not aligned on a page boundary");
    }
    None
}

/// Validates `info` in place, panicking with a specific diagnostic on the
/// first check that fails. Called once, at the very start of boot, before
/// anything downstream reads a field of `info`.
pub fn validate(info: &BootInfo) {
    if let Some(reason) = validation_error(info) {
        crate::log_error!("boot information validation error: {}", reason);
        panic!("boot information structure is invalid: {}", reason);
    }
}

/// Address and size of the kernel's own ELF image, as handed in by the
/// setup stage. Panics if the image is missing or too small to even hold
/// an ELF header — this is a malformed boot image, not a runtime fault.
pub fn kernel_exec_file(info: &BootInfo) -> (u32, u32) {
    if info.kernel_start == 0 {
        panic!("malformed boot image: no kernel ELF binary");
    }
    if (info.kernel_size as usize) < core::mem::size_of::<u32>() * 8 {
        panic!("kernel too small to be an ELF binary");
    }
    (info.kernel_start, info.kernel_size)
}

/// Address and size of the first user-space program (the loader), which
/// the kernel starts but does not otherwise understand the internals of.
pub fn loader_exec_file(info: &BootInfo) -> (u32, u32) {
    if info.loader_start == 0 {
        panic!("malformed boot image: no user space loader ELF binary");
    }
    if (info.loader_size as usize) < core::mem::size_of::<u32>() * 8 {
        panic!("user space loader too small to be an ELF binary");
    }
    (info.loader_start, info.loader_size)
}

/// Address and size of the initial RAM disk, if the loader needs one.
pub fn ramdisk(info: &BootInfo) -> Option<(u32, u32)> {
    if info.ramdisk_start == 0 || info.ramdisk_size == 0 {
        return None;
    }
    Some((info.ramdisk_start, info.ramdisk_size))
}

/// Iterates the firmware memory map's usable entries, in physical address
/// order, for `mm::page_alloc::seed` to fold in at boot.
///
/// # Safety
/// `info.acpi_addr_map` must point at `info.addr_map_entries` contiguous,
/// already-mapped `AcpiAddrRange` entries, as the setup stage guarantees.
pub unsafe fn usable_memory_ranges(info: &BootInfo) -> impl Iterator<Item = AcpiAddrRange> + '_ {
    let base = info.acpi_addr_map as *const AcpiAddrRange;
    let count = info.addr_map_entries as usize;
    (0..count).map(move |i| unsafe { ptr::read(base.add(i)) }).filter(|r| r.is_usable())
}

/// The raw `key=value` command-line bytes, as a UTF-8 string. Panics on
/// invalid UTF-8: the setup stage builds this string itself, from an ASCII
/// source, so anything else indicates boot-time corruption.
///
/// # Safety
/// `info.cmdline` must point at a NUL-terminated string the setup stage
/// placed in already-mapped memory.
pub unsafe fn cmdline_str(info: &BootInfo) -> &'static str {
    if info.cmdline == 0 {
        return "";
    }
    let ptr = info.cmdline as *const u8;
    let mut len = 0usize;
    unsafe {
        while ptr::read(ptr.add(len)) != 0 {
            len += 1;
        }
        let bytes = core::slice::from_raw_parts(ptr, len);
        core::str::from_utf8(bytes).expect("boot command line is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BootInfo {
        BootInfo {
            kernel_start: 0x1000,
            kernel_size: 0x2000,
            loader_start: 0x10000,
            loader_size: 0x1000,
            image_start: 0x0,
            image_top: 0x4000,
            ramdisk_start: 0,
            ramdisk_size: 0,
            acpi_addr_map: 0,
            addr_map_entries: 0,
            cmdline: 0,
            boot_heap: 0,
            boot_end: 0,
            page_tables: 0,
            page_directory: 0,
            cr3: 0,
            setup_signature: SETUP_MAGIC,
        }
    }

    #[test]
    fn well_formed_struct_validates() {
        assert!(validation_error(&sample()).is_none());
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut info = sample();
        info.setup_signature = 0;
        assert_eq!(validation_error(&info), Some("bad setup header signature"));
    }

    #[test]
    fn misaligned_image_start_is_rejected() {
        let mut info = sample();
        info.image_start = 1;
        assert_eq!(validation_error(&info), Some("kernel image start is not aligned on a page boundary"));
    }

    #[test]
    fn misaligned_kernel_start_is_rejected() {
        let mut info = sample();
        info.kernel_start = 0x1001;
        assert_eq!(validation_error(&info), Some("kernel ELF binary is not aligned on a page boundary"));
    }

    #[test]
    fn missing_ramdisk_is_none() {
        assert!(ramdisk(&sample()).is_none());
    }
}
