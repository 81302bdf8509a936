//! Per-process address spaces and the kernel's own shared mappings.
//!
//! The address space below [`KLIMIT`] is private to each process; at and
//! above it, every address space must see identical mappings, so the
//! kernel half is never copied page table by page table. Instead every
//! process's top-level table has its kernel-range entries pointed at the
//! very same physical page-table frames the kernel itself uses: installing
//! a kernel mapping once makes it visible everywhere.

use core::ptr;

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;

use crate::lib::error::Errno;
use crate::{log_info, log_warn};

use super::page::{PhysAddr, PAGE_SIZE};
use super::page_alloc;
use super::paging::{self, NoPaeEntry, NoPaeTable, PaeEntry, PaeTable, PageFlags};

/// User/kernel split. Below this is private per-process address space;
/// at and above it, kernel mappings shared by every process.
pub const KLIMIT: usize = 0xC000_0000;

const NOPAE_KLIMIT_DIR: usize = NoPaeTable::dir_index(KLIMIT);
const PAE_KLIMIT_PDPT: usize = PaeTable::pdpt_index(KLIMIT);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PagingMode {
    NoPae,
    Pae,
}

static PAGING_MODE: Mutex<Option<PagingMode>> = Mutex::new(None);

/// Decides PAE vs non-PAE once, at boot, from CPU features and the command
/// line. `pae=require` on the command line makes a missing PAE/NX
/// capability fatal instead of silently falling back.
pub fn decide_paging_mode(cpu: &crate::arch::x86::cpu::CpuFeatures, cmdline_pae: Option<&str>) -> PagingMode {
    let mode = if cpu.has_pae {
        PagingMode::Pae
    } else {
        if cmdline_pae == Some("require") {
            panic!("pae=require given but CPU does not support PAE");
        }
        PagingMode::NoPae
    };
    *PAGING_MODE.lock() = Some(mode);
    log_info!("paging mode: {:?}", mode);
    mode
}

fn paging_mode() -> PagingMode {
    PAGING_MODE.lock().expect("decide_paging_mode not called yet")
}

/// Shared kernel directory-level entries, indexed exactly like a real
/// directory would be. Non-PAE stores individual directory entries (each
/// pointing at a separate leaf page table frame); PAE stores the handful
/// of PDPT entries that point at whole shared kernel page directories.
struct KernelHalf {
    nopae_dir: Box<NoPaeTable>,
    pae_dir: Box<PaeTable>,
    pae_dir_paddr: PhysAddr,
}

static KERNEL_HALF: Mutex<Option<KernelHalf>> = Mutex::new(None);

fn table_paddr(table: *const u8) -> PhysAddr {
    // Every page-table frame in this kernel comes from the identity-mapped
    // low-memory region handed out by `page_alloc`, so the kernel virtual
    // address of a table frame equals its physical address.
    PhysAddr::new(table as usize)
}

fn alloc_table_frame() -> Option<*mut u8> {
    page_alloc::alloc()
}

/// Builds the very first address space from the kernel image and the boot
/// page tables. Called once, before any process exists.
pub fn create_initial() -> AddressSpace {
    let nopae_dir = Box::new(NoPaeTable::empty());
    let pae_dir = Box::new(PaeTable::empty());
    let pae_dir_paddr = table_paddr(pae_dir.as_ref() as *const _ as *const u8);

    *KERNEL_HALF.lock() = Some(KernelHalf { nopae_dir, pae_dir, pae_dir_paddr });

    create().expect("failed to allocate the initial address space")
}

pub struct AddressSpace {
    directory: Directory,
    cr3: PhysAddr,
}

enum Directory {
    NoPae(Box<NoPaeTable>),
    Pae(Box<PaeTable>),
}

impl AddressSpace {
    pub fn cr3(&self) -> PhysAddr {
        self.cr3
    }
}

/// Allocates a new top-level table with the kernel half already installed.
/// Under PAE this is a fresh PDPT (slab-cached in a full implementation;
/// here, one page-table frame); under non-PAE, a fresh page directory.
pub fn create() -> Result<AddressSpace, Errno> {
    match paging_mode() {
        PagingMode::NoPae => {
            let frame = alloc_table_frame().ok_or(Errno::ENOMEM)?;
            let dir = unsafe { &mut *(frame as *mut NoPaeTable) };
            *dir = NoPaeTable::empty();

            let half = KERNEL_HALF.lock();
            if let Some(half) = half.as_ref() {
                for i in NOPAE_KLIMIT_DIR..super::paging::NOPAE_ENTRIES {
                    dir.entries[i] = half.nopae_dir.entries[i];
                }
            }
            let paddr = table_paddr(frame);
            Ok(AddressSpace { directory: Directory::NoPae(unsafe { Box::from_raw(frame as *mut NoPaeTable) }), cr3: paddr })
        }
        PagingMode::Pae => {
            let frame = alloc_table_frame().ok_or(Errno::ENOMEM)?;
            let pdpt = unsafe { &mut *(frame as *mut PaeTable) };
            *pdpt = PaeTable::empty();

            let half = KERNEL_HALF.lock();
            if let Some(half) = half.as_ref() {
                pdpt.entries[PAE_KLIMIT_PDPT] = PaeEntry::new(half.pae_dir_paddr, PageFlags::kernel_rw());
            }
            let paddr = table_paddr(frame);
            Ok(AddressSpace { directory: Directory::Pae(unsafe { Box::from_raw(frame as *mut PaeTable) }), cr3: paddr })
        }
    }
}

/// Tears down the user half of an address space: every page table below
/// [`KLIMIT`] is walked and its frame returned to the page allocator. The
/// kernel half is shared and must never be freed here.
pub fn destroy(space: AddressSpace) {
    match &space.directory {
        Directory::NoPae(dir) => {
            for i in 0..NOPAE_KLIMIT_DIR {
                let entry = dir.entries[i];
                if entry.is_present() {
                    let pt_vaddr = entry.addr().as_usize() as *mut u8;
                    page_alloc::free(pt_vaddr);
                }
            }
        }
        Directory::Pae(pdpt) => {
            for i in 0..PAE_KLIMIT_PDPT {
                let entry = pdpt.entries[i];
                if entry.is_present() {
                    let dir_vaddr = entry.addr().as_usize() as *mut u8;
                    page_alloc::free(dir_vaddr);
                }
            }
        }
    }
    // The top-level table frame itself also came from `page_alloc`; letting
    // `space` drop here would run `Box`'s deallocator against the global
    // allocator instead, so reclaim it the same way the children were.
    let top_vaddr = space.cr3.as_usize() as *mut u8;
    core::mem::forget(space);
    page_alloc::free(top_vaddr);
}

/// Loads `space` into CR3 and records it as the running CPU's current
/// address space.
pub fn switch(space: &AddressSpace) {
    unsafe {
        x86::controlregs::cr3_write(space.cr3.as_usize() as u64);
    }
    CURRENT_CR3.lock().replace(space.cr3);
}

static CURRENT_CR3: Mutex<Option<PhysAddr>> = Mutex::new(None);

pub fn current_cr3() -> Option<PhysAddr> {
    *CURRENT_CR3.lock()
}

fn install_entry_nopae(dir: &mut NoPaeTable, vaddr: usize, paddr: PhysAddr, flags: PageFlags) -> Result<(), Errno> {
    let di = NoPaeTable::dir_index(vaddr);
    let ti = NoPaeTable::table_index(vaddr);

    if !dir.entries[di].is_present() {
        let frame = alloc_table_frame().ok_or(Errno::ENOMEM)?;
        unsafe { ptr::write_bytes(frame, 0, PAGE_SIZE) };
        dir.entries[di] = NoPaeEntry::new(table_paddr(frame), PageFlags::kernel_rw() | PageFlags::USER);
    }

    let pt = unsafe { &mut *(dir.entries[di].addr().as_usize() as *mut NoPaeTable) };
    pt.entries[ti] = NoPaeEntry::new(paddr, flags);
    paging::flush_tlb_entry(vaddr);
    Ok(())
}

fn remove_entry_nopae(dir: &mut NoPaeTable, vaddr: usize) {
    let di = NoPaeTable::dir_index(vaddr);
    let ti = NoPaeTable::table_index(vaddr);
    if dir.entries[di].is_present() {
        let pt = unsafe { &mut *(dir.entries[di].addr().as_usize() as *mut NoPaeTable) };
        pt.entries[ti] = NoPaeEntry::empty();
        paging::flush_tlb_entry(vaddr);
    }
}

fn install_entry_pae(pdpt: &mut PaeTable, vaddr: usize, paddr: PhysAddr, flags: PageFlags) -> Result<(), Errno> {
    let pi = PaeTable::pdpt_index(vaddr);
    let di = PaeTable::dir_index(vaddr);
    let ti = PaeTable::table_index(vaddr);

    if !pdpt.entries[pi].is_present() {
        let frame = alloc_table_frame().ok_or(Errno::ENOMEM)?;
        unsafe { ptr::write_bytes(frame, 0, PAGE_SIZE) };
        pdpt.entries[pi] = PaeEntry::new(table_paddr(frame), PageFlags::kernel_rw() | PageFlags::USER);
    }
    let dir = unsafe { &mut *(pdpt.entries[pi].addr().as_usize() as *mut PaeTable) };

    if !dir.entries[di].is_present() {
        let frame = alloc_table_frame().ok_or(Errno::ENOMEM)?;
        unsafe { ptr::write_bytes(frame, 0, PAGE_SIZE) };
        dir.entries[di] = PaeEntry::new(table_paddr(frame), PageFlags::kernel_rw() | PageFlags::USER);
    }
    let pt = unsafe { &mut *(dir.entries[di].addr().as_usize() as *mut PaeTable) };
    pt.entries[ti] = PaeEntry::new(paddr, flags);
    paging::flush_tlb_entry(vaddr);
    Ok(())
}

fn remove_entry_pae(pdpt: &mut PaeTable, vaddr: usize) {
    let pi = PaeTable::pdpt_index(vaddr);
    let di = PaeTable::dir_index(vaddr);
    let ti = PaeTable::table_index(vaddr);
    if !pdpt.entries[pi].is_present() {
        return;
    }
    let dir = unsafe { &mut *(pdpt.entries[pi].addr().as_usize() as *mut PaeTable) };
    if !dir.entries[di].is_present() {
        return;
    }
    let pt = unsafe { &mut *(dir.entries[di].addr().as_usize() as *mut PaeTable) };
    pt.entries[ti] = PaeEntry::empty();
    paging::flush_tlb_entry(vaddr);
}

/// Installs a kernel mapping. Since every address space shares the kernel
/// half's page-table frames, this is visible system-wide the moment it
/// returns; there is no per-process propagation step.
pub fn map_kernel(vaddr: usize, paddr: PhysAddr, flags: PageFlags) -> Result<(), Errno> {
    if vaddr < KLIMIT {
        return Err(Errno::EINVAL);
    }
    let mut half = KERNEL_HALF.lock();
    let half = half.as_mut().expect("map_kernel before create_initial");
    match paging_mode() {
        PagingMode::NoPae => install_entry_nopae(&mut half.nopae_dir, vaddr, paddr, flags),
        PagingMode::Pae => {
            let di = PaeTable::dir_index(vaddr);
            let ti = PaeTable::table_index(vaddr);
            if !half.pae_dir.entries[di].is_present() {
                let frame = alloc_table_frame().ok_or(Errno::ENOMEM)?;
                unsafe { ptr::write_bytes(frame, 0, PAGE_SIZE) };
                half.pae_dir.entries[di] = PaeEntry::new(table_paddr(frame), PageFlags::kernel_rw());
            }
            let pt = unsafe { &mut *(half.pae_dir.entries[di].addr().as_usize() as *mut PaeTable) };
            pt.entries[ti] = PaeEntry::new(paddr, flags);
            paging::flush_tlb_entry(vaddr);
            Ok(())
        }
    }
}

pub fn unmap_kernel(vaddr: usize) {
    if vaddr < KLIMIT {
        log_warn!("unmap_kernel called on user address {:#x}", vaddr);
        return;
    }
    let mut half = KERNEL_HALF.lock();
    let Some(half) = half.as_mut() else { return };
    match paging_mode() {
        PagingMode::NoPae => remove_entry_nopae(&mut half.nopae_dir, vaddr),
        PagingMode::Pae => {
            let di = PaeTable::dir_index(vaddr);
            let ti = PaeTable::table_index(vaddr);
            if half.pae_dir.entries[di].is_present() {
                let pt = unsafe { &mut *(half.pae_dir.entries[di].addr().as_usize() as *mut PaeTable) };
                pt.entries[ti] = PaeEntry::empty();
                paging::flush_tlb_entry(vaddr);
            }
        }
    }
}

/// Installs a userspace mapping in `space`. Only reachable from the system
/// call path that validated `vaddr` and `paddr` already; an out-of-range or
/// misaligned address here is a kernel bug, not a recoverable error.
pub fn map_user(space: &mut AddressSpace, vaddr: usize, paddr: PhysAddr, flags: PageFlags) -> Result<(), Errno> {
    debug_assert!(vaddr < KLIMIT, "map_user called on kernel address");
    match &mut space.directory {
        Directory::NoPae(dir) => install_entry_nopae(dir, vaddr, paddr, flags),
        Directory::Pae(pdpt) => install_entry_pae(pdpt, vaddr, paddr, flags),
    }
}

pub fn unmap_user(space: &mut AddressSpace, vaddr: usize) {
    debug_assert!(vaddr < KLIMIT, "unmap_user called on kernel address");
    match &mut space.directory {
        Directory::NoPae(dir) => remove_entry_nopae(dir, vaddr),
        Directory::Pae(pdpt) => remove_entry_pae(pdpt, vaddr),
    }
}

/// Inverts a kernel mapping: given a kernel virtual address, finds the
/// physical frame it currently maps to, if any.
pub fn lookup_kernel_paddr(vaddr: usize) -> Option<PhysAddr> {
    if vaddr < KLIMIT {
        return None;
    }
    let half = KERNEL_HALF.lock();
    let half = half.as_ref()?;
    match paging_mode() {
        PagingMode::NoPae => {
            let di = NoPaeTable::dir_index(vaddr);
            let ti = NoPaeTable::table_index(vaddr);
            let entry = half.nopae_dir.entries[di];
            if !entry.is_present() {
                return None;
            }
            let pt = unsafe { &*(entry.addr().as_usize() as *const NoPaeTable) };
            pt.entries[ti].is_present().then(|| pt.entries[ti].addr())
        }
        PagingMode::Pae => {
            let di = PaeTable::dir_index(vaddr);
            let ti = PaeTable::table_index(vaddr);
            let entry = half.pae_dir.entries[di];
            if !entry.is_present() {
                return None;
            }
            let pt = unsafe { &*(entry.addr().as_usize() as *const PaeTable) };
            pt.entries[ti].is_present().then(|| pt.entries[ti].addr())
        }
    }
}

/// The engine behind `mclone`: installs the same physical frame in
/// `dest` at `dest_addr` for every page mapped in `src` starting at
/// `src_addr`, for `len` bytes, with the specified protection. `src` and
/// `dest` may be the same address space; overlapping source and
/// destination ranges are resolved by reading every source mapping before
/// any destination mapping is installed.
pub fn clone_range(
    dest: &mut AddressSpace,
    src: &AddressSpace,
    dest_addr: usize,
    src_addr: usize,
    len: usize,
    flags: PageFlags,
) -> Result<(), Errno> {
    if !PhysAddr::new(src_addr).is_page_aligned() || !PhysAddr::new(dest_addr).is_page_aligned() {
        return Err(Errno::EINVAL);
    }
    let pages = len.div_ceil(PAGE_SIZE);

    let mut frames: Vec<Option<PhysAddr>> = Vec::with_capacity(pages);
    for i in 0..pages {
        let vaddr = src_addr + i * PAGE_SIZE;
        let frame = match &src.directory {
            Directory::NoPae(dir) => {
                let di = NoPaeTable::dir_index(vaddr);
                let ti = NoPaeTable::table_index(vaddr);
                if !dir.entries[di].is_present() {
                    None
                } else {
                    let pt = unsafe { &*(dir.entries[di].addr().as_usize() as *const NoPaeTable) };
                    pt.entries[ti].is_present().then(|| pt.entries[ti].addr())
                }
            }
            Directory::Pae(pdpt) => {
                let pi = PaeTable::pdpt_index(vaddr);
                let di = PaeTable::dir_index(vaddr);
                let ti = PaeTable::table_index(vaddr);
                if !pdpt.entries[pi].is_present() {
                    None
                } else {
                    let dir = unsafe { &*(pdpt.entries[pi].addr().as_usize() as *const PaeTable) };
                    if !dir.entries[di].is_present() {
                        None
                    } else {
                        let pt = unsafe { &*(dir.entries[di].addr().as_usize() as *const PaeTable) };
                        pt.entries[ti].is_present().then(|| pt.entries[ti].addr())
                    }
                }
            }
        };
        frames.push(frame);
    }

    for (i, frame) in frames.into_iter().enumerate() {
        let Some(frame) = frame else { continue };
        let vaddr = dest_addr + i * PAGE_SIZE;
        map_user(dest, vaddr, frame, flags)?;
    }
    Ok(())
}

/// The permanent, never-reclaimed kernel mapping area used for ACPI
/// tables, local APIC MMIO, and the VGA text buffer remap.
pub mod mapping_area {
    use super::*;

    const AREA_START: usize = KLIMIT + 0x0100_0000;
    const AREA_END: usize = 0xFF00_0000;

    struct Area {
        next: usize,
        entries: Vec<(usize, PhysAddr)>,
    }

    static AREA: Mutex<Area> = Mutex::new(Area { next: AREA_START, entries: Vec::new() });

    /// Hands out one page-sized virtual region, maps it to `paddr`, and
    /// remembers the mapping for `lookup_kernel_paddr`. The region is never
    /// reclaimed even after `unmap_kernel_page`.
    pub fn map_kernel_page(paddr: PhysAddr) -> Option<*mut u8> {
        let vaddr = {
            let mut area = AREA.lock();
            if area.next >= AREA_END {
                return None;
            }
            let vaddr = area.next;
            area.next += PAGE_SIZE;
            area.entries.push((vaddr, paddr));
            vaddr
        };
        if super::map_kernel(vaddr, paddr, PageFlags::kernel_rw()).is_err() {
            return None;
        }
        Some(vaddr as *mut u8)
    }

    pub fn lookup_kernel_paddr(vaddr: *mut u8) -> Option<PhysAddr> {
        let area = AREA.lock();
        area.entries.iter().rev().find(|(v, _)| *v == vaddr as usize).map(|(_, p)| *p)
    }

    pub fn unmap_kernel_page(vaddr: *mut u8) {
        super::unmap_kernel(vaddr as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klimit_splits_at_three_gib() {
        assert_eq!(KLIMIT, 0xC000_0000);
    }

    #[test]
    fn nopae_klimit_dir_index_is_768() {
        assert_eq!(NOPAE_KLIMIT_DIR, 0x300);
    }

    #[test]
    fn pae_klimit_pdpt_index_is_three() {
        assert_eq!(PAE_KLIMIT_PDPT, 3);
    }
}
