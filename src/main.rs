#![no_std]
#![no_main]
#![feature(alloc_error_handler)]
#![cfg_attr(feature = "strict", deny(warnings))]
#![cfg_attr(feature = "strict", deny(unsafe_op_in_unsafe_fn))]
#![allow(unexpected_cfgs)]

extern crate alloc;

#[allow(special_module_name)]
pub mod lib;

pub mod arch;
pub mod boot;
pub mod build_info;
pub mod heap;
pub mod ipc;
pub mod log;
pub mod mm;
pub mod object;
pub mod sched;
pub mod syscall;
mod tests;

use mm::{page_alloc, PageFlags, PhysAddr};
use object::{process, thread};

use crate::log_info;

/// Offset of `e_entry` in an `Elf32_Ehdr`. The loader image is handed to us
/// pre-linked and already placed in physical memory by the setup stage;
/// reading its entry point is the one sliver of ELF awareness this kernel
/// needs, since it starts exactly one user program and never loads another.
const ELF32_E_ENTRY_OFFSET: usize = 0x18;

/// Highest page-aligned address below [`mm::KLIMIT`], used as the initial
/// thread's user stack.
const INITIAL_STACK_TOP: usize = mm::KLIMIT - mm::PAGE_SIZE;

/// One page below the initial stack, holding the serialized environment
/// block unrecognized command-line keys are exported into.
const INITIAL_ENV_BASE: usize = INITIAL_STACK_TOP - mm::PAGE_SIZE;

/// Kernel entry point. The setup stage — real-mode/assembly code outside
/// this crate — has already brought the CPU into 32-bit protected mode
/// with paging enabled and a valid kernel stack, and jumps here with `info`
/// pointing at the handoff structure it built.
///
/// # Safety
/// Must be invoked exactly once, by the setup stage, with interrupts
/// disabled and `info` pointing at a live `boot::bootinfo::BootInfo`.
#[no_mangle]
pub extern "C" fn _start(info: *const boot::bootinfo::BootInfo) -> ! {
    // Safety: the setup stage's contract guarantees this for the duration
    // of this call; `validate` below is what actually earns our trust in
    // its contents.
    let info = unsafe { &*info };
    boot::bootinfo::validate(info);

    // Safety: first thing boot does, interrupts are still off, nothing has
    // been scheduled yet.
    unsafe { arch::x86::init() };

    heap::init_heap();

    // Safety: the setup stage null-terminates the command line it copies
    // in, in already-mapped memory, per `validate`'s alignment checks above.
    let cmdline = unsafe { boot::bootinfo::cmdline_str(info) };
    let (opts, warnings) = boot::cmdline::parse(cmdline);

    if opts.serial_enable {
        log::register_sink(&log::UART_SINK);
    }
    if opts.vga_enable {
        log::register_sink(&log::VGA_SINK);
    }
    boot::cmdline::report_warnings(&warnings);

    log_info!("jinue kernel starting");
    build_info::print_build_info();

    let cpu = arch::x86::cpu::detect();
    log_info!("cpu: {:?}, pae={} sysenter={} apic={}", cpu.vendor, cpu.has_pae, cpu.has_sysenter, cpu.has_apic);
    mm::decide_paging_mode(&cpu, Some(opts.pae.as_str()));

    seed_page_allocator(info);

    let space = mm::create_initial();
    let boot_process = process::construct_with_space(space).expect("failed to construct the boot process");

    let entry = load_initial_program(&boot_process, info, &opts.extra_env);

    let initial_thread = thread::construct(boot_process.clone()).expect("failed to construct the initial thread");
    thread::start_thread(&initial_thread, entry, INITIAL_STACK_TOP + mm::PAGE_SIZE)
        .expect("failed to start the initial thread");
    drop(initial_thread);
    drop(boot_process);

    log_info!("handing off to the initial program at {:#x}", entry);
    sched::start_first_thread();
}

/// Folds every usable firmware memory range into the physical page
/// allocator, skipping anything at or below `boot_end`: the kernel image,
/// the boot page tables, and whatever else the setup stage built out of
/// the low end of RAM before jumping here.
///
/// # Safety-adjacent note
/// Pages are seeded by their physical address, which this early in boot
/// equals their kernel virtual address: the setup stage identity-maps
/// conventional memory before enabling paging, and nothing has repointed
/// that mapping yet.
fn seed_page_allocator(info: &boot::bootinfo::BootInfo) {
    let mut seeded = 0usize;
    // Safety: `info` was validated above, and the firmware memory map it
    // points at is the setup stage's responsibility to have built correctly.
    for range in unsafe { boot::bootinfo::usable_memory_ranges(info) } {
        let start = core::cmp::max(range.base, info.boot_end as u64);
        let end = range.base + range.size;
        let mut addr = (start + mm::PAGE_SIZE as u64 - 1) & !(mm::PAGE_SIZE as u64 - 1);
        while addr + (mm::PAGE_SIZE as u64) <= end {
            page_alloc::seed(addr as usize as *mut u8);
            addr += mm::PAGE_SIZE as u64;
            seeded += 1;
        }
    }
    log_info!("page allocator seeded with {} pages ({} bytes)", seeded, page_alloc::count() * mm::PAGE_SIZE);
}

/// Maps the loader's already-loaded ELF image into the boot process's
/// address space at its load address and returns its entry point. There is
/// no program-header walk here: the image is mapped in whole, page by page,
/// read-write-execute, since this kernel does not otherwise enforce
/// per-segment protection on its one and only bootstrap program.
fn load_initial_program(
    process: &object::ObjRef<process::Process>,
    info: &boot::bootinfo::BootInfo,
    extra_env: &[(alloc::string::String, alloc::string::String)],
) -> usize {
    let (start, size) = boot::bootinfo::loader_exec_file(info);
    let entry = unsafe { read_elf32_entry(start as usize) };

    let mut guard = process.address_space().lock();
    let space = guard.as_mut().expect("boot process has no address space");

    let first_page = (start as usize) & !(mm::PAGE_SIZE - 1);
    let last_page = (start as usize + size as usize - 1) & !(mm::PAGE_SIZE - 1);
    let mut page = first_page;
    while page <= last_page {
        let paddr = PhysAddr::new(page);
        mm::map_user(space, page, paddr, PageFlags::user_rw()).expect("failed to map initial program image");
        page += mm::PAGE_SIZE;
    }

    let stack_frame = page_alloc::alloc().expect("out of memory mapping the initial program's stack");
    let stack_paddr = PhysAddr::new(stack_frame as usize);
    mm::map_user(space, INITIAL_STACK_TOP, stack_paddr, PageFlags::user_rw()).expect("failed to map initial program stack");

    map_initial_env(space, extra_env);

    entry
}

/// Serializes `extra_env` as a `KEY=value\0`-framed block terminated by an
/// empty entry, the unrecognized command-line keys §6 requires get
/// "silently exported to the spawned init process as environment
/// variables", and maps it read-only one page below the initial stack.
fn map_initial_env(space: &mut mm::AddressSpace, extra_env: &[(alloc::string::String, alloc::string::String)]) {
    let env_frame = page_alloc::alloc().expect("out of memory mapping the initial program's environment block");

    let mut offset = 0usize;
    for (key, value) in extra_env {
        for part in [key.as_bytes(), b"=", value.as_bytes(), b"\0"] {
            let remaining = mm::PAGE_SIZE - offset;
            let take = core::cmp::min(part.len(), remaining.saturating_sub(1));
            if take == 0 {
                break;
            }
            unsafe { core::ptr::copy_nonoverlapping(part.as_ptr(), env_frame.add(offset), take) };
            offset += take;
        }
    }
    unsafe { env_frame.add(offset).write(0) };

    let env_paddr = PhysAddr::new(env_frame as usize);
    mm::map_user(space, INITIAL_ENV_BASE, env_paddr, PageFlags::user_ro()).expect("failed to map initial program environment block");
}

/// Reads the 32-bit little-endian `e_entry` field out of an `Elf32_Ehdr` at
/// physical/kernel address `base`.
///
/// # Safety
/// `base` must point at an already-validated ELF header (see
/// `boot::bootinfo::loader_exec_file`'s minimum-size check) in mapped
/// memory.
unsafe fn read_elf32_entry(base: usize) -> usize {
    let ptr = (base + ELF32_E_ENTRY_OFFSET) as *const u32;
    unsafe { ptr.read_unaligned() as usize }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::lib::panic::panic_handler(info)
}
