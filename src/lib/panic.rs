//! Panic handler.
//!
//! There is no unwinding and nothing to recover to: a panic dumps what it
//! can (location, registers, heap stats, recent log history) and halts.
//! A panic while already panicking prints a short notice and halts
//! immediately rather than recursing back through all of the above.

use core::fmt::Write as _;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn panic_handler(info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        raw_print("\n!!! RECURSIVE PANIC !!!\n");
        halt();
    }

    let panic_num = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;

    disable_interrupts();
    print_panic_header(panic_num);
    print_panic_info(info);
    print_registers();
    print_system_state();
    print_recent_logs();
    print_next_steps();

    halt();
}

fn raw_print(s: &str) {
    let mut port = crate::arch::x86::serial::port();
    let _ = port.write_str(s);
}

fn print_panic_header(panic_num: u64) {
    raw_print("\n================================================================================\n");
    raw_print("!!!                            KERNEL PANIC                                  !!!\n");
    raw_print("================================================================================\n");
    if panic_num > 1 {
        let mut port = crate::arch::x86::serial::port();
        let _ = writeln!(port, "Panic #{}", panic_num);
    }
    raw_print("\n");
}

fn print_panic_info(info: &PanicInfo) {
    raw_print("PANIC INFORMATION:\n------------------\n");
    let mut port = crate::arch::x86::serial::port();
    if let Some(location) = info.location() {
        let _ = writeln!(port, "  Location: {}:{}:{}", location.file(), location.line(), location.column());
    } else {
        let _ = writeln!(port, "  Location: <unknown>");
    }
    let _ = writeln!(port, "  Message:  {}", info.message());
    drop(port);
    raw_print("\n");
}

fn print_registers() {
    raw_print("REGISTER DUMP:\n--------------\n");

    let (eax, ebx, ecx, edx, esi, edi, ebp, esp): (u32, u32, u32, u32, u32, u32, u32, u32);
    unsafe {
        core::arch::asm!(
            "mov {0:e}, eax",
            "mov {1:e}, ebx",
            "mov {2:e}, ecx",
            "mov {3:e}, edx",
            "mov {4:e}, esi",
            "mov {5:e}, edi",
            "mov {6:e}, ebp",
            "mov {7:e}, esp",
            out(reg) eax, out(reg) ebx, out(reg) ecx, out(reg) edx,
            out(reg) esi, out(reg) edi, out(reg) ebp, out(reg) esp,
        );
    }

    let mut port = crate::arch::x86::serial::port();
    let _ = writeln!(
        port,
        "  eax: {:08x}  ebx: {:08x}  ecx: {:08x}  edx: {:08x}\n  esi: {:08x}  edi: {:08x}  ebp: {:08x}  esp: {:08x}",
        eax, ebx, ecx, edx, esi, edi, ebp, esp
    );
    drop(port);
    raw_print("\n");
}

fn print_system_state() {
    raw_print("SYSTEM STATE:\n-------------\n");

    let stats = crate::heap::get_heap_stats();
    let build = crate::build_info::get_version_string();

    let mut port = crate::arch::x86::serial::port();
    let _ = writeln!(
        port,
        "  Heap usage:  {} KiB current, {} KiB peak\n  Allocations: {} allocs, {} deallocs, {} failures\n  Version:     {}",
        stats.current_allocated() / 1024,
        stats.peak_allocated() / 1024,
        stats.total_allocations(),
        stats.total_deallocations(),
        stats.allocation_failures(),
        build,
    );
    drop(port);
    raw_print("\n");
}

const MAX_RECENT_LOGS: usize = 20;

fn print_recent_logs() {
    raw_print("RECENT LOGS:\n------------\n");

    let mut shown = 0usize;
    crate::log::for_each_recent(|level, _source, message| {
        if shown >= MAX_RECENT_LOGS {
            return;
        }
        let mut port = crate::arch::x86::serial::port();
        let _ = writeln!(port, "  [{}] {}", level.as_str(), message);
        shown += 1;
    });

    if shown == 0 {
        raw_print("  <no log history>\n");
    }
    raw_print("\n");
}

fn print_next_steps() {
    raw_print("DEBUGGING STEPS:\n----------------\n");
    raw_print("  1. Check panic location and message above\n");
    raw_print("  2. Examine register values for invalid pointers\n");
    raw_print("  3. Check heap usage for memory exhaustion\n");
    raw_print("  4. Review recent logs for error patterns\n\n");
}

#[inline(always)]
fn disable_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
}

#[inline(always)]
fn halt() -> ! {
    raw_print("================================================================================\n");
    raw_print("System halted.\n");
    raw_print("================================================================================\n");

    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

pub fn get_panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::Relaxed)
}

pub fn is_panicking() -> bool {
    PANICKING.load(Ordering::Relaxed)
}
