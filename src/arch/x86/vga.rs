//! Minimal VGA text-mode console. Only `log::VgaSink` uses this, and only
//! for a last-resort visible trace when nothing is listening on serial;
//! scrolling, color attributes, and cursor control are out of scope.

use spin::Mutex;

const VGA_BUFFER: *mut u16 = 0xB8000 as *mut u16;
const WIDTH: usize = 80;
const HEIGHT: usize = 25;
const DEFAULT_ATTR: u16 = 0x0F00; // white on black

struct Cursor {
    row: usize,
}

static CURSOR: Mutex<Cursor> = Mutex::new(Cursor { row: 0 });

/// Writes one line to the VGA buffer, wrapping back to the top once the
/// screen fills. No scrollback: this is a crash/trace aid, not a console.
pub fn write_line(message: &str) {
    let mut cursor = CURSOR.lock();
    let row = cursor.row % HEIGHT;

    for col in 0..WIDTH {
        let ch = message.as_bytes().get(col).copied().unwrap_or(b' ');
        let value = DEFAULT_ATTR | ch as u16;
        // Safety: VGA_BUFFER is a fixed, always-mapped MMIO region in this
        // kernel's address space and (row, col) is bounds-checked above.
        unsafe {
            VGA_BUFFER.add(row * WIDTH + col).write_volatile(value);
        }
    }

    cursor.row = row + 1;
}
