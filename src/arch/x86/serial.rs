//! 16550 UART serial console, COM1 at 0x3F8. This is the kernel's only
//! output path until `log::VgaSink` is registered alongside it; every
//! `[lib::panic]` and boot message goes out here first.

use lazy_static::lazy_static;
use spin::{Mutex, MutexGuard};
use uart_16550::SerialPort;

pub const COM1_PORT: u16 = 0x3F8;

lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = unsafe { SerialPort::new(COM1_PORT) };
        serial_port.init();
        Mutex::new(serial_port)
    };
}

/// # Safety
/// Must be called during early boot, before any serial output is attempted.
pub unsafe fn init() {
    let _ = &*SERIAL1;
}

/// Locks and returns the serial port for formatted writes. Held only for
/// the duration of a single `write!`/`writeln!` call by the caller.
pub fn port() -> MutexGuard<'static, SerialPort> {
    SERIAL1.lock()
}

pub fn write_byte(byte: u8) {
    SERIAL1.lock().send(byte);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_writable() {
        use core::fmt::Write;
        let _ = write!(port(), "test");
    }
}
