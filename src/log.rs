//! Kernel log ring buffer.
//!
//! Every `info!`/`warn!`/`error!` call appends a framed record to a 64 KiB
//! ring buffer and then synchronously replays it to every registered sink
//! — there is no separate "flush" step. A producer that wraps around the
//! buffer pushes the tail pointer out of the way first, so a sink can never
//! observe a partially overwritten record; a sink so far behind that its
//! next event has already been evicted is simply resynchronized to the
//! current tail.
//!
//! Framing and the redzone-push discipline mirror a ring-buffer logger
//! that serves both a live console and a later full-buffer dump, without
//! pulling in the ecosystem `log`/`tracing` crates: those operate on
//! `log::Record`, and every consumer here wants the raw framed bytes
//! instead.

use core::fmt::{self, Write as _};
use core::sync::atomic::{AtomicU64, Ordering};

use heapless::Vec as HVec;
use spin::Mutex;

/// Total capacity of the ring buffer.
pub const RING_BUFFER_SIZE: usize = 65536;

/// Longest message body a single record can carry. Chosen so that the
/// worst-case "redzone" (one message plus two headers) stays comfortably
/// smaller than the buffer.
pub const MAX_MESSAGE_LEN: usize = 120;

const EVENT_ALIGNMENT: usize = 4;
const HEADER_LEN: usize = 4; // level:u8, source:u8, length:u16

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Kernel = 0,
    User = 1,
}

/// A sink consumes already-framed log records as they're produced. It is
/// handed the decoded fields rather than the raw bytes so that a sink never
/// has to duplicate the ring buffer's own framing logic.
pub trait LogSink: Sync {
    fn write_record(&self, level: LogLevel, source: LogSource, message: &str);
}

const fn event_len(message_len: usize) -> usize {
    let raw = HEADER_LEN + message_len;
    (raw + EVENT_ALIGNMENT - 1) & !(EVENT_ALIGNMENT - 1)
}

/// Redzone size: the space right after the write pointer that a reader must
/// stay clear of, because it might be overwritten by the very next event.
/// We don't know that event's length ahead of time, so we assume the worst
/// case and reserve room for a terminator on top of that.
const REDZONE_SIZE: usize = MAX_MESSAGE_LEN + 2 * event_len(MAX_MESSAGE_LEN);

struct RingState {
    buffer: [u8; RING_BUFFER_SIZE],
    write: usize,
    tail: usize,
    write_id: u64,
    tail_id: u64,
}

impl RingState {
    const fn new() -> Self {
        Self {
            buffer: [0u8; RING_BUFFER_SIZE],
            write: 0,
            tail: 0,
            write_id: 0,
            tail_id: 0,
        }
    }

    fn event_length_at(&self, pos: usize) -> usize {
        u16::from_le_bytes([self.buffer[pos + 2], self.buffer[pos + 3]]) as usize
    }

    fn is_terminator_at(&self, pos: usize) -> bool {
        self.event_length_at(pos) == 0
    }

    fn write_terminator(&mut self) {
        self.buffer[self.write + 2] = 0;
        self.buffer[self.write + 3] = 0;
    }

    fn in_redzone(&self, pos: usize) -> bool {
        let redzone_end = self.write + REDZONE_SIZE;
        pos >= self.write && pos < redzone_end
    }

    fn push_tail(&mut self) {
        while self.in_redzone(self.tail) {
            let len = event_len(self.event_length_at(self.tail));
            self.tail += len;
            self.tail_id += 1;

            if self.tail + HEADER_LEN > RING_BUFFER_SIZE || self.is_terminator_at(self.tail) {
                self.tail = 0;
            }
        }
    }

    fn write_event(&mut self, level: LogLevel, source: LogSource, message: &[u8]) -> usize {
        if self.write + REDZONE_SIZE > RING_BUFFER_SIZE {
            self.push_tail();
            self.write_terminator();
            self.write = 0;
        }

        if self.write_id != 0 {
            self.push_tail();
        }

        let len = message.len();
        self.buffer[self.write] = level as u8;
        self.buffer[self.write + 1] = source as u8;
        self.buffer[self.write + 2..self.write + 4].copy_from_slice(&(len as u16).to_le_bytes());
        self.buffer[self.write + HEADER_LEN..self.write + HEADER_LEN + len].copy_from_slice(message);

        let event_pos = self.write;
        self.write += event_len(len);
        self.write_id += 1;
        event_pos
    }

    fn read_message(&self, pos: usize) -> (LogLevel, LogSource, &[u8]) {
        let level = match self.buffer[pos] {
            0 => LogLevel::Error,
            1 => LogLevel::Warning,
            _ => LogLevel::Info,
        };
        let source = match self.buffer[pos + 1] {
            0 => LogSource::Kernel,
            _ => LogSource::User,
        };
        let len = self.event_length_at(pos);
        (level, source, &self.buffer[pos + HEADER_LEN..pos + HEADER_LEN + len])
    }
}

static RING: Mutex<RingState> = Mutex::new(RingState::new());

const MAX_SINKS: usize = 4;

static SINKS: Mutex<HVec<&'static dyn LogSink, MAX_SINKS>> = Mutex::new(HVec::new());

/// Registers a sink. Sinks registered after boot only see records logged
/// from that point forward — there is no backlog replay on registration,
/// matching the producer/reader split described above (a reader that
/// hasn't been created yet has nothing to catch up on).
pub fn register_sink(sink: &'static dyn LogSink) {
    let mut sinks = SINKS.lock();
    let _ = sinks.push(sink);
}

static DROPPED_RECORDS: AtomicU64 = AtomicU64::new(0);

/// Appends one record to the ring buffer and replays it to every
/// registered sink. `message` is truncated to `MAX_MESSAGE_LEN` bytes.
pub fn log(level: LogLevel, source: LogSource, message: &str) {
    let bytes = message.as_bytes();
    let truncated = &bytes[..bytes.len().min(MAX_MESSAGE_LEN)];

    let pos = {
        let mut ring = RING.lock();
        ring.write_event(level, source, truncated)
    };

    let ring = RING.lock();
    let (level, source, msg) = ring.read_message(pos);
    let msg = core::str::from_utf8(msg).unwrap_or("<invalid utf8>");

    let sinks = SINKS.lock();
    for sink in sinks.iter() {
        sink.write_record(level, source, msg);
    }
}

/// Formats into a fixed-size stack buffer and logs; used by the `log_info!`
/// / `log_warn!` / `log_error!` macros so that logging never touches the
/// heap.
pub fn log_fmt(level: LogLevel, source: LogSource, args: fmt::Arguments) {
    struct FixedBuf {
        buf: [u8; MAX_MESSAGE_LEN],
        len: usize,
    }

    impl fmt::Write for FixedBuf {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let remaining = MAX_MESSAGE_LEN - self.len;
            let take = s.len().min(remaining);
            self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
            self.len += take;
            Ok(())
        }
    }

    let mut buf = FixedBuf { buf: [0; MAX_MESSAGE_LEN], len: 0 };
    if fmt::write(&mut buf, args).is_err() {
        DROPPED_RECORDS.fetch_add(1, Ordering::Relaxed);
    }
    let msg = core::str::from_utf8(&buf.buf[..buf.len]).unwrap_or("<invalid utf8>");
    log(level, source, msg);
}

pub fn dropped_record_count() -> u64 {
    DROPPED_RECORDS.load(Ordering::Relaxed)
}

/// Walks every record currently held in the ring, oldest first, calling
/// `f` with its level and text. Used by the panic handler to print recent
/// history; `try_lock`s rather than blocking, since a panic can land while
/// this kernel already holds the ring lock on the panicking thread.
pub fn for_each_recent(mut f: impl FnMut(LogLevel, LogSource, &str)) {
    let Some(ring) = RING.try_lock() else { return };

    let mut pos = ring.tail;
    let mut remaining = ring.write_id.saturating_sub(ring.tail_id);
    while remaining > 0 {
        if pos + HEADER_LEN > RING_BUFFER_SIZE || ring.is_terminator_at(pos) {
            pos = 0;
            continue;
        }
        let (level, source, msg) = ring.read_message(pos);
        let msg = core::str::from_utf8(msg).unwrap_or("<invalid utf8>");
        f(level, source, msg);
        pos += event_len(ring.event_length_at(pos));
        remaining -= 1;
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log::log_fmt($crate::log::LogLevel::Info, $crate::log::LogSource::Kernel, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log::log_fmt($crate::log::LogLevel::Warning, $crate::log::LogSource::Kernel, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log::log_fmt($crate::log::LogLevel::Error, $crate::log::LogSource::Kernel, format_args!($($arg)*))
    };
}

/// A sink that writes to the 16550 UART, grounded on the `uart_16550` crate
/// already used by the arch layer for the serial port.
pub struct UartSink;

impl LogSink for UartSink {
    fn write_record(&self, level: LogLevel, source: LogSource, message: &str) {
        let src = match source {
            LogSource::Kernel => "k",
            LogSource::User => "u",
        };
        let mut port = crate::arch::x86::serial::port();
        let _ = write!(port, "[{}:{}] {}\r\n", level.as_str(), src, message);
    }
}

/// A sink that mirrors records to the VGA text-mode buffer. Scrolling and
/// cursor placement are the external VGA driver's concern; this sink only
/// knows how to hand it a line of text.
pub struct VgaSink;

impl LogSink for VgaSink {
    fn write_record(&self, level: LogLevel, source: LogSource, message: &str) {
        let _ = (level, source);
        crate::arch::x86::vga::write_line(message);
    }
}

pub static UART_SINK: UartSink = UartSink;
pub static VGA_SINK: VgaSink = VgaSink;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_len_is_four_byte_aligned() {
        for n in 0..8 {
            assert_eq!(event_len(n) % EVENT_ALIGNMENT, 0);
        }
    }

    #[test]
    fn write_and_read_roundtrip() {
        let mut ring = RingState::new();
        let pos = ring.write_event(LogLevel::Info, LogSource::Kernel, b"hello");
        let (level, source, msg) = ring.read_message(pos);
        assert_eq!(level, LogLevel::Info);
        assert_eq!(source, LogSource::Kernel);
        assert_eq!(msg, b"hello");
    }

    #[test]
    fn wraps_without_corrupting_in_flight_readers() {
        let mut ring = RingState::new();
        for i in 0..2000 {
            let msg = if i % 2 == 0 { b"abc".as_slice() } else { b"xy".as_slice() };
            let pos = ring.write_event(LogLevel::Info, LogSource::Kernel, msg);
            let (_, _, m) = ring.read_message(pos);
            assert_eq!(m, msg);
        }
    }
}
