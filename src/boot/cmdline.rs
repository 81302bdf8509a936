//! Command-line parsing.
//!
//! Reads the whitespace-separated `key=value` stream the setup stage
//! copies into the boot information structure. Recognized keys are
//! validated against an enum/bool/integer shape and folded into
//! `CmdlineOpts`; a bad value for a recognized key is accumulated as a
//! deferred warning instead of failing parsing outright, since logging
//! isn't up yet this early in boot. Unrecognized keys are collected
//! verbatim to export into the loader's environment block.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaeMode {
    Auto,
    Disable,
    Require,
}

impl PaeMode {
    /// The token `mm::decide_paging_mode` matches against; it only cares
    /// about distinguishing `require` from everything else.
    pub fn as_str(self) -> &'static str {
        match self {
            PaeMode::Auto => "auto",
            PaeMode::Disable => "disable",
            PaeMode::Require => "require",
        }
    }
}

pub struct CmdlineOpts {
    pub pae: PaeMode,
    pub serial_enable: bool,
    pub serial_baud_rate: u32,
    pub serial_ioport: u16,
    pub vga_enable: bool,
    pub debug_dumps: Vec<String>,
    /// `key=value` pairs for keys this parser does not recognize, exported
    /// to the loader's environment block verbatim.
    pub extra_env: Vec<(String, String)>,
}

impl Default for CmdlineOpts {
    fn default() -> Self {
        CmdlineOpts {
            pae: PaeMode::Auto,
            serial_enable: false,
            serial_baud_rate: DEFAULT_BAUD_RATE,
            serial_ioport: DEFAULT_IOPORT,
            vga_enable: true,
            debug_dumps: Vec::new(),
            extra_env: Vec::new(),
        }
    }
}

const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_IOPORT: u16 = 0x3F8; // COM1
const MAX_IOPORT: u32 = 0xFFFF;

const VALID_BAUD_RATES: &[u32] = &[300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200];

fn serial_dev_ioport(name: &str) -> Option<u16> {
    match name {
        "0" | "ttyS0" | "/dev/ttyS0" | "com1" | "COM1" => Some(0x3F8),
        "1" | "ttyS1" | "/dev/ttyS1" | "com2" | "COM2" => Some(0x2F8),
        "2" | "ttyS2" | "/dev/ttyS2" | "com3" | "COM3" => Some(0x3E8),
        "3" | "ttyS3" | "/dev/ttyS3" | "com4" | "COM4" => Some(0x2E8),
        _ => None,
    }
}

fn match_boolean(value: &str) -> Option<bool> {
    match value {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// One warning deferred from parsing, to be logged once the ring buffer
/// sink is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdlineWarning {
    InvalidPae,
    InvalidSerialEnable,
    InvalidSerialBaudRate,
    InvalidSerialIoport,
    InvalidSerialDev,
    InvalidVgaEnable,
}

impl CmdlineWarning {
    pub fn message(self) -> &'static str {
        match self {
            CmdlineWarning::InvalidPae => "invalid value for argument 'pae'",
            CmdlineWarning::InvalidSerialEnable => "invalid value for argument 'serial_enable'",
            CmdlineWarning::InvalidSerialBaudRate => "invalid value for argument 'serial_baud_rate'",
            CmdlineWarning::InvalidSerialIoport => "invalid value for argument 'serial_ioport'",
            CmdlineWarning::InvalidSerialDev => "invalid value for argument 'serial_dev'",
            CmdlineWarning::InvalidVgaEnable => "invalid value for argument 'vga_enable'",
        }
    }
}

/// Parses `line`, returning the resolved options alongside any warnings
/// about recognized-but-malformed values. Callers flush the warnings
/// through the logger once it's available.
pub fn parse(line: &str) -> (CmdlineOpts, Vec<CmdlineWarning>) {
    let mut opts = CmdlineOpts::default();
    let mut warnings = Vec::new();

    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };

        match key {
            "pae" => match value {
                "auto" => opts.pae = PaeMode::Auto,
                "disable" => opts.pae = PaeMode::Disable,
                "require" => opts.pae = PaeMode::Require,
                _ => warnings.push(CmdlineWarning::InvalidPae),
            },
            "serial_enable" => match match_boolean(value) {
                Some(b) => opts.serial_enable = b,
                None => warnings.push(CmdlineWarning::InvalidSerialEnable),
            },
            "serial_baud_rate" => match value.parse::<u32>() {
                Ok(rate) if VALID_BAUD_RATES.contains(&rate) => opts.serial_baud_rate = rate,
                _ => warnings.push(CmdlineWarning::InvalidSerialBaudRate),
            },
            "serial_ioport" => match value.parse::<u32>() {
                Ok(port) if port <= MAX_IOPORT => opts.serial_ioport = port as u16,
                _ => warnings.push(CmdlineWarning::InvalidSerialIoport),
            },
            "serial_dev" => match serial_dev_ioport(value) {
                Some(port) => opts.serial_ioport = port,
                None => warnings.push(CmdlineWarning::InvalidSerialDev),
            },
            "vga_enable" => match match_boolean(value) {
                Some(b) => opts.vga_enable = b,
                None => warnings.push(CmdlineWarning::InvalidVgaEnable),
            },
            _ if key.starts_with("DEBUG_DUMP_") => {
                if match_boolean(value) == Some(true) {
                    opts.debug_dumps.push(key.to_string());
                }
            }
            _ => opts.extra_env.push((key.to_string(), value.to_string())),
        }
    }

    (opts, warnings)
}

/// Logs every deferred warning from `parse`, once the logger is up.
pub fn report_warnings(warnings: &[CmdlineWarning]) {
    for warning in warnings {
        crate::log_warn!("{}", warning.message());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_with_empty_line() {
        let (opts, warnings) = parse("");
        assert_eq!(opts.pae, PaeMode::Auto);
        assert!(!opts.serial_enable);
        assert!(opts.vga_enable);
        assert!(warnings.is_empty());
    }

    #[test]
    fn recognizes_every_documented_key() {
        let (opts, warnings) = parse("pae=require serial_enable=true serial_baud_rate=115200 vga_enable=false");
        assert_eq!(opts.pae, PaeMode::Require);
        assert!(opts.serial_enable);
        assert_eq!(opts.serial_baud_rate, 115200);
        assert!(!opts.vga_enable);
        assert!(warnings.is_empty());
    }

    #[test]
    fn serial_dev_is_a_shortcut_for_ioport() {
        let (opts, warnings) = parse("serial_dev=COM2");
        assert_eq!(opts.serial_ioport, 0x2F8);
        assert!(warnings.is_empty());
    }

    #[test]
    fn invalid_value_is_deferred_not_fatal() {
        let (opts, warnings) = parse("pae=bogus serial_baud_rate=12345");
        assert_eq!(opts.pae, PaeMode::Auto);
        assert_eq!(opts.serial_baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(warnings, [CmdlineWarning::InvalidPae, CmdlineWarning::InvalidSerialBaudRate]);
    }

    #[test]
    fn debug_dump_keys_accumulate_without_warning() {
        let (opts, warnings) = parse("DEBUG_DUMP_PAGE_TABLES=true DEBUG_DUMP_SCHED=false");
        assert_eq!(opts.debug_dumps, ["DEBUG_DUMP_PAGE_TABLES"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unrecognized_keys_are_exported_as_env() {
        let (opts, warnings) = parse("init.debug=1 root=/dev/sda1");
        assert_eq!(opts.extra_env.len(), 2);
        assert_eq!(opts.extra_env[0], ("init.debug".to_string(), "1".to_string()));
        assert!(warnings.is_empty());
    }

    #[test]
    fn serial_ioport_rejects_out_of_range() {
        let (opts, warnings) = parse("serial_ioport=0x10000_is_not_an_int");
        assert_eq!(opts.serial_ioport, DEFAULT_IOPORT);
        assert_eq!(warnings, [CmdlineWarning::InvalidSerialIoport]);
    }
}
