//! NCP reset and error codes carried by RSTACK and ERROR frames.

use std::fmt;

/// Reason the NCP reset, or the error it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCode {
    Unknown,
    External,
    PowerOn,
    Watchdog,
    Assert,
    Bootloader,
    Software,
    ExceededMaxAckTimeouts,
    ChipSpecific,
    Other(u8),
}

impl ResetCode {
    pub fn from_byte(code: u8) -> Self {
        match code {
            0x00 => ResetCode::Unknown,
            0x01 => ResetCode::External,
            0x02 => ResetCode::PowerOn,
            0x03 => ResetCode::Watchdog,
            0x06 => ResetCode::Assert,
            0x09 => ResetCode::Bootloader,
            0x0B => ResetCode::Software,
            0x51 => ResetCode::ExceededMaxAckTimeouts,
            0x80 => ResetCode::ChipSpecific,
            other => ResetCode::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            ResetCode::Unknown => 0x00,
            ResetCode::External => 0x01,
            ResetCode::PowerOn => 0x02,
            ResetCode::Watchdog => 0x03,
            ResetCode::Assert => 0x06,
            ResetCode::Bootloader => 0x09,
            ResetCode::Software => 0x0B,
            ResetCode::ExceededMaxAckTimeouts => 0x51,
            ResetCode::ChipSpecific => 0x80,
            ResetCode::Other(b) => *b,
        }
    }

    /// Codes that complete the host's reset handshake.
    pub fn completes_handshake(&self) -> bool {
        matches!(
            self,
            ResetCode::PowerOn | ResetCode::Software | ResetCode::Bootloader
        )
    }
}

impl fmt::Display for ResetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResetCode::Unknown => "unknown",
            ResetCode::External => "external",
            ResetCode::PowerOn => "power-on",
            ResetCode::Watchdog => "watchdog",
            ResetCode::Assert => "assert",
            ResetCode::Bootloader => "ran from bootloader",
            ResetCode::Software => "software",
            ResetCode::ExceededMaxAckTimeouts => "exceeded max ack timeouts",
            ResetCode::ChipSpecific => "chip specific",
            ResetCode::Other(_) => "other",
        };
        write!(f, "{} (0x{:02X})", name, self.as_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_codes() {
        assert!(ResetCode::from_byte(0x02).completes_handshake());
        assert!(ResetCode::from_byte(0x09).completes_handshake());
        assert!(ResetCode::from_byte(0x0B).completes_handshake());
        assert!(!ResetCode::from_byte(0x03).completes_handshake());
        assert!(!ResetCode::from_byte(0x51).completes_handshake());
    }

    #[test]
    fn test_byte_round_trip() {
        for b in [0x00, 0x02, 0x09, 0x0B, 0x51, 0x42] {
            assert_eq!(ResetCode::from_byte(b).as_byte(), b);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ResetCode::PowerOn.to_string(), "power-on (0x02)");
    }
}
