//! ASH control byte parsing.
//!
//! The first byte of every frame identifies its type and carries the
//! sequence numbers used for flow control.

use std::fmt;

use super::constants::*;

/// Frame type decoded from a control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `0fff rAAA`: frame number, retransmit flag, piggybacked ack number.
    Data {
        frame_number: u8,
        ack_number: u8,
        retransmit: bool,
    },
    /// `100n xAAA`
    Ack { ack_number: u8, not_ready: bool },
    /// `101n xAAA`
    Nak { ack_number: u8, not_ready: bool },
    /// `0xC0`
    Rst,
    /// `0xC1`
    RstAck,
    /// `0xC2`
    Error,
    /// Anything else.
    Unknown(u8),
}

impl FrameKind {
    /// Classify a control byte.
    pub fn from_control(control: u8) -> Self {
        if control & CONTROL_NOT_DATA_MASK == 0 {
            return FrameKind::Data {
                frame_number: (control >> 4) & SEQUENCE_MASK,
                ack_number: control & SEQUENCE_MASK,
                retransmit: control & CONTROL_RETRANSMIT_BIT != 0,
            };
        }
        match control {
            CONTROL_RST => return FrameKind::Rst,
            CONTROL_RSTACK => return FrameKind::RstAck,
            CONTROL_ERROR => return FrameKind::Error,
            _ => {}
        }
        let ack_number = control & SEQUENCE_MASK;
        let not_ready = control & 0x08 != 0;
        match control & CONTROL_ACK_NAK_MASK {
            CONTROL_ACK => FrameKind::Ack {
                ack_number,
                not_ready,
            },
            CONTROL_NAK => FrameKind::Nak {
                ack_number,
                not_ready,
            },
            _ => FrameKind::Unknown(control),
        }
    }

    /// Control byte of a DATA frame.
    pub fn data_control(frame_number: u8, ack_number: u8) -> u8 {
        ((frame_number & SEQUENCE_MASK) << 4) | (ack_number & SEQUENCE_MASK)
    }

    /// Control byte of an ACK frame.
    pub fn ack_control(ack_number: u8) -> u8 {
        CONTROL_ACK | (ack_number & SEQUENCE_MASK)
    }

    /// Control byte of a NAK frame.
    pub fn nak_control(ack_number: u8) -> u8 {
        CONTROL_NAK | (ack_number & SEQUENCE_MASK)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, FrameKind::Data { .. })
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Data {
                frame_number,
                ack_number,
                retransmit,
            } => {
                write!(f, "DATA(frm={}, ack={}", frame_number, ack_number)?;
                if *retransmit {
                    write!(f, ", reTx")?;
                }
                write!(f, ")")
            }
            FrameKind::Ack { ack_number, .. } => write!(f, "ACK({})", ack_number),
            FrameKind::Nak { ack_number, .. } => write!(f, "NAK({})", ack_number),
            FrameKind::Rst => write!(f, "RST"),
            FrameKind::RstAck => write!(f, "RSTACK"),
            FrameKind::Error => write!(f, "ERROR"),
            FrameKind::Unknown(b) => write!(f, "UNKNOWN(0x{:02X})", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_control() {
        let kind = FrameKind::from_control(0x25);
        assert_eq!(
            kind,
            FrameKind::Data {
                frame_number: 2,
                ack_number: 5,
                retransmit: false
            }
        );
        assert_eq!(FrameKind::data_control(2, 5), 0x25);
    }

    #[test]
    fn test_retransmit_flag() {
        assert!(matches!(
            FrameKind::from_control(0x3A),
            FrameKind::Data {
                frame_number: 3,
                ack_number: 2,
                retransmit: true
            }
        ));
    }

    #[test]
    fn test_ack_and_nak() {
        assert_eq!(
            FrameKind::from_control(0x81),
            FrameKind::Ack {
                ack_number: 1,
                not_ready: false
            }
        );
        assert_eq!(
            FrameKind::from_control(0xA6),
            FrameKind::Nak {
                ack_number: 6,
                not_ready: false
            }
        );
        assert_eq!(
            FrameKind::from_control(0x8B),
            FrameKind::Ack {
                ack_number: 3,
                not_ready: true
            }
        );
        assert_eq!(FrameKind::ack_control(9), 0x81);
        assert_eq!(FrameKind::nak_control(6), 0xA6);
    }

    #[test]
    fn test_reset_frames() {
        assert_eq!(FrameKind::from_control(0xC0), FrameKind::Rst);
        assert_eq!(FrameKind::from_control(0xC1), FrameKind::RstAck);
        assert_eq!(FrameKind::from_control(0xC2), FrameKind::Error);
        assert_eq!(FrameKind::from_control(0xC5), FrameKind::Unknown(0xC5));
        assert_eq!(FrameKind::from_control(0xFF), FrameKind::Unknown(0xFF));
    }

    #[test]
    fn test_display() {
        assert_eq!(FrameKind::from_control(0x25).to_string(), "DATA(frm=2, ack=5)");
        assert_eq!(FrameKind::from_control(0xA6).to_string(), "NAK(6)");
    }
}
