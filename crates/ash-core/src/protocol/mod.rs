//! Protocol module - ASH wire format and EZSP frame definitions.

pub mod constants;
pub mod control;
pub mod crc;
pub mod ezsp;
pub mod reset_code;
pub mod stuffing;
pub mod whitening;

pub use constants::*;
pub use control::FrameKind;
pub use crc::crc16;
pub use ezsp::{EzspError, EzspFrame, VersionInfo};
pub use reset_code::ResetCode;
pub use stuffing::{UnstuffError, stuff, unstuff};
pub use whitening::whiten;

/// Append CRC, stuff and terminate a raw (unstuffed, CRC-less) frame.
pub fn encode_frame(raw: &[u8]) -> Vec<u8> {
    let mut frame = raw.to_vec();
    crc::append_crc(&mut frame);
    let mut out = Vec::with_capacity(frame.len() + 4);
    stuffing::stuff_into(&frame, &mut out);
    out.push(FLAG);
    out
}
