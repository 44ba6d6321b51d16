//! EZSP frame layout carried inside ASH DATA frames.
//!
//! ```text
//! sequence(1) frame_control(1) [0xFF 0x00]? command_id(1) parameters(N)
//! ```

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{
    EZSP_EXTENDED_HEADER, EZSP_FRAME_CONTROL_COMMAND, EZSP_VERSION_COMMAND,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EzspError {
    #[error("EZSP frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("Truncated {command} response")]
    Truncated { command: &'static str },
}

/// A decoded EZSP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EzspFrame {
    pub sequence: u8,
    pub frame_control: u8,
    pub command_id: u8,
    pub parameters: Vec<u8>,
}

impl EzspFrame {
    /// Serialize an outgoing command.
    ///
    /// Every command except `version` carries the extended header.
    pub fn encode_command(sequence: u8, command_id: u8, parameters: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(parameters.len() + 5);
        buf.push(sequence);
        buf.push(EZSP_FRAME_CONTROL_COMMAND);
        if command_id != EZSP_VERSION_COMMAND {
            buf.extend_from_slice(&EZSP_EXTENDED_HEADER);
        }
        buf.push(command_id);
        buf.extend_from_slice(parameters);
        buf
    }

    /// Parse a de-whitened DATA payload.
    pub fn decode(data: &[u8]) -> Result<Self, EzspError> {
        if data.len() < 3 {
            return Err(EzspError::TooShort { len: data.len() });
        }
        let body = if data[2] == EZSP_EXTENDED_HEADER[0] {
            if data.len() < 5 {
                return Err(EzspError::TooShort { len: data.len() });
            }
            &data[4..]
        } else {
            &data[2..]
        };
        Ok(Self {
            sequence: data[0],
            frame_control: data[1],
            command_id: body[0],
            parameters: body[1..].to_vec(),
        })
    }
}

/// Parameters of the `version` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub protocol_version: u8,
    pub stack_type: u8,
    pub stack_version: u16,
}

impl VersionInfo {
    pub fn from_parameters(parameters: &[u8]) -> Result<Self, EzspError> {
        let truncated = |_| EzspError::Truncated { command: "version" };
        let mut cursor = Cursor::new(parameters);
        Ok(Self {
            protocol_version: cursor.read_u8().map_err(truncated)?,
            stack_type: cursor.read_u8().map_err(truncated)?,
            stack_version: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }

    /// Stack version as `major.minor.patch.build` nibbles.
    pub fn stack_version_string(&self) -> String {
        let v = self.stack_version;
        format!(
            "{}.{}.{}.{}",
            (v >> 12) & 0xF,
            (v >> 8) & 0xF,
            (v >> 4) & 0xF,
            v & 0xF
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_command_has_no_extended_header() {
        assert_eq!(
            EzspFrame::encode_command(0, EZSP_VERSION_COMMAND, &[8]),
            vec![0x00, 0x00, 0x00, 0x08]
        );
    }

    #[test]
    fn test_other_commands_have_extended_header() {
        assert_eq!(
            EzspFrame::encode_command(5, 0x8F, &[0x01]),
            vec![0x05, 0x00, 0xFF, 0x00, 0x8F, 0x01]
        );
    }

    #[test]
    fn test_decode_legacy_response() {
        let frame = EzspFrame::decode(&[0x00, 0x80, 0x00, 0x08, 0x02, 0x30, 0x67]).unwrap();
        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.frame_control, 0x80);
        assert_eq!(frame.command_id, 0x00);
        assert_eq!(frame.parameters, vec![0x08, 0x02, 0x30, 0x67]);
    }

    #[test]
    fn test_decode_strips_extended_header() {
        let frame = EzspFrame::decode(&[0x07, 0x80, 0xFF, 0x00, 0x8F, 0x00]).unwrap();
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.command_id, 0x8F);
        assert_eq!(frame.parameters, vec![0x00]);
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            EzspFrame::decode(&[0x01, 0x80]),
            Err(EzspError::TooShort { len: 2 })
        );
        assert!(EzspFrame::decode(&[0x01, 0x80, 0xFF, 0x00]).is_err());
    }

    #[test]
    fn test_version_info() {
        let info = VersionInfo::from_parameters(&[0x08, 0x02, 0x30, 0x67]).unwrap();
        assert_eq!(info.protocol_version, 8);
        assert_eq!(info.stack_type, 2);
        assert_eq!(info.stack_version, 0x6730);
        assert_eq!(info.stack_version_string(), "6.7.3.0");
        assert!(VersionInfo::from_parameters(&[0x08]).is_err());
    }
}
