//! Protocol constants for ASH framing, EZSP and the Gecko bootloader console.
//!
//! Values follow Silicon Labs UG101 (ASH) and UG100 (EZSP).

use std::time::Duration;

// ============================================================================
// ASH reserved bytes
// ============================================================================

/// Frame delimiter.
pub const FLAG: u8 = 0x7E;
/// Escape byte; the next byte is XORed with [`ESCAPE_XOR`].
pub const ESCAPE: u8 = 0x7D;
/// XON flow control.
pub const XON: u8 = 0x11;
/// XOFF flow control.
pub const XOFF: u8 = 0x13;
/// Replaces a byte received with a low-level communication error.
pub const SUBSTITUTE: u8 = 0x18;
/// Terminates a frame in progress.
pub const CANCEL: u8 = 0x1A;

/// Bit flipped on escaped bytes.
pub const ESCAPE_XOR: u8 = 0x20;

/// Bytes that must never appear unescaped inside a frame.
pub const RESERVED_BYTES: [u8; 6] = [FLAG, ESCAPE, XON, XOFF, SUBSTITUTE, CANCEL];

// ============================================================================
// ASH frame layout
// ============================================================================

/// Control byte of a RST frame.
pub const CONTROL_RST: u8 = 0xC0;
/// Control byte of a RSTACK frame.
pub const CONTROL_RSTACK: u8 = 0xC1;
/// Control byte of an ERROR frame.
pub const CONTROL_ERROR: u8 = 0xC2;

/// High bit of the control byte: clear for DATA frames.
pub const CONTROL_NOT_DATA_MASK: u8 = 0x80;
/// Bits distinguishing ACK (`0x80`) from NAK (`0xA0`).
pub const CONTROL_ACK_NAK_MASK: u8 = 0xE0;
pub const CONTROL_ACK: u8 = 0x80;
pub const CONTROL_NAK: u8 = 0xA0;
/// Retransmit flag of a DATA control byte.
pub const CONTROL_RETRANSMIT_BIT: u8 = 0x08;

/// Sequence numbers are 3 bits wide.
pub const SEQUENCE_MASK: u8 = 0x07;
pub const SEQUENCE_MODULUS: u8 = 8;

/// Control byte + 16-bit CRC.
pub const MIN_FRAME_SIZE: usize = 3;
/// Largest DATA payload an NCP accepts.
pub const MAX_DATA_PAYLOAD: usize = 128;
/// Worst case: every byte of control + payload + CRC escaped.
pub const MAX_STUFFED_FRAME_SIZE: usize = (1 + MAX_DATA_PAYLOAD + 2) * 2;

/// ASH protocol version carried in RSTACK.
pub const ASH_VERSION: u8 = 0x02;

// ============================================================================
// CRC and data randomization
// ============================================================================

/// CRC-CCITT polynomial.
pub const CRC_POLYNOMIAL: u16 = 0x1021;
/// CRC register initial value.
pub const CRC_INITIAL: u16 = 0xFFFF;

/// Seed of the pseudo-random sequence used for data whitening.
pub const RANDOM_SEED: u8 = 0x42;
/// Feedback mask of the whitening LFSR.
pub const RANDOM_FEEDBACK: u8 = 0xB8;

// ============================================================================
// Timeouts
// ============================================================================

/// Time allowed for the NCP to acknowledge a DATA frame.
pub const DATA_ACK_TIMEOUT: Duration = Duration::from_millis(1600);
/// Time allowed for the NCP to answer RST with RSTACK.
pub const RESET_ACK_TIMEOUT: Duration = Duration::from_millis(5000);
/// Silence required before the bootloader console is probed.
pub const BOOTLOADER_QUIET_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// EZSP
// ============================================================================

/// `version` command id, the only command sent without the extended header.
pub const EZSP_VERSION_COMMAND: u8 = 0x00;
/// `launchStandaloneBootloader` command id.
pub const EZSP_LAUNCH_STANDALONE_BOOTLOADER: u8 = 0x8F;
/// `STANDALONE_BOOTLOADER_NORMAL_MODE` argument of `launchStandaloneBootloader`.
pub const STANDALONE_BOOTLOADER_NORMAL_MODE: u8 = 0x01;
/// Frame control byte of outgoing commands.
pub const EZSP_FRAME_CONTROL_COMMAND: u8 = 0x00;
/// Marker of the extended header (second byte is reserved, always 0).
pub const EZSP_EXTENDED_HEADER: [u8; 2] = [0xFF, 0x00];
/// EZSP protocol version requested by default.
pub const EZSP_PROTOCOL_VERSION: u8 = 8;

// ============================================================================
// Gecko bootloader console
// ============================================================================

pub const BOOTLOADER_HEADER: &str = "Gecko Bootloader";
pub const BOOTLOADER_PROMPT: &str = "BL >";
/// Menu option: upload GBL image.
pub const BOOTLOADER_MENU_UPLOAD: &[u8] = b"1";
/// Menu option: run application.
pub const BOOTLOADER_MENU_RUN: &[u8] = b"2";
/// Sent to make the bootloader print its menu.
pub const BOOTLOADER_PROBE: &[u8] = b"\n";
/// Byte the bootloader emits after each block of text.
pub const BOOTLOADER_BLOCK_END: u8 = 0x00;
/// X-modem receiver "ready for CRC mode" character.
pub const XMODEM_READY: u8 = b'C';

// ============================================================================
// Serial defaults
// ============================================================================

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
