//! ASH frame codec.
//!
//! Pure, stateful translation between EZSP payloads and ASH wire frames.
//! The codec owns the sequence numbers and the connected flag; it never
//! touches the serial port or a timer itself. Instead, [`FrameCodec::consume_incoming`]
//! reports what happened as an ordered list of [`CodecEvent`]s and the owning
//! driver acts on them.

use std::mem;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::protocol::constants::*;
use crate::protocol::control::FrameKind;
use crate::protocol::crc::{crc16, is_valid};
use crate::protocol::reset_code::ResetCode;
use crate::protocol::stuffing::unstuff;
use crate::protocol::whitening::whiten_in_place;
use crate::protocol::encode_frame;

/// Reasons an incoming frame is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("CRC mismatch (residue 0x{residue:04X})")]
    BadCrc { residue: u16 },

    #[error("Escape byte at end of frame")]
    DanglingEscape,

    #[error("Unsupported ASH version 0x{version:02X} in RSTACK")]
    UnsupportedVersion { version: u8 },

    #[error("RSTACK reset code {code} rejected")]
    RejectedResetCode { code: ResetCode },

    #[error("NCP reported error {code} (version 0x{version:02X})")]
    NcpError { version: u8, code: ResetCode },

    #[error("Unknown frame type 0x{control:02X}")]
    UnknownControl { control: u8 },
}

/// Flow-control state shared with the NCP.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    /// Ack number the peer must send back next.
    pub next_expected_ack_from_peer: u8,
    /// Frame number of our next DATA frame.
    pub outgoing_frame_number: u8,
    /// Ack number embedded in our next ACK or DATA frame.
    pub last_ack_to_send: u8,
    /// RSTACK handshake completed.
    pub connected: bool,
}

/// Counters describing link health.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub resets_sent: u64,
    pub acks_sent: u64,
    pub data_frames_sent: u64,
    pub data_frames_received: u64,
    pub acks_received: u64,
    pub naks_received: u64,
    /// DATA frames whose piggybacked ack did not match; still delivered.
    pub ack_mismatches: u64,
    pub crc_errors: u64,
    /// Short frames, dangling escapes, SUBSTITUTE-marked and oversized frames.
    pub framing_errors: u64,
    /// RSTACK, ERROR and unknown frames that were discarded.
    pub rejected_frames: u64,
}

impl LinkStats {
    fn record(&mut self, error: &FrameError) {
        match error {
            FrameError::BadCrc { .. } => self.crc_errors += 1,
            FrameError::TooShort { .. } | FrameError::DanglingEscape => self.framing_errors += 1,
            FrameError::UnsupportedVersion { .. }
            | FrameError::RejectedResetCode { .. }
            | FrameError::NcpError { .. }
            | FrameError::UnknownControl { .. } => self.rejected_frames += 1,
        }
    }
}

/// Something the owner of the codec has to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecEvent {
    /// De-whitened payload of a DATA frame. The owner must acknowledge it.
    Payload(Vec<u8>),
    /// The pending acknowledgement timer is no longer needed.
    CancelTimer,
    /// ACK frame received.
    AckObserved { ack_number: u8 },
    /// NAK frame received; the outgoing frame number was rewound.
    NakObserved { ack_number: u8 },
    /// RSTACK completed the handshake.
    Connected { reset_code: ResetCode },
    /// DATA frame acknowledged something other than our last frame.
    AckMismatch { expected: u8, received: u8 },
    /// NCP sent RST.
    ResetReceived,
}

/// ASH encoder/decoder.
#[derive(Debug, Default)]
pub struct FrameCodec {
    seq: SequenceState,
    rx_buffer: Vec<u8>,
    rx_corrupt: bool,
    /// Next DATA frame is a resend and carries the reTx flag.
    retransmit_next: bool,
    stats: LinkStats,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> SequenceState {
        self.seq
    }

    pub fn is_connected(&self) -> bool {
        self.seq.connected
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Build a RST frame and restart the handshake.
    ///
    /// The frame is preceded by CANCEL so the NCP drops any partial frame.
    pub fn build_reset(&mut self) -> Vec<u8> {
        self.seq = SequenceState::default();
        self.retransmit_next = false;
        self.rx_buffer.clear();
        self.rx_corrupt = false;
        self.stats.resets_sent += 1;

        let mut out = Vec::with_capacity(6);
        out.push(CANCEL);
        out.extend_from_slice(&encode_frame(&[CONTROL_RST]));
        debug!("Built RST frame");
        out
    }

    /// Build an ACK frame for the last DATA frame received.
    pub fn build_ack(&mut self) -> Vec<u8> {
        self.stats.acks_sent += 1;
        let control = FrameKind::ack_control(self.seq.last_ack_to_send);
        trace!(ack = self.seq.last_ack_to_send, "Built ACK frame");
        encode_frame(&[control])
    }

    /// Build a DATA frame carrying `payload` and advance the frame number.
    pub fn build_data(&mut self, payload: &[u8]) -> Vec<u8> {
        if payload.len() > MAX_DATA_PAYLOAD {
            warn!(
                len = payload.len(),
                max = MAX_DATA_PAYLOAD,
                "DATA payload exceeds NCP limit"
            );
        }

        let mut control =
            FrameKind::data_control(self.seq.outgoing_frame_number, self.seq.last_ack_to_send);
        if mem::take(&mut self.retransmit_next) {
            control |= CONTROL_RETRANSMIT_BIT;
        }
        let mut raw = Vec::with_capacity(payload.len() + 1);
        raw.push(control);
        raw.extend_from_slice(payload);
        whiten_in_place(&mut raw[1..]);

        debug!(
            frm = self.seq.outgoing_frame_number,
            ack = self.seq.last_ack_to_send,
            len = payload.len(),
            "Built DATA frame"
        );

        self.seq.outgoing_frame_number = (self.seq.outgoing_frame_number + 1) % SEQUENCE_MODULUS;
        self.seq.next_expected_ack_from_peer = self.seq.outgoing_frame_number;
        self.stats.data_frames_sent += 1;

        encode_frame(&raw)
    }

    /// Step the frame number back so the last DATA frame can be resent.
    ///
    /// The next [`FrameCodec::build_data`] carries the reTx flag.
    pub fn rewind_outgoing(&mut self) {
        self.seq.outgoing_frame_number =
            (self.seq.outgoing_frame_number + SEQUENCE_MODULUS - 1) % SEQUENCE_MODULUS;
        self.seq.next_expected_ack_from_peer = self.seq.outgoing_frame_number;
        self.retransmit_next = true;
    }

    /// Feed raw serial bytes; returns events for every completed frame.
    pub fn consume_incoming(&mut self, bytes: &[u8]) -> Vec<CodecEvent> {
        let mut events = Vec::new();

        for &byte in bytes {
            match byte {
                CANCEL => {
                    if !self.rx_buffer.is_empty() {
                        debug!(
                            discarded = self.rx_buffer.len(),
                            "CANCEL received, dropping partial frame"
                        );
                    }
                    self.rx_buffer.clear();
                    self.rx_corrupt = false;
                }
                FLAG => {
                    let stuffed = mem::take(&mut self.rx_buffer);
                    if self.rx_corrupt {
                        debug!(len = stuffed.len(), "Dropping frame marked corrupt");
                        self.stats.framing_errors += 1;
                    } else if !stuffed.is_empty() {
                        match self.decode_frame(&stuffed) {
                            Ok(frame_events) => events.extend(frame_events),
                            Err(e) => {
                                warn!(error = %e, "Dropping incoming frame");
                                self.stats.record(&e);
                            }
                        }
                    }
                    self.rx_corrupt = false;
                }
                SUBSTITUTE => {
                    debug!("SUBSTITUTE received, frame marked corrupt");
                    self.rx_corrupt = true;
                }
                XON | XOFF => {
                    trace!(byte = %format!("0x{:02X}", byte), "Ignoring flow control byte");
                }
                other => {
                    if self.rx_buffer.len() >= MAX_STUFFED_FRAME_SIZE {
                        if !self.rx_corrupt {
                            warn!(max = MAX_STUFFED_FRAME_SIZE, "Incoming frame overflow");
                        }
                        self.rx_corrupt = true;
                    } else {
                        self.rx_buffer.push(other);
                    }
                }
            }
        }

        events
    }

    fn decode_frame(&mut self, stuffed: &[u8]) -> Result<Vec<CodecEvent>, FrameError> {
        trace!(bytes = ?stuffed, "Decoding frame");
        let mut frame = unstuff(stuffed).map_err(|_| FrameError::DanglingEscape)?;

        if frame.len() < MIN_FRAME_SIZE {
            return Err(FrameError::TooShort { len: frame.len() });
        }
        if !is_valid(&frame) {
            return Err(FrameError::BadCrc {
                residue: crc16(&frame),
            });
        }
        frame.truncate(frame.len() - 2);

        let kind = FrameKind::from_control(frame[0]);
        debug!(frame = %kind, len = frame.len(), "Received frame");

        match kind {
            FrameKind::Data {
                frame_number,
                ack_number,
                ..
            } => {
                self.stats.data_frames_received += 1;
                let mut events = Vec::with_capacity(2);

                let expected = self.seq.next_expected_ack_from_peer;
                if ack_number == expected {
                    events.push(CodecEvent::CancelTimer);
                } else {
                    // Processing continues; the mismatch is only reported.
                    warn!(expected, received = ack_number, "DATA frame ack number mismatch");
                    self.stats.ack_mismatches += 1;
                    events.push(CodecEvent::AckMismatch {
                        expected,
                        received: ack_number,
                    });
                }

                self.seq.last_ack_to_send = (frame_number + 1) % SEQUENCE_MODULUS;

                let mut payload = frame.split_off(1);
                whiten_in_place(&mut payload);
                events.push(CodecEvent::Payload(payload));
                Ok(events)
            }
            FrameKind::Ack { ack_number, .. } => {
                self.stats.acks_received += 1;
                Ok(vec![
                    CodecEvent::CancelTimer,
                    CodecEvent::AckObserved { ack_number },
                ])
            }
            FrameKind::Nak { ack_number, .. } => {
                self.stats.naks_received += 1;
                debug!(
                    from = self.seq.outgoing_frame_number,
                    to = ack_number,
                    "NAK received, rewinding frame number"
                );
                self.seq.outgoing_frame_number = ack_number;
                Ok(vec![
                    CodecEvent::CancelTimer,
                    CodecEvent::NakObserved { ack_number },
                ])
            }
            FrameKind::Rst => Ok(vec![CodecEvent::CancelTimer, CodecEvent::ResetReceived]),
            FrameKind::RstAck => self.decode_rstack(&frame),
            FrameKind::Error => {
                let version = frame.get(1).copied().unwrap_or(0);
                let code = ResetCode::from_byte(frame.get(2).copied().unwrap_or(0));
                Err(FrameError::NcpError { version, code })
            }
            FrameKind::Unknown(control) => Err(FrameError::UnknownControl { control }),
        }
    }

    fn decode_rstack(&mut self, frame: &[u8]) -> Result<Vec<CodecEvent>, FrameError> {
        if frame.len() < 3 {
            return Err(FrameError::TooShort { len: frame.len() + 2 });
        }
        let version = frame[1];
        if version != ASH_VERSION {
            return Err(FrameError::UnsupportedVersion { version });
        }
        let code = ResetCode::from_byte(frame[2]);
        if !code.completes_handshake() {
            return Err(FrameError::RejectedResetCode { code });
        }
        if self.seq.connected {
            warn!(code = %code, "RSTACK received while already connected, ignoring");
            return Ok(Vec::new());
        }

        self.seq.connected = true;
        debug!(code = %code, "ASH link connected");
        Ok(vec![
            CodecEvent::CancelTimer,
            CodecEvent::Connected { reset_code: code },
        ])
    }
}
