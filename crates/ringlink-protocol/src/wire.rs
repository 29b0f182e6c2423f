//! # Ring Link Wire Format
//!
//! ## Notification frame
//!
//! ```text
//!  0        1        2        3        4 ..
//! +--------+--------+--------+--------+----------------+
//! |   Sequence (u16 LE)     |  Timestamp (u16 LE)      |
//! +--------+--------+--------+--------+----------------+
//! |              Filler bytes (0xAA)                   |
//! +----------------------------------------------------+
//! ```
//!
//! Total frame length is the active payload size, never less than the
//! 4-byte header. The timestamp is the sender's wall clock in milliseconds
//! truncated to 16 bits.
//!
//! ## Command frame
//!
//! `[opcode:u8][payload_bytes:u8][packet_count:u16 LE]` — Start carries all
//! four bytes; Stop and Reset are opcode-only. Decoding is tolerant of
//! truncated commands: missing bytes fall back to defaults.

use bytes::{Buf, BufMut, Bytes, BytesMut};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Fixed header: sequence (2) + timestamp (2).
pub const HEADER_LEN: usize = 4;

/// Filler byte padding every frame out to the active payload size.
pub const FILLER_BYTE: u8 = 0xAA;

/// Smallest valid payload size (just the header).
pub const MIN_PAYLOAD_BYTES: u8 = 4;

/// Largest payload size the link accepts (247-byte MTU minus ATT overhead).
pub const MAX_PAYLOAD_BYTES: u8 = 244;

/// Clamp a requested payload size into the valid range.
pub fn clamp_payload(requested: u8) -> u8 {
    requested.clamp(MIN_PAYLOAD_BYTES, MAX_PAYLOAD_BYTES)
}

// ─── Notification Frame ─────────────────────────────────────────────────────

/// Encode a notification frame: header plus filler, `max(4, total_len)` bytes.
pub fn encode_frame(seq: u16, timestamp_ms: u16, total_len: usize) -> Bytes {
    let total = total_len.max(HEADER_LEN);
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16_le(seq);
    buf.put_u16_le(timestamp_ms);
    buf.resize(total, FILLER_BYTE);
    buf.freeze()
}

/// A decoded notification frame.
///
/// Short buffers are not errors — the impairment model deliberately emits
/// truncated frames. A buffer under 2 bytes has no sequence number; under
/// 4 bytes, no timestamp. Frames without a sequence number are recorded by
/// the telemetry collector but excluded from loss accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Sequence number, or `None` if the frame was too short to carry one.
    pub seq: Option<u16>,
    /// Sender timestamp (ms, 16-bit wrap), or `None` if truncated away.
    pub timestamp: Option<u16>,
    /// Length of the buffer as received.
    pub raw_len: usize,
    /// Bytes beyond the 4-byte header.
    pub payload_len: usize,
}

/// Decode a notification frame. Never fails; missing fields become `None`.
pub fn decode_frame(data: &[u8]) -> DecodedFrame {
    let mut buf = data;
    let raw_len = data.len();
    let seq = (buf.remaining() >= 2).then(|| buf.get_u16_le());
    let timestamp = (buf.remaining() >= 2).then(|| buf.get_u16_le());
    DecodedFrame {
        seq,
        timestamp,
        raw_len,
        payload_len: raw_len.saturating_sub(HEADER_LEN),
    }
}

// ─── Command Frames ─────────────────────────────────────────────────────────

/// The opcode values a session recognizes. Configurable so a test rig can
/// match whatever firmware build it talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSet {
    pub start: u8,
    pub stop: u8,
    pub reset: u8,
}

impl Default for CommandSet {
    fn default() -> Self {
        CommandSet {
            start: 0x01,
            stop: 0x02,
            reset: 0x03,
        }
    }
}

/// A decoded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Begin streaming: payload size per frame and packet budget (0 = unbounded).
    Start { payload_bytes: u8, packet_count: u16 },
    /// Stop streaming, keep the sequence counter.
    Stop,
    /// Stop streaming and zero the sequence counter.
    Reset,
}

/// Encode a command frame for write-without-response.
pub fn encode_command(command: Command, set: &CommandSet) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    match command {
        Command::Start {
            payload_bytes,
            packet_count,
        } => {
            buf.put_u8(set.start);
            buf.put_u8(payload_bytes);
            buf.put_u16_le(packet_count);
        }
        Command::Stop => buf.put_u8(set.stop),
        Command::Reset => buf.put_u8(set.reset),
    }
    buf.freeze()
}

/// Decode a command frame.
///
/// Truncated Start frames default the missing bytes individually: no length
/// byte means `default_payload`, each absent count byte reads as zero (a
/// lone low byte still carries its value). An empty buffer or an
/// unrecognized opcode yields `Err` with the offending byte so the caller
/// can log and ignore it — unknown commands are never fatal.
pub fn decode_command(
    data: &[u8],
    set: &CommandSet,
    default_payload: u8,
) -> Result<Command, UnknownCommand> {
    let Some(&opcode) = data.first() else {
        return Err(UnknownCommand { opcode: None });
    };
    if opcode == set.start {
        let payload_bytes = data.get(1).copied().unwrap_or(default_payload);
        let packet_count = u16::from_le_bytes([
            data.get(2).copied().unwrap_or(0),
            data.get(3).copied().unwrap_or(0),
        ]);
        Ok(Command::Start {
            payload_bytes,
            packet_count,
        })
    } else if opcode == set.stop {
        Ok(Command::Stop)
    } else if opcode == set.reset {
        Ok(Command::Reset)
    } else {
        Err(UnknownCommand {
            opcode: Some(opcode),
        })
    }
}

/// An opcode the session does not recognize (or an empty write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCommand {
    pub opcode: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Frame Tests ────────────────────────────────────────────────────

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(1234, 5678, 20);
        assert_eq!(frame.len(), 20);
        let decoded = decode_frame(&frame);
        assert_eq!(decoded.seq, Some(1234));
        assert_eq!(decoded.timestamp, Some(5678));
        assert_eq!(decoded.raw_len, 20);
        assert_eq!(decoded.payload_len, 16);
    }

    #[test]
    fn frame_filler_is_sentinel() {
        let frame = encode_frame(0, 0, 10);
        assert!(frame[4..].iter().all(|&b| b == FILLER_BYTE));
    }

    #[test]
    fn frame_never_shorter_than_header() {
        let frame = encode_frame(7, 9, 0);
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(decode_frame(&frame).payload_len, 0);
    }

    #[test]
    fn truncated_frame_loses_timestamp_then_seq() {
        let decoded = decode_frame(&[0x05, 0x00, 0x10]);
        assert_eq!(decoded.seq, Some(5));
        assert_eq!(decoded.timestamp, None);
        assert_eq!(decoded.payload_len, 0);

        let decoded = decode_frame(&[0x05]);
        assert_eq!(decoded.seq, None);
        assert_eq!(decoded.timestamp, None);
        assert_eq!(decoded.raw_len, 1);
    }

    #[test]
    fn empty_frame_decodes_to_sentinels() {
        let decoded = decode_frame(&[]);
        assert_eq!(decoded.seq, None);
        assert_eq!(decoded.timestamp, None);
        assert_eq!(decoded.raw_len, 0);
    }

    #[test]
    fn payload_clamping() {
        assert_eq!(clamp_payload(0), MIN_PAYLOAD_BYTES);
        assert_eq!(clamp_payload(1), 4);
        assert_eq!(clamp_payload(120), 120);
        assert_eq!(clamp_payload(255), MAX_PAYLOAD_BYTES);
    }

    // ─── Command Tests ──────────────────────────────────────────────────

    #[test]
    fn start_command_roundtrip() {
        let set = CommandSet::default();
        let cmd = Command::Start {
            payload_bytes: 120,
            packet_count: 500,
        };
        let encoded = encode_command(cmd, &set);
        assert_eq!(encoded.len(), 4);
        assert_eq!(decode_command(&encoded, &set, 20), Ok(cmd));
    }

    #[test]
    fn stop_and_reset_are_opcode_only() {
        let set = CommandSet::default();
        assert_eq!(encode_command(Command::Stop, &set).as_ref(), &[0x02]);
        assert_eq!(encode_command(Command::Reset, &set).as_ref(), &[0x03]);
        assert_eq!(decode_command(&[0x02], &set, 20), Ok(Command::Stop));
        assert_eq!(decode_command(&[0x03], &set, 20), Ok(Command::Reset));
    }

    #[test]
    fn truncated_start_uses_defaults() {
        let set = CommandSet::default();
        // Opcode only: default payload, unbounded count.
        assert_eq!(
            decode_command(&[0x01], &set, 64),
            Ok(Command::Start {
                payload_bytes: 64,
                packet_count: 0
            })
        );
        // Opcode + length, no count bytes at all.
        assert_eq!(
            decode_command(&[0x01, 32], &set, 64),
            Ok(Command::Start {
                payload_bytes: 32,
                packet_count: 0
            })
        );
        // A lone low count byte keeps its value; the high byte reads as zero.
        assert_eq!(
            decode_command(&[0x01, 32, 0x05], &set, 64),
            Ok(Command::Start {
                payload_bytes: 32,
                packet_count: 5
            })
        );
    }

    #[test]
    fn unknown_opcode_is_reported_not_fatal() {
        let set = CommandSet::default();
        let err = decode_command(&[0x7F], &set, 20).unwrap_err();
        assert_eq!(err.opcode, Some(0x7F));
        let err = decode_command(&[], &set, 20).unwrap_err();
        assert_eq!(err.opcode, None);
    }

    #[test]
    fn custom_command_set() {
        let set = CommandSet {
            start: 0xA0,
            stop: 0xA1,
            reset: 0xA2,
        };
        let encoded = encode_command(
            Command::Start {
                payload_bytes: 20,
                packet_count: 1,
            },
            &set,
        );
        assert_eq!(encoded[0], 0xA0);
        assert!(matches!(
            decode_command(&encoded, &set, 20),
            Ok(Command::Start { .. })
        ));
        // Default opcodes are unknown under the custom set.
        assert!(decode_command(&[0x01], &set, 20).is_err());
    }
}
