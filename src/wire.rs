//! Wire codec (C1): packet header encode/decode, big-endian integers.
//!
//! A packet is `[type:1][length:4 BE][payload: length bytes]`. This module
//! only deals with a single complete, already-sliced packet; reassembly
//! from a stream of bytes lives in [`crate::transport`].

use crate::constants::*;

/// A decoded packet type. `Unknown` preserves the raw byte so the caller
/// can log it without the codec needing to know every future extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Hello,
    HelloAck,
    Goodbye,
    Ping,
    Pong,
    TermInput,
    TermOutput,
    TermResize,
    StreamOpen,
    StreamData,
    StreamEnd,
    StreamError,
    StreamCancel,
    WindowUpdate,
    Unknown(u8),
}

impl PacketType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            PKT_HELLO => PacketType::Hello,
            PKT_HELLO_ACK => PacketType::HelloAck,
            PKT_GOODBYE => PacketType::Goodbye,
            PKT_PING => PacketType::Ping,
            PKT_PONG => PacketType::Pong,
            PKT_TERM_INPUT => PacketType::TermInput,
            PKT_TERM_OUTPUT => PacketType::TermOutput,
            PKT_TERM_RESIZE => PacketType::TermResize,
            PKT_STREAM_OPEN => PacketType::StreamOpen,
            PKT_STREAM_DATA => PacketType::StreamData,
            PKT_STREAM_END => PacketType::StreamEnd,
            PKT_STREAM_ERROR => PacketType::StreamError,
            PKT_STREAM_CANCEL => PacketType::StreamCancel,
            PKT_WINDOW_UPDATE => PacketType::WindowUpdate,
            other => PacketType::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PacketType::Hello => PKT_HELLO,
            PacketType::HelloAck => PKT_HELLO_ACK,
            PacketType::Goodbye => PKT_GOODBYE,
            PacketType::Ping => PKT_PING,
            PacketType::Pong => PKT_PONG,
            PacketType::TermInput => PKT_TERM_INPUT,
            PacketType::TermOutput => PKT_TERM_OUTPUT,
            PacketType::TermResize => PKT_TERM_RESIZE,
            PacketType::StreamOpen => PKT_STREAM_OPEN,
            PacketType::StreamData => PKT_STREAM_DATA,
            PacketType::StreamEnd => PKT_STREAM_END,
            PacketType::StreamError => PKT_STREAM_ERROR,
            PacketType::StreamCancel => PKT_STREAM_CANCEL,
            PacketType::WindowUpdate => PKT_WINDOW_UPDATE,
            PacketType::Unknown(b) => b,
        }
    }
}

/// The stream-type byte carried in a `STREAM_OPEN` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    FileRead,
    FileWrite,
    Exec,
    DirList,
    FileStat,
    FileFind,
    FileSearch,
    Mkdir,
    Remove,
    Move,
    FileExists,
    Realpath,
    Unknown(u8),
}

impl StreamType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            STREAM_FILE_READ => StreamType::FileRead,
            STREAM_FILE_WRITE => StreamType::FileWrite,
            STREAM_EXEC => StreamType::Exec,
            STREAM_DIR_LIST => StreamType::DirList,
            STREAM_FILE_STAT => StreamType::FileStat,
            STREAM_FILE_FIND => StreamType::FileFind,
            STREAM_FILE_SEARCH => StreamType::FileSearch,
            STREAM_MKDIR => StreamType::Mkdir,
            STREAM_REMOVE => StreamType::Remove,
            STREAM_MOVE => StreamType::Move,
            STREAM_FILE_EXISTS => StreamType::FileExists,
            STREAM_REALPATH => StreamType::Realpath,
            other => StreamType::Unknown(other),
        }
    }
}

/// `GOODBYE` reason byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoodbyeReason {
    Normal,
    ProtocolError,
    Timeout,
    Resource,
    Unknown(u8),
}

impl GoodbyeReason {
    pub fn as_u8(self) -> u8 {
        match self {
            GoodbyeReason::Normal => BYE_NORMAL,
            GoodbyeReason::ProtocolError => BYE_PROTOCOL_ERROR,
            GoodbyeReason::Timeout => 0x02,
            GoodbyeReason::Resource => 0x03,
            GoodbyeReason::Unknown(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            BYE_NORMAL => GoodbyeReason::Normal,
            BYE_PROTOCOL_ERROR => GoodbyeReason::ProtocolError,
            0x02 => GoodbyeReason::Timeout,
            0x03 => GoodbyeReason::Resource,
            other => GoodbyeReason::Unknown(other),
        }
    }
}

/// A borrowed view of one complete packet in the reassembly buffer.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    pub packet_type: PacketType,
    pub payload: &'a [u8],
}

/// Encode a packet header + payload into `out`.
///
/// Panics only if `payload.len()` cannot fit a `u32`, which the caller
/// must have already bounded against `MAX_PACKET_SIZE`.
pub fn encode_packet(packet_type: PacketType, payload: &[u8], out: &mut Vec<u8>) {
    debug_assert!(payload.len() <= MAX_PACKET_SIZE);
    out.reserve(5 + payload.len());
    out.push(packet_type.as_byte());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Try to decode one packet header from the front of `buf`.
///
/// Returns `Ok(Some((type, length)))` when a full header (5 bytes) is
/// present, `Ok(None)` when more bytes are needed, `Err` when the
/// declared length exceeds [`MAX_PACKET_SIZE`] (a protocol error: the
/// caller must terminate the session).
pub fn decode_header(buf: &[u8]) -> Result<Option<(PacketType, u32)>, ()> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let packet_type = PacketType::from_byte(buf[0]);
    let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if length as usize > MAX_PACKET_SIZE {
        return Err(());
    }
    Ok(Some((packet_type, length)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_header_roundtrips_type_and_length() {
        let mut buf = Vec::new();
        encode_packet(PacketType::Ping, b"abc", &mut buf);
        assert_eq!(buf[0], PKT_PING);
        let (pt, len) = decode_header(&buf).unwrap().unwrap();
        assert_eq!(pt, PacketType::Ping);
        assert_eq!(len, 3);
        assert_eq!(&buf[5..5 + len as usize], b"abc");
    }

    #[test]
    fn empty_payload_encodes_zero_length() {
        let mut buf = Vec::new();
        encode_packet(PacketType::Pong, b"", &mut buf);
        assert_eq!(buf.len(), 5);
        let (_, len) = decode_header(&buf).unwrap().unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn incomplete_header_needs_more_bytes() {
        let buf = [PKT_PING, 0, 0, 0];
        assert_eq!(decode_header(&buf).unwrap(), None);
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = vec![PKT_STREAM_DATA];
        buf.extend_from_slice(&((MAX_PACKET_SIZE as u32) + 1).to_be_bytes());
        assert!(decode_header(&buf).is_err());
    }

    #[test]
    fn unknown_packet_type_preserves_raw_byte() {
        let pt = PacketType::from_byte(0x7F);
        assert_eq!(pt, PacketType::Unknown(0x7F));
        assert_eq!(pt.as_byte(), 0x7F);
    }

    #[test]
    fn stream_type_roundtrips_known_values() {
        assert_eq!(StreamType::from_byte(STREAM_EXEC), StreamType::Exec);
        assert_eq!(StreamType::from_byte(STREAM_REALPATH), StreamType::Realpath);
        assert_eq!(StreamType::from_byte(0xAA), StreamType::Unknown(0xAA));
    }

    #[test]
    fn goodbye_reason_roundtrips() {
        assert_eq!(GoodbyeReason::from_byte(0x00), GoodbyeReason::Normal);
        assert_eq!(GoodbyeReason::Normal.as_u8(), 0x00);
        assert_eq!(GoodbyeReason::from_byte(0x01).as_u8(), 0x01);
    }
}
