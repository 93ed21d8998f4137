//! Protocol and resource limit constants.
//!
//! This module centralizes the wire protocol's magic numbers and the
//! client's resource/timeout limits, grouped by domain.
//!
//! # Categories
//! - Wire: packet type and stream type byte values.
//! - Limits: sizing caps shared by the framing and operation layers.
//! - Timeouts: every blocking wait in the client has a bound.

use std::time::Duration;

// ============================================================================
// Protocol version
// ============================================================================

/// Wire protocol version this client speaks; `HELLO_ACK` must echo it.
pub const PROTO_VERSION: u8 = 2;

// ============================================================================
// Packet types (control)
// ============================================================================

pub const PKT_HELLO: u8 = 0x00;
pub const PKT_HELLO_ACK: u8 = 0x01;
pub const PKT_GOODBYE: u8 = 0x0D;
pub const PKT_PING: u8 = 0x0E;
pub const PKT_PONG: u8 = 0x0F;

// ============================================================================
// Packet types (terminal)
// ============================================================================

pub const PKT_TERM_INPUT: u8 = 0x10;
pub const PKT_TERM_OUTPUT: u8 = 0x11;
pub const PKT_TERM_RESIZE: u8 = 0x12;

// ============================================================================
// Packet types (streams)
// ============================================================================

pub const PKT_STREAM_OPEN: u8 = 0x20;
pub const PKT_STREAM_DATA: u8 = 0x21;
pub const PKT_STREAM_END: u8 = 0x22;
pub const PKT_STREAM_ERROR: u8 = 0x23;
pub const PKT_STREAM_CANCEL: u8 = 0x24;

// ============================================================================
// Packet types (flow control)
// ============================================================================

pub const PKT_WINDOW_UPDATE: u8 = 0x28;

// ============================================================================
// Stream types
// ============================================================================

pub const STREAM_FILE_READ: u8 = 0x01;
pub const STREAM_FILE_WRITE: u8 = 0x02;
pub const STREAM_EXEC: u8 = 0x03;
pub const STREAM_DIR_LIST: u8 = 0x04;
pub const STREAM_FILE_STAT: u8 = 0x05;
pub const STREAM_FILE_FIND: u8 = 0x06;
pub const STREAM_FILE_SEARCH: u8 = 0x07;
pub const STREAM_MKDIR: u8 = 0x08;
pub const STREAM_REMOVE: u8 = 0x09;
pub const STREAM_MOVE: u8 = 0x0A;
pub const STREAM_FILE_EXISTS: u8 = 0x0B;
pub const STREAM_REALPATH: u8 = 0x0C;

// ============================================================================
// Exec channels / exit kinds
// ============================================================================

pub const CHAN_STDOUT: u8 = 0x01;

pub const EXIT_NORMAL: u8 = 0x00;
pub const EXIT_SIGNAL: u8 = 0x01;
pub const EXIT_UNKNOWN: u8 = 0xFF;

// ============================================================================
// Stream end status
// ============================================================================

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_CANCELLED: u8 = 0x02;

// ============================================================================
// HELLO flags / GOODBYE reasons
// ============================================================================

pub const FLAG_RESUME: u8 = 0x01;
pub const FLAG_SIMPLE: u8 = 0x02;

pub const BYE_NORMAL: u8 = 0x00;
pub const BYE_PROTOCOL_ERROR: u8 = 0x01;

// ============================================================================
// Limits
// ============================================================================

/// Largest payload this client will accept or send, per packet.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;
/// Longest path this client will build or accept, NUL included.
pub const MAX_PATH: usize = 4096;
/// Longest line `file-search` will buffer before giving up on a line.
pub const MAX_LINE: usize = 8192;
/// Fixed-capacity stream slot table size.
pub const MAX_STREAMS: usize = 256;
/// Default advertised/adopted flow-control window.
pub const DEFAULT_WINDOW: u32 = 256 * 1024;
/// Floor below which a window is not considered usable.
pub const MIN_WINDOW: u32 = 16 * 1024;
/// Chunk size for `FILE_READ` streaming.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Chunk size for `EXEC` output streaming.
pub const SMALL_CHUNK: usize = 4 * 1024;
/// Accumulated inbound bytes before a `WINDOW_UPDATE` is emitted.
pub const WINDOW_UPDATE_THRESHOLD: u32 = 8192;
/// Maximum recursion depth for `FILE_FIND` / `FILE_SEARCH` directory walks.
pub const MAX_WALK_DEPTH: usize = 64;
/// Files at or above this size are skipped by `FILE_SEARCH` — avoids
/// pathological scans of huge binaries that happened to pass the
/// binary-sniff check.
pub const SEARCH_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;
/// Bytes sniffed from the head of a file to decide if it is binary.
pub const BINARY_SNIFF_LEN: usize = 512;

// ============================================================================
// Timeouts
// ============================================================================

/// How long the outbound side blocks for a `WINDOW_UPDATE` before treating
/// the session as dead.
pub const WINDOW_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);
/// How long startup waits for `HELLO_ACK` before giving up.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Readiness-wait budget per event loop tick.
pub const EVENT_LOOP_TICK_MS: i32 = 10;
/// Largest single read from stdin per tick.
pub const STDIN_READ_CHUNK: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_sane() {
        assert!(CHUNK_SIZE > SMALL_CHUNK);
        assert!(DEFAULT_WINDOW >= MIN_WINDOW);
        assert!(MAX_PACKET_SIZE > MAX_PATH);
        assert_eq!(MAX_STREAMS, 256);
    }

    #[test]
    fn timeouts_are_ordered() {
        assert!(Duration::from_millis(EVENT_LOOP_TICK_MS as u64) < HANDSHAKE_TIMEOUT);
        assert!(HANDSHAKE_TIMEOUT < WINDOW_BLOCK_TIMEOUT);
    }
}
