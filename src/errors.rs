//! Per-stream error code mapping.
//!
//! Transport-fatal failures propagate as `anyhow::Error` out of the
//! functions that can hit them. Per-stream failures never unwind the
//! event loop — they are caught at the handler boundary and mapped
//! through [`ErrorCode::from_io_error`] into a `STREAM_ERROR` payload.

use std::io;

/// Wire error codes carried in `STREAM_ERROR` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Permission,
    IoError,
    Timeout,
    Cancelled,
    NoMemory,
    Invalid,
    Exists,
    NotDir,
    IsDir,
    Unknown,
}

impl ErrorCode {
    /// Wire byte value for this code.
    pub fn as_u8(self) -> u8 {
        match self {
            ErrorCode::NotFound => 0x01,
            ErrorCode::Permission => 0x02,
            ErrorCode::IoError => 0x03,
            ErrorCode::Timeout => 0x04,
            ErrorCode::Cancelled => 0x05,
            ErrorCode::NoMemory => 0x06,
            ErrorCode::Invalid => 0x07,
            ErrorCode::Exists => 0x08,
            ErrorCode::NotDir => 0x09,
            ErrorCode::IsDir => 0x0A,
            ErrorCode::Unknown => 0xFF,
        }
    }

    /// Total mapping from a filesystem `io::Error` to a wire error code.
    /// Unmapped `ErrorKind`s fall to `Unknown`, never panic.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::NotFound,
            io::ErrorKind::PermissionDenied => ErrorCode::Permission,
            io::ErrorKind::AlreadyExists => ErrorCode::Exists,
            io::ErrorKind::TimedOut => ErrorCode::Timeout,
            _ => match err.raw_os_error() {
                Some(libc::ENOTDIR) => ErrorCode::NotDir,
                Some(libc::EISDIR) => ErrorCode::IsDir,
                Some(libc::ENOENT) => ErrorCode::NotFound,
                Some(libc::EACCES) => ErrorCode::Permission,
                Some(libc::EEXIST) => ErrorCode::Exists,
                Some(_) => ErrorCode::IoError,
                None => ErrorCode::Unknown,
            },
        }
    }
}
