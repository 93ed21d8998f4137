//! `DIR_LIST`: non-recursive directory enumeration.

use std::os::unix::fs::MetadataExt;

use crate::errors::ErrorCode;
use crate::ops::file::entry_type_byte;
use crate::session::{Dispatch, Session};

/// List `path` (non-recursive). `std::fs::read_dir` never yields `.` or
/// `..` on Unix, so no explicit skip is needed. Entries whose metadata
/// can't be read (e.g. raced-away between readdir and stat) are skipped
/// with a warning rather than failing the whole listing.
pub fn list(session: &mut Session, id: u32, path: &str) -> anyhow::Result<()> {
    let entries = match std::fs::read_dir(path) {
        Ok(e) => e,
        Err(e) => {
            session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?;
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[DirList] skipping unreadable entry in {path}: {e}");
                continue;
            }
        };
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                log::warn!("[DirList] skipping {:?}, metadata failed: {e}", entry.path());
                continue;
            }
        };
        let name = entry.file_name();
        let mut payload = Vec::with_capacity(1 + 8 + 8 + name.len() + 1);
        payload.push(entry_type_byte(&meta));
        payload.extend_from_slice(&meta.size().to_be_bytes());
        payload.extend_from_slice(&(meta.mtime() as u64).to_be_bytes());
        payload.extend_from_slice(name.to_string_lossy().as_bytes());
        payload.push(0);

        if let Dispatch::Goodbye(_) = session.send_stream_data(id, &payload)? {
            return Ok(());
        }
    }

    session.send_stream_end(id, crate::constants::STATUS_OK)
}
