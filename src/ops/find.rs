//! `FILE_FIND`: recursive glob walk with an explicit iterator stack.

use std::fs::ReadDir;
use std::path::PathBuf;

use crate::constants::{MAX_PATH, MAX_WALK_DEPTH};
use crate::errors::ErrorCode;
use crate::glob::glob_match;
use crate::session::{Dispatch, Session};

/// Recursively walk `root`, emitting one `STREAM_DATA` per path whose
/// basename matches `pattern`. Depth is capped at `MAX_WALK_DEPTH`;
/// over-long joined paths are skipped rather than erroring, per the
/// spec's `MAX_PATH` bound.
pub fn find(session: &mut Session, id: u32, root: &str, pattern: &str) -> anyhow::Result<()> {
    let pattern_bytes = pattern.as_bytes().to_vec();
    let root_path = PathBuf::from(root);

    let first = match std::fs::read_dir(&root_path) {
        Ok(rd) => rd,
        Err(e) => {
            session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?;
            return Ok(());
        }
    };

    let mut stack: Vec<(PathBuf, ReadDir, usize)> = vec![(root_path, first, 0)];

    while let Some((dir_path, mut iter, depth)) = stack.pop() {
        let Some(next_entry) = iter.next() else {
            continue;
        };
        // Keep iterating this directory on subsequent loop turns.
        stack.push((dir_path.clone(), iter, depth));

        let entry = match next_entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[FileFind] skipping unreadable entry under {dir_path:?}: {e}");
                continue;
            }
        };
        let full_path = entry.path();
        let full_str = full_path.to_string_lossy();
        if full_str.len() >= MAX_PATH {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };
        let basename = entry.file_name();

        if glob_match(&pattern_bytes, basename.to_string_lossy().as_bytes()) {
            let mut payload = Vec::with_capacity(full_str.len() + 1);
            payload.extend_from_slice(full_str.as_bytes());
            payload.push(0);
            if let Dispatch::Goodbye(_) = session.send_stream_data(id, &payload)? {
                return Ok(());
            }
        }

        if file_type.is_dir() && depth + 1 < MAX_WALK_DEPTH {
            if let Ok(sub) = std::fs::read_dir(&full_path) {
                stack.push((full_path, sub, depth + 1));
            }
        }
    }

    session.send_stream_end(id, crate::constants::STATUS_OK)
}
