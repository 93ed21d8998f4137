//! `FILE_SEARCH`: recursive grep using Boyer-Moore-Horspool, skipping
//! binary files and anything above the size threshold.

use std::fs::ReadDir;
use std::path::PathBuf;

use crate::bmh::BmhPattern;
use crate::constants::{MAX_PATH, MAX_WALK_DEPTH, SEARCH_MAX_FILE_SIZE};
use crate::errors::ErrorCode;
use crate::ops::file::{is_binary, line_reader, read_line_capped};
use crate::session::{Dispatch, Session};

/// Recursively walk `root`; for every regular, non-binary file at or
/// below `SEARCH_MAX_FILE_SIZE`, scan each line with a BMH pattern
/// compiled once for the whole search.
pub fn search(session: &mut Session, id: u32, root: &str, needle: &str) -> anyhow::Result<()> {
    let pattern_bytes = needle.as_bytes();
    let matcher = BmhPattern::new(pattern_bytes);
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
        stack.push((dir_path.clone(), iter, depth));

        let entry = match next_entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[FileSearch] skipping unreadable entry under {dir_path:?}: {e}");
                continue;
            }
        };
        let full_path = entry.path();
        if full_path.to_string_lossy().len() >= MAX_PATH {
            continue;
        }
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            if depth + 1 < MAX_WALK_DEPTH {
                if let Ok(sub) = std::fs::read_dir(&full_path) {
                    stack.push((full_path, sub, depth + 1));
                }
            }
            continue;
        }

        if !file_type.is_file() {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if meta.len() > SEARCH_MAX_FILE_SIZE {
            continue;
        }
        match is_binary(&full_path) {
            Ok(true) | Err(_) => continue,
            Ok(false) => {}
        }

        if let crate::session::Dispatch::Goodbye(_) =
            search_file(session, id, &full_path, &matcher)?
        {
            return Ok(());
        }
    }

    session.send_stream_end(id, crate::constants::STATUS_OK)
}

fn search_file(
    session: &mut Session,
    id: u32,
    path: &std::path::Path,
    matcher: &BmhPattern,
) -> anyhow::Result<Dispatch> {
    let mut reader = match line_reader(path) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("[FileSearch] could not open {path:?}: {e}");
            return Ok(Dispatch::Continue);
        }
    };

    let mut line = String::new();
    let mut line_no: u32 = 0;
    loop {
        let n = match read_line_capped(&mut reader, &mut line) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("[FileSearch] read error in {path:?}: {e}");
                break;
            }
        };
        if n == 0 {
            break;
        }
        line_no += 1;

        if matcher.find(line.as_bytes()).is_some() {
            let path_str = path.to_string_lossy();
            let mut payload = Vec::with_capacity(4 + path_str.len() + 1 + line.len() + 1);
            payload.extend_from_slice(&line_no.to_be_bytes());
            payload.extend_from_slice(path_str.as_bytes());
            payload.push(0);
            payload.extend_from_slice(line.trim_end_matches(['\n', '\r']).as_bytes());
            payload.push(0);
            if let Dispatch::Goodbye(reason) = session.send_stream_data(id, &payload)? {
                return Ok(Dispatch::Goodbye(reason));
            }
        }
    }

    Ok(Dispatch::Continue)
}
