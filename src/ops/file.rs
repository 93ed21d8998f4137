//! Single-shot and streaming file operations: read, write-open, stat,
//! exists, mkdir, remove, move, realpath.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::constants::CHUNK_SIZE;
use crate::errors::ErrorCode;
use crate::session::Session;

/// Stream `path` to the peer in `CHUNK_SIZE` pieces, then end the
/// stream. Errors encountered after the first chunk has already been
/// sent still terminate with `STREAM_ERROR` — the peer has no partial
/// chunk it can recover from, matching the common contract's single
/// terminator rule.
pub fn read(session: &mut Session, id: u32, path: &str) -> anyhow::Result<()> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?;
            return Ok(());
        }
    };
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let crate::session::Dispatch::Goodbye(_) = session.send_stream_data(id, &buf[..n])? {
                    return Ok(());
                }
            }
            Err(e) => {
                session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?;
                return Ok(());
            }
        }
    }
    session.send_stream_end(id, crate::constants::STATUS_OK)
}

/// Open `path` for writing (`mode=0` maps to `0644`) and return the file
/// to be stashed in the stream's `FileWrite` resource. On open failure,
/// the caller sends `STREAM_ERROR` and does not allocate a slot.
pub fn open_for_write(path: &str, mode: u16) -> std::io::Result<File> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    let unix_mode = if mode == 0 { 0o644 } else { u32::from(mode) };
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(unix_mode)
        .open(path)
}

/// `FILE_STAT`: `[exists:1][type:1][mode:u32 BE][size:u64 BE][mtime:u64 BE]`.
/// Non-existent path yields `exists=0` and all-zero numeric fields.
pub fn stat(path: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 1 + 4 + 8 + 8);
    match std::fs::symlink_metadata(path).and_then(|m| {
        if m.file_type().is_symlink() {
            std::fs::metadata(path)
        } else {
            Ok(m)
        }
    }) {
        Ok(meta) => {
            out.push(1);
            out.push(entry_type_byte(&meta));
            out.extend_from_slice(&meta.mode().to_be_bytes());
            out.extend_from_slice(&meta.size().to_be_bytes());
            out.extend_from_slice(&(meta.mtime() as u64).to_be_bytes());
        }
        Err(_) => {
            out.push(0);
            out.push(b'?');
            out.extend_from_slice(&[0u8; 4 + 8 + 8]);
        }
    }
    out
}

/// Wire `type` byte, matching `client_v2.c`'s `handle_file_stat`/
/// `handle_dir_list`: `'f'` regular file, `'d'` directory, `'l'` symlink,
/// `'?'` anything else. `DirEntry::metadata()` (unlike `stat(2)`) does not
/// follow symlinks, so a symlink entry is detectable here even though the
/// original's `stat()`-based listing never saw one.
pub fn entry_type_byte(meta: &std::fs::Metadata) -> u8 {
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        b'l'
    } else if file_type.is_dir() {
        b'd'
    } else if file_type.is_file() {
        b'f'
    } else {
        b'?'
    }
}

pub fn exists(path: &str) -> Vec<u8> {
    vec![u8::from(Path::new(path).exists())]
}

/// `EEXIST` is treated as success, per the common filesystem-client
/// convention of idempotent directory creation.
pub fn mkdir(path: &str) -> Result<(), std::io::Error> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn remove(path: &str) -> std::io::Result<()> {
    std::fs::remove_file(path)
}

pub fn move_path(old: &str, new: &str) -> std::io::Result<()> {
    std::fs::rename(old, new)
}

pub fn realpath(path: &str) -> std::io::Result<String> {
    std::fs::canonicalize(path).map(|p| p.to_string_lossy().into_owned())
}

/// Read up to [`crate::constants::BINARY_SNIFF_LEN`] bytes from the
/// front of `path` and report whether any is NUL. An empty file is not
/// binary.
pub fn is_binary(path: &Path) -> std::io::Result<bool> {
    let mut f = File::open(path)?;
    let mut buf = [0u8; crate::constants::BINARY_SNIFF_LEN];
    let n = f.read(&mut buf)?;
    Ok(buf[..n].contains(&0))
}

/// Read `path` line by line (line length capped at
/// [`crate::constants::MAX_LINE`]), returning an iterator-friendly
/// buffered reader for the search handler.
pub fn line_reader(path: &Path) -> std::io::Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

/// Read one line, capping length at `MAX_LINE`; lines are not expected
/// to contain embedded NULs since binary files are filtered out first.
pub fn read_line_capped(reader: &mut BufReader<File>, buf: &mut String) -> std::io::Result<usize> {
    buf.clear();
    let n = reader.read_line(buf)?;
    if buf.len() > crate::constants::MAX_LINE {
        // `buf` is a `String`, so truncating mid-character would panic.
        // Walk back from the cap to the nearest char boundary.
        let mut cut = crate::constants::MAX_LINE;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        buf.truncate(cut);
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_type_byte_reports_ascii_letters() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f");
        std::fs::write(&file_path, b"x").unwrap();
        let sub_path = dir.path().join("d");
        std::fs::create_dir(&sub_path).unwrap();

        assert_eq!(entry_type_byte(&std::fs::metadata(&file_path).unwrap()), b'f');
        assert_eq!(entry_type_byte(&std::fs::metadata(&sub_path).unwrap()), b'd');
    }

    #[cfg(unix)]
    #[test]
    fn entry_type_byte_reports_symlink_without_following() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_eq!(entry_type_byte(&std::fs::symlink_metadata(&link).unwrap()), b'l');
    }

    #[test]
    fn stat_on_missing_path_uses_question_mark_type_with_zero_numeric_fields() {
        let payload = stat("/nonexistent/does/not/exist");
        assert_eq!(payload[0], 0); // exists=false
        assert_eq!(payload[1], b'?'); // type
        assert_eq!(&payload[2..], &[0u8; 4 + 8 + 8][..]);
    }

    #[test]
    fn read_line_capped_truncates_on_char_boundary_not_mid_character() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.txt");
        // A multi-byte UTF-8 character (3 bytes) straddling the MAX_LINE
        // cap: pad so the cap falls inside the character's bytes.
        let mut contents = vec![b'a'; crate::constants::MAX_LINE - 1];
        contents.extend_from_slice("\u{20AC}".as_bytes()); // 3-byte char
        contents.push(b'\n');
        std::fs::write(&path, &contents).unwrap();

        let mut reader = line_reader(&path).unwrap();
        let mut line = String::new();
        // Must not panic, and the result must still be valid UTF-8.
        read_line_capped(&mut reader, &mut line).unwrap();
        assert!(line.len() <= crate::constants::MAX_LINE);
    }
}
