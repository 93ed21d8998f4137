//! Operation handlers (C7): `STREAM_OPEN` dispatch and the per-type
//! handlers it routes to.
//!
//! Every handler here runs synchronously to completion within the event
//! loop tick that receives its `STREAM_OPEN` — file and directory
//! syscalls are not multiplexed the way exec's child process is, which
//! mirrors how the original C client's `handle_file_*`/`handle_dir_list`
//! functions are plain blocking calls invoked straight from dispatch.
//! `STREAM_DATA` going out still respects the flow-control window via
//! [`crate::session::Session::send_stream_data`], which blocks (while
//! still servicing `PING`/`WINDOW_UPDATE`/`GOODBYE`) rather than
//! overrunning the peer's credit.

pub mod dir;
pub mod file;
pub mod find;
pub mod search;

use crate::constants::*;
use crate::errors::ErrorCode;
use crate::session::Session;
use crate::stream::{StreamResource, StreamState};
use crate::wire::StreamType;

/// Read a NUL-terminated string starting at `payload[offset]`. Returns
/// `None` (never panics) if no terminator is found before the payload
/// ends -- the caller maps this to `STREAM_ERROR(INVALID, ...)`.
fn read_cstr(payload: &[u8], offset: usize) -> Option<(String, usize)> {
    let rest = payload.get(offset..)?;
    let nul_pos = rest.iter().position(|&b| b == 0)?;
    let s = String::from_utf8_lossy(&rest[..nul_pos]).into_owned();
    Some((s, offset + nul_pos + 1))
}

/// Dispatch an inbound `STREAM_OPEN` packet.
pub fn handle_stream_open(session: &mut Session, payload: &[u8]) -> anyhow::Result<()> {
    if payload.len() < 5 {
        log::warn!("[Ops] STREAM_OPEN payload too short, dropping");
        return Ok(());
    }
    let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let stream_type = StreamType::from_byte(payload[4]);
    let args = &payload[5..];

    if session.streams.find(id).is_some() {
        return session.send_stream_error(id, ErrorCode::Invalid, "id in use");
    }

    match stream_type {
        StreamType::FileRead => {
            let Some((path, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            let Some(_idx) = session.streams.alloc(id, stream_type) else {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            };
            file::read(session, id, &path)?;
            free_if_present(session, id);
        }
        StreamType::FileWrite => {
            let Some((path, after_path)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            let mode = if args.len() >= after_path + 2 {
                u16::from_be_bytes([args[after_path], args[after_path + 1]])
            } else {
                0
            };
            match file::open_for_write(&path, mode) {
                Ok(f) => {
                    let Some(idx) = session.streams.alloc(id, stream_type) else {
                        return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
                    };
                    if let Some(slot) = session.streams.get_mut(idx) {
                        slot.resource = StreamResource::FileWrite(f);
                    }
                }
                Err(e) => {
                    session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?;
                }
            }
        }
        StreamType::Exec => {
            let Some((command, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            match crate::exec::ExecState::spawn(&command) {
                Ok(exec) => {
                    // `ExecState` has no `Drop` -- if the table is full, the
                    // freshly forked child and its pipe would otherwise leak.
                    // The guard's cleanup runs on every early return below
                    // and is defused only once the slot actually owns `exec`.
                    let guard = scopeguard::guard(exec, |mut exec| exec.abandon());
                    let Some(idx) = session.streams.alloc(id, stream_type) else {
                        return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
                    };
                    if let Some(slot) = session.streams.get_mut(idx) {
                        slot.resource = StreamResource::Exec(scopeguard::ScopeGuard::into_inner(guard));
                    }
                }
                Err(e) => {
                    session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?;
                }
            }
        }
        StreamType::DirList => {
            let Some((path, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            dir::list(session, id, &path)?;
            free_if_present(session, id);
        }
        StreamType::FileStat => {
            let Some((path, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            let payload = file::stat(&path);
            session.send_stream_data(id, &payload)?;
            session.send_stream_end(id, STATUS_OK)?;
            free_if_present(session, id);
        }
        StreamType::FileExists => {
            let Some((path, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            let payload = file::exists(&path);
            session.send_stream_data(id, &payload)?;
            session.send_stream_end(id, STATUS_OK)?;
            free_if_present(session, id);
        }
        StreamType::Mkdir => {
            let Some((path, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            match file::mkdir(&path) {
                Ok(()) => session.send_stream_end(id, STATUS_OK)?,
                Err(e) => session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?,
            }
            free_if_present(session, id);
        }
        StreamType::Remove => {
            let Some((path, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            match file::remove(&path) {
                Ok(()) => session.send_stream_end(id, STATUS_OK)?,
                Err(e) => session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?,
            }
            free_if_present(session, id);
        }
        StreamType::Move => {
            let Some((old, after_old)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            let Some((new, _)) = read_cstr(args, after_old) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            match file::move_path(&old, &new) {
                Ok(()) => session.send_stream_end(id, STATUS_OK)?,
                Err(e) => session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?,
            }
            free_if_present(session, id);
        }
        StreamType::Realpath => {
            let Some((path, _)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            match file::realpath(&path) {
                Ok(resolved) => {
                    let mut payload = resolved.into_bytes();
                    payload.push(0);
                    session.send_stream_data(id, &payload)?;
                    session.send_stream_end(id, STATUS_OK)?;
                }
                Err(e) => session.send_stream_error(id, ErrorCode::from_io_error(&e), &e.to_string())?,
            }
            free_if_present(session, id);
        }
        StreamType::FileFind => {
            let Some((root, after_root)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            let Some((pattern, _)) = read_cstr(args, after_root) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            find::find(session, id, &root, &pattern)?;
            free_if_present(session, id);
        }
        StreamType::FileSearch => {
            let Some((root, after_root)) = read_cstr(args, 0) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            let Some((needle, _)) = read_cstr(args, after_root) else {
                return session.send_stream_error(id, ErrorCode::Invalid, "no null terminator");
            };
            if session.streams.alloc(id, stream_type).is_none() {
                return session.send_stream_error(id, ErrorCode::NoMemory, "stream table full");
            }
            search::search(session, id, &root, &needle)?;
            free_if_present(session, id);
        }
        StreamType::Unknown(b) => {
            log::warn!("[Ops] unknown stream type 0x{b:02X}");
            session.send_stream_error(id, ErrorCode::Invalid, "unknown stream type")?;
        }
    }
    Ok(())
}

fn free_if_present(session: &mut Session, id: u32) {
    if let Some(idx) = session.streams.find(id) {
        session.streams.free(idx);
    }
}

/// Inbound `STREAM_DATA`: only `FileWrite` streams keep a resource that
/// consumes it. Unknown ids are logged and dropped per the spec.
pub fn handle_stream_data(session: &mut Session, payload: &[u8]) -> anyhow::Result<()> {
    if payload.len() < 4 {
        log::warn!("[Ops] STREAM_DATA payload too short, dropping");
        return Ok(());
    }
    let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let chunk = &payload[4..];
    session.ack_inbound(chunk.len() as u32)?;

    let Some(idx) = session.streams.find(id) else {
        log::debug!("[Ops] STREAM_DATA for unknown id {id}, dropping");
        return Ok(());
    };
    let Some(stream) = session.streams.get_mut(idx) else {
        return Ok(());
    };
    if let StreamResource::FileWrite(file) = &mut stream.resource {
        use std::io::Write;
        if let Err(e) = file.write_all(chunk) {
            let code = ErrorCode::from_io_error(&e);
            let msg = e.to_string();
            session.streams.free(idx);
            session.send_stream_error(id, code, &msg)?;
        }
    }
    Ok(())
}

/// Inbound `STREAM_END` from the peer: for `FileWrite`, this is the
/// data terminator -- the client closes the file and emits its own
/// `STREAM_END` to satisfy the "exactly one terminal packet" invariant.
/// Unknown ids are ignored.
pub fn handle_stream_end_from_peer(session: &mut Session, payload: &[u8]) -> anyhow::Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    if payload.len() < 4 {
        return Ok(());
    }
    let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let Some(idx) = session.streams.find(id) else {
        return Ok(());
    };
    let is_file_write = matches!(
        session.streams.get(idx).map(|s| &s.resource),
        Some(StreamResource::FileWrite(_))
    );
    if is_file_write {
        if let Some(stream) = session.streams.get_mut(idx) {
            stream.state = StreamState::HalfRemote;
        }
        session.streams.free(idx);
        session.send_stream_end(id, STATUS_OK)?;
    }
    Ok(())
}

/// `STREAM_CANCEL(id)`: free resources and reply `STREAM_END(CANCELLED)`.
pub fn handle_stream_cancel(session: &mut Session, payload: &[u8]) -> anyhow::Result<()> {
    if payload.len() < 4 {
        return Ok(());
    }
    let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    if let Some(idx) = session.streams.find(id) {
        session.streams.free(idx);
        session.send_stream_end(id, STATUS_CANCELLED)?;
    }
    Ok(())
}
