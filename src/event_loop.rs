//! Event loop (C12): single-threaded cooperative multiplexing of the
//! socket, stdin, every open exec-stream pipe, and the SIGWINCH latch.
//!
//! Generalizes the corpus's own nonblocking-poll-with-sleep loop shape
//! (`broker/mod.rs`'s `run`) from a single persistent fd to `libc::poll`
//! over a variable fd set, since this client must watch stdin and an
//! unbounded number of exec pipes at once instead of one connection.

use std::io::Read;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::constants::{EVENT_LOOP_TICK_MS, STDIN_READ_CHUNK};
use crate::session::{Dispatch, Session};
use crate::stream::StreamResource;
use crate::terminal::Terminal;
use crate::wire::GoodbyeReason;

/// Drive `session` until `GOODBYE` (either direction), a fatal transport
/// error, or the peer closing the connection. Returns the reason the
/// loop stopped so `main` can pick an exit code.
pub fn run(session: &mut Session, term: &mut Terminal) -> Result<GoodbyeReason> {
    loop {
        if term.resize_flag.swap(false, Ordering::SeqCst) {
            let (rows, cols) = term.size();
            session
                .send_resize(rows, cols)
                .context("sending TERM_RESIZE")?;
        }

        let exec_fds = exec_pipe_fds(session);
        poll_wait(session, term, &exec_fds)?;

        drain_stdin(session, term)?;

        if let Some(reason) = poll_exec_streams(session)? {
            return Ok(reason);
        }

        let alive = session
            .transport
            .pump_read()
            .context("reading from socket")?;
        if !alive {
            log::info!("[EventLoop] peer closed the connection");
            return Ok(GoodbyeReason::Normal);
        }

        loop {
            let pkt = match session.transport.next_packet() {
                Ok(Some(pkt)) => pkt,
                Ok(None) => break,
                Err(()) => {
                    log::warn!("[EventLoop] oversized packet, terminating session");
                    let _ = session.send_goodbye(GoodbyeReason::ProtocolError);
                    return Ok(GoodbyeReason::ProtocolError);
                }
            };
            match session.dispatch_packet(pkt).context("dispatching inbound packet")? {
                Dispatch::Continue => {}
                Dispatch::Goodbye(reason) => return Ok(reason),
            }
        }
    }
}

/// Collect the fds of every stream slot currently running an exec
/// child, for this tick's `poll()`.
fn exec_pipe_fds(session: &Session) -> Vec<RawFd> {
    session
        .streams
        .exec_indices()
        .into_iter()
        .filter_map(|idx| match session.streams.get(idx) {
            Some(stream) => match &stream.resource {
                StreamResource::Exec(exec) => Some(exec.fd()),
                _ => None,
            },
            None => None,
        })
        .collect()
}

/// Wait up to [`EVENT_LOOP_TICK_MS`] for the socket, stdin, or any exec
/// pipe to become readable. A timeout or `EINTR` is not an error -- the
/// loop simply continues to its unconditional per-tick work (resize
/// check, stdin drain, exec poll, socket drain all tolerate "nothing was
/// ready").
fn poll_wait(session: &Session, term: &Terminal, exec_fds: &[RawFd]) -> Result<()> {
    let mut fds = Vec::with_capacity(2 + exec_fds.len());
    fds.push(libc::pollfd {
        fd: session.transport.fd(),
        events: libc::POLLIN,
        revents: 0,
    });
    fds.push(libc::pollfd {
        fd: term.stdin_fd(),
        events: libc::POLLIN,
        revents: 0,
    });
    for &fd in exec_fds {
        fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
    }

    // SAFETY: `fds` is a valid, non-empty slice of `pollfd`s and its
    // length matches `nfds`.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, EVENT_LOOP_TICK_MS) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(());
        }
        return Err(err).context("polling readiness set");
    }
    Ok(())
}

/// Drain up to [`STDIN_READ_CHUNK`] bytes of locally typed input and
/// forward them as `TERM_INPUT`. Nonblocking: `WouldBlock` just means
/// nothing was typed this tick.
fn drain_stdin(session: &mut Session, term: &Terminal) -> Result<()> {
    set_nonblocking(term.stdin_fd());
    let mut buf = [0u8; STDIN_READ_CHUNK];
    let mut stdin = std::io::stdin();
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => session
                .send_input(&buf[..n])
                .context("sending TERM_INPUT")?,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading stdin"),
        }
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) {
    // SAFETY: `fd` is a valid, open file descriptor (stdin) for the
    // lifetime of the process.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

/// Poll every exec stream for this tick, emitting `STREAM_DATA` /
/// `STREAM_END` as each one produces output or finishes. Returns
/// `Some(reason)` only if emitting output triggered a `GOODBYE` race
/// (it never does today, but the return type keeps the call site
/// uniform with the main dispatch loop).
fn poll_exec_streams(session: &mut Session) -> Result<Option<GoodbyeReason>> {
    for idx in session.streams.exec_indices() {
        let id = match session.streams.get(idx) {
            Some(stream) => stream.id,
            None => continue,
        };

        let poll_result = {
            let stream = match session.streams.get_mut(idx) {
                Some(s) => s,
                None => continue,
            };
            match &mut stream.resource {
                StreamResource::Exec(exec) => exec.poll(),
                _ => continue,
            }
        };

        match poll_result {
            crate::exec::PollResult::Idle => {}
            crate::exec::PollResult::Data(bytes) => {
                let mut payload = Vec::with_capacity(1 + bytes.len());
                payload.push(crate::constants::CHAN_STDOUT);
                payload.extend_from_slice(&bytes);
                match session.send_stream_data(id, &payload)? {
                    Dispatch::Continue => {}
                    Dispatch::Goodbye(reason) => return Ok(Some(reason)),
                }
            }
            crate::exec::PollResult::Done { exit_kind, value } => {
                let payload = crate::exec::ExecState::exit_payload(id, exit_kind, value);
                session.send_stream_end_raw(&payload)?;
                session.streams.free(idx);
            }
        }
    }
    Ok(None)
}
