//! Exec streaming (C8): fork+pipe child execution, nonblocking drain,
//! `{Running, DrainingAfterExit, Reaped}` state machine.
//!
//! Modeled as an explicit state machine rather than a waitpid-then-read
//! loop so interleaved output arriving at the same instant as the exit
//! is never dropped: the child can exit while its pipe still holds
//! unread bytes, and the drain must finish before the `STREAM_END` is
//! built.

use std::io;
use std::os::unix::io::RawFd;

use crate::constants::{EXIT_NORMAL, EXIT_SIGNAL, EXIT_UNKNOWN};

/// Lifecycle of a single exec stream's child process and pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Child has not been observed to exit yet.
    Running,
    /// `waitpid` reaped the child; the pipe may still hold buffered
    /// bytes that must be drained before emitting `STREAM_END`.
    DrainingAfterExit { exit_kind: u8, value: u32 },
    /// Pipe drained and exit payload already emitted; free imminent.
    Reaped,
}

/// One exec stream's process/pipe state, owned by its `StreamTable`
/// slot. Built by [`spawn`] on `STREAM_OPEN(EXEC)`.
#[derive(Debug)]
pub struct ExecState {
    child_pid: libc::pid_t,
    read_fd: RawFd,
    phase: Phase,
}

/// Outcome of polling an exec stream for one event loop tick.
pub enum PollResult {
    /// No data, process still running.
    Idle,
    /// `channel=1` bytes read from the child's stdout/stderr pipe.
    Data(Vec<u8>),
    /// Pipe drained and the child reaped; caller must emit the 9-byte
    /// `STREAM_END` payload built from these fields and then free the
    /// slot.
    Done { exit_kind: u8, value: u32 },
}

impl ExecState {
    pub fn fd(&self) -> RawFd {
        self.read_fd
    }

    /// Fork the shell, redirecting its stdout+stderr onto the write end
    /// of a fresh pipe. The parent keeps the nonblocking read end.
    pub fn spawn(command: &str) -> io::Result<ExecState> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let shell = std::ffi::CString::new("/bin/sh").unwrap();
        let flag = std::ffi::CString::new("-c").unwrap();
        let cmd = std::ffi::CString::new(command).unwrap_or_else(|_| std::ffi::CString::new("").unwrap());

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
            return Err(err);
        }

        if pid == 0 {
            unsafe {
                libc::close(read_fd);
                libc::dup2(write_fd, libc::STDOUT_FILENO);
                libc::dup2(write_fd, libc::STDERR_FILENO);
                libc::close(write_fd);
                let argv: [*const libc::c_char; 4] =
                    [shell.as_ptr(), flag.as_ptr(), cmd.as_ptr(), std::ptr::null()];
                libc::execv(shell.as_ptr(), argv.as_ptr());
                libc::_exit(127);
            }
        }

        unsafe {
            libc::close(write_fd);
            let flags = libc::fcntl(read_fd, libc::F_GETFL, 0);
            libc::fcntl(read_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        Ok(ExecState {
            child_pid: pid,
            read_fd,
            phase: Phase::Running,
        })
    }

    /// Nonblocking `waitpid(WNOHANG)`. Returns `Some((exit_kind, value))`
    /// if the child has exited, `None` if still running.
    fn try_reap(&self) -> Option<(u8, u32)> {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(self.child_pid, &mut status, libc::WNOHANG) };
        if ret == self.child_pid {
            if libc::WIFEXITED(status) {
                Some((EXIT_NORMAL, libc::WEXITSTATUS(status) as u32))
            } else if libc::WIFSIGNALED(status) {
                Some((EXIT_SIGNAL, libc::WTERMSIG(status) as u32))
            } else {
                Some((EXIT_UNKNOWN, 0))
            }
        } else {
            None
        }
    }

    /// One tick of this exec stream's poll. Reads whatever is
    /// immediately available on the pipe; once the child has exited and
    /// the pipe reads EOF (or `EAGAIN` while already reaped), transitions
    /// to `Done`.
    pub fn poll(&mut self) -> PollResult {
        let mut buf = [0u8; crate::constants::SMALL_CHUNK];
        let n = unsafe {
            libc::read(
                self.read_fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };

        if n > 0 {
            return PollResult::Data(buf[..n as usize].to_vec());
        }

        if n == 0 {
            // EOF on the pipe: child closed its end. Reap if not done yet.
            let (exit_kind, value) = match self.phase {
                Phase::DrainingAfterExit { exit_kind, value } => (exit_kind, value),
                _ => self.try_reap().unwrap_or((EXIT_UNKNOWN, 0)),
            };
            self.phase = Phase::Reaped;
            return PollResult::Done { exit_kind, value };
        }

        // n < 0: EAGAIN/EWOULDBLOCK expected; anything else we just
        // treat the same way (no data this tick).
        if let Phase::Running = self.phase {
            if let Some((exit_kind, value)) = self.try_reap() {
                self.phase = Phase::DrainingAfterExit { exit_kind, value };
            }
        }

        match self.phase {
            Phase::DrainingAfterExit { .. } => {
                // Child reaped; drain once more before declaring Done so
                // bytes written right before exit are not lost. If a
                // second EAGAIN shows up with nothing buffered, the pipe
                // is genuinely empty -- but we only know that on EOF, so
                // keep reporting Idle until the read above yields 0.
                PollResult::Idle
            }
            _ => PollResult::Idle,
        }
    }

    /// Build the 9-byte `STREAM_END` exit payload for this stream's id.
    pub fn exit_payload(id: u32, exit_kind: u8, value: u32) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[0..4].copy_from_slice(&id.to_be_bytes());
        out[4] = exit_kind;
        out[5..9].copy_from_slice(&value.to_be_bytes());
        out
    }

    /// Abandon this process on slot free (cancel, table full elsewhere,
    /// shutdown): send `SIGTERM` and reap non-blocking without waiting
    /// for output drain.
    pub fn abandon(&mut self) {
        if self.phase != Phase::Reaped {
            unsafe {
                libc::kill(self.child_pid, libc::SIGTERM);
            }
            self.try_reap();
        }
        unsafe {
            libc::close(self.read_fd);
        }
    }
}
