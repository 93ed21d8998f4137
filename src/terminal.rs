//! Terminal capability: raw-mode scoped guard, size probe, and the
//! SIGWINCH latch the event loop polls each tick.
//!
//! The spec treats the raw-mode driver and window-size probe as an
//! external collaborator exposing `{set_raw, restore, size(), stdin_read,
//! stdout_write}`. The corpus gets this from `crossterm`; that dependency
//! is dropped for this core (see DESIGN.md), so the capability is built
//! directly on `libc` termios and `TIOCGWINSZ`, the way the pack's own
//! non-crossterm examples do raw-mode handling.

use std::os::unix::io::RawFd;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock};

/// The pre-raw-mode termios, stashed here so a panic hook installed
/// before any `Terminal` exists can still restore the real original
/// settings instead of merely leaving raw mode in place.
static SAVED_ORIGINAL: OnceLock<Mutex<Option<libc::termios>>> = OnceLock::new();

/// Restore whatever termios [`Terminal::acquire`] saved, if any. Safe to
/// call with no `Terminal` ever having been acquired (a no-op then).
pub fn restore_saved_original() {
    let slot = SAVED_ORIGINAL.get_or_init(|| Mutex::new(None));
    if let Ok(guard) = slot.lock() {
        if let Some(term) = *guard {
            // SAFETY: `term` is a previously captured valid `termios`.
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &term);
            }
        }
    }
}

/// RAII guard: raw mode is restored on every exit path, the same
/// discipline the corpus's `main.rs` panic hook enforces for its own
/// `crossterm` raw mode.
pub struct Terminal {
    original: libc::termios,
    restored: bool,
    pub resize_flag: Arc<AtomicBool>,
}

impl Terminal {
    /// Put stdin into raw mode and register a `SIGWINCH` handler that
    /// flips `resize_flag`, mirroring `tui/runner.rs`'s
    /// `signal_hook::flag::register(SIGWINCH, Arc<AtomicBool>)` pattern.
    pub fn acquire() -> anyhow::Result<Self> {
        let original = Self::get_attr(libc::STDIN_FILENO)?;
        let mut raw = original;
        // SAFETY: `raw` is a valid, initialized `termios` on the stack.
        unsafe { libc::cfmakeraw(&mut raw) };
        Self::set_attr(libc::STDIN_FILENO, &raw)?;

        let slot = SAVED_ORIGINAL.get_or_init(|| Mutex::new(None));
        if let Ok(mut guard) = slot.lock() {
            *guard = Some(original);
        }

        let resize_flag = Arc::new(AtomicBool::new(false));
        #[cfg(unix)]
        {
            use signal_hook::consts::signal::SIGWINCH;
            if let Err(e) = signal_hook::flag::register(SIGWINCH, Arc::clone(&resize_flag)) {
                log::warn!("[Terminal] failed to register SIGWINCH handler: {e}");
            }
        }

        Ok(Self {
            original,
            restored: false,
            resize_flag,
        })
    }

    /// Restore the original terminal attributes. Idempotent — safe to
    /// call from a panic hook and again from `Drop`.
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        let _ = Self::set_attr(libc::STDIN_FILENO, &self.original);
        self.restored = true;
    }

    /// Current `(rows, cols)` from `TIOCGWINSZ` on stdout, falling back
    /// to `(24, 80)` when the ioctl fails (e.g. stdout redirected).
    pub fn size(&self) -> (u16, u16) {
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        // SAFETY: `ws` is a valid `winsize` destination for the ioctl.
        let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
        if rc == 0 && ws.ws_row > 0 && ws.ws_col > 0 {
            (ws.ws_row, ws.ws_col)
        } else {
            (24, 80)
        }
    }

    pub fn stdin_fd(&self) -> RawFd {
        libc::STDIN_FILENO
    }

    fn get_attr(fd: RawFd) -> anyhow::Result<libc::termios> {
        let mut term: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: `term` is a valid destination for `tcgetattr`.
        let rc = unsafe { libc::tcgetattr(fd, &mut term) };
        if rc != 0 {
            anyhow::bail!(std::io::Error::last_os_error());
        }
        Ok(term)
    }

    fn set_attr(fd: RawFd, term: &libc::termios) -> anyhow::Result<()> {
        // SAFETY: `term` is a valid, initialized `termios`.
        let rc = unsafe { libc::tcsetattr(fd, libc::TCSANOW, term) };
        if rc != 0 {
            anyhow::bail!(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.restore();
    }
}
