//! Framed transport (C2): buffered nonblocking reads reassembled into
//! complete packets, buffered complete writes.
//!
//! The reassembly buffer accumulates bytes from the socket and yields
//! complete packets as soon as they're available, draining consumed bytes
//! the same way `socket/framing.rs`'s `FrameDecoder` does in the corpus
//! this client is grounded on.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use crate::wire::{decode_header, encode_packet, PacketType};

/// A decoded packet, owned (the backing reassembly buffer is drained
/// immediately after producing it, so a borrowed view would fight the
/// caller's mutable access to `Transport`).
#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_type: PacketType,
    pub payload: Vec<u8>,
}

/// Buffered nonblocking TCP transport with packet reassembly.
pub struct Transport {
    stream: TcpStream,
    recv_buf: Vec<u8>,
}

impl Transport {
    /// Connect to `host:port`, set `TCP_NODELAY`, and switch to nonblocking.
    pub fn connect(host: &str, port: u16) -> anyhow::Result<Self> {
        use anyhow::Context;
        let stream = TcpStream::connect((host, port))
            .with_context(|| format!("connecting to {host}:{port}"))?;
        stream.set_nodelay(true).context("setting TCP_NODELAY")?;
        stream.set_nonblocking(true).context("setting socket nonblocking")?;
        Ok(Self {
            stream,
            recv_buf: Vec::with_capacity(8192),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Read whatever the socket has into the reassembly buffer.
    ///
    /// Returns `Ok(true)` if the peer is still connected (including the
    /// case where nothing was available — "would block" is not an
    /// error), `Ok(false)` when the peer closed the connection.
    pub fn pump_read(&mut self) -> io::Result<bool> {
        let mut tmp = [0u8; 65536];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.recv_buf.extend_from_slice(&tmp[..n]);
                    if n < tmp.len() {
                        return Ok(true);
                    }
                    // Buffer was full; there may be more queued. Loop again.
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pop one complete packet from the reassembly buffer, if present.
    ///
    /// Returns `Err(())` on a protocol violation (oversized length) — the
    /// caller must terminate the session.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, ()> {
        let (packet_type, length) = match decode_header(&self.recv_buf)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let total = 5 + length as usize;
        if self.recv_buf.len() < total {
            return Ok(None);
        }
        let payload = self.recv_buf[5..total].to_vec();
        self.recv_buf.drain(..total);
        Ok(Some(Packet { packet_type, payload }))
    }

    /// Encode and fully write a packet, blocking (via poll-for-writability)
    /// past any `WouldBlock` until every byte is sent.
    pub fn send_packet(&mut self, packet_type: PacketType, payload: &[u8]) -> io::Result<()> {
        let mut buf = Vec::new();
        encode_packet(packet_type, payload, &mut buf);
        self.write_all_blocking(&buf)
    }

    fn write_all_blocking(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.stream.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "socket write returned 0"))
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait_writable(Duration::from_secs(30))?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn wait_writable(&self, timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "socket never became writable"));
            }
            let mut pfd = libc::pollfd {
                fd: self.fd(),
                events: libc::POLLOUT,
                revents: 0,
            };
            let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;
            // SAFETY: `pfd` is a single valid pollfd on the stack and `nfds=1`
            // matches the slice length passed to the syscall.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if rc > 0 && pfd.revents & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP) != 0 {
                return Ok(());
            }
        }
    }
}
