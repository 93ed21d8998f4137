//! Session composite (C4/C5 glue): owns the transport, flow controller,
//! stream table, and terminal filter state the event loop drives.
//!
//! Process-wide state that the original C client kept in globals becomes
//! explicit fields here, passed by `&mut` through the event loop instead.

use anyhow::{Context, Result};

use crate::constants::DEFAULT_WINDOW;
use crate::flow::{FlowController, SendGate};
use crate::stream::StreamTable;
use crate::terminal_filter::Filter;
use crate::transport::Transport;
use crate::wire::{GoodbyeReason, PacketType};

/// Outcome of dispatching one inbound packet, telling the event loop
/// whether to keep running.
pub enum Dispatch {
    Continue,
    Goodbye(GoodbyeReason),
}

/// The composite object the event loop drives each tick.
pub struct Session {
    pub transport: Transport,
    pub flow: FlowController,
    pub streams: StreamTable,
    pub filter: Filter,
    pub simple_mode: bool,
}

impl Session {
    /// Connect, perform the HELLO/HELLO_ACK handshake, and return a ready
    /// session. `resume`/`simple` are the flags requested by the CLI.
    pub fn connect(host: &str, port: u16, resume: bool, simple: bool) -> Result<Self> {
        let mut transport = Transport::connect(host, port)?;
        crate::handshake::send_hello(&mut transport, resume, simple, DEFAULT_WINDOW)
            .context("sending HELLO")?;
        let ack = crate::handshake::wait_for_hello_ack(&mut transport)
            .context("waiting for HELLO_ACK")?;

        Ok(Self {
            transport,
            flow: FlowController::new(ack.send_window),
            streams: StreamTable::new(),
            filter: Filter::new(),
            simple_mode: simple,
        })
    }

    /// Send one `STREAM_DATA(id, payload)`, blocking on the outbound
    /// window if necessary. While blocked, the socket is still pumped so
    /// `PING`/`WINDOW_UPDATE`/`GOODBYE` are serviced; every other packet
    /// type is ignored until the window clears, per the spec's blocked
    /// behavior.
    pub fn send_stream_data(&mut self, id: u32, payload: &[u8]) -> Result<Dispatch> {
        let mut framed = Vec::with_capacity(4 + payload.len());
        framed.extend_from_slice(&id.to_be_bytes());
        framed.extend_from_slice(payload);

        loop {
            match self.flow.try_send(framed.len() as u32) {
                SendGate::Go => {
                    self.transport
                        .send_packet(PacketType::StreamData, &framed)
                        .context("sending STREAM_DATA")?;
                    return Ok(Dispatch::Continue);
                }
                SendGate::Blocked => {
                    if self
                        .flow
                        .outbound_block_expired(crate::constants::WINDOW_BLOCK_TIMEOUT)
                    {
                        anyhow::bail!("outbound window block exceeded 30s deadline");
                    }
                    let alive = self.transport.pump_read().context("polling while blocked")?;
                    if !alive {
                        anyhow::bail!("connection closed while waiting for WINDOW_UPDATE");
                    }
                    while let Ok(Some(pkt)) = self.transport.next_packet() {
                        match pkt.packet_type {
                            PacketType::WindowUpdate => {
                                if pkt.payload.len() >= 4 {
                                    let inc = u32::from_be_bytes([
                                        pkt.payload[0],
                                        pkt.payload[1],
                                        pkt.payload[2],
                                        pkt.payload[3],
                                    ]);
                                    self.flow.apply_window_update(inc);
                                }
                            }
                            PacketType::Ping => {
                                self.transport
                                    .send_packet(PacketType::Pong, &pkt.payload)
                                    .context("replying PONG while blocked")?;
                            }
                            PacketType::Goodbye => {
                                let reason = pkt
                                    .payload
                                    .first()
                                    .copied()
                                    .map(GoodbyeReason::from_byte)
                                    .unwrap_or(GoodbyeReason::Normal);
                                return Ok(Dispatch::Goodbye(reason));
                            }
                            _ => {
                                log::debug!("[Session] ignoring {:?} while window-blocked", pkt.packet_type);
                            }
                        }
                    }
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
            }
        }
    }

    pub fn send_stream_end(&mut self, id: u32, status: u8) -> Result<()> {
        let mut payload = Vec::with_capacity(5);
        payload.extend_from_slice(&id.to_be_bytes());
        payload.push(status);
        self.transport
            .send_packet(PacketType::StreamEnd, &payload)
            .context("sending STREAM_END")
    }

    /// Send `STREAM_END` carrying the 9-byte exec exit payload, which
    /// already includes `id` as its first 4 bytes.
    pub fn send_stream_end_raw(&mut self, payload: &[u8]) -> Result<()> {
        self.transport
            .send_packet(PacketType::StreamEnd, payload)
            .context("sending STREAM_END")
    }

    pub fn send_stream_error(&mut self, id: u32, code: crate::errors::ErrorCode, message: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(6 + message.len());
        payload.extend_from_slice(&id.to_be_bytes());
        payload.push(code.as_u8());
        payload.extend_from_slice(message.as_bytes());
        self.transport
            .send_packet(PacketType::StreamError, &payload)
            .context("sending STREAM_ERROR")
    }

    /// Record `len` inbound bytes and emit `WINDOW_UPDATE` if the
    /// threshold is crossed.
    pub fn ack_inbound(&mut self, len: u32) -> Result<()> {
        if let Some(increment) = self.flow.ack_inbound(len) {
            self.transport
                .send_packet(PacketType::WindowUpdate, &increment.to_be_bytes())
                .context("sending WINDOW_UPDATE")?;
        }
        Ok(())
    }

    /// Dispatch one already-decoded inbound packet.
    pub fn dispatch_packet(&mut self, pkt: crate::transport::Packet) -> Result<Dispatch> {
        match pkt.packet_type {
            PacketType::Ping => {
                self.transport
                    .send_packet(PacketType::Pong, &pkt.payload)
                    .context("replying PONG")?;
            }
            PacketType::Pong => {}
            PacketType::Goodbye => {
                let reason = pkt
                    .payload
                    .first()
                    .copied()
                    .map(GoodbyeReason::from_byte)
                    .unwrap_or(GoodbyeReason::Normal);
                return Ok(Dispatch::Goodbye(reason));
            }
            PacketType::WindowUpdate => {
                if pkt.payload.len() >= 4 {
                    let inc = u32::from_be_bytes([
                        pkt.payload[0],
                        pkt.payload[1],
                        pkt.payload[2],
                        pkt.payload[3],
                    ]);
                    self.flow.apply_window_update(inc);
                } else {
                    log::warn!("[Session] malformed WINDOW_UPDATE, ignoring");
                }
            }
            PacketType::TermOutput => {
                self.ack_inbound(pkt.payload.len() as u32)?;
                if self.simple_mode {
                    let mut out = Vec::with_capacity(pkt.payload.len());
                    self.filter.feed(&pkt.payload, &mut out);
                    use std::io::Write;
                    std::io::stdout().write_all(&out).ok();
                    std::io::stdout().flush().ok();
                } else {
                    use std::io::Write;
                    std::io::stdout().write_all(&pkt.payload).ok();
                    std::io::stdout().flush().ok();
                }
            }
            PacketType::StreamOpen => crate::ops::handle_stream_open(self, &pkt.payload)?,
            PacketType::StreamData => crate::ops::handle_stream_data(self, &pkt.payload)?,
            PacketType::StreamEnd => crate::ops::handle_stream_end_from_peer(self, &pkt.payload)?,
            PacketType::StreamCancel => crate::ops::handle_stream_cancel(self, &pkt.payload)?,
            other => {
                log::warn!("[Session] dropping unhandled/unknown packet {other:?}");
            }
        }
        Ok(Dispatch::Continue)
    }

    /// Send `TERM_RESIZE(rows, cols)`.
    pub fn send_resize(&mut self, rows: u16, cols: u16) -> Result<()> {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&rows.to_be_bytes());
        payload.extend_from_slice(&cols.to_be_bytes());
        self.transport
            .send_packet(PacketType::TermResize, &payload)
            .context("sending TERM_RESIZE")
    }

    /// Send `TERM_INPUT(bytes)`.
    pub fn send_input(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport
            .send_packet(PacketType::TermInput, bytes)
            .context("sending TERM_INPUT")
    }

    pub fn send_goodbye(&mut self, reason: GoodbyeReason) -> Result<()> {
        self.transport
            .send_packet(PacketType::Goodbye, &[reason.as_u8()])
            .context("sending GOODBYE")
    }
}
