//! Session handshake (C4): HELLO/HELLO_ACK exchange.

use anyhow::{bail, Context, Result};
use std::time::Instant;

use crate::constants::{
    FLAG_RESUME, FLAG_SIMPLE, HANDSHAKE_TIMEOUT, MAX_PATH, PROTO_VERSION,
};
use crate::transport::Transport;
use crate::wire::PacketType;

/// Result of a successful handshake: the window the peer granted us.
pub struct HelloAck {
    pub send_window: u32,
}

/// Send `HELLO` with the current working directory and requested flags.
pub fn send_hello(transport: &mut Transport, resume: bool, simple: bool, recv_window: u32) -> Result<()> {
    let cwd = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "/".to_string());
    let mut cwd_bytes = cwd.into_bytes();
    cwd_bytes.truncate(MAX_PATH.saturating_sub(1));

    let mut flags = 0u8;
    if resume {
        flags |= FLAG_RESUME;
    }
    if simple {
        flags |= FLAG_SIMPLE;
    }

    let mut payload = Vec::with_capacity(6 + cwd_bytes.len() + 1);
    payload.push(PROTO_VERSION);
    payload.push(flags);
    payload.extend_from_slice(&recv_window.to_be_bytes());
    payload.extend_from_slice(&cwd_bytes);
    payload.push(0);

    transport
        .send_packet(PacketType::Hello, &payload)
        .context("sending HELLO")
}

/// Block (busy-polling the socket, bounded by [`HANDSHAKE_TIMEOUT`]) until
/// `HELLO_ACK` arrives. Any other packet received first is logged and
/// discarded, matching the spec's "logged and discarded" rule.
pub fn wait_for_hello_ack(transport: &mut Transport) -> Result<HelloAck> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        if Instant::now() >= deadline {
            bail!("timed out waiting for HELLO_ACK");
        }
        let alive = transport.pump_read().context("reading during handshake")?;
        if !alive {
            bail!("connection closed before HELLO_ACK");
        }
        match transport.next_packet() {
            Ok(Some(pkt)) => {
                if pkt.packet_type != PacketType::HelloAck {
                    log::warn!("[Handshake] expected HELLO_ACK, got {:?}; discarding", pkt.packet_type);
                    continue;
                }
                if pkt.payload.len() < 6 {
                    bail!("malformed HELLO_ACK: payload too short ({} bytes)", pkt.payload.len());
                }
                let version = pkt.payload[0];
                if version != PROTO_VERSION {
                    bail!("protocol version mismatch: peer speaks {version}, we speak {PROTO_VERSION}");
                }
                let window = u32::from_be_bytes([
                    pkt.payload[2],
                    pkt.payload[3],
                    pkt.payload[4],
                    pkt.payload[5],
                ]);
                log::info!("[Handshake] HELLO_ACK accepted, send_window={window}");
                return Ok(HelloAck { send_window: window });
            }
            Ok(None) => {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Err(()) => bail!("protocol error decoding packet during handshake"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_packet;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn connected_pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = Transport::connect("127.0.0.1", addr.port()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn hello_ack_with_matching_version_succeeds() {
        let (mut client, mut server) = connected_pair();
        send_hello(&mut client, false, true, 1024).unwrap();

        let mut ack_payload = vec![PROTO_VERSION, FLAG_SIMPLE];
        ack_payload.extend_from_slice(&70000u32.to_be_bytes());
        let mut buf = Vec::new();
        encode_packet(PacketType::HelloAck, &ack_payload, &mut buf);
        server.write_all(&buf).unwrap();

        let ack = wait_for_hello_ack(&mut client).unwrap();
        assert_eq!(ack.send_window, 70000);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let (mut client, mut server) = connected_pair();
        send_hello(&mut client, false, false, 1024).unwrap();

        let mut ack_payload = vec![99u8, 0];
        ack_payload.extend_from_slice(&1024u32.to_be_bytes());
        let mut buf = Vec::new();
        encode_packet(PacketType::HelloAck, &ack_payload, &mut buf);
        server.write_all(&buf).unwrap();

        assert!(wait_for_hello_ack(&mut client).is_err());
    }

    #[test]
    fn non_ack_packet_is_discarded_then_ack_accepted() {
        let (mut client, mut server) = connected_pair();
        send_hello(&mut client, false, false, 1024).unwrap();

        let mut buf = Vec::new();
        encode_packet(PacketType::Ping, b"noise", &mut buf);
        let mut ack_payload = vec![PROTO_VERSION, 0];
        ack_payload.extend_from_slice(&2048u32.to_be_bytes());
        encode_packet(PacketType::HelloAck, &ack_payload, &mut buf);
        server.write_all(&buf).unwrap();

        let ack = wait_for_hello_ack(&mut client).unwrap();
        assert_eq!(ack.send_window, 2048);
    }
}
