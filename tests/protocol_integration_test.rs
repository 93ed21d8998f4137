//! Cross-module integration tests: handshake -> stream open -> data ->
//! end, and exec round-trip.
//!
//! Mirrors the corpus's own `tests/` directory in using `tempfile` for
//! filesystem fixtures. No end-to-end TCP harness against a live relay
//! is needed: a `TcpListener` stands in for the relay and the test reads
//! the bytes the client actually wrote to the wire, which is sufficient
//! to cover the protocol state machine without a real peer.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use telepresence_client::constants::PROTO_VERSION;
use telepresence_client::ops;
use telepresence_client::session::{Dispatch, Session};
use telepresence_client::stream::StreamResource;
use telepresence_client::wire::{encode_packet, GoodbyeReason, PacketType};

/// Stands in for the relay: reads/writes raw packets over the socket
/// side the client doesn't own, buffering across reads the same way
/// [`telepresence_client::transport::Transport`] does on the client
/// side, so a multi-packet `read()` never loses a trailing packet.
struct FakeRelay {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl FakeRelay {
    fn read_packet(&mut self) -> (PacketType, Vec<u8>) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if self.buf.len() >= 5 {
                let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
                if self.buf.len() >= 5 + len {
                    let packet_type = PacketType::from_byte(self.buf[0]);
                    let payload = self.buf[5..5 + len].to_vec();
                    self.buf.drain(..5 + len);
                    return (packet_type, payload);
                }
            }
            let mut tmp = [0u8; 4096];
            match self.stream.read(&mut tmp) {
                Ok(0) => panic!("relay socket closed before a full packet arrived"),
                Ok(n) => self.buf.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if std::time::Instant::now() > deadline {
                        panic!("timed out waiting for a packet from the client");
                    }
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                Err(e) => panic!("relay read error: {e}"),
            }
        }
    }

    fn send(&mut self, packet_type: PacketType, payload: &[u8]) {
        let mut buf = Vec::new();
        encode_packet(packet_type, payload, &mut buf);
        self.stream.write_all(&buf).unwrap();
    }
}

/// Spin up a fake relay on an ephemeral port, send `HELLO_ACK` as soon as
/// `HELLO` arrives, and hand back a connected `Session` plus the
/// relay-side socket for the test to drive further.
fn connect_with_fake_relay(send_window: u32) -> (Session, FakeRelay) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let (mut relay, _) = listener.accept().unwrap();
        relay.set_nonblocking(false).unwrap();
        let mut header = [0u8; 5];
        relay.read_exact(&mut header).unwrap();
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len];
        relay.read_exact(&mut payload).unwrap();

        let mut ack_payload = vec![PROTO_VERSION, 0];
        ack_payload.extend_from_slice(&send_window.to_be_bytes());
        let mut buf = Vec::new();
        encode_packet(PacketType::HelloAck, &ack_payload, &mut buf);
        relay.write_all(&buf).unwrap();
        relay
    });

    let session = Session::connect("127.0.0.1", addr.port(), false, true).unwrap();
    let stream = handle.join().unwrap();
    stream.set_nonblocking(true).unwrap();
    (session, FakeRelay { stream, buf: Vec::new() })
}

/// S2 from the spec: `FILE_EXISTS` on a present path yields
/// `STREAM_DATA(exists=1)` then `STREAM_END(OK)`.
#[test]
fn file_exists_round_trip_scenario_s2() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&5u32.to_be_bytes());
    open_payload.push(0x0B); // FILE_EXISTS
    open_payload.extend_from_slice(tmp.path().to_string_lossy().as_bytes());
    open_payload.push(0);
    ops::handle_stream_open(&mut session, &open_payload).unwrap();

    let (pt, payload) = relay.read_packet();
    assert_eq!(pt, PacketType::StreamData);
    assert_eq!(&payload[0..4], &5u32.to_be_bytes());
    assert_eq!(payload[4], 1);

    let (pt, payload) = relay.read_packet();
    assert_eq!(pt, PacketType::StreamEnd);
    assert_eq!(&payload[0..4], &5u32.to_be_bytes());
    assert_eq!(payload[4], 0);
}

/// `FILE_EXISTS` on an absent path yields `exists=0`.
#[test]
fn file_exists_reports_false_for_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.txt");
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&1u32.to_be_bytes());
    open_payload.push(0x0B);
    open_payload.extend_from_slice(missing.to_string_lossy().as_bytes());
    open_payload.push(0);
    ops::handle_stream_open(&mut session, &open_payload).unwrap();

    let (_, payload) = relay.read_packet();
    assert_eq!(payload[4], 0);
}

/// S3 from the spec: `FILE_FIND` with a glob finds only matching
/// basenames, then terminates cleanly.
#[test]
fn file_find_matches_glob_scenario_s3() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"one").unwrap();
    std::fs::write(dir.path().join("b.txt"), b"two").unwrap();
    std::fs::write(dir.path().join("c.md"), b"three").unwrap();

    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&7u32.to_be_bytes());
    open_payload.push(0x06); // FILE_FIND
    open_payload.extend_from_slice(dir.path().to_string_lossy().as_bytes());
    open_payload.push(0);
    open_payload.extend_from_slice(b"*.txt");
    open_payload.push(0);
    ops::handle_stream_open(&mut session, &open_payload).unwrap();

    let mut basenames = Vec::new();
    loop {
        let (pt, payload) = relay.read_packet();
        match pt {
            PacketType::StreamData => {
                let path_bytes = &payload[4..payload.len() - 1];
                let path = std::path::Path::new(std::str::from_utf8(path_bytes).unwrap());
                basenames.push(path.file_name().unwrap().to_string_lossy().into_owned());
            }
            PacketType::StreamEnd => break,
            other => panic!("unexpected packet {other:?}"),
        }
    }
    basenames.sort();
    assert_eq!(basenames, vec!["a.txt", "b.txt"]);
}

/// `FILE_SEARCH` finds a substring match and reports its 1-based line
/// number, skipping a binary sibling file.
#[test]
fn file_search_finds_match_and_skips_binary_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"first line\nneedle here\nlast line\n").unwrap();
    std::fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3, 0, 4]).unwrap();

    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&13u32.to_be_bytes());
    open_payload.push(0x07); // FILE_SEARCH
    open_payload.extend_from_slice(dir.path().to_string_lossy().as_bytes());
    open_payload.push(0);
    open_payload.extend_from_slice(b"needle");
    open_payload.push(0);
    ops::handle_stream_open(&mut session, &open_payload).unwrap();

    let mut hits = 0;
    loop {
        let (pt, payload) = relay.read_packet();
        match pt {
            PacketType::StreamData => {
                assert_eq!(&payload[0..4], &13u32.to_be_bytes());
                let line_no = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                assert_eq!(line_no, 2);
                hits += 1;
            }
            PacketType::StreamEnd => break,
            other => panic!("unexpected packet {other:?}"),
        }
    }
    assert_eq!(hits, 1);
}

/// A write stream accepts inbound `STREAM_DATA`/`STREAM_END` and writes
/// the bytes through to disk before acking with its own `STREAM_END`.
#[test]
fn file_write_then_read_back_matches() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&9u32.to_be_bytes());
    open_payload.push(0x02); // FILE_WRITE
    open_payload.extend_from_slice(target.to_string_lossy().as_bytes());
    open_payload.push(0);
    open_payload.extend_from_slice(&0u16.to_be_bytes());
    ops::handle_stream_open(&mut session, &open_payload).unwrap();
    assert!(session.streams.find(9).is_some());

    let mut data_payload = Vec::new();
    data_payload.extend_from_slice(&9u32.to_be_bytes());
    data_payload.extend_from_slice(b"hello disk");
    ops::handle_stream_data(&mut session, &data_payload).unwrap();

    let mut end_payload = Vec::new();
    end_payload.extend_from_slice(&9u32.to_be_bytes());
    ops::handle_stream_end_from_peer(&mut session, &end_payload).unwrap();

    let (pt, payload) = relay.read_packet();
    assert_eq!(pt, PacketType::StreamEnd);
    assert_eq!(&payload[0..4], &9u32.to_be_bytes());

    assert_eq!(std::fs::read(&target).unwrap(), b"hello disk");
    assert!(session.streams.find(9).is_none());
}

/// S6 from the spec: an `EXEC` stream's output is streamed on channel 1
/// and the exit payload reports a clean `NORMAL` exit with code 0.
#[test]
fn exec_stream_normal_exit_scenario_s6() {
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&11u32.to_be_bytes());
    open_payload.push(0x03); // EXEC
    open_payload.extend_from_slice(b"printf hi");
    open_payload.push(0);
    ops::handle_stream_open(&mut session, &open_payload).unwrap();

    let idx = session.streams.find(11).expect("exec stream allocated");
    let mut exit_reported = false;
    for _ in 0..5000 {
        let poll_result = match session.streams.get_mut(idx) {
            Some(stream) => match &mut stream.resource {
                StreamResource::Exec(exec) => exec.poll(),
                _ => panic!("expected Exec resource"),
            },
            None => break,
        };
        match poll_result {
            telepresence_client::exec::PollResult::Idle => {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            telepresence_client::exec::PollResult::Data(bytes) => {
                let mut payload = vec![0x01u8]; // CHAN_STDOUT
                payload.extend_from_slice(&bytes);
                session.send_stream_data(11, &payload).unwrap();
            }
            telepresence_client::exec::PollResult::Done { exit_kind, value } => {
                let payload = telepresence_client::exec::ExecState::exit_payload(11, exit_kind, value);
                session.send_stream_end_raw(&payload).unwrap();
                session.streams.free(idx);
                exit_reported = true;
                break;
            }
        }
    }
    assert!(exit_reported, "exec stream never reached Done");

    let mut collected = Vec::new();
    loop {
        let (pt, payload) = relay.read_packet();
        match pt {
            PacketType::StreamData => {
                assert_eq!(&payload[0..4], &11u32.to_be_bytes());
                assert_eq!(payload[4], 0x01); // channel
                collected.extend_from_slice(&payload[5..]);
            }
            PacketType::StreamEnd => {
                assert_eq!(payload.len(), 9);
                assert_eq!(&payload[0..4], &11u32.to_be_bytes());
                assert_eq!(payload[4], 0x00); // EXIT_NORMAL
                assert_eq!(&payload[5..9], &0u32.to_be_bytes());
                break;
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }
    assert_eq!(collected, b"hi");
}

/// `STREAM_CANCEL` on a known id frees the slot and replies
/// `STREAM_END(CANCELLED)`.
#[test]
fn stream_cancel_frees_slot_and_acks_cancelled() {
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&3u32.to_be_bytes());
    open_payload.push(0x03); // EXEC
    open_payload.extend_from_slice(b"sleep 5");
    open_payload.push(0);
    ops::handle_stream_open(&mut session, &open_payload).unwrap();
    assert!(session.streams.find(3).is_some());

    let cancel_payload = 3u32.to_be_bytes();
    ops::handle_stream_cancel(&mut session, &cancel_payload).unwrap();

    let (pt, payload) = relay.read_packet();
    assert_eq!(pt, PacketType::StreamEnd);
    assert_eq!(payload[4], 0x02); // STATUS_CANCELLED
    assert!(session.streams.find(3).is_none());
}

/// Re-opening an id already in use (before the original has freed its
/// slot) is rejected with `STREAM_ERROR(INVALID)` and never double-allocs.
#[test]
fn duplicate_stream_id_is_rejected() {
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut exec_open = Vec::new();
    exec_open.extend_from_slice(&2u32.to_be_bytes());
    exec_open.push(0x03); // EXEC, long-lived so the id stays occupied
    exec_open.extend_from_slice(b"sleep 5");
    exec_open.push(0);
    ops::handle_stream_open(&mut session, &exec_open).unwrap();
    assert_eq!(session.streams.occupied_count(), 1);

    ops::handle_stream_open(&mut session, &exec_open).unwrap();
    assert_eq!(session.streams.occupied_count(), 1, "duplicate id must not allocate a second slot");

    let (pt, payload) = relay.read_packet();
    assert_eq!(pt, PacketType::StreamError);
    assert_eq!(&payload[0..4], &2u32.to_be_bytes());
    assert_eq!(payload[4], 0x07); // INVALID

    ops::handle_stream_cancel(&mut session, &2u32.to_be_bytes()).unwrap();
    let _ = relay.read_packet();
}

/// `STREAM_OPEN` with a path argument missing its NUL terminator is
/// rejected without allocating a slot.
#[test]
fn missing_null_terminator_is_rejected_without_allocating() {
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    let mut open_payload = Vec::new();
    open_payload.extend_from_slice(&4u32.to_be_bytes());
    open_payload.push(0x0B); // FILE_EXISTS
    open_payload.extend_from_slice(b"/no/terminator/here");
    ops::handle_stream_open(&mut session, &open_payload).unwrap();

    assert_eq!(session.streams.occupied_count(), 0);
    let (pt, payload) = relay.read_packet();
    assert_eq!(pt, PacketType::StreamError);
    assert_eq!(payload[4], 0x07); // INVALID
}

/// Pump `session`'s transport until one full packet has been decoded,
/// then hand it to `dispatch_packet`.
fn recv_and_dispatch(session: &mut Session) -> Dispatch {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let _ = session.transport.pump_read();
        match session.transport.next_packet() {
            Ok(Some(pkt)) => return session.dispatch_packet(pkt).unwrap(),
            Ok(None) => {
                if std::time::Instant::now() > deadline {
                    panic!("timed out waiting for a packet from the relay");
                }
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            Err(()) => panic!("protocol error decoding packet"),
        }
    }
}

/// S1 from the spec: a relay-initiated `PING` is answered with a
/// `PONG` carrying the identical payload.
#[test]
fn ping_is_answered_with_matching_pong_scenario_s1() {
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    relay.send(PacketType::Ping, b"keepalive-token");
    let dispatch = recv_and_dispatch(&mut session);
    assert!(matches!(dispatch, Dispatch::Continue));

    let (pt, payload) = relay.read_packet();
    assert_eq!(pt, PacketType::Pong);
    assert_eq!(payload, b"keepalive-token");
}

/// A relay-initiated `GOODBYE` surfaces as `Dispatch::Goodbye` carrying
/// the reason byte, without the client needing to reply.
#[test]
fn goodbye_from_peer_surfaces_its_reason() {
    let (mut session, mut relay) = connect_with_fake_relay(1 << 20);

    relay.send(PacketType::Goodbye, &[GoodbyeReason::ProtocolError.as_u8()]);
    let dispatch = recv_and_dispatch(&mut session);
    match dispatch {
        Dispatch::Goodbye(reason) => assert_eq!(reason, GoodbyeReason::ProtocolError),
        Dispatch::Continue => panic!("expected Dispatch::Goodbye"),
    }
}
