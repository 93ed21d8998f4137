//! Telepresence client library — binary-protocol terminal/file/process
//! multiplexing over a single TCP connection to a relay.
//!
//! See `session` for the composite that owns the transport, flow
//! controller, stream table, and filter state, and `event_loop` for the
//! cooperative single-threaded loop that drives them all.

pub mod bmh;
pub mod config;
pub mod constants;
pub mod errors;
pub mod event_loop;
pub mod exec;
pub mod flow;
pub mod glob;
pub mod handshake;
pub mod ops;
pub mod session;
pub mod stream;
pub mod terminal;
pub mod terminal_filter;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use errors::ErrorCode;
pub use session::Session;
pub use wire::{GoodbyeReason, PacketType, StreamType};
