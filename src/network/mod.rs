//! Networking: peer links, room directory, invite links
//!
//! This module provides:
//! - The [`Channel`] / [`Connector`] / [`Listener`] capabilities the session
//!   drives, with TCP implementations (default port 55333 with auto-increment)
//! - Newline-delimited JSON envelopes ([`protocol`])
//! - mDNS-SD room directory for finding a host by room code
//! - `alias://` invite links

pub mod client;
pub mod directory;
pub mod invite;
#[cfg(test)]
pub mod memory;
pub mod peer;
pub mod protocol;
pub mod server;

pub use client::TcpConnector;
pub use directory::{MdnsDirectory, RoomDirectory};
pub use invite::Invite;

use std::io;
use protocol::Envelope;
use thiserror::Error;

/// Something that happened on a channel since the last poll
#[derive(Debug)]
pub enum ChannelEvent {
    /// The link is up and messages can flow
    Open,
    /// A decoded message from the remote side
    Data(Envelope),
    /// The remote side went away
    Closed,
    /// The link failed (for outgoing links: the peer could not be reached)
    Error(ChannelError),
}

/// Transport failures
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid address {0}")]
    InvalidAddress(String),
    #[error("peer {addr} unavailable: {source}")]
    Unreachable { addr: String, source: io::Error },
    #[error("cannot listen on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("link is closed")]
    Closed,
    #[error("encode failed: {0}")]
    Encode(#[from] protocol::ProtocolError),
}

/// A bidirectional message link to one remote session.
///
/// Non-blocking: `poll` drains whatever arrived since the last call.
pub trait Channel {
    fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError>;
    fn poll(&mut self) -> Vec<ChannelEvent>;
    fn close(&mut self);
    /// Remote address, for logs and status lines
    fn remote(&self) -> String;
}

/// Accepts incoming links
pub trait Listener {
    /// Links accepted since the last call
    fn accept(&mut self) -> Vec<Box<dyn Channel>>;
    /// Address peers should dial
    fn local_addr(&self) -> String;
    fn close(&mut self);
}

/// Opens links and listeners
pub trait Connector {
    /// Start connecting. Returns at once; the channel reports `Open` or
    /// `Error` from its `poll` when the attempt completes.
    fn connect(&mut self, address: &str) -> Result<Box<dyn Channel>, ChannelError>;
    fn bind(&mut self, port: u16) -> Result<Box<dyn Listener>, ChannelError>;
}
