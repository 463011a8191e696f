//! Invite links
//!
//! `alias://join?peer=<address>` connects straight to a host;
//! `alias://join?room=<code>` goes through the room directory first.

use std::fmt;
use thiserror::Error;

const SCHEME: &str = "alias://";

/// A parsed invite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invite {
    Peer(String),
    Room(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InviteError {
    #[error("invite must start with {}", SCHEME)]
    Scheme,
    #[error("unknown invite action {0:?}")]
    Action(String),
    #[error("invite needs a peer or room parameter")]
    MissingTarget,
}

impl Invite {
    /// Parse an invite link
    pub fn parse(link: &str) -> Result<Self, InviteError> {
        let rest = link.trim().strip_prefix(SCHEME).ok_or(InviteError::Scheme)?;
        let (action, query) = rest.split_once('?').unwrap_or((rest, ""));
        let action = action.trim_end_matches('/');
        if action != "join" {
            return Err(InviteError::Action(action.to_string()));
        }

        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("peer", value)) if !value.is_empty() => {
                    return Ok(Invite::Peer(value.to_string()))
                }
                Some(("room", value)) if !value.is_empty() => {
                    return Ok(Invite::Room(value.to_string()))
                }
                _ => {}
            }
        }
        Err(InviteError::MissingTarget)
    }

    /// Build the link for a host address
    pub fn for_peer(address: &str) -> Self {
        Invite::Peer(address.to_string())
    }

    /// Build the link for an advertised room
    pub fn for_room(code: &str) -> Self {
        Invite::Room(code.to_string())
    }
}

impl fmt::Display for Invite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invite::Peer(addr) => write!(f, "{}join?peer={}", SCHEME, addr),
            Invite::Room(code) => write!(f, "{}join?room={}", SCHEME, code),
        }
    }
}
