//! Wire protocol
//!
//! Newline-delimited JSON objects over TCP. Every message is an [`Envelope`]
//! with a `type` discriminator; unknown or malformed lines are dropped by the
//! receiver.

use crate::game::machine::check_consistency;
use crate::game::{GameState, Player, Settings, TimePulse, TurnTag};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current protocol version, carried in `hello`
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest line accepted from a peer
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Messages exchanged between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// First message on every open link
    Hello {
        session_id: String,
        protocol_version: u32,
    },
    /// Full replicated state (authority -> replicas)
    StateSnapshot(Snapshot),
    /// Remaining turn time from the turn owner
    TimePulse(TimePulse),
    /// A replica asks the authority to change the game
    PlayerIntent { intent: Intent },
    /// Liveness only
    Keepalive { sent_at_ms: u64 },
}

impl Envelope {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Hello { .. } => "hello",
            Envelope::StateSnapshot(_) => "state-snapshot",
            Envelope::TimePulse(_) => "time-pulse",
            Envelope::PlayerIntent { .. } => "player-intent",
            Envelope::Keepalive { .. } => "keepalive",
        }
    }
}

/// Everything a replica needs to render the game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub settings: Settings,
    pub players: Vec<Player>,
    pub state: GameState,
    pub current_player: Option<Player>,
    pub next_player: Option<Player>,
    /// Authority's view of the remaining turn time
    pub time_left_ms: u64,
    pub from_authority: bool,
}

impl Snapshot {
    /// Structural checks run before a snapshot may replace local state
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.from_authority {
            return Err(ProtocolError::InvalidSnapshot(
                "snapshot not sent by the authority".to_string(),
            ));
        }
        check_consistency(&self.settings, &self.players, &self.state)
            .map_err(ProtocolError::InvalidSnapshot)
    }
}

/// Requested game change, validated by the authority against the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Intent {
    Add { name: String },
    Remove { id: String },
    Start,
    /// Answers and turn ends name the turn they were made in
    Answer { correct: bool, turn: TurnTag },
    EndTurn { turn: TurnTag },
    Advance,
    Restart,
    Settings { settings: Settings },
}

/// Wire-level failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line of {0} bytes exceeds the limit")]
    LineTooLong(usize),
    #[error("line is not valid UTF-8")]
    NotUtf8,
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Serialize an envelope as one line, newline included
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (with or without its trailing newline)
pub fn decode(line: &str) -> Result<Envelope, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::LineTooLong(line.len()));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Parse a raw line as read from a socket
pub fn decode_bytes(line: &[u8]) -> Result<Envelope, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::NotUtf8)?;
    decode(text)
}
