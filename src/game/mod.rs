//! Game logic: players, settings, turn/round state, word supply, turn clock

pub mod machine;
pub mod timer;
pub mod words;

pub use machine::GameStateMachine;
pub use timer::{PeriodicTask, SharedClock, SystemClock, TimePulse, TimerTick, TurnTimer};
pub use words::WordSupplier;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of players to start a game
pub const MIN_PLAYERS: usize = 2;

/// Maximum number of players in a room
pub const MAX_PLAYERS: usize = 12;

/// Minimum number of teams
pub const MIN_TEAMS: usize = 2;

/// A participant in the room.
///
/// `owner` is the session id of the process that added the player; only that
/// session may play the player's turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub team: usize,
    #[serde(rename = "peerId")]
    pub owner: String,
    /// View field, recomputed by every session when the player list is replaced
    #[serde(default)]
    pub is_local: bool,
}

/// Game settings. Frozen while a game is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Length of one turn in seconds
    pub round_time: u32,
    /// Number of full passes through the player list
    pub total_rounds: u32,
    /// Longest accepted word entry, in whitespace-separated tokens
    pub max_word_length: usize,
    pub teams_count: usize,
    /// Points taken from a team for a wrong answer
    pub skip_penalty: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            round_time: 60,
            total_rounds: 3,
            max_word_length: 2,
            teams_count: 2,
            skip_penalty: 0,
        }
    }
}

impl Settings {
    /// Check the settings for values the state machine cannot run with.
    pub fn validate(&self) -> Result<(), GameError> {
        if self.teams_count < MIN_TEAMS {
            return Err(GameError::InvalidSettings(format!(
                "need at least {} teams",
                MIN_TEAMS
            )));
        }
        if self.round_time == 0 {
            return Err(GameError::InvalidSettings("round time must be positive".to_string()));
        }
        if self.total_rounds == 0 {
            return Err(GameError::InvalidSettings("need at least one round".to_string()));
        }
        if self.max_word_length == 0 {
            return Err(GameError::InvalidSettings(
                "word length must allow at least one token".to_string(),
            ));
        }
        Ok(())
    }

    /// Turn length in milliseconds
    pub fn round_time_ms(&self) -> u64 {
        u64::from(self.round_time) * 1000
    }
}

/// A word shown during a turn and what became of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedWordRecord {
    pub word: String,
    pub guessed: bool,
    pub team: usize,
}

/// Canonical turn/round/score state, replicated wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub current_round: u32,
    pub current_player_index: usize,
    pub current_word: String,
    pub scores: Vec<u32>,
    pub used_words: Vec<UsedWordRecord>,
    pub is_game_started: bool,
    pub is_game_finished: bool,
    pub is_between_rounds: bool,
}

impl GameState {
    /// Fresh lobby state for the given number of teams
    pub fn lobby(teams_count: usize) -> Self {
        Self {
            current_round: 1,
            current_player_index: 0,
            current_word: String::new(),
            scores: vec![0; teams_count],
            used_words: Vec::new(),
            is_game_started: false,
            is_game_finished: false,
            is_between_rounds: false,
        }
    }

    /// Phase derived from the state flags
    pub fn phase(&self) -> Phase {
        if self.is_game_finished {
            Phase::Finished
        } else if !self.is_game_started {
            Phase::Lobby
        } else if self.is_between_rounds {
            Phase::BetweenTurns
        } else {
            Phase::InProgress
        }
    }

    /// The round/turn pair that time messages are tagged with
    pub fn turn_tag(&self) -> TurnTag {
        TurnTag {
            round: self.current_round,
            player_index: self.current_player_index,
        }
    }
}

/// Where the game is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    InProgress,
    BetweenTurns,
    Finished,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Lobby => "Lobby",
            Phase::InProgress => "Turn in progress",
            Phase::BetweenTurns => "Between turns",
            Phase::Finished => "Finished",
        }
    }

    /// A game is running (settings and roster are frozen)
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::InProgress | Phase::BetweenTurns)
    }
}

/// Identifies one turn: the round number and the index of the playing player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnTag {
    pub round: u32,
    pub player_index: usize,
}

/// Final result of a finished game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A single team holds the strict maximum score
    Team(usize),
    /// Two or more teams share the top score
    Draw,
}

/// Who is asking for a state change
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub session_id: &'a str,
    pub is_authority: bool,
}

impl<'a> Actor<'a> {
    pub fn authority(session_id: &'a str) -> Self {
        Self {
            session_id,
            is_authority: true,
        }
    }

    pub fn replica(session_id: &'a str) -> Self {
        Self {
            session_id,
            is_authority: false,
        }
    }
}

/// A declined game action. Returned to the caller, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("need at least {} players to start", MIN_PLAYERS)]
    NotEnoughPlayers,
    #[error("room is full ({} players)", MAX_PLAYERS)]
    RoomFull,
    #[error("player name is empty")]
    EmptyName,
    #[error("unknown player {0}")]
    UnknownPlayer(String),
    #[error("player {0} belongs to another session")]
    NotPlayerOwner(String),
    #[error("a game is already running")]
    GameRunning,
    #[error("no turn is in progress")]
    NoActiveTurn,
    #[error("it is not your turn")]
    NotTurnOwner,
    #[error("that turn is already over")]
    StaleTurn,
    #[error("the current turn has not ended yet")]
    TurnNotEnded,
    #[error("only the next player or the host may continue")]
    NotNextPlayer,
    #[error("the game has not finished")]
    NotFinished,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("word list has no entries of at most {0} words")]
    NoWords(usize),
}
