//! Command line and game settings
//!
//! Commands:
//! - alias host [--port 55333] [--no-room] [--round-time 60] [--rounds 3] ...
//! - alias join <address>
//! - alias room <code>
//! - alias invite <link>
//! - alias rejoin

use crate::game::words::{builtin_words, load_word_file};
use crate::game::{GameError, Settings};
use crate::network::invite::{Invite, InviteError};
use crate::network::server::DEFAULT_PORT;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Alias - explain words to your team against the clock
#[derive(Parser, Debug)]
#[command(name = "alias")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Name of the player added for you (remembered for next time)
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Word list file, one entry per line
    #[arg(long, global = true)]
    pub words: Option<PathBuf>,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Host a room and wait for players
    Host {
        /// First port to try; moves up while taken
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Do not advertise the room on the local network
        #[arg(long)]
        no_room: bool,
    },
    /// Join a host by address (host or host:port)
    Join { address: String },
    /// Join a room advertised on the local network
    Room { code: String },
    /// Join from an alias:// invite link
    Invite { link: String },
    /// Join the host you were last connected to
    Rejoin,
}

/// Where this process should get its game from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Host { port: u16, advertise: bool },
    Peer(String),
    Room(String),
    LastPeer,
}

/// Settings file and per-setting overrides
#[derive(Args, Debug, Default, Clone)]
pub struct SettingsArgs {
    /// JSON settings file (camelCase keys, missing keys keep defaults)
    #[arg(long = "settings", global = true)]
    pub file: Option<PathBuf>,
    /// Turn length in seconds
    #[arg(long, global = true)]
    pub round_time: Option<u32>,
    /// Number of rounds
    #[arg(long, global = true)]
    pub rounds: Option<u32>,
    /// Longest word entry, in words
    #[arg(long, global = true)]
    pub max_words: Option<usize>,
    /// Number of teams
    #[arg(long, global = true)]
    pub teams: Option<usize>,
    /// Points lost for a wrong answer
    #[arg(long, global = true)]
    pub penalty: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad settings file {path}: {source}")]
    SettingsFile {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Settings(#[from] GameError),
    #[error("bad invite: {0}")]
    Invite(#[from] InviteError),
    #[error("word list {0} has no entries")]
    EmptyWordList(PathBuf),
    #[error("game settings come from the host; change them in the lobby instead")]
    SettingsOnJoin,
}

impl Cli {
    /// Starting settings for `target`. Joining sessions take the host's.
    pub fn settings_for(&self, target: &Target) -> Result<Settings, ConfigError> {
        match target {
            Target::Host { .. } => self.settings.resolve(),
            _ if self.settings.is_set() => Err(ConfigError::SettingsOnJoin),
            _ => Ok(Settings::default()),
        }
    }
}

impl Command {
    pub fn target(&self) -> Result<Target, ConfigError> {
        Ok(match self {
            Command::Host { port, no_room } => Target::Host {
                port: *port,
                advertise: !no_room,
            },
            Command::Join { address } => Target::Peer(address.clone()),
            Command::Room { code } => Target::Room(code.clone()),
            Command::Invite { link } => match Invite::parse(link)? {
                Invite::Peer(address) => Target::Peer(address),
                Invite::Room(code) => Target::Room(code),
            },
            Command::Rejoin => Target::LastPeer,
        })
    }
}

impl SettingsArgs {
    fn is_set(&self) -> bool {
        self.file.is_some()
            || self.round_time.is_some()
            || self.rounds.is_some()
            || self.max_words.is_some()
            || self.teams.is_some()
            || self.penalty.is_some()
    }

    /// Defaults, then the settings file, then the flags
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let mut settings = match &self.file {
            Some(path) => read_settings_file(path)?,
            None => Settings::default(),
        };
        if let Some(v) = self.round_time {
            settings.round_time = v;
        }
        if let Some(v) = self.rounds {
            settings.total_rounds = v;
        }
        if let Some(v) = self.max_words {
            settings.max_word_length = v;
        }
        if let Some(v) = self.teams {
            settings.teams_count = v;
        }
        if let Some(v) = self.penalty {
            settings.skip_penalty = v;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn read_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::SettingsFile {
        path: path.to_path_buf(),
        source,
    })
}

/// The word list to play with: a file if given, the built-in list otherwise
pub fn word_source(path: Option<&Path>) -> Result<Vec<String>, ConfigError> {
    let Some(path) = path else {
        return Ok(builtin_words());
    };
    let words = load_word_file(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if words.is_empty() {
        return Err(ConfigError::EmptyWordList(path.to_path_buf()));
    }
    Ok(words)
}
