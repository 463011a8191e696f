//! Front-end state: key handling, name input, the settings cursor and the
//! notice feed

use crate::game::{Phase, Player, Settings, MIN_TEAMS};
use crate::network::Invite;
use crate::session::SessionEvent;
use crossterm::event::KeyCode;
use std::collections::VecDeque;

/// Notices kept on screen
pub const NOTICE_CAP: usize = 5;

/// Longest player name accepted from the keyboard
pub const MAX_NAME_LEN: usize = 16;

/// What the user asked the session to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AddPlayer(String),
    RemovePlayer(String),
    StartGame,
    Answer(bool),
    EndTurn,
    AdvanceTurn,
    RestartGame,
    /// Step one setting up or down
    UpdateSetting { field: SettingField, increase: bool },
    Retry,
    Quit,
}

/// A lobby setting the keyboard can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettingField {
    #[default]
    RoundTime,
    Rounds,
    MaxWords,
    Teams,
    Penalty,
}

impl SettingField {
    pub const ALL: [SettingField; 5] = [
        SettingField::RoundTime,
        SettingField::Rounds,
        SettingField::MaxWords,
        SettingField::Teams,
        SettingField::Penalty,
    ];

    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|f| *f == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    /// `settings` with this field moved one step, kept within its range
    pub fn adjust(self, settings: &Settings, increase: bool) -> Settings {
        fn step<T>(value: T, by: T, min: T, max: T, increase: bool) -> T
        where
            T: Ord + Copy + std::ops::Add<Output = T> + std::ops::Sub<Output = T>,
        {
            if increase {
                if value >= max {
                    value
                } else if max - value < by {
                    max
                } else {
                    value + by
                }
            } else if value <= min {
                value
            } else if value - min < by {
                min
            } else {
                value - by
            }
        }

        let mut next = settings.clone();
        match self {
            SettingField::RoundTime => {
                next.round_time = step(next.round_time, 10, 10, 300, increase)
            }
            SettingField::Rounds => next.total_rounds = step(next.total_rounds, 1, 1, 10, increase),
            SettingField::MaxWords => {
                next.max_word_length = step(next.max_word_length, 1, 1, 5, increase)
            }
            SettingField::Teams => {
                next.teams_count = step(next.teams_count, 1, MIN_TEAMS, 6, increase)
            }
            SettingField::Penalty => next.skip_penalty = step(next.skip_penalty, 1, 0, 5, increase),
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Typing the name of a player to add
    Naming,
}

/// A line in the notice feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub is_error: bool,
}

/// UI-only state. Game state lives in the session.
pub struct App {
    pub should_quit: bool,
    pub mode: InputMode,
    /// Name being typed
    pub input: String,
    /// Highlighted row in the player list
    pub selected: usize,
    /// Most recent last
    pub notices: VecDeque<Notice>,
    /// Direct link to this host
    pub invite: Option<String>,
    pub room_code: Option<String>,
    /// Link that finds the room through the local network
    pub room_invite: Option<String>,
    /// Setting that Left/Right change in the lobby
    pub setting: SettingField,
}

impl Default for App {
    fn default() -> Self {
        Self {
            should_quit: false,
            mode: InputMode::Normal,
            input: String::new(),
            selected: 0,
            notices: VecDeque::new(),
            invite: None,
            room_code: None,
            room_invite: None,
            setting: SettingField::default(),
        }
    }
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    /// Translate a key press into an action for the session
    pub fn on_key(&mut self, code: KeyCode, phase: Phase, players: &[Player]) -> Option<Action> {
        match self.mode {
            InputMode::Naming => self.on_naming_key(code),
            InputMode::Normal => self.on_normal_key(code, phase, players),
        }
    }

    fn on_naming_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Esc => {
                self.input.clear();
                self.mode = InputMode::Normal;
                None
            }
            KeyCode::Enter => {
                let name = std::mem::take(&mut self.input).trim().to_string();
                self.mode = InputMode::Normal;
                if name.is_empty() {
                    None
                } else {
                    Some(Action::AddPlayer(name))
                }
            }
            KeyCode::Backspace => {
                self.input.pop();
                None
            }
            KeyCode::Char(c) => {
                if self.input.chars().count() < MAX_NAME_LEN && !c.is_control() {
                    self.input.push(c);
                }
                None
            }
            _ => None,
        }
    }

    fn on_normal_key(&mut self, code: KeyCode, phase: Phase, players: &[Player]) -> Option<Action> {
        let editable = matches!(phase, Phase::Lobby | Phase::Finished);
        match code {
            KeyCode::Esc | KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('c') => Some(Action::Retry),
            KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            KeyCode::Down => {
                if self.selected + 1 < players.len() {
                    self.selected += 1;
                }
                None
            }
            KeyCode::Char('a') if editable => {
                self.mode = InputMode::Naming;
                None
            }
            KeyCode::Char('d') if editable => players
                .get(self.selected)
                .map(|p| Action::RemovePlayer(p.id.clone())),
            KeyCode::Char('s') if phase == Phase::Lobby => Some(Action::StartGame),
            KeyCode::Tab if phase == Phase::Lobby => {
                self.setting = self.setting.next();
                None
            }
            KeyCode::Left | KeyCode::Right if phase == Phase::Lobby => Some(Action::UpdateSetting {
                field: self.setting,
                increase: code == KeyCode::Right,
            }),
            KeyCode::Char('y') if phase == Phase::InProgress => Some(Action::Answer(true)),
            KeyCode::Char('n') if phase == Phase::InProgress => Some(Action::Answer(false)),
            KeyCode::Char('e') if phase == Phase::InProgress => Some(Action::EndTurn),
            KeyCode::Enter if phase == Phase::BetweenTurns => Some(Action::AdvanceTurn),
            KeyCode::Char('r') if phase == Phase::Finished => Some(Action::RestartGame),
            _ => None,
        }
    }

    /// Keep the selection inside a list of `len` rows
    pub fn clamp_selection(&mut self, len: usize) {
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    pub fn notify(&mut self, text: impl Into<String>, is_error: bool) {
        self.notices.push_back(Notice {
            text: text.into(),
            is_error,
        });
        while self.notices.len() > NOTICE_CAP {
            self.notices.pop_front();
        }
    }

    /// The hosted room is now advertised under `code`
    pub fn room_opened(&mut self, code: String) {
        self.notify(format!("Room {} is open on the local network", code), false);
        self.room_invite = Some(Invite::for_room(&code).to_string());
        self.room_code = Some(code);
    }

    pub fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Info(text) => self.notify(text, false),
            SessionEvent::Error(e) => self.notify(e.to_string(), true),
        }
    }
}
