//! Front-end state between the terminal and the session

pub mod state;

pub use state::{Action, App, InputMode, SettingField, NOTICE_CAP};
