//! Terminal UI components using ratatui

mod lobby;
mod terminal;
mod ui;

pub use terminal::Tui;
pub use ui::render;
