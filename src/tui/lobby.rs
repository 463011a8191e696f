//! Lobby screen
//!
//! Layout:
//! ┌──────────────────────────┬──────────────────────┐
//! │ PLAYERS                  │ SETTINGS             │
//! │ > Alice (you)    Team 1  │ Turn:     60 s       │
//! │   Bob            Team 2  │ Rounds:   3          │
//! │                          │ ...                  │
//! ├──────────────────────────┴──────────────────────┤
//! │ Invite: alias://join?peer=192.168.1.4:55333     │
//! └─────────────────────────────────────────────────┘

use super::ui::team_name;
use crate::app::{App, InputMode, SettingField};
use crate::game::{Settings, MIN_PLAYERS};
use crate::session::SessionController;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

/// Render the lobby into `area`
pub fn render_lobby(frame: &mut Frame, area: Rect, app: &App, session: &SessionController) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(6),    // Players + settings
            Constraint::Length(3), // Name input or start hint
            Constraint::Length(4), // Invite
        ])
        .margin(1)
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(layout[0]);

    render_players(frame, columns[0], app, session);
    render_settings(frame, columns[1], app, session.game().settings());
    render_prompt(frame, layout[1], app, session);
    render_invite(frame, layout[2], app);
}

fn render_players(frame: &mut Frame, area: Rect, app: &App, session: &SessionController) {
    let items: Vec<ListItem> = session
        .game()
        .players()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let prefix = if i == app.selected { "> " } else { "  " };
            let suffix = if p.is_local { " (you)" } else { "" };
            let style = if i == app.selected {
                Style::default().fg(Color::Yellow).bold()
            } else if p.is_local {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(format!(
                "{}{:<18} {}",
                prefix,
                format!("{}{}", p.name, suffix),
                team_name(p.team)
            ))
            .style(style)
        })
        .collect();

    let title = format!("Players ({})", session.game().players().len());
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );
}

fn render_settings(frame: &mut Frame, area: Rect, app: &App, settings: &Settings) {
    let lines: Vec<Line> = SettingField::ALL
        .iter()
        .map(|&field| {
            let text = match field {
                SettingField::RoundTime => format!("Turn:     {} s", settings.round_time),
                SettingField::Rounds => format!("Rounds:   {}", settings.total_rounds),
                SettingField::MaxWords => format!("Words:    up to {}", settings.max_word_length),
                SettingField::Teams => format!("Teams:    {}", settings.teams_count),
                SettingField::Penalty => format!("Penalty:  {}", settings.skip_penalty),
            };
            if field == app.setting {
                Line::from(format!("> {}", text)).style(Style::default().fg(Color::Yellow))
            } else {
                Line::from(format!("  {}", text))
            }
        })
        .collect();
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Settings")),
        area,
    );
}

fn render_prompt(frame: &mut Frame, area: Rect, app: &App, session: &SessionController) {
    let prompt = if app.mode == InputMode::Naming {
        Paragraph::new(format!("Name: [{}]_", app.input)).style(Style::default().fg(Color::Cyan))
    } else if session.game().players().len() >= MIN_PLAYERS {
        Paragraph::new("[ Press S to START ]").style(Style::default().fg(Color::Green).bold())
    } else {
        Paragraph::new(format!("Waiting for players (need at least {})", MIN_PLAYERS))
            .style(Style::default().fg(Color::DarkGray))
    };
    frame.render_widget(prompt.alignment(Alignment::Center), area);
}

fn render_invite(frame: &mut Frame, area: Rect, app: &App) {
    let mut lines = Vec::new();
    if let Some(invite) = &app.invite {
        lines.push(Line::from(format!("Invite: {}", invite)));
    }
    if let Some(code) = &app.room_code {
        let link = app.room_invite.as_deref().unwrap_or_default();
        lines.push(Line::from(format!("Room:   {}  {}", code, link)));
    }
    frame.render_widget(
        Paragraph::new(lines)
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::TOP)),
        area,
    );
}
