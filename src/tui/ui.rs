//! UI rendering using ratatui
//!
//! One screen per game phase:
//! - Lobby: players by team, settings, invite
//! - Turn: the word (turn owner only), countdown, answer keys
//! - Between turns: recent words, who plays next
//! - Finished: winner and final scores

use super::lobby::render_lobby;
use crate::app::{App, InputMode};
use crate::game::{GameStateMachine, Outcome, Phase};
use crate::session::SessionController;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
};

/// Words listed on the between-turns screen
const RECENT_WORDS: usize = 8;

/// Render the screen for the current phase
pub fn render(frame: &mut Frame, app: &App, session: &SessionController) {
    let area = frame.area();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),                                  // Header
            Constraint::Min(8),                                     // Phase screen
            Constraint::Length(crate::app::NOTICE_CAP as u16 + 2), // Notices
            Constraint::Length(1),                                  // Footer
        ])
        .split(area);

    render_header(frame, layout[0], session);
    match session.game().phase() {
        Phase::Lobby => render_lobby(frame, layout[1], app, session),
        Phase::InProgress => render_turn(frame, layout[1], session),
        Phase::BetweenTurns => render_between_turns(frame, layout[1], session),
        Phase::Finished => render_finished(frame, layout[1], session),
    }
    render_notices(frame, layout[2], app);
    render_footer(frame, layout[3], app, session.game().phase());
}

fn render_header(frame: &mut Frame, area: Rect, session: &SessionController) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(10), Constraint::Min(0)])
        .split(inner);

    let logo = Paragraph::new("ALIAS").style(Style::default().fg(Color::Yellow).bold());
    frame.render_widget(logo, columns[0]);

    let game = session.game();
    let role = if session.is_authority() { "host" } else { "guest" };
    let status = format!(
        "{} | Round {}/{} | {} | {}",
        game.phase().label(),
        game.state().current_round.min(game.settings().total_rounds),
        game.settings().total_rounds,
        role,
        session.status().label()
    );
    let status = Paragraph::new(status)
        .style(Style::default().fg(Color::Cyan))
        .alignment(Alignment::Right);
    frame.render_widget(status, columns[1]);
}

/// Turn screen. Only the turn owner sees the word.
fn render_turn(frame: &mut Frame, area: Rect, session: &SessionController) {
    let game = session.game();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // Who explains
            Constraint::Length(5), // Word
            Constraint::Length(3), // Countdown
            Constraint::Min(3),    // Scores
        ])
        .margin(1)
        .split(area);

    let player = game.current_player();
    let explaining = match player {
        Some(p) if p.is_local => format!("Your turn, {}! Explain to {}", p.name, team_name(p.team)),
        Some(p) => format!("{} is explaining to {}", p.name, team_name(p.team)),
        None => String::new(),
    };
    frame.render_widget(
        Paragraph::new(explaining)
            .style(Style::default().fg(Color::White).bold())
            .alignment(Alignment::Center),
        layout[0],
    );

    let word = if game.is_turn_owner(session.session_id()) {
        Paragraph::new(game.state().current_word.to_uppercase())
            .style(Style::default().fg(Color::Yellow).bold())
    } else {
        Paragraph::new("? ? ?").style(Style::default().fg(Color::DarkGray))
    };
    frame.render_widget(
        word.alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Word")),
        layout[1],
    );

    let total = game.settings().round_time_ms().max(1);
    let remaining = session.timer().remaining_ms().min(total);
    let color = match session.timer().remaining_secs() {
        0..=5 => Color::Red,
        6..=15 => Color::Yellow,
        _ => Color::Green,
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Time"))
        .gauge_style(Style::default().fg(color))
        .ratio(remaining as f64 / total as f64)
        .label(format!("{}s", session.timer().remaining_secs()));
    frame.render_widget(gauge, layout[2]);

    render_scores(frame, layout[3], game);
}

fn render_between_turns(frame: &mut Frame, area: Rect, session: &SessionController) {
    let game = session.game();
    let layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .margin(1)
        .split(area);

    let items: Vec<ListItem> = game
        .state()
        .used_words
        .iter()
        .rev()
        .take(RECENT_WORDS)
        .map(|record| {
            let (mark, color) = if record.guessed {
                ("+", Color::Green)
            } else {
                ("-", Color::Red)
            };
            ListItem::new(format!(" {} {} ({})", mark, record.word, team_name(record.team)))
                .style(Style::default().fg(color))
        })
        .collect();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Recent words")),
        layout[0],
    );

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(3)])
        .split(layout[1]);

    let next = match game.next_player() {
        Some(p) if p.is_local => format!("Up next: {} (you)\nPress Enter when ready", p.name),
        Some(p) if session.is_authority() => {
            format!("Up next: {}\nWaiting for them (Enter to continue anyway)", p.name)
        }
        Some(p) => format!("Up next: {}\nWaiting for them", p.name),
        None => String::new(),
    };
    frame.render_widget(
        Paragraph::new(next)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Next")),
        right[0],
    );
    render_scores(frame, right[1], game);
}

fn render_finished(frame: &mut Frame, area: Rect, session: &SessionController) {
    let game = session.game();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .margin(1)
        .split(area);

    let (text, color) = match game.winner() {
        Some(Outcome::Team(team)) => (format!("{} wins!", team_name(team)), Color::Green),
        Some(Outcome::Draw) => ("It's a draw!".to_string(), Color::Yellow),
        None => (String::new(), Color::White),
    };
    frame.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(color).bold())
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::BOTTOM)),
        layout[0],
    );
    render_scores(frame, layout[1], game);
}

/// Per-team scores with member names
fn render_scores(frame: &mut Frame, area: Rect, game: &GameStateMachine) {
    let items: Vec<ListItem> = game
        .state()
        .scores
        .iter()
        .enumerate()
        .map(|(team, score)| {
            let members: Vec<&str> = game
                .players()
                .iter()
                .filter(|p| p.team == team)
                .map(|p| p.name.as_str())
                .collect();
            ListItem::new(format!(
                " {:<8} {:>3}  {}",
                team_name(team),
                score,
                members.join(", ")
            ))
        })
        .collect();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Scores")),
        area,
    );
}

fn render_notices(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .notices
        .iter()
        .map(|notice| {
            let color = if notice.is_error {
                Color::Red
            } else {
                Color::DarkGray
            };
            ListItem::new(notice.text.as_str()).style(Style::default().fg(color))
        })
        .collect();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::TOP)),
        area,
    );
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App, phase: Phase) {
    let keys = if app.mode == InputMode::Naming {
        "Enter Add  Esc Cancel"
    } else {
        match phase {
            Phase::Lobby => "A Add  D Remove  Tab/←→ Settings  S Start  C Retry  Esc Quit",
            Phase::InProgress => "Y Guessed  N Skipped  E End turn  Esc Quit",
            Phase::BetweenTurns => "Enter Next turn  Esc Quit",
            Phase::Finished => "R Play again  A Add  D Remove  Esc Quit",
        }
    };
    frame.render_widget(
        Paragraph::new(keys)
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center),
        area,
    );
}

pub(super) fn team_name(team: usize) -> String {
    format!("Team {}", team + 1)
}
