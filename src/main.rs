//! Alias - explain words to your team before the clock runs out
//!
//! One player hosts, the others join by address, room code or invite link.
//! No server in between.

mod app;
mod config;
mod game;
mod logging;
mod network;
mod session;
mod storage;
mod tui;

use app::{Action, App};
use clap::Parser;
use config::{word_source, Cli, Target};
use crossterm::event::{self, Event, KeyEventKind};
use game::{SystemClock, WordSupplier};
use network::directory::normalize_room_code;
use network::{Invite, MdnsDirectory, RoomDirectory, TcpConnector};
use session::{ConnectionStatus, Role, SessionConfig, SessionController, SessionDeps};
use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::rc::Rc;
use std::time::Duration;
use storage::{IdentityStore, SessionId, Storage};
use tracing::{info, warn};
use tui::Tui;

/// Longest wait for a key before the next loop pass
const FRAME: Duration = Duration::from_millis(50);

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let target = cli.command.target()?;
    let settings = cli.settings_for(&target)?;
    let words = word_source(cli.words.as_deref())?;

    let data_dir = Storage::data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    let log_path = logging::init(&data_dir)?;
    let storage = Storage::open()?;
    info!(
        log = %log_path.display(),
        installation = %storage.installation_id(),
        "alias starting"
    );

    let name = player_name(cli.name.as_deref(), &storage);

    // Fresh per process, so two copies on one machine never share one
    let mut session_id = SessionId::generate().to_hex();
    let mut config = SessionConfig::default();
    let role = match &target {
        Target::Host { port, .. } => {
            config.port = *port;
            Role::Authority
        }
        Target::Peer(address) => Role::Replica {
            host: address.clone(),
        },
        Target::Room(code) => Role::Replica {
            host: resolve_room(&session_id, code)?,
        },
        Target::LastPeer => {
            let last = storage.last_peer()?.ok_or("no previous host to rejoin")?;
            session_id = last.session_id;
            Role::Replica { host: last.address }
        }
    };

    let deps = SessionDeps {
        session_id,
        clock: Rc::new(SystemClock),
        store: Box::new(storage),
        connector: Box::new(TcpConnector),
    };
    let mut session =
        SessionController::new(role, config, deps, settings, WordSupplier::new(words));
    session.start();

    let mut app = App::new();
    let mut presence = Presence {
        name,
        joined: false,
        advertise: matches!(target, Target::Host { advertise: true, .. }),
        directory: None,
    };

    let mut terminal = Tui::new()?;
    terminal.enter()?;
    let result = run(&mut terminal, &mut app, &mut session, &mut presence);
    terminal.exit()?;

    presence.withdraw();
    session.shutdown();
    info!("alias stopped");
    result
}

fn run(
    terminal: &mut Tui,
    app: &mut App,
    session: &mut SessionController,
    presence: &mut Presence,
) -> Result<(), Box<dyn Error>> {
    while !app.should_quit {
        session.poll();
        for event in session.drain_events() {
            app.on_session_event(event);
        }
        presence.update(session, app);
        app.clamp_selection(session.game().players().len());

        terminal.draw(|frame| tui::render(frame, app, session))?;

        if event::poll(FRAME)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let phase = session.game().phase();
                    if let Some(action) = app.on_key(key.code, phase, session.game().players()) {
                        perform(action, app, session);
                    }
                }
            }
        }
    }
    Ok(())
}

fn perform(action: Action, app: &mut App, session: &mut SessionController) {
    let result = match action {
        Action::AddPlayer(name) => session.add_player(&name),
        Action::RemovePlayer(id) => session.remove_player(&id),
        Action::StartGame => session.start_game(),
        Action::Answer(correct) => session.submit_answer(correct),
        Action::EndTurn => session.end_turn(),
        Action::AdvanceTurn => session.advance_turn(),
        Action::RestartGame => session.restart_game(),
        Action::UpdateSetting { field, increase } => {
            let settings = field.adjust(session.game().settings(), increase);
            session.update_settings(settings)
        }
        Action::Retry => {
            session.retry();
            Ok(())
        }
        Action::Quit => {
            app.quit();
            Ok(())
        }
    };
    if let Err(e) = result {
        app.notify(e.to_string(), true);
    }
}

/// `--name`, then the remembered handle, then the login name
fn player_name(flag: Option<&str>, storage: &Storage) -> String {
    if let Some(name) = flag.map(str::trim).filter(|n| !n.is_empty()) {
        if let Err(e) = storage.set_handle(name) {
            warn!(error = %e, "could not remember name");
        }
        return name.to_string();
    }
    match storage.handle() {
        Ok(Some(handle)) => handle,
        _ => std::env::var("USER")
            .unwrap_or_else(|_| "Player".to_string())
            .chars()
            .take(app::state::MAX_NAME_LEN)
            .collect(),
    }
}

fn resolve_room(session_id: &str, code: &str) -> Result<String, Box<dyn Error>> {
    eprintln!("Looking for room {} ...", normalize_room_code(code));
    let mut directory = MdnsDirectory::new(session_id)?;
    let found = directory.resolve(code);
    if let Err(e) = directory.shutdown() {
        warn!(error = %e, "room directory shutdown failed");
    }
    Ok(found?.to_string())
}

/// Best guess at this machine's LAN address. Nothing is sent.
fn lan_ip() -> IpAddr {
    UdpSocket::bind(("0.0.0.0", 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Puts the local player into the game and advertises a hosted room
struct Presence {
    name: String,
    joined: bool,
    advertise: bool,
    directory: Option<MdnsDirectory>,
}

impl Presence {
    fn update(&mut self, session: &mut SessionController, app: &mut App) {
        let ready = match session.status() {
            ConnectionStatus::Listening { .. } => true,
            ConnectionStatus::Connected { .. } => true,
            _ => false,
        };
        if !ready {
            return;
        }

        if !self.joined {
            self.joined = true;
            if let Err(e) = session.add_player(&self.name) {
                app.notify(e.to_string(), true);
            }
        }

        if app.invite.is_some() {
            return;
        }
        let Some(port) = session
            .listen_address()
            .and_then(|a| a.parse::<SocketAddr>().ok())
            .map(|a| a.port())
        else {
            return;
        };
        let address = SocketAddr::new(lan_ip(), port);
        app.invite = Some(Invite::for_peer(&address.to_string()).to_string());

        if self.advertise {
            self.advertise = false;
            match self.register(session.session_id(), address) {
                Ok(code) => app.room_opened(code),
                Err(e) => {
                    warn!(error = %e, "room not advertised");
                    app.notify(format!("Room not advertised: {}", e), true);
                }
            }
        }
    }

    fn register(
        &mut self,
        session_id: &str,
        address: SocketAddr,
    ) -> Result<String, network::directory::DirectoryError> {
        let mut directory = MdnsDirectory::new(session_id)?;
        let code = directory.register(address)?;
        self.directory = Some(directory);
        Ok(code)
    }

    /// Stop advertising the room
    fn withdraw(&mut self) {
        if let Some(directory) = self.directory.take() {
            if let Err(e) = directory.shutdown() {
                warn!(error = %e, "room directory shutdown failed");
            }
        }
    }
}
