//! Session controller
//!
//! Wires the game machine, the turn timer and the peer links together. The
//! event loop calls [`SessionController::poll`] repeatedly; every timer tick,
//! inbound message and UI intent is handled serially inside it.
//!
//! The host session is the authority: it owns the canonical game state and
//! broadcasts a snapshot after every change. A joining session is a replica:
//! it renders what it receives and sends intents back.

mod replication;

use crate::game::timer::{PULSE_INTERVAL_MS, TICK_INTERVAL_MS};
use crate::game::{
    GameError, GameStateMachine, PeriodicTask, Phase, Settings, SharedClock, TimerTick, TurnTag,
    TurnTimer, WordSupplier,
};
use crate::network::protocol::{Envelope, Intent, PROTOCOL_VERSION};
use crate::network::server::DEFAULT_PORT;
use crate::network::{Channel, ChannelError, ChannelEvent, Connector, Listener};
use crate::storage::{IdentityStore, LastPeer};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Whether this session owns the game or mirrors it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Authority,
    Replica { host: String },
}

/// Timing knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: u16,
    pub tick_ms: u64,
    pub pulse_ms: u64,
    pub keepalive_ms: u64,
    /// A link silent for longer than this is treated as lost
    pub watchdog_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Extra bind attempts after the first one fails
    pub init_retries: u32,
    pub init_retry_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tick_ms: TICK_INTERVAL_MS,
            pulse_ms: PULSE_INTERVAL_MS,
            keepalive_ms: 1000,
            watchdog_ms: 5000,
            reconnect_attempts: 5,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 8000,
            init_retries: 3,
            init_retry_ms: 1000,
        }
    }
}

impl SessionConfig {
    /// Delay before reconnect attempt `attempt` (1-based): doubling, capped
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let doublings = attempt.saturating_sub(1).min(16);
        self.reconnect_base_ms
            .saturating_mul(1u64 << doublings)
            .min(self.reconnect_max_ms)
    }
}

/// Capabilities a session is built from
pub struct SessionDeps {
    /// Owning-session id for players added here. Unique per running process.
    pub session_id: String,
    pub clock: SharedClock,
    pub store: Box<dyn IdentityStore>,
    pub connector: Box<dyn Connector>,
}

/// Link status shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Starting,
    Listening { address: String, peers: usize },
    BindRetry { attempt: u32 },
    InitFailed,
    Connecting { address: String },
    Connected { address: String },
    Reconnecting { attempt: u32 },
    Unavailable { address: String },
    Disconnected,
    Offline,
}

impl ConnectionStatus {
    pub fn label(&self) -> String {
        match self {
            ConnectionStatus::Starting => "Starting".to_string(),
            ConnectionStatus::Listening { address, peers } => {
                format!("Hosting on {} ({} connected)", address, peers)
            }
            ConnectionStatus::BindRetry { attempt } => {
                format!("Port busy, retrying (attempt {})", attempt)
            }
            ConnectionStatus::InitFailed => "Could not start hosting [C] retry".to_string(),
            ConnectionStatus::Connecting { address } => format!("Connecting to {}", address),
            ConnectionStatus::Connected { address } => format!("Connected to {}", address),
            ConnectionStatus::Reconnecting { attempt } => {
                format!("Connection lost, reconnecting (attempt {})", attempt)
            }
            ConnectionStatus::Unavailable { address } => {
                format!("Host {} unavailable [C] retry", address)
            }
            ConnectionStatus::Disconnected => "Disconnected [C] retry".to_string(),
            ConnectionStatus::Offline => "Offline".to_string(),
        }
    }
}

/// Session-level failures, all recoverable except where noted
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Declined(#[from] GameError),
    #[error("not connected to the host")]
    NotConnected,
    #[error("could not listen after {attempts} attempts: {source}")]
    InitFailed { attempts: u32, source: ChannelError },
    #[error("host unavailable: {0}")]
    PeerUnavailable(ChannelError),
    #[error("connection to {peer} lost")]
    LinkLost { peer: String },
    #[error("connection to {peer} lost during a game; state may be stale until it is back")]
    LinkLostDuringGame { peer: String },
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectFailed(u32),
    #[error("{peer} uses the same session id as this session; start a fresh one to join")]
    DuplicateSession { peer: String },
}

/// Something the UI should show
#[derive(Debug)]
pub enum SessionEvent {
    Info(String),
    Error(SessionError),
}

struct Link {
    channel: Box<dyn Channel>,
    /// Session id from the remote `hello`
    remote_session: Option<String>,
    open: bool,
    dead: bool,
    /// Closed because its `hello` claimed a session id already in use
    refused: bool,
    failure: Option<ChannelError>,
    last_seen_ms: u64,
}

impl Link {
    fn new(channel: Box<dyn Channel>, now_ms: u64) -> Self {
        Self {
            channel,
            remote_session: None,
            open: false,
            dead: false,
            refused: false,
            failure: None,
            last_seen_ms: now_ms,
        }
    }

    fn is_live(&self) -> bool {
        self.open && !self.dead
    }
}

#[derive(Debug, Clone, Copy)]
struct Retry {
    attempt: u32,
    /// `None` while the attempt is in flight
    next_at_ms: Option<u64>,
}

/// One participant's view of the game and its links
pub struct SessionController {
    session_id: String,
    role: Role,
    config: SessionConfig,
    clock: SharedClock,
    store: Box<dyn IdentityStore>,
    connector: Box<dyn Connector>,
    game: GameStateMachine,
    timer: TurnTimer,
    /// Turn the timer was last started for
    timer_turn: Option<TurnTag>,
    /// Turn for which this session already asked the host to end
    end_turn_requested: Option<TurnTag>,
    keepalive: PeriodicTask,
    listener: Option<Box<dyn Listener>>,
    links: Vec<Link>,
    init_retry: Option<Retry>,
    reconnect: Option<Retry>,
    status: ConnectionStatus,
    events: VecDeque<SessionEvent>,
    shut_down: bool,
}

impl SessionController {
    pub fn new(
        role: Role,
        config: SessionConfig,
        deps: SessionDeps,
        settings: Settings,
        words: WordSupplier,
    ) -> Self {
        let session_id = deps.session_id;
        let game = GameStateMachine::new(&session_id, settings, words);
        let timer = TurnTimer::with_intervals(deps.clock.clone(), config.tick_ms, config.pulse_ms);
        let keepalive = PeriodicTask::new("keepalive", config.keepalive_ms);

        Self {
            session_id,
            role,
            config,
            clock: deps.clock,
            store: deps.store,
            connector: deps.connector,
            game,
            timer,
            timer_turn: None,
            end_turn_requested: None,
            keepalive,
            listener: None,
            links: Vec::new(),
            init_retry: None,
            reconnect: None,
            status: ConnectionStatus::Starting,
            events: VecDeque::new(),
            shut_down: false,
        }
    }

    /// Start listening (authority) or connecting (replica)
    pub fn start(&mut self) {
        info!(session = %self.session_id, role = ?self.role, "session starting");
        match self.role.clone() {
            Role::Authority => self.try_bind(),
            Role::Replica { host } => self.open_link(&host),
        }
        self.keepalive.start(self.clock.now_ms());
    }

    /// Run one pass of the event loop
    pub fn poll(&mut self) {
        if self.shut_down {
            return;
        }
        let now = self.clock.now_ms();
        self.poll_retries(now);
        self.accept_links(now);
        self.poll_links();
        self.poll_timer();
        self.poll_keepalive(now);
    }

    /// Events for the UI since the last call
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn game(&self) -> &GameStateMachine {
        &self.game
    }

    pub fn timer(&self) -> &TurnTimer {
        &self.timer
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    /// Address the listener is bound to (authority only)
    pub fn listen_address(&self) -> Option<String> {
        self.listener.as_ref().map(|l| l.local_addr())
    }

    /// Number of open links
    pub fn peer_count(&self) -> usize {
        self.links.iter().filter(|l| l.is_live()).count()
    }

    // === UI intents ===

    pub fn add_player(&mut self, name: &str) -> Result<(), SessionError> {
        if name.trim().is_empty() {
            return Err(GameError::EmptyName.into());
        }
        self.dispatch(Intent::Add {
            name: name.trim().to_string(),
        })
    }

    pub fn remove_player(&mut self, id: &str) -> Result<(), SessionError> {
        self.dispatch(Intent::Remove { id: id.to_string() })
    }

    pub fn start_game(&mut self) -> Result<(), SessionError> {
        self.dispatch(Intent::Start)
    }

    pub fn restart_game(&mut self) -> Result<(), SessionError> {
        self.dispatch(Intent::Restart)
    }

    pub fn submit_answer(&mut self, correct: bool) -> Result<(), SessionError> {
        let turn = self.game.turn_tag();
        self.dispatch(Intent::Answer { correct, turn })
    }

    pub fn end_turn(&mut self) -> Result<(), SessionError> {
        let turn = self.game.turn_tag();
        self.dispatch(Intent::EndTurn { turn })
    }

    pub fn advance_turn(&mut self) -> Result<(), SessionError> {
        self.dispatch(Intent::Advance)
    }

    pub fn update_settings(&mut self, settings: Settings) -> Result<(), SessionError> {
        settings.validate()?;
        self.dispatch(Intent::Settings { settings })
    }

    /// Manual retry after a fatal bind failure or an unavailable host
    pub fn retry(&mut self) {
        match self.role.clone() {
            Role::Authority => {
                if self.listener.is_none() {
                    info!("retrying to listen");
                    self.init_retry = None;
                    self.try_bind();
                }
            }
            Role::Replica { host } => {
                if self.links.is_empty() {
                    info!(%host, "retrying connection");
                    self.reconnect = None;
                    self.open_link(&host);
                }
            }
        }
    }

    /// Close every link and cancel both periodic activities
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.timer.stop();
        self.keepalive.cancel();
        debug!(task = self.keepalive.name(), "periodic task cancelled");
        for link in &mut self.links {
            link.channel.close();
        }
        self.links.clear();
        if let Some(mut listener) = self.listener.take() {
            listener.close();
        }
        self.init_retry = None;
        self.reconnect = None;
        self.status = ConnectionStatus::Offline;
        info!("session shut down");
    }

    // === Connection lifecycle ===

    fn try_bind(&mut self) {
        match self.connector.bind(self.config.port) {
            Ok(listener) => {
                let address = listener.local_addr();
                info!(%address, "hosting");
                self.listener = Some(listener);
                self.init_retry = None;
                self.status = ConnectionStatus::Listening {
                    address: address.clone(),
                    peers: 0,
                };
                self.push_info(format!("Hosting on {}", address));
            }
            Err(e) => {
                let retries = self.init_retry.map_or(0, |r| r.attempt);
                if retries < self.config.init_retries {
                    let attempt = retries + 1;
                    warn!(error = %e, attempt, "bind failed, will retry");
                    self.init_retry = Some(Retry {
                        attempt,
                        next_at_ms: Some(self.clock.now_ms() + self.config.init_retry_ms),
                    });
                    self.status = ConnectionStatus::BindRetry { attempt };
                } else {
                    error!(error = %e, "giving up on listening");
                    self.init_retry = None;
                    self.status = ConnectionStatus::InitFailed;
                    self.push_error(SessionError::InitFailed {
                        attempts: retries + 1,
                        source: e,
                    });
                }
            }
        }
    }

    fn open_link(&mut self, address: &str) {
        match self.connector.connect(address) {
            Ok(channel) => {
                self.links.push(Link::new(channel, self.clock.now_ms()));
                if self.reconnect.is_none() {
                    self.status = ConnectionStatus::Connecting {
                        address: address.to_string(),
                    };
                }
            }
            Err(e) => self.connect_failed(e),
        }
    }

    fn connect_failed(&mut self, e: ChannelError) {
        match self.reconnect.take() {
            Some(retry) => {
                debug!(error = %e, attempt = retry.attempt, "reconnect attempt failed");
                self.schedule_reconnect(retry.attempt);
            }
            None => {
                let address = match &self.role {
                    Role::Replica { host } => host.clone(),
                    Role::Authority => String::new(),
                };
                warn!(error = %e, %address, "host unavailable");
                self.status = ConnectionStatus::Unavailable { address };
                self.push_error(SessionError::PeerUnavailable(e));
            }
        }
    }

    fn schedule_reconnect(&mut self, failed_attempts: u32) {
        if failed_attempts >= self.config.reconnect_attempts {
            warn!(attempts = failed_attempts, "giving up reconnecting");
            self.reconnect = None;
            self.status = ConnectionStatus::Disconnected;
            self.push_error(SessionError::ReconnectFailed(failed_attempts));
            return;
        }
        let attempt = failed_attempts + 1;
        let delay = self.config.backoff_ms(attempt);
        info!(attempt, delay_ms = delay, "reconnect scheduled");
        self.reconnect = Some(Retry {
            attempt,
            next_at_ms: Some(self.clock.now_ms() + delay),
        });
        self.status = ConnectionStatus::Reconnecting { attempt };
    }

    fn poll_retries(&mut self, now: u64) {
        if let Some(Retry {
            next_at_ms: Some(at),
            ..
        }) = self.init_retry
        {
            if now >= at {
                self.try_bind();
            }
        }

        if let Some(Retry {
            attempt,
            next_at_ms: Some(at),
        }) = self.reconnect
        {
            if now >= at {
                self.reconnect = Some(Retry {
                    attempt,
                    next_at_ms: None,
                });
                if let Role::Replica { host } = self.role.clone() {
                    info!(attempt, "reconnecting");
                    self.open_link(&host);
                }
            }
        }
    }

    fn accept_links(&mut self, now: u64) {
        let accepted = match self.listener.as_mut() {
            Some(listener) => listener.accept(),
            None => return,
        };
        for channel in accepted {
            debug!(remote = %channel.remote(), "link accepted");
            self.links.push(Link::new(channel, now));
        }
    }

    fn poll_links(&mut self) {
        for i in 0..self.links.len() {
            let events = self.links[i].channel.poll();
            for event in events {
                self.handle_channel_event(i, event);
            }
        }
        self.reap_links();
    }

    fn handle_channel_event(&mut self, i: usize, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_link_open(i),
            ChannelEvent::Data(envelope) => {
                self.links[i].last_seen_ms = self.clock.now_ms();
                if self.links[i].dead {
                    return;
                }
                self.handle_envelope(i, envelope);
            }
            ChannelEvent::Closed => self.links[i].dead = true,
            ChannelEvent::Error(e) => {
                self.links[i].dead = true;
                self.links[i].failure = Some(e);
            }
        }
    }

    fn on_link_open(&mut self, i: usize) {
        let now = self.clock.now_ms();
        let link = &mut self.links[i];
        link.open = true;
        link.last_seen_ms = now;
        let remote = link.channel.remote();

        let hello = Envelope::Hello {
            session_id: self.session_id.clone(),
            protocol_version: PROTOCOL_VERSION,
        };
        self.send_to(i, &hello);

        match self.role.clone() {
            Role::Authority => {
                info!(%remote, "replica connected");
                self.send_snapshot_to(i);
                self.update_peer_status();
            }
            Role::Replica { host } => {
                let reconnected = self.reconnect.take().is_some();
                info!(%host, reconnected, "connected to host");
                self.status = ConnectionStatus::Connected {
                    address: host.clone(),
                };
                let last = LastPeer {
                    address: host.clone(),
                    session_id: self.session_id.clone(),
                };
                if let Err(e) = self.store.set_last_peer(&last) {
                    warn!(error = %e, "could not remember last peer");
                }
                self.push_info(if reconnected {
                    "Reconnected to host".to_string()
                } else {
                    format!("Connected to {}", host)
                });
            }
        }
    }

    fn reap_links(&mut self) {
        let mut i = 0;
        while i < self.links.len() {
            if self.links[i].dead {
                let link = self.links.remove(i);
                self.on_link_gone(link);
            } else {
                i += 1;
            }
        }
    }

    fn on_link_gone(&mut self, mut link: Link) {
        link.channel.close();
        let peer = link.channel.remote();

        if link.refused {
            match self.role {
                Role::Replica { .. } => {
                    self.status = ConnectionStatus::Disconnected;
                    self.push_error(SessionError::DuplicateSession { peer });
                }
                Role::Authority => self.update_peer_status(),
            }
            return;
        }

        if !link.open {
            match self.role {
                Role::Replica { .. } => {
                    self.connect_failed(link.failure.unwrap_or(ChannelError::Closed))
                }
                Role::Authority => debug!(%peer, "link dropped before opening"),
            }
            return;
        }

        let in_game = self.game.phase().is_running();
        warn!(%peer, in_game, "link lost");
        self.push_error(if in_game {
            SessionError::LinkLostDuringGame { peer }
        } else {
            SessionError::LinkLost { peer }
        });

        match self.role {
            Role::Replica { .. } => self.schedule_reconnect(0),
            Role::Authority => {
                self.update_peer_status();
                self.end_turn_if_owner_gone();
            }
        }
    }

    fn update_peer_status(&mut self) {
        if let Some(address) = self.listen_address() {
            self.status = ConnectionStatus::Listening {
                address,
                peers: self.peer_count(),
            };
        }
    }

    // === Timers ===

    fn poll_timer(&mut self) {
        if self.timer.tick() == TimerTick::Expired {
            self.on_timer_expired();
        }
        if let Some(pulse) = self.timer.poll_pulse() {
            self.broadcast(&Envelope::TimePulse(pulse));
        }
    }

    fn on_timer_expired(&mut self) {
        if self.game.phase() != Phase::InProgress {
            return;
        }
        if self.game.is_turn_owner(&self.session_id) {
            info!("turn time is up");
            self.request_end_of_turn();
        } else {
            self.end_turn_if_owner_gone();
        }
    }

    /// Turn owner asks for the end of its turn once its clock ran out
    fn request_end_of_turn(&mut self) {
        let tag = self.game.turn_tag();
        match self.dispatch(Intent::EndTurn { turn: tag }) {
            Ok(()) => self.end_turn_requested = Some(tag),
            Err(e) => self.push_error(e),
        }
    }

    /// Authority fallback: end a turn whose owner is gone once our clock ran out
    fn end_turn_if_owner_gone(&mut self) {
        if !self.is_authority()
            || self.game.phase() != Phase::InProgress
            || self.timer.is_running()
            || self.timer_turn != Some(self.game.turn_tag())
            || self.turn_owner_connected()
        {
            return;
        }
        let me = self.session_id.clone();
        let turn = self.game.turn_tag();
        match self.apply_intent(&me, Intent::EndTurn { turn }) {
            Ok(()) => {
                info!("ended turn for a disconnected player");
                self.after_mutation();
            }
            Err(e) => debug!(error = %e, "fallback end of turn declined"),
        }
    }

    fn poll_keepalive(&mut self, now: u64) {
        if !self.keepalive.poll(now) {
            return;
        }
        self.broadcast(&Envelope::Keepalive { sent_at_ms: now });
        if self.is_authority() && self.game.phase() == Phase::InProgress {
            self.broadcast_snapshot();
        }

        for link in &mut self.links {
            if link.is_live() && now.saturating_sub(link.last_seen_ms) > self.config.watchdog_ms {
                warn!(peer = %link.channel.remote(), "link silent too long");
                link.dead = true;
            }
        }
        self.reap_links();
    }

    /// Start or stop the turn timer to match the game phase. Also restarts
    /// the keepalive so both periodic activities share turn boundaries.
    fn sync_timer_with_state(&mut self, time_left_hint: Option<u64>) {
        let now = self.clock.now_ms();
        if self.game.phase() == Phase::InProgress {
            let tag = self.game.turn_tag();
            if self.timer_turn == Some(tag) {
                return;
            }
            let duration = time_left_hint.unwrap_or_else(|| self.game.settings().round_time_ms());
            let is_owner = self.game.is_turn_owner(&self.session_id);
            self.timer.start(tag, duration, is_owner);
            self.timer_turn = Some(tag);
            self.end_turn_requested = None;
            self.keepalive.start(now);
        } else if self.timer_turn.is_some() {
            self.timer.stop();
            self.timer_turn = None;
            self.keepalive.start(now);
        }
    }

    // === Sending ===

    fn send_to(&mut self, i: usize, envelope: &Envelope) {
        let link = &mut self.links[i];
        if let Err(e) = link.channel.send(envelope) {
            debug!(peer = %link.channel.remote(), kind = envelope.kind(), error = %e, "send failed");
        }
    }

    fn broadcast(&mut self, envelope: &Envelope) {
        self.broadcast_except(None, envelope);
    }

    fn broadcast_except(&mut self, skip: Option<usize>, envelope: &Envelope) {
        for i in 0..self.links.len() {
            if Some(i) != skip && self.links[i].is_live() {
                self.send_to(i, envelope);
            }
        }
    }

    fn push_info(&mut self, message: String) {
        self.events.push_back(SessionEvent::Info(message));
    }

    fn push_error(&mut self, error: SessionError) {
        self.events.push_back(SessionEvent::Error(error));
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
