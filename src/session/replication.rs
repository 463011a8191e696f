//! State replication between the authority and its replicas
//!
//! The authority applies intents to its machine and pushes a full snapshot
//! after every change. Replicas replace their state wholesale from snapshots
//! and never mutate it themselves.

use super::{SessionController, SessionError};
use crate::game::{Actor, GameError, Phase, TurnTag};
use crate::network::protocol::{Envelope, Intent, Snapshot, PROTOCOL_VERSION};
use tracing::{debug, info, warn};

impl SessionController {
    /// Route a local intent: apply it on the authority, forward it otherwise
    pub(super) fn dispatch(&mut self, intent: Intent) -> Result<(), SessionError> {
        if self.is_authority() {
            let me = self.session_id.clone();
            self.apply_intent(&me, intent)?;
            self.after_mutation();
            return Ok(());
        }

        let i = self.host_link().ok_or(SessionError::NotConnected)?;
        debug!(?intent, "sending intent to host");
        self.links[i]
            .channel
            .send(&Envelope::PlayerIntent { intent })
            .map_err(|e| {
                debug!(error = %e, "intent not sent");
                SessionError::NotConnected
            })
    }

    /// Apply an intent on behalf of `requester` (authority only)
    pub(super) fn apply_intent(&mut self, requester: &str, intent: Intent) -> Result<(), GameError> {
        let actor = if requester == self.session_id {
            Actor::authority(requester)
        } else {
            Actor::replica(requester)
        };
        match intent {
            Intent::Add { name } => self.game.add_player(&name, requester).map(|_| ()),
            Intent::Remove { id } => self.game.remove_player(actor, &id).map(|_| ()),
            Intent::Start => self.game.start_game(),
            Intent::Restart => self.game.restart_game(),
            Intent::Answer { correct, turn } => {
                self.check_turn(turn)?;
                self.game.submit_answer(actor, correct)
            }
            Intent::EndTurn { turn } => {
                self.check_turn(turn)?;
                // The authority only stands in for an owner that is gone
                if actor.is_authority
                    && !self.game.is_turn_owner(requester)
                    && self.turn_owner_connected()
                {
                    return Err(GameError::NotTurnOwner);
                }
                self.game.end_turn(actor)
            }
            Intent::Advance => self.game.advance_turn(actor),
            Intent::Settings { settings } => self.game.update_settings(settings),
        }
    }

    fn check_turn(&self, turn: TurnTag) -> Result<(), GameError> {
        if turn != self.game.turn_tag() {
            return Err(GameError::StaleTurn);
        }
        Ok(())
    }

    /// Follow-up after the authority changed state
    pub(super) fn after_mutation(&mut self) {
        self.sync_timer_with_state(None);
        self.broadcast_snapshot();
    }

    pub(super) fn build_snapshot(&self) -> Snapshot {
        let time_left_ms = if self.game.phase() == Phase::InProgress {
            self.timer.remaining_ms()
        } else {
            0
        };
        Snapshot {
            settings: self.game.settings().clone(),
            players: self.game.players().to_vec(),
            state: self.game.state().clone(),
            current_player: self.game.current_player().cloned(),
            next_player: self.game.next_player().cloned(),
            time_left_ms,
            from_authority: self.is_authority(),
        }
    }

    pub(super) fn broadcast_snapshot(&mut self) {
        if !self.is_authority() {
            return;
        }
        let envelope = Envelope::StateSnapshot(self.build_snapshot());
        self.broadcast(&envelope);
    }

    pub(super) fn send_snapshot_to(&mut self, i: usize) {
        let envelope = Envelope::StateSnapshot(self.build_snapshot());
        self.send_to(i, &envelope);
    }

    /// Replace local state with an authority snapshot. Applying the same
    /// snapshot twice leaves the session unchanged.
    pub(super) fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if let Err(e) = snapshot.validate() {
            debug!(error = %e, "dropping invalid snapshot");
            return;
        }
        let Snapshot {
            settings,
            players,
            state,
            time_left_ms,
            ..
        } = snapshot;
        self.game.replace(settings, players, state);
        self.sync_timer_with_state(Some(time_left_ms));

        // Our clock ran out while the host could not hear us
        let tag = self.game.turn_tag();
        if self.game.phase() == Phase::InProgress
            && self.timer_turn == Some(tag)
            && !self.timer.is_running()
            && self.game.is_turn_owner(&self.session_id)
            && self.end_turn_requested != Some(tag)
        {
            self.request_end_of_turn();
        }
    }

    pub(super) fn handle_envelope(&mut self, i: usize, envelope: Envelope) {
        match envelope {
            Envelope::Hello {
                session_id,
                protocol_version,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        remote = protocol_version,
                        local = PROTOCOL_VERSION,
                        "protocol version mismatch"
                    );
                }
                if self.session_id_in_use(i, &session_id) {
                    warn!(
                        remote = %session_id,
                        peer = %self.links[i].channel.remote(),
                        "refusing link with a session id already in use"
                    );
                    self.links[i].refused = true;
                    self.links[i].dead = true;
                    return;
                }
                debug!(remote = %session_id, "hello");
                self.links[i].remote_session = Some(session_id);
                if self.is_authority() {
                    self.send_snapshot_to(i);
                }
            }
            Envelope::StateSnapshot(snapshot) => {
                if self.is_authority() {
                    debug!("ignoring snapshot sent to the authority");
                    return;
                }
                self.apply_snapshot(snapshot);
            }
            Envelope::TimePulse(pulse) => {
                self.timer.apply_pulse(&pulse);
                if self.is_authority() && pulse.tag == self.game.turn_tag() {
                    self.broadcast_except(Some(i), &Envelope::TimePulse(pulse));
                }
            }
            Envelope::PlayerIntent { intent } => {
                if !self.is_authority() {
                    debug!("replica ignores intents");
                    return;
                }
                let Some(requester) = self.links[i].remote_session.clone() else {
                    debug!("dropping intent sent before hello");
                    return;
                };
                let kind = format!("{:?}", intent);
                match self.apply_intent(&requester, intent) {
                    Ok(()) => {
                        debug!(%requester, intent = %kind, "intent applied");
                        self.after_mutation();
                    }
                    Err(e) => {
                        info!(%requester, intent = %kind, reason = %e, "intent declined");
                        self.send_snapshot_to(i);
                    }
                }
            }
            Envelope::Keepalive { .. } => {}
        }
    }

    /// Whether `session_id` is ours or belongs to another live link
    fn session_id_in_use(&self, i: usize, session_id: &str) -> bool {
        session_id == self.session_id
            || self.links.iter().enumerate().any(|(j, l)| {
                j != i && l.is_live() && l.remote_session.as_deref() == Some(session_id)
            })
    }

    /// First open link (replicas have at most one)
    pub(super) fn host_link(&self) -> Option<usize> {
        self.links.iter().position(|l| l.is_live())
    }

    /// Whether the session owning the current turn is reachable
    pub(super) fn turn_owner_connected(&self) -> bool {
        let Some(player) = self.game.current_player() else {
            return false;
        };
        player.owner == self.session_id
            || self
                .links
                .iter()
                .any(|l| l.is_live() && l.remote_session.as_deref() == Some(player.owner.as_str()))
    }
}
