//! Turn and round state machine
//!
//! The authority runs the machine to validate every action against the
//! session that asked for it. Replicas hold a copy that is only ever
//! replaced wholesale from snapshots.

use super::{
    Actor, GameError, GameState, Outcome, Phase, Player, Settings, TurnTag, UsedWordRecord,
    WordSupplier, MAX_PLAYERS, MIN_PLAYERS,
};
use tracing::{debug, info};

/// Canonical game state plus the rules that change it
pub struct GameStateMachine {
    /// Session id of the process running this machine
    local_session: String,
    settings: Settings,
    players: Vec<Player>,
    state: GameState,
    words: WordSupplier,
}

impl GameStateMachine {
    /// Create a machine in the lobby
    pub fn new(local_session: &str, settings: Settings, words: WordSupplier) -> Self {
        let state = GameState::lobby(settings.teams_count);
        Self {
            local_session: local_session.to_string(),
            settings,
            players: Vec::new(),
            state,
            words,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn turn_tag(&self) -> TurnTag {
        self.state.turn_tag()
    }

    /// The player whose turn it is (only while a game is running)
    pub fn current_player(&self) -> Option<&Player> {
        if !self.phase().is_running() {
            return None;
        }
        self.players.get(self.state.current_player_index)
    }

    /// The player who plays after the current one
    pub fn next_player(&self) -> Option<&Player> {
        if !self.phase().is_running() || self.players.is_empty() {
            return None;
        }
        let next = (self.state.current_player_index + 1) % self.players.len();
        self.players.get(next)
    }

    /// Whether `session_id` owns the player whose turn it is
    pub fn is_turn_owner(&self, session_id: &str) -> bool {
        self.current_player()
            .is_some_and(|p| p.owner == session_id)
    }

    /// Add a player owned by `owner`. Teams are assigned round-robin.
    pub fn add_player(&mut self, name: &str, owner: &str) -> Result<Player, GameError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::EmptyName);
        }
        if self.phase().is_running() {
            return Err(GameError::GameRunning);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::RoomFull);
        }

        let player = Player {
            id: self.unused_player_id(),
            name: name.to_string(),
            team: self.players.len() % self.settings.teams_count,
            owner: owner.to_string(),
            is_local: owner == self.local_session,
        };
        info!(id = %player.id, name = %player.name, team = player.team, "player added");
        self.players.push(player.clone());
        Ok(player)
    }

    fn unused_player_id(&self) -> String {
        loop {
            let id = format!("{:08x}", rand::random::<u32>());
            if !self.players.iter().any(|p| p.id == id) {
                return id;
            }
        }
    }

    /// Remove a player. Only the owning session or the authority may do so,
    /// and never while a game is running.
    pub fn remove_player(&mut self, actor: Actor<'_>, id: &str) -> Result<Player, GameError> {
        if self.phase().is_running() {
            return Err(GameError::GameRunning);
        }
        let pos = self
            .players
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| GameError::UnknownPlayer(id.to_string()))?;
        if !actor.is_authority && self.players[pos].owner != actor.session_id {
            return Err(GameError::NotPlayerOwner(id.to_string()));
        }

        let player = self.players.remove(pos);
        if self.state.current_player_index >= self.players.len() {
            self.state.current_player_index = 0;
        }
        info!(id = %player.id, name = %player.name, "player removed");
        Ok(player)
    }

    /// Replace the settings while no game is running
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), GameError> {
        settings.validate()?;
        if self.phase().is_running() {
            return Err(GameError::GameRunning);
        }

        let teams = settings.teams_count;
        for (i, player) in self.players.iter_mut().enumerate() {
            if player.team >= teams {
                player.team = i % teams;
            }
        }
        self.state.scores.resize(teams, 0);
        self.settings = settings;
        debug!(settings = ?self.settings, "settings updated");
        Ok(())
    }

    /// Start a game from the lobby or after a finished game
    pub fn start_game(&mut self) -> Result<(), GameError> {
        if self.phase().is_running() {
            return Err(GameError::GameRunning);
        }
        if self.players.len() < MIN_PLAYERS {
            return Err(GameError::NotEnoughPlayers);
        }

        self.words.configure(
            self.settings.max_word_length,
            self.players.len(),
            self.settings.total_rounds,
        );
        if !self.words.has_eligible() {
            return Err(GameError::NoWords(self.settings.max_word_length));
        }
        let word = self.draw_word()?;

        let mut state = GameState::lobby(self.settings.teams_count);
        state.is_game_started = true;
        state.current_word = word;
        self.state = state;
        info!(
            players = self.players.len(),
            rounds = self.settings.total_rounds,
            "game started"
        );
        Ok(())
    }

    /// Start over after a finished game
    pub fn restart_game(&mut self) -> Result<(), GameError> {
        if self.phase() != Phase::Finished {
            return Err(GameError::NotFinished);
        }
        self.state.is_game_finished = false;
        if let Err(e) = self.start_game() {
            self.state.is_game_finished = true;
            return Err(e);
        }
        Ok(())
    }

    /// Record the current word as guessed or missed and move to the next one
    pub fn submit_answer(&mut self, actor: Actor<'_>, correct: bool) -> Result<(), GameError> {
        if self.phase() != Phase::InProgress {
            return Err(GameError::NoActiveTurn);
        }
        if !self.is_turn_owner(actor.session_id) {
            return Err(GameError::NotTurnOwner);
        }
        let team = self
            .current_player()
            .map(|p| p.team)
            .ok_or(GameError::NoActiveTurn)?;
        let next_word = self.draw_word()?;

        let word = std::mem::replace(&mut self.state.current_word, next_word);
        self.state.used_words.push(UsedWordRecord {
            word,
            guessed: correct,
            team,
        });
        if let Some(score) = self.state.scores.get_mut(team) {
            if correct {
                *score += 1;
            } else {
                *score = score.saturating_sub(self.settings.skip_penalty);
            }
        }
        debug!(team, correct, "answer recorded");
        Ok(())
    }

    /// Close the current turn. Allowed for the turn owner and the authority.
    pub fn end_turn(&mut self, actor: Actor<'_>) -> Result<(), GameError> {
        if self.phase() != Phase::InProgress {
            return Err(GameError::NoActiveTurn);
        }
        if !actor.is_authority && !self.is_turn_owner(actor.session_id) {
            return Err(GameError::NotTurnOwner);
        }
        self.state.is_between_rounds = true;
        self.state.current_word.clear();
        info!(
            round = self.state.current_round,
            player = self.state.current_player_index,
            "turn ended"
        );
        Ok(())
    }

    /// Hand the turn to the next player, finishing the game after the last round.
    pub fn advance_turn(&mut self, actor: Actor<'_>) -> Result<(), GameError> {
        if self.phase() != Phase::BetweenTurns {
            return Err(GameError::TurnNotEnded);
        }
        let next_owner = self.next_player().map(|p| p.owner.as_str());
        if !actor.is_authority && next_owner != Some(actor.session_id) {
            return Err(GameError::NotNextPlayer);
        }

        let mut index = self.state.current_player_index + 1;
        let mut round = self.state.current_round;
        if index >= self.players.len() {
            index = 0;
            round += 1;
        }

        if round > self.settings.total_rounds {
            self.state.current_player_index = 0;
            self.state.current_round = round;
            self.state.is_between_rounds = false;
            self.state.is_game_started = false;
            self.state.is_game_finished = true;
            info!(scores = ?self.state.scores, "game finished");
            return Ok(());
        }

        let word = self.draw_word()?;
        self.state.current_player_index = index;
        self.state.current_round = round;
        self.state.current_word = word;
        self.state.is_between_rounds = false;
        info!(round, player = index, "turn started");
        Ok(())
    }

    /// Winning team of a finished game
    pub fn winner(&self) -> Option<Outcome> {
        if self.phase() != Phase::Finished {
            return None;
        }
        let best = *self.state.scores.iter().max()?;
        let mut leaders = self
            .state
            .scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == best)
            .map(|(team, _)| team);
        match (leaders.next(), leaders.next()) {
            (Some(team), None) => Some(Outcome::Team(team)),
            (Some(_), Some(_)) => Some(Outcome::Draw),
            _ => None,
        }
    }

    /// Replace everything with a replicated copy
    pub fn replace(&mut self, settings: Settings, mut players: Vec<Player>, state: GameState) {
        for player in &mut players {
            player.is_local = player.owner == self.local_session;
        }
        self.settings = settings;
        self.players = players;
        self.state = state;
    }

    fn draw_word(&mut self) -> Result<String, GameError> {
        self.words
            .next_word()
            .ok_or(GameError::NoWords(self.settings.max_word_length))
    }
}

/// Structural consistency of a settings/players/state triple.
///
/// Used on incoming snapshots before they replace local state.
pub fn check_consistency(
    settings: &Settings,
    players: &[Player],
    state: &GameState,
) -> Result<(), String> {
    settings.validate().map_err(|e| e.to_string())?;
    if state.scores.len() != settings.teams_count {
        return Err(format!(
            "{} scores for {} teams",
            state.scores.len(),
            settings.teams_count
        ));
    }
    if state.is_game_started && state.is_game_finished {
        return Err("game both started and finished".to_string());
    }
    if state.is_game_started && state.current_player_index >= players.len() {
        return Err(format!(
            "player index {} out of {} players",
            state.current_player_index,
            players.len()
        ));
    }
    if state.current_round == 0 {
        return Err("round numbers start at 1".to_string());
    }
    if let Some(p) = players.iter().find(|p| p.team >= settings.teams_count) {
        return Err(format!("player {} on team {}", p.id, p.team));
    }
    let mut ids: Vec<&str> = players.iter().map(|p| p.id.as_str()).collect();
    ids.sort_unstable();
    if ids.windows(2).any(|w| w[0] == w[1]) {
        return Err("duplicate player id".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::words::builtin_words;
    use proptest::prelude::*;

    const HOST: &str = "host-session";
    const GUEST: &str = "guest-session";

    fn machine_with(settings: Settings) -> GameStateMachine {
        GameStateMachine::new(HOST, settings, WordSupplier::seeded(builtin_words(), 42))
    }

    fn two_player_game(settings: Settings) -> GameStateMachine {
        let mut machine = machine_with(settings);
        machine.add_player("Alice", HOST).unwrap();
        machine.add_player("Bob", GUEST).unwrap();
        machine
    }

    fn assert_consistent(machine: &GameStateMachine) {
        check_consistency(machine.settings(), machine.players(), machine.state()).unwrap();
    }

    #[test]
    fn test_add_player_assigns_teams_round_robin() {
        let mut machine = machine_with(Settings {
            teams_count: 3,
            ..Settings::default()
        });
        let teams: Vec<usize> = ["A", "B", "C", "D"]
            .iter()
            .map(|name| machine.add_player(name, HOST).unwrap().team)
            .collect();
        assert_eq!(teams, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_add_player_trims_and_rejects_empty() {
        let mut machine = machine_with(Settings::default());
        let player = machine.add_player("  Alice ", HOST).unwrap();
        assert_eq!(player.name, "Alice");
        assert_eq!(player.id.len(), 8);
        assert!(player.is_local);
        assert_eq!(machine.add_player("   ", HOST), Err(GameError::EmptyName));
    }

    #[test]
    fn test_add_player_room_full() {
        let mut machine = machine_with(Settings::default());
        for i in 0..MAX_PLAYERS {
            machine.add_player(&format!("P{}", i), HOST).unwrap();
        }
        assert_eq!(machine.add_player("Late", HOST), Err(GameError::RoomFull));
    }

    #[test]
    fn test_remote_player_not_local() {
        let machine = two_player_game(Settings::default());
        assert!(machine.players()[0].is_local);
        assert!(!machine.players()[1].is_local);
    }

    #[test]
    fn test_start_requires_two_players() {
        let mut machine = machine_with(Settings::default());
        assert_eq!(machine.start_game(), Err(GameError::NotEnoughPlayers));

        machine.add_player("Alice", HOST).unwrap();
        assert_eq!(machine.start_game(), Err(GameError::NotEnoughPlayers));
        assert_eq!(machine.phase(), Phase::Lobby);
    }

    #[test]
    fn test_start_without_eligible_words() {
        let words = WordSupplier::seeded(vec!["far too long entry".to_string()], 1);
        let mut machine = GameStateMachine::new(HOST, Settings::default(), words);
        machine.add_player("Alice", HOST).unwrap();
        machine.add_player("Bob", GUEST).unwrap();
        assert_eq!(machine.start_game(), Err(GameError::NoWords(2)));
        assert_eq!(machine.phase(), Phase::Lobby);
    }

    #[test]
    fn test_start_game_resets_state() {
        let mut machine = two_player_game(Settings::default());
        machine.start_game().unwrap();

        let state = machine.state();
        assert_eq!(machine.phase(), Phase::InProgress);
        assert_eq!(state.current_round, 1);
        assert_eq!(state.current_player_index, 0);
        assert_eq!(state.scores, vec![0, 0]);
        assert!(state.used_words.is_empty());
        assert!(!state.current_word.is_empty());
        assert_eq!(machine.current_player().unwrap().name, "Alice");
        assert_eq!(machine.next_player().unwrap().name, "Bob");
        assert_eq!(machine.start_game(), Err(GameError::GameRunning));
    }

    #[test]
    fn test_answer_only_by_turn_owner() {
        let mut machine = two_player_game(Settings::default());
        machine.start_game().unwrap();

        assert_eq!(
            machine.submit_answer(Actor::replica(GUEST), true),
            Err(GameError::NotTurnOwner)
        );
        machine.submit_answer(Actor::authority(HOST), true).unwrap();
        assert_eq!(machine.state().scores, vec![1, 0]);
        assert_eq!(machine.state().used_words.len(), 1);
        assert!(machine.state().used_words[0].guessed);
    }

    #[test]
    fn test_answer_draws_new_word() {
        let mut machine = two_player_game(Settings::default());
        machine.start_game().unwrap();
        let first = machine.state().current_word.clone();

        machine.submit_answer(Actor::authority(HOST), false).unwrap();
        assert_eq!(machine.state().used_words[0].word, first);
        assert_ne!(machine.state().current_word, first);
    }

    #[test]
    fn test_wrong_answer_penalty_floored_at_zero() {
        let mut machine = two_player_game(Settings {
            skip_penalty: 2,
            ..Settings::default()
        });
        machine.start_game().unwrap();
        let host = Actor::authority(HOST);

        machine.submit_answer(host, true).unwrap();
        machine.submit_answer(host, true).unwrap();
        machine.submit_answer(host, true).unwrap();
        machine.submit_answer(host, false).unwrap();
        assert_eq!(machine.state().scores[0], 1);
        machine.submit_answer(host, false).unwrap();
        assert_eq!(machine.state().scores[0], 0);
    }

    #[test]
    fn test_answer_outside_turn_declined() {
        let mut machine = two_player_game(Settings::default());
        assert_eq!(
            machine.submit_answer(Actor::authority(HOST), true),
            Err(GameError::NoActiveTurn)
        );
        machine.start_game().unwrap();
        machine.end_turn(Actor::authority(HOST)).unwrap();
        assert_eq!(
            machine.submit_answer(Actor::authority(HOST), true),
            Err(GameError::NoActiveTurn)
        );
    }

    #[test]
    fn test_end_turn_permissions() {
        let mut machine = two_player_game(Settings::default());
        machine.start_game().unwrap();

        // Bob's session neither owns Alice's turn nor is the authority
        assert_eq!(
            machine.end_turn(Actor::replica(GUEST)),
            Err(GameError::NotTurnOwner)
        );
        // Fallback by the authority
        machine.end_turn(Actor::authority(GUEST)).unwrap();
        assert_eq!(machine.phase(), Phase::BetweenTurns);
    }

    #[test]
    fn test_advance_by_next_player_or_authority() {
        let mut machine = two_player_game(Settings::default());
        machine.start_game().unwrap();
        assert_eq!(
            machine.advance_turn(Actor::authority(HOST)),
            Err(GameError::TurnNotEnded)
        );
        machine.end_turn(Actor::replica(HOST)).unwrap();

        // Next player is Bob (guest session); Alice's session as replica is refused
        assert_eq!(
            machine.advance_turn(Actor::replica(HOST)),
            Err(GameError::NotNextPlayer)
        );
        machine.advance_turn(Actor::replica(GUEST)).unwrap();
        assert_eq!(machine.state().current_player_index, 1);
        assert_eq!(machine.phase(), Phase::InProgress);

        machine.end_turn(Actor::replica(GUEST)).unwrap();
        machine.advance_turn(Actor::authority(GUEST)).unwrap();
        assert_eq!(machine.state().current_round, 2);
        assert_eq!(machine.state().current_player_index, 0);
    }

    #[test]
    fn test_two_player_single_round_scenario() {
        let mut machine = two_player_game(Settings {
            round_time: 5,
            total_rounds: 1,
            teams_count: 2,
            skip_penalty: 1,
            ..Settings::default()
        });
        let alice = Actor::replica(HOST);
        let bob = Actor::replica(GUEST);

        machine.start_game().unwrap();
        machine.submit_answer(alice, true).unwrap();
        // Alice's clock runs out
        machine.end_turn(alice).unwrap();
        assert_eq!(machine.winner(), None);

        machine.advance_turn(bob).unwrap();
        assert_eq!(machine.current_player().unwrap().name, "Bob");
        machine.submit_answer(bob, false).unwrap();
        machine.end_turn(bob).unwrap();

        // Wraparound after the only round finishes the game
        machine.advance_turn(Actor::authority(HOST)).unwrap();
        let state = machine.state();
        assert_eq!(machine.phase(), Phase::Finished);
        assert_eq!(state.current_round, 2);
        assert_eq!(state.current_player_index, 0);
        assert!(!state.is_game_started);
        assert_eq!(state.scores, vec![1, 0]);
        assert_eq!(machine.winner(), Some(Outcome::Team(0)));
        assert_consistent(&machine);
    }

    #[test]
    fn test_draw_when_scores_tie() {
        let mut machine = two_player_game(Settings {
            total_rounds: 1,
            ..Settings::default()
        });
        let host = Actor::authority(HOST);
        machine.start_game().unwrap();
        machine.end_turn(host).unwrap();
        machine.advance_turn(host).unwrap();
        machine.end_turn(host).unwrap();
        machine.advance_turn(host).unwrap();
        assert_eq!(machine.winner(), Some(Outcome::Draw));
    }

    #[test]
    fn test_restart_only_after_finish() {
        let mut machine = two_player_game(Settings {
            total_rounds: 1,
            ..Settings::default()
        });
        let host = Actor::authority(HOST);
        assert_eq!(machine.restart_game(), Err(GameError::NotFinished));

        machine.start_game().unwrap();
        machine.submit_answer(Actor::replica(HOST), true).unwrap();
        for _ in 0..2 {
            machine.end_turn(host).unwrap();
            machine.advance_turn(host).unwrap();
        }
        assert_eq!(machine.phase(), Phase::Finished);

        machine.restart_game().unwrap();
        assert_eq!(machine.phase(), Phase::InProgress);
        assert_eq!(machine.state().scores, vec![0, 0]);
        assert_eq!(machine.state().current_round, 1);
        assert!(machine.state().used_words.is_empty());
    }

    #[test]
    fn test_remove_player_rules() {
        let mut machine = two_player_game(Settings::default());
        machine.add_player("Carol", GUEST).unwrap();
        let alice = machine.players()[0].id.clone();
        let carol = machine.players()[2].id.clone();

        assert_eq!(
            machine.remove_player(Actor::replica(GUEST), &alice),
            Err(GameError::NotPlayerOwner(alice.clone()))
        );
        assert_eq!(
            machine.remove_player(Actor::replica(GUEST), "nope"),
            Err(GameError::UnknownPlayer("nope".to_string()))
        );
        machine.remove_player(Actor::replica(GUEST), &carol).unwrap();
        assert_eq!(machine.players().len(), 2);

        machine.start_game().unwrap();
        assert_eq!(
            machine.remove_player(Actor::authority(HOST), &alice),
            Err(GameError::GameRunning)
        );
    }

    #[test]
    fn test_update_settings_reassigns_teams_and_scores() {
        let mut machine = machine_with(Settings {
            teams_count: 4,
            ..Settings::default()
        });
        for name in ["A", "B", "C", "D"] {
            machine.add_player(name, HOST).unwrap();
        }
        machine
            .update_settings(Settings {
                teams_count: 2,
                ..Settings::default()
            })
            .unwrap();
        let teams: Vec<usize> = machine.players().iter().map(|p| p.team).collect();
        assert_eq!(teams, vec![0, 1, 0, 1]);
        assert_eq!(machine.state().scores.len(), 2);
        assert_consistent(&machine);
    }

    #[test]
    fn test_update_settings_declined_while_running() {
        let mut machine = two_player_game(Settings::default());
        machine.start_game().unwrap();
        assert_eq!(
            machine.update_settings(Settings::default()),
            Err(GameError::GameRunning)
        );
        assert!(matches!(
            machine.update_settings(Settings {
                teams_count: 1,
                ..Settings::default()
            }),
            Err(GameError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_replace_recomputes_local_flag() {
        let mut source = two_player_game(Settings::default());
        source.start_game().unwrap();

        let mut mirror = GameStateMachine::new(
            GUEST,
            Settings::default(),
            WordSupplier::seeded(Vec::new(), 0),
        );
        mirror.replace(
            source.settings().clone(),
            source.players().to_vec(),
            source.state().clone(),
        );
        assert!(!mirror.players()[0].is_local);
        assert!(mirror.players()[1].is_local);
        assert_eq!(mirror.state(), source.state());
        assert!(!mirror.is_turn_owner(GUEST));
    }

    #[test]
    fn test_consistency_check_rejects_bad_state() {
        let machine = two_player_game(Settings::default());
        let mut state = machine.state().clone();
        state.scores.push(0);
        assert!(check_consistency(machine.settings(), machine.players(), &state).is_err());

        let mut state = machine.state().clone();
        state.is_game_started = true;
        state.current_player_index = 2;
        assert!(check_consistency(machine.settings(), machine.players(), &state).is_err());

        let mut players = machine.players().to_vec();
        players[1].team = 5;
        assert!(check_consistency(machine.settings(), &players, machine.state()).is_err());
    }

    proptest! {
        /// Property: N players and R rounds finish after exactly N×R
        /// advances, with the round counter at R+1 and all invariants held
        /// along the way.
        #[test]
        fn prop_full_game_finishes_after_n_times_r_turns(
            players in 2usize..7,
            rounds in 1u32..5,
            teams in 2usize..5,
            answers in proptest::collection::vec(any::<bool>(), 0..6),
        ) {
            let mut machine = machine_with(Settings {
                total_rounds: rounds,
                teams_count: teams,
                skip_penalty: 1,
                ..Settings::default()
            });
            for i in 0..players {
                machine.add_player(&format!("P{}", i), HOST).unwrap();
            }
            machine.start_game().unwrap();
            let host = Actor::authority(HOST);

            let turns = players * rounds as usize;
            for turn in 0..turns {
                prop_assert_eq!(machine.phase(), Phase::InProgress);
                prop_assert!(machine.state().current_player_index < players);
                for correct in &answers {
                    machine.submit_answer(host, *correct).unwrap();
                    prop_assert_eq!(machine.state().scores.len(), teams);
                }
                machine.end_turn(host).unwrap();
                machine.advance_turn(host).unwrap();
                prop_assert_eq!(machine.state().scores.len(), teams);
                prop_assert!(check_consistency(machine.settings(), machine.players(), machine.state()).is_ok());
                if turn + 1 < turns {
                    prop_assert!(machine.phase() != Phase::Finished);
                }
            }

            prop_assert_eq!(machine.phase(), Phase::Finished);
            prop_assert_eq!(machine.state().current_round, rounds + 1);
            prop_assert_eq!(machine.state().current_player_index, 0);
            prop_assert!(machine.winner().is_some());
        }
    }
}
