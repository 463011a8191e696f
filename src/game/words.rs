//! Word supply for turns
//!
//! Embeds the default word list at build time. A supplier draws words from a
//! shuffled working pool and keeps a bounded history of recent words so the
//! same entry does not come back within a few turns.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::Path;

/// Embedded word list, one entry per line (entries may contain spaces)
static WORDS_DATA: &str = include_str!("../../data/words.txt");

static BUILTIN_WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| parse_word_list(WORDS_DATA));

/// Number of recently drawn words that are kept out of new pools
pub const HISTORY_CAP: usize = 200;

/// Pool size per player per round. Generous so a turn never starves.
pub const WORDS_PER_PLAYER_ROUND: usize = 30;

/// Split a word list into entries, skipping blank lines and `#` comments.
fn parse_word_list(data: &str) -> Vec<&str> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// The embedded word list
pub fn builtin_words() -> Vec<String> {
    BUILTIN_WORDS.iter().map(|w| w.to_string()).collect()
}

/// Load a word list from a file (same format as the embedded list)
pub fn load_word_file(path: &Path) -> io::Result<Vec<String>> {
    let data = std::fs::read_to_string(path)?;
    Ok(parse_word_list(&data).into_iter().map(str::to_string).collect())
}

/// Number of whitespace-separated tokens in an entry
pub fn token_count(word: &str) -> usize {
    word.split_whitespace().count()
}

/// Produces non-repeating candidate words for a session.
pub struct WordSupplier {
    source: Vec<String>,
    max_tokens: usize,
    pool_size: usize,
    pool: Vec<String>,
    history: VecDeque<String>,
    history_cap: usize,
    rng: StdRng,
}

impl WordSupplier {
    /// Create a supplier over the given source list
    pub fn new(source: Vec<String>) -> Self {
        Self::with_rng(source, StdRng::from_rng(&mut rand::rng()))
    }

    /// Create a supplier with a fixed seed (for testing)
    #[cfg(test)]
    pub fn seeded(source: Vec<String>, seed: u64) -> Self {
        Self::with_rng(source, StdRng::seed_from_u64(seed))
    }

    fn with_rng(source: Vec<String>, rng: StdRng) -> Self {
        Self {
            source,
            max_tokens: usize::MAX,
            pool_size: WORDS_PER_PLAYER_ROUND,
            pool: Vec::new(),
            history: VecDeque::new(),
            history_cap: HISTORY_CAP,
            rng,
        }
    }

    /// Override the recent-history window size
    #[cfg(test)]
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    /// Prepare for a new game. Drops the current pool; history is kept so
    /// words from the previous game stay out of the first turns.
    pub fn configure(&mut self, max_tokens: usize, players: usize, total_rounds: u32) {
        self.max_tokens = max_tokens;
        self.pool_size = (players * total_rounds as usize * WORDS_PER_PLAYER_ROUND)
            .max(WORDS_PER_PLAYER_ROUND);
        self.pool.clear();
    }

    /// Whether the source has at least one entry short enough to be drawn
    pub fn has_eligible(&self) -> bool {
        self.source.iter().any(|w| self.is_eligible(w))
    }

    fn is_eligible(&self, word: &str) -> bool {
        let tokens = token_count(word);
        tokens > 0 && tokens <= self.max_tokens
    }

    /// Rebuild the working pool from the source
    pub fn rebuild(&mut self) {
        let mut seen = HashSet::new();
        let mut pool: Vec<String> = self
            .source
            .iter()
            .filter(|w| self.is_eligible(w))
            .filter(|w| !self.history.contains(*w))
            .filter(|w| seen.insert(w.as_str()))
            .cloned()
            .collect();

        pool.shuffle(&mut self.rng);
        pool.truncate(self.pool_size);
        self.pool = pool;
    }

    /// Draw the next word.
    ///
    /// Returns `None` only when the source has no eligible entry at all.
    pub fn next_word(&mut self) -> Option<String> {
        if self.pool.is_empty() {
            self.rebuild();
        }
        if self.pool.is_empty() {
            // Every eligible word is in the recent history
            self.history.clear();
            self.rebuild();
        }

        let word = self.pool.pop()?;
        self.remember(&word);
        Some(word)
    }

    fn remember(&mut self, word: &str) {
        if self.history_cap == 0 {
            return;
        }
        while self.history.len() >= self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(word.to_string());
    }

    /// Words left in the working pool
    #[cfg(test)]
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Words currently held in the recent history
    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
