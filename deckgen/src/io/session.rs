//! In-memory conversation transcripts keyed by session id.
//!
//! Transcripts are created on first reference and live for the process
//! lifetime. Each one sits behind its own lock, so requests for different
//! sessions never contend on anything but the brief map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::core::types::{SessionId, Turn};

type Transcript = Arc<Mutex<Vec<Turn>>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Transcript>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transcript(&self, id: &SessionId) -> Transcript {
        let mut sessions = lock(&self.sessions);
        Arc::clone(sessions.entry(id.clone()).or_insert_with(|| {
            debug!(session = %id, "created session");
            Arc::default()
        }))
    }

    /// Snapshot of the transcript, creating an empty one if unknown.
    pub fn history(&self, id: &SessionId) -> Vec<Turn> {
        let transcript = self.transcript(id);
        let turns = lock(&transcript);
        turns.clone()
    }

    /// Append the human input and the agent reply as one unit.
    pub fn append_exchange(&self, id: &SessionId, human: &str, agent: &str) {
        let transcript = self.transcript(id);
        let mut turns = lock(&transcript);
        turns.push(Turn::human(human));
        turns.push(Turn::agent(agent));
        debug!(session = %id, turns = turns.len(), "appended exchange");
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A panic while holding a transcript lock cannot leave a half-written pair
/// behind (both pushes happen after the lock is taken), so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use std::thread;

    #[test]
    fn unknown_session_is_created_empty() {
        let store = SessionStore::new();
        assert!(store.is_empty());
        assert!(store.history(&SessionId::from("new")).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn history_reads_are_idempotent() {
        let store = SessionStore::new();
        let id = SessionId::from("s");
        store.append_exchange(&id, "owls", "Done");
        assert_eq!(store.history(&id), store.history(&id));
    }

    #[test]
    fn exchanges_append_in_order() {
        let store = SessionStore::new();
        let id = SessionId::from("s");
        store.append_exchange(&id, "first", "Which style?");
        store.append_exchange(&id, "minimal", "Done");

        let history = store.history(&id);
        let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Human, Role::Agent, Role::Human, Role::Agent]);
        assert_eq!(history[2].content, "minimal");
        assert_eq!(history[3].content, "Done");
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new();
        store.append_exchange(&SessionId::from("a"), "a", "A");
        assert!(store.history(&SessionId::from("b")).is_empty());
        assert_eq!(store.history(&SessionId::from("a")).len(), 2);
    }

    #[test]
    fn concurrent_appends_keep_pairs_adjacent() {
        let store = SessionStore::new();
        let id = SessionId::from("shared");
        thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                let id = &id;
                scope.spawn(move || {
                    for i in 0..25 {
                        let tag = format!("{worker}-{i}");
                        store.append_exchange(id, &tag, &tag);
                    }
                });
            }
        });

        let history = store.history(&id);
        assert_eq!(history.len(), 200);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::Human);
            assert_eq!(pair[1].role, Role::Agent);
            assert_eq!(pair[0].content, pair[1].content);
        }
    }
}
