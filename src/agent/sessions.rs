//! Per-session turn serialization
//!
//! Sessions are independent units of concurrency, but within one session
//! turns are strictly sequential: a new inbound message is not processed
//! until the prior turn is back at idle. The registry hands out one async
//! mutex per session id; holding it for the whole turn makes concurrent
//! messages on the same session queue instead of interleave.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

pub struct SessionRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get the turn lock for a session, creating it on first use.
    pub async fn turn_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;

        // Opportunistically prune locks nobody holds once the map grows.
        if locks.len() > 256 {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
