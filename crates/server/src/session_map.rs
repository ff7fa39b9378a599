//! Time-bounded registry of in-flight pack sessions.
//!
//! Each kind of session (upload, receive) owns one map. Lookups hand out an
//! `Arc<tokio::sync::Mutex<S>>`, so two requests presenting the same cookie
//! serialize on the session instead of interleaving its state machine. A
//! background sweeper drops sessions idle longer than the configured window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
// tokio's Instant, not std's: it honors paused time in tests.
use tokio::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

struct Entry<S> {
    session: Arc<AsyncMutex<S>>,
    touched: Instant,
}

pub struct SessionMap<S> {
    inner: Mutex<HashMap<Uuid, Entry<S>>>,
    idle: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> SessionMap<S> {
    /// Create the map and start its sweeper (period `idle/2`). The sweeper
    /// holds only a weak reference, so dropping the map stops it too.
    pub fn new(idle: Duration) -> Arc<Self> {
        let map = Arc::new(SessionMap {
            inner: Mutex::new(HashMap::new()),
            idle,
            sweeper: Mutex::new(None),
        });
        let weak = Arc::downgrade(&map);
        let period = idle.checked_div(2).unwrap_or(idle).max(Duration::from_millis(10));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(map) = weak.upgrade() else { break };
                map.sweep();
            }
        });
        *map.sweeper.lock().unwrap() = Some(handle);
        map
    }

    pub fn insert(&self, id: Uuid, session: S) -> Arc<AsyncMutex<S>> {
        let session = Arc::new(AsyncMutex::new(session));
        self.inner.lock().unwrap().insert(
            id,
            Entry {
                session: session.clone(),
                touched: Instant::now(),
            },
        );
        session
    }

    /// Look up and touch a session. `None` for unknown or expired ids.
    pub fn get(&self, id: Uuid) -> Option<Arc<AsyncMutex<S>>> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.get_mut(&id)?;
        entry.touched = Instant::now();
        Some(entry.session.clone())
    }

    pub fn remove(&self, id: Uuid) {
        self.inner.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self) {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, e| e.touched.elapsed() < self.idle);
        let expired = before - inner.len();
        if expired > 0 {
            tracing::debug!(expired, "expired idle pack sessions");
        }
    }

    /// Cancel the sweeper and drop all entries. Handlers already holding a
    /// session Arc finish normally; new lookups miss.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.lock().unwrap().clear();
    }
}
