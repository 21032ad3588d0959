//! Shareable location state (the URL role)
//!
//! [`MemoryHistory`] behaves like a browser session history: `push` and
//! `replace` change the current entry silently, while `back` and `forward`
//! notify navigation listeners, mirroring `popstate`.

use crate::error::PersistenceResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier for a navigation listener
pub type NavigationListenerId = u64;

pub type NavigationListener = Arc<dyn Fn() + Send + Sync>;

/// Whether a location change adds a history entry or rewrites the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Push,
    Replace,
}

pub trait LocationStore: Send + Sync {
    /// Current value of a query parameter
    fn query_param(&self, name: &str) -> PersistenceResult<Option<String>>;

    /// Set (`Some`) or drop (`None`) a query parameter
    fn set_query_param(
        &self,
        name: &str,
        value: Option<&str>,
        mode: HistoryMode,
    ) -> PersistenceResult<()>;

    /// Register a listener fired on back/forward navigation
    fn add_navigation_listener(&self, listener: NavigationListener) -> NavigationListenerId;

    fn remove_navigation_listener(&self, id: NavigationListenerId) -> bool;
}

type QueryParams = Vec<(String, String)>;

struct HistoryState {
    entries: Vec<QueryParams>,
    index: usize,
}

impl HistoryState {
    fn current(&self) -> &QueryParams {
        &self.entries[self.index]
    }
}

pub struct MemoryHistory {
    state: Mutex<HistoryState>,
    listeners: Mutex<Vec<(NavigationListenerId, NavigationListener)>>,
    next_listener_id: AtomicU64,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::with_query("")
    }

    /// Start at a location with the given query string (`"a=1&b=2"`, with or
    /// without a leading `?`)
    pub fn with_query(query: &str) -> Self {
        Self {
            state: Mutex::new(HistoryState {
                entries: vec![parse_query(query)],
                index: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Current query string, including the leading `?` when non-empty
    pub fn query_string(&self) -> String {
        let state = self.state.lock();
        let params = state.current();
        if params.is_empty() {
            return String::new();
        }
        let joined = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("?{joined}")
    }

    /// Number of entries in the session history
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.state.lock().index
    }

    /// Navigate one entry back. Returns `false` at the start of history.
    pub fn back(&self) -> bool {
        let moved = {
            let mut state = self.state.lock();
            if state.index == 0 {
                false
            } else {
                state.index -= 1;
                true
            }
        };
        if moved {
            self.notify();
        }
        moved
    }

    /// Navigate one entry forward. Returns `false` at the end of history.
    pub fn forward(&self) -> bool {
        let moved = {
            let mut state = self.state.lock();
            if state.index + 1 >= state.entries.len() {
                false
            } else {
                state.index += 1;
                true
            }
        };
        if moved {
            self.notify();
        }
        moved
    }

    fn notify(&self) {
        let listeners: Vec<NavigationListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationStore for MemoryHistory {
    fn query_param(&self, name: &str) -> PersistenceResult<Option<String>> {
        let state = self.state.lock();
        Ok(state
            .current()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone()))
    }

    fn set_query_param(
        &self,
        name: &str,
        value: Option<&str>,
        mode: HistoryMode,
    ) -> PersistenceResult<()> {
        let mut state = self.state.lock();
        let mut params = state.current().clone();
        match value {
            Some(value) => match params.iter_mut().find(|(k, _)| k == name) {
                Some(entry) => entry.1 = value.to_string(),
                None => params.push((name.to_string(), value.to_string())),
            },
            None => params.retain(|(k, _)| k != name),
        }

        if &params == state.current() {
            return Ok(());
        }

        match mode {
            HistoryMode::Replace => {
                let index = state.index;
                state.entries[index] = params;
            }
            HistoryMode::Push => {
                // pushing drops any forward entries, as a browser does
                let index = state.index;
                state.entries.truncate(index + 1);
                state.entries.push(params);
                state.index += 1;
            }
        }
        Ok(())
    }

    fn add_navigation_listener(&self, listener: NavigationListener) -> NavigationListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_navigation_listener(&self, id: NavigationListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

fn parse_query(query: &str) -> QueryParams {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
