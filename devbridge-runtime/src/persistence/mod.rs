//! Selection persistence
//!
//! Keeps the active widget in sync with the shareable location (the `widget`
//! query parameter) and with durable key-value storage. Initial resolution
//! follows a fixed precedence:
//!
//! 1. the query parameter, if it names a candidate
//! 2. the stored value, if it names a candidate
//! 3. the caller's fallback, if it is a candidate
//! 4. the first candidate
//!
//! Every write is best-effort. A failing store is logged and skipped; the
//! selection keeps working in memory for the session.

mod history;
mod storage;

pub use history::{
    HistoryMode, LocationStore, MemoryHistory, NavigationListener, NavigationListenerId,
};
pub use storage::{DisabledStorage, JsonFileStorage, KeyValueStore, MemoryStorage};

use crate::error::PersistenceResult;
use devbridge_types::{DataSourceKey, WidgetId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Query parameter holding the active widget id
pub const WIDGET_QUERY_PARAM: &str = "widget";

/// Storage key for the last selected widget id
pub const WIDGET_STORAGE_KEY: &str = "devbridge.activeWidgetId";

/// Storage key for the last selected data-source key
pub const DATA_SOURCE_STORAGE_KEY: &str = "devbridge.activeDataSourceKey";

/// Why a selection is being written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOrigin {
    /// Restoring a selection on mount; rewrites the current history entry
    Restore,
    /// An explicit choice by the user; adds a history entry
    UserSelection,
}

impl CommitOrigin {
    fn history_mode(self) -> HistoryMode {
        match self {
            CommitOrigin::Restore => HistoryMode::Replace,
            CommitOrigin::UserSelection => HistoryMode::Push,
        }
    }
}

pub struct SelectionPersistence {
    storage: Arc<dyn KeyValueStore>,
    location: Arc<dyn LocationStore>,
    // Last query-parameter value we wrote or observed
    last_known: Arc<Mutex<Option<String>>>,
}

impl SelectionPersistence {
    pub fn new(storage: Arc<dyn KeyValueStore>, location: Arc<dyn LocationStore>) -> Self {
        Self {
            storage,
            location,
            last_known: Arc::new(Mutex::new(None)),
        }
    }

    /// Persistence backed by process memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(MemoryHistory::new()))
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    pub fn location(&self) -> &Arc<dyn LocationStore> {
        &self.location
    }

    /// Resolve the widget to show on mount
    ///
    /// Returns `None` only when `candidates` is empty.
    pub fn read_initial(
        &self,
        candidates: &[WidgetId],
        fallback: Option<&WidgetId>,
    ) -> Option<WidgetId> {
        let from_url = best_effort(
            "read widget query parameter",
            self.location.query_param(WIDGET_QUERY_PARAM),
        )
        .flatten();
        *self.last_known.lock() = from_url.clone();

        if candidates.is_empty() {
            return None;
        }

        let is_candidate = |raw: &str| candidates.iter().any(|c| c.as_str() == raw);

        if let Some(id) = from_url.as_deref().filter(|id| is_candidate(id)) {
            tracing::debug!(widget = id, "restored widget from location");
            return Some(WidgetId::new(id));
        }

        let stored = best_effort(
            "read stored widget",
            self.storage.get(WIDGET_STORAGE_KEY),
        )
        .flatten();
        if let Some(id) = stored.as_deref().filter(|id| is_candidate(id)) {
            tracing::debug!(widget = id, "restored widget from storage");
            return Some(WidgetId::new(id));
        }

        if let Some(id) = fallback.filter(|id| candidates.contains(id)) {
            return Some(id.clone());
        }

        candidates.first().cloned()
    }

    /// Write the active widget to the location and to storage
    ///
    /// The synthetic single-widget id is never written to the location; the
    /// parameter is dropped instead.
    pub fn commit(&self, widget_id: &WidgetId, origin: CommitOrigin) {
        let param = (!widget_id.is_default()).then(|| widget_id.as_str());

        best_effort(
            "write widget query parameter",
            self.location
                .set_query_param(WIDGET_QUERY_PARAM, param, origin.history_mode()),
        );
        *self.last_known.lock() = param.map(str::to_string);

        self.remember_widget(widget_id);
    }

    /// Write the active widget to storage only
    ///
    /// Used when the location already reflects the change, e.g. after
    /// back/forward navigation.
    pub fn remember_widget(&self, widget_id: &WidgetId) {
        best_effort(
            "store widget",
            self.storage.set(WIDGET_STORAGE_KEY, widget_id.as_str()),
        );
    }

    /// Resolve the data source to use on mount: stored value, fallback, then
    /// the first candidate
    pub fn read_initial_data_source(
        &self,
        candidates: &[DataSourceKey],
        fallback: Option<&DataSourceKey>,
    ) -> Option<DataSourceKey> {
        let stored = best_effort(
            "read stored data source",
            self.storage.get(DATA_SOURCE_STORAGE_KEY),
        )
        .flatten();

        let stored = stored.filter(|key| candidates.iter().any(|c| c.as_str() == key.as_str()));
        if let Some(key) = stored {
            return Some(DataSourceKey::new(key));
        }

        if let Some(key) = fallback.filter(|key| candidates.contains(key)) {
            return Some(key.clone());
        }

        candidates.first().cloned()
    }

    pub fn commit_data_source(&self, key: Option<&DataSourceKey>) {
        let result = match key {
            Some(key) => self.storage.set(DATA_SOURCE_STORAGE_KEY, key.as_str()),
            None => self.storage.remove(DATA_SOURCE_STORAGE_KEY),
        };
        best_effort("store data source", result);
    }

    /// Call `callback` when back/forward navigation changes the widget
    ///
    /// Fires only when the parameter differs from the last known value and
    /// names one of `candidates`. A missing parameter maps to the synthetic
    /// single-widget id when that id is a candidate.
    pub fn on_external_navigation<F>(
        &self,
        candidates: Vec<WidgetId>,
        callback: F,
    ) -> NavigationListenerId
    where
        F: Fn(WidgetId) + Send + Sync + 'static,
    {
        let location = Arc::downgrade(&self.location);
        let last_known = Arc::clone(&self.last_known);

        self.location.add_navigation_listener(Arc::new(move || {
            let Some(location) = location.upgrade() else {
                return;
            };
            let current = best_effort(
                "read widget query parameter",
                location.query_param(WIDGET_QUERY_PARAM),
            )
            .flatten();

            {
                let mut last = last_known.lock();
                if *last == current {
                    return;
                }
                *last = current.clone();
            }

            let target = match current {
                Some(raw) => WidgetId::new(raw),
                None => WidgetId::default_widget(),
            };

            if candidates.contains(&target) {
                tracing::debug!(widget = %target, "external navigation changed widget");
                callback(target);
            } else {
                tracing::debug!(widget = %target, "ignoring navigation to unknown widget");
            }
        }))
    }

    pub fn remove_navigation_listener(&self, id: NavigationListenerId) -> bool {
        self.location.remove_navigation_listener(id)
    }
}

/// Log and swallow a persistence failure
fn best_effort<T>(action: &str, result: PersistenceResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("Failed to {}: {}", action, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(raw: &[&str]) -> Vec<WidgetId> {
        raw.iter().map(|id| WidgetId::new(*id)).collect()
    }

    fn persistence_with(query: &str, stored: Option<&str>) -> (SelectionPersistence, Arc<MemoryHistory>) {
        let storage = Arc::new(MemoryStorage::new());
        if let Some(stored) = stored {
            storage.set(WIDGET_STORAGE_KEY, stored).unwrap();
        }
        let history = Arc::new(MemoryHistory::with_query(query));
        (SelectionPersistence::new(storage, history.clone()), history)
    }

    #[test]
    fn test_url_wins_over_storage_and_fallback() {
        let (persistence, _) = persistence_with("widget=B", Some("A"));
        let fallback = WidgetId::new("C");

        let initial = persistence.read_initial(&ids(&["A", "B", "C"]), Some(&fallback));
        assert_eq!(initial, Some(WidgetId::new("B")));
    }

    #[test]
    fn test_storage_wins_when_url_is_invalid() {
        let (persistence, _) = persistence_with("widget=nope", Some("A"));
        let fallback = WidgetId::new("C");

        let initial = persistence.read_initial(&ids(&["A", "B", "C"]), Some(&fallback));
        assert_eq!(initial, Some(WidgetId::new("A")));
    }

    #[test]
    fn test_fallback_then_first() {
        let (persistence, _) = persistence_with("", Some("gone"));

        let fallback = WidgetId::new("C");
        assert_eq!(
            persistence.read_initial(&ids(&["A", "B", "C"]), Some(&fallback)),
            Some(WidgetId::new("C"))
        );

        let bogus = WidgetId::new("Z");
        assert_eq!(
            persistence.read_initial(&ids(&["A", "B", "C"]), Some(&bogus)),
            Some(WidgetId::new("A"))
        );
    }

    #[test]
    fn test_no_candidates() {
        let (persistence, _) = persistence_with("widget=B", Some("A"));
        assert_eq!(persistence.read_initial(&[], None), None);
    }

    #[test]
    fn test_commit_push_vs_replace() {
        let (persistence, history) = persistence_with("", None);

        persistence.commit(&WidgetId::new("A"), CommitOrigin::Restore);
        assert_eq!(history.len(), 1);
        assert_eq!(history.query_string(), "?widget=A");

        persistence.commit(&WidgetId::new("B"), CommitOrigin::UserSelection);
        assert_eq!(history.len(), 2);
        assert_eq!(history.query_string(), "?widget=B");
        assert_eq!(
            persistence.storage().get(WIDGET_STORAGE_KEY).unwrap(),
            Some("B".to_string())
        );
    }

    #[test]
    fn test_default_widget_omits_parameter() {
        let (persistence, history) = persistence_with("widget=stale", None);

        persistence.commit(&WidgetId::default_widget(), CommitOrigin::Restore);

        assert_eq!(history.query_string(), "");
        assert_eq!(
            persistence.storage().get(WIDGET_STORAGE_KEY).unwrap(),
            Some("default".to_string())
        );
    }

    #[test]
    fn test_unavailable_storage_is_tolerated() {
        let history = Arc::new(MemoryHistory::with_query("widget=B"));
        let persistence = SelectionPersistence::new(Arc::new(DisabledStorage), history.clone());

        assert_eq!(
            persistence.read_initial(&ids(&["A", "B"]), None),
            Some(WidgetId::new("B"))
        );
        persistence.commit(&WidgetId::new("A"), CommitOrigin::UserSelection);
        persistence.commit_data_source(Some(&DataSourceKey::new("sunny")));

        assert_eq!(history.query_string(), "?widget=A");
    }

    #[test]
    fn test_external_navigation_fires_for_valid_candidates_only() {
        let (persistence, history) = persistence_with("", None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        persistence.on_external_navigation(ids(&["A", "B"]), move |id| sink.lock().push(id));

        persistence.commit(&WidgetId::new("A"), CommitOrigin::UserSelection);
        persistence.commit(&WidgetId::new("B"), CommitOrigin::UserSelection);
        history
            .set_query_param(WIDGET_QUERY_PARAM, Some("X"), HistoryMode::Push)
            .unwrap();

        // X was written behind our back, so B is still the last known value
        history.back(); // X -> B
        history.back(); // B -> A
        history.forward(); // A -> B
        history.forward(); // B -> X, not a candidate

        assert_eq!(seen.lock().as_slice(), &ids(&["A", "B"]));
    }

    #[test]
    fn test_navigation_to_same_value_is_ignored() {
        let (persistence, history) = persistence_with("", None);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        persistence.on_external_navigation(ids(&["A"]), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        persistence.commit(&WidgetId::new("A"), CommitOrigin::UserSelection);
        history
            .set_query_param("other", Some("1"), HistoryMode::Push)
            .unwrap();

        // widget parameter is "A" on both entries
        history.back();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_data_source_restore() {
        let (persistence, _) = persistence_with("", None);
        let keys = vec![DataSourceKey::new("sunny"), DataSourceKey::new("rainy")];

        assert_eq!(
            persistence.read_initial_data_source(&keys, None),
            Some(DataSourceKey::new("sunny"))
        );

        persistence.commit_data_source(Some(&DataSourceKey::new("rainy")));
        assert_eq!(
            persistence.read_initial_data_source(&keys, Some(&DataSourceKey::new("sunny"))),
            Some(DataSourceKey::new("rainy"))
        );

        persistence.commit_data_source(None);
        assert_eq!(
            persistence.storage().get(DATA_SOURCE_STORAGE_KEY).unwrap(),
            None
        );
        assert_eq!(persistence.read_initial_data_source(&[], None), None);
    }
}
