//! Simulated host global state
//!
//! The [`GlobalStateBridge`] owns the state object a wrapped widget reads
//! from and is the only emitter of change notifications. Every mutation goes
//! through [`GlobalStateBridge::publish`], which merges the partial update and
//! notifies listeners before returning.
//!
//! Deliveries are serialized by a reentrant dispatch lock. Components that
//! keep their own state next to the bridge (the state machine, the
//! controller's selection) take the dispatch lock first through
//! [`GlobalStateBridge::serialized`] and their own lock second, so a listener
//! may read them during delivery from any thread.

use crate::error::{RuntimeError, RuntimeResult};
use devbridge_types::{GlobalState, GlobalStateUpdate};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a registered listener
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&GlobalStateUpdate) + Send + Sync>;

pub struct GlobalStateBridge {
    state: RwLock<Option<GlobalState>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    // Serializes deliveries; reentrant so a listener may publish.
    dispatch: ReentrantMutex<()>,
}

impl GlobalStateBridge {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            dispatch: ReentrantMutex::new(()),
        }
    }

    /// Create the global state if absent
    ///
    /// Returns `true` when this call created it. An existing state is left
    /// untouched, so repeated mounts in one session keep the first values.
    pub fn initialize(&self, initial: GlobalState) -> bool {
        let mut state = self.state.write();
        if state.is_some() {
            tracing::debug!("global state already initialized; keeping existing values");
            return false;
        }
        *state = Some(initial);
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Merge `update` into the global state and notify every listener
    ///
    /// Listeners observe the update before this returns. Publishing before
    /// [`initialize`](Self::initialize) is a wiring bug and fails fast.
    pub fn publish(&self, update: GlobalStateUpdate) -> RuntimeResult<()> {
        let _dispatch = self.dispatch.lock();

        {
            let mut state = self.state.write();
            let Some(state) = state.as_mut() else {
                tracing::error!("publish called before the global state was initialized");
                return Err(RuntimeError::NotInitialized);
            };
            state.apply(&update);
        }

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&update);
        }

        Ok(())
    }

    /// Run `f` while holding the dispatch lock
    ///
    /// No other thread can publish until `f` returns. `f` may publish itself.
    pub fn serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _dispatch = self.dispatch.lock();
        f()
    }

    /// Register a listener invoked on every publish
    ///
    /// Registering the same closure twice yields two independent listeners.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GlobalStateUpdate) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// A copy of the current global state
    pub fn snapshot(&self) -> Option<GlobalState> {
        self.state.read().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for GlobalStateBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbridge_types::{Theme, WidgetStatePhase};
    use serde_json::{json, Value};

    fn recorder(bridge: &GlobalStateBridge) -> Arc<Mutex<Vec<GlobalStateUpdate>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bridge.subscribe(move |update| sink.lock().push(update.clone()));
        seen
    }

    #[test]
    fn test_publish_before_initialize_fails() {
        let bridge = GlobalStateBridge::new();
        let result = bridge.publish(GlobalStateUpdate::new().with_theme(Theme::Dark));
        assert!(matches!(result, Err(RuntimeError::NotInitialized)));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let bridge = GlobalStateBridge::new();

        assert!(bridge.initialize(GlobalState {
            locale: "fr-FR".to_string(),
            ..GlobalState::default()
        }));
        assert!(!bridge.initialize(GlobalState {
            locale: "de-DE".to_string(),
            theme: Theme::Dark,
            ..GlobalState::default()
        }));

        let state = bridge.snapshot().unwrap();
        assert_eq!(state.locale, "fr-FR");
        assert_eq!(state.theme, Theme::Light);
    }

    #[test]
    fn test_publish_merges_and_notifies_synchronously() {
        let bridge = GlobalStateBridge::new();
        bridge.initialize(GlobalState::default());
        let seen = recorder(&bridge);

        let update = GlobalStateUpdate::phase_with_output(WidgetStatePhase::Data, json!({ "n": 1 }));
        bridge.publish(update.clone()).unwrap();

        // delivered before publish returned
        assert_eq!(seen.lock().as_slice(), &[update]);

        let state = bridge.snapshot().unwrap();
        assert_eq!(state.tool_output, json!({ "n": 1 }));
        assert_eq!(state.widget_state_phase, WidgetStatePhase::Data);
        assert_eq!(state.locale, "en-US");
    }

    #[test]
    fn test_serialized_holds_off_other_publishers() {
        let bridge = Arc::new(GlobalStateBridge::new());
        bridge.initialize(GlobalState::default());
        let seen = recorder(&bridge);

        let other = bridge.serialized(|| {
            let other = std::thread::spawn({
                let bridge = bridge.clone();
                move || bridge.publish(GlobalStateUpdate::new().with_locale("de-DE"))
            });
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(seen.lock().is_empty());

            // reentrant on the owning thread
            bridge
                .publish(GlobalStateUpdate::new().with_theme(Theme::Dark))
                .unwrap();
            assert_eq!(seen.lock().len(), 1);
            other
        });

        other.join().unwrap().unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], GlobalStateUpdate::new().with_locale("de-DE"));
    }

    #[test]
    fn test_later_keys_win() {
        let bridge = GlobalStateBridge::new();
        bridge.initialize(GlobalState::default());

        bridge
            .publish(GlobalStateUpdate::new().with_tool_output(json!({ "a": 1 })))
            .unwrap();
        bridge
            .publish(GlobalStateUpdate::new().with_tool_output(Value::Null))
            .unwrap();

        assert!(bridge.snapshot().unwrap().tool_output.is_null());
    }

    #[test]
    fn test_duplicate_subscriptions_are_independent() {
        let bridge = GlobalStateBridge::new();
        bridge.initialize(GlobalState::default());

        let count = Arc::new(AtomicU64::new(0));
        let first = {
            let count = count.clone();
            bridge.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let second = {
            let count = count.clone();
            bridge.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_ne!(first, second);

        bridge.publish(GlobalStateUpdate::new().with_locale("ja-JP")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(bridge.unsubscribe(first));
        assert!(!bridge.unsubscribe(first));

        bridge.publish(GlobalStateUpdate::new().with_locale("ko-KR")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(bridge.listener_count(), 1);
    }

    #[test]
    fn test_listener_can_read_and_publish() {
        let bridge = Arc::new(GlobalStateBridge::new());
        bridge.initialize(GlobalState::default());

        let inner = Arc::downgrade(&bridge);
        bridge.subscribe(move |update| {
            let Some(bridge) = inner.upgrade() else { return };
            let state = bridge.snapshot().unwrap();
            if update.theme == Some(Theme::Dark) && state.max_height != 900 {
                bridge
                    .publish(GlobalStateUpdate::new().with_max_height(900))
                    .unwrap();
            }
        });

        bridge.publish(GlobalStateUpdate::new().with_theme(Theme::Dark)).unwrap();

        let state = bridge.snapshot().unwrap();
        assert_eq!(state.theme, Theme::Dark);
        assert_eq!(state.max_height, 900);
    }
}
