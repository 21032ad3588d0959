//! Composition root
//!
//! [`DevBridgeController`] wires selection persistence into the registry,
//! drives the state machine from toolbar actions and selection changes, and
//! renders the active widget from the bridge's global state.

use crate::bridge::{GlobalStateBridge, ListenerId};
use crate::error::{RuntimeError, RuntimeResult};
use crate::machine::{RuntimeStateMachine, RuntimeStatus, TransitionOutcome};
use crate::persistence::{CommitOrigin, NavigationListenerId, SelectionPersistence};
use crate::registry::{RegistryConfig, WidgetDefinition, WidgetRegistry};
use devbridge_types::{
    DataSourceKey, DeviceClass, DisplayMode, GlobalState, GlobalStateUpdate, Selection, Theme,
    UserAgentInfo, WidgetId,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Default wait before a delayed load calls its loader
pub const DEFAULT_LOADING_DELAY: Duration = Duration::from_millis(1000);

/// Handle to a spawned auto-reload
pub type ReloadHandle = JoinHandle<RuntimeResult<TransitionOutcome>>;

/// Mount-time options
#[derive(Debug, Clone)]
pub struct DevBridgeOptions {
    /// Widget to show when neither the location nor storage names one
    pub default_widget_id: Option<WidgetId>,
    pub default_data_source_key: Option<DataSourceKey>,
    /// Start a delayed load right after mount
    pub auto_load_on_mount: bool,
    pub loading_delay: Duration,
    /// Values used if this mount creates the global state
    pub initial_state: GlobalState,
}

impl Default for DevBridgeOptions {
    fn default() -> Self {
        Self {
            default_widget_id: None,
            default_data_source_key: None,
            auto_load_on_mount: true,
            loading_delay: DEFAULT_LOADING_DELAY,
            initial_state: GlobalState::default(),
        }
    }
}

/// What the controller displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    /// Rendered output of the active widget
    Widget(String),
    /// The registry is empty
    NothingConfigured,
}

pub struct DevBridgeController {
    bridge: Arc<GlobalStateBridge>,
    registry: Arc<WidgetRegistry>,
    machine: Arc<RuntimeStateMachine>,
    persistence: SelectionPersistence,
    selection: RwLock<Selection>,
    options: DevBridgeOptions,
    runtime: Handle,
    navigation_listener: Mutex<Option<NavigationListenerId>>,
}

impl DevBridgeController {
    /// Mount against a fresh global state
    pub async fn mount(
        config: RegistryConfig,
        options: DevBridgeOptions,
        persistence: SelectionPersistence,
    ) -> RuntimeResult<Arc<Self>> {
        Self::mount_with_bridge(Arc::new(GlobalStateBridge::new()), config, options, persistence)
            .await
    }

    /// Mount against an existing bridge
    ///
    /// A bridge that is already initialized keeps its values; only the phase
    /// and output are reset.
    pub async fn mount_with_bridge(
        bridge: Arc<GlobalStateBridge>,
        config: RegistryConfig,
        options: DevBridgeOptions,
        persistence: SelectionPersistence,
    ) -> RuntimeResult<Arc<Self>> {
        let runtime =
            Handle::try_current().map_err(|err| RuntimeError::NoAsyncRuntime(err.to_string()))?;

        // Must precede every publish below
        bridge.initialize(options.initial_state.clone());

        let registry = Arc::new(WidgetRegistry::normalize(config));
        let widget_ids = registry.widget_ids();
        let selection = initial_selection(&registry, &options, &persistence, &widget_ids);

        tracing::info!(
            widget = %selection.active_widget_id,
            data_source = ?selection.active_data_source_key,
            widgets = widget_ids.len(),
            "mounting dev bridge"
        );

        let machine = Arc::new(RuntimeStateMachine::new(
            Arc::clone(&bridge),
            Arc::clone(&registry),
        ));

        let controller = Arc::new(Self {
            bridge,
            registry,
            machine,
            persistence,
            selection: RwLock::new(selection),
            options,
            runtime,
            navigation_listener: Mutex::new(None),
        });

        controller.machine.show_loading()?;

        let weak = Arc::downgrade(&controller);
        let listener = controller
            .persistence
            .on_external_navigation(widget_ids, move |widget_id| {
                if let Some(controller) = weak.upgrade() {
                    controller.follow_navigation(widget_id);
                }
            });
        *controller.navigation_listener.lock() = Some(listener);

        if controller.options.auto_load_on_mount {
            // Detached; the machine guards against stale commits
            drop(controller.reload());
        }

        Ok(controller)
    }

    /// Detach from navigation and drop any pending load
    ///
    /// Nothing commits after this returns.
    pub fn unmount(&self) {
        if let Some(listener) = self.navigation_listener.lock().take() {
            self.persistence.remove_navigation_listener(listener);
        }
        self.machine.supersede();
        tracing::info!("unmounted dev bridge");
    }

    // Toolbar actions

    pub fn show_loading(&self) -> RuntimeResult<()> {
        self.machine.show_loading()
    }

    pub async fn load_instant(&self) -> RuntimeResult<TransitionOutcome> {
        let request = self
            .bridge
            .serialized(|| self.machine.begin_instant(&self.selection()))?;
        self.machine.finish_instant(&request).await
    }

    /// Delayed load using the configured delay
    pub async fn load_delayed(&self) -> RuntimeResult<TransitionOutcome> {
        self.load_delayed_by(self.options.loading_delay).await
    }

    pub async fn load_delayed_by(&self, delay: Duration) -> RuntimeResult<TransitionOutcome> {
        let request = self
            .bridge
            .serialized(|| self.machine.begin_delayed(&self.selection()))?;
        self.machine.finish_delayed(&request, delay).await
    }

    pub async fn show_empty(&self) -> RuntimeResult<TransitionOutcome> {
        let request = self
            .bridge
            .serialized(|| self.machine.begin_instant(&self.selection()))?;
        self.machine.finish_empty(&request).await
    }

    pub fn show_error(&self) -> RuntimeResult<()> {
        self.machine.show_error()
    }

    // Selection
    //
    // Selection changes run under the bridge's dispatch lock, so the
    // selection a reload reads is the one that takes the newest sequence.

    /// Switch the active widget and reload
    ///
    /// The data-source key is kept when the shared registry still offers it,
    /// otherwise the default key is used.
    pub fn set_active_widget(&self, widget_id: impl Into<WidgetId>) -> RuntimeResult<ReloadHandle> {
        let widget_id = widget_id.into();
        if self.registry.is_empty() {
            return Err(RuntimeError::NoWidgets);
        }
        if self.registry.widget(&widget_id).is_none() {
            return Err(RuntimeError::UnknownWidget(widget_id));
        }

        tracing::info!(widget = %widget_id, "switching widget");
        Ok(self.bridge.serialized(|| {
            self.select_widget(widget_id.clone());
            self.persistence.commit(&widget_id, CommitOrigin::UserSelection);
            self.reload()
        }))
    }

    /// Switch the active data source and reload
    ///
    /// The key must be offered for the active widget; a widget with its own
    /// loader offers none.
    pub fn set_active_data_source(
        &self,
        key: impl Into<DataSourceKey>,
    ) -> RuntimeResult<ReloadHandle> {
        let key = key.into();
        if !self.registry.data_sources().contains(&key) {
            return Err(RuntimeError::UnknownDataSource(key));
        }

        self.bridge.serialized(|| {
            let widget_id = self.selection.read().active_widget_id.clone();
            if !self.registry.list_data_source_keys_for(&widget_id).contains(&key) {
                return Err(RuntimeError::DataSourceNotOffered {
                    widget: widget_id,
                    key,
                });
            }

            tracing::info!(data_source = %key, "switching data source");
            self.selection.write().active_data_source_key = Some(key.clone());
            self.persistence.commit_data_source(Some(&key));
            Ok(self.reload())
        })
    }

    /// Reload the current selection
    ///
    /// The request is issued before this returns; the wait and the load run
    /// in a spawned task.
    pub fn reload(&self) -> ReloadHandle {
        let machine = Arc::clone(&self.machine);
        let delay = self.options.loading_delay;
        let started = self
            .bridge
            .serialized(|| self.machine.begin_reload(&self.selection()));
        self.runtime.spawn(async move {
            match started {
                Ok(Some(request)) => machine.finish_delayed(&request, delay).await,
                Ok(None) => Ok(TransitionOutcome::Reused),
                Err(err) => Err(err),
            }
        })
    }

    fn follow_navigation(&self, widget_id: WidgetId) {
        tracing::info!(widget = %widget_id, "following history navigation");
        self.bridge.serialized(|| {
            self.select_widget(widget_id.clone());
            // The location already holds the new value
            self.persistence.remember_widget(&widget_id);
            drop(self.reload());
        });
    }

    fn select_widget(&self, widget_id: WidgetId) {
        let mut selection = self.selection.write();
        let key = selection
            .active_data_source_key
            .take()
            .filter(|key| self.registry.data_sources().contains(key))
            .or_else(|| {
                self.registry
                    .default_data_source_key(self.options.default_data_source_key.as_ref())
            });
        *selection = Selection::new(widget_id, key);
    }

    // Host knobs

    pub fn set_theme(&self, theme: Theme) -> RuntimeResult<()> {
        self.bridge.publish(GlobalStateUpdate::new().with_theme(theme))
    }

    pub fn set_locale(&self, locale: impl Into<String>) -> RuntimeResult<()> {
        self.bridge
            .publish(GlobalStateUpdate::new().with_locale(locale))
    }

    pub fn set_max_height(&self, max_height: u32) -> RuntimeResult<()> {
        self.bridge
            .publish(GlobalStateUpdate::new().with_max_height(max_height))
    }

    pub fn set_display_mode(&self, mode: DisplayMode) -> RuntimeResult<()> {
        self.bridge
            .publish(GlobalStateUpdate::new().with_display_mode(mode))
    }

    pub fn set_user_agent(&self, device_class: DeviceClass) -> RuntimeResult<()> {
        self.bridge.publish(
            GlobalStateUpdate::new().with_user_agent_info(UserAgentInfo::for_device(device_class)),
        )
    }

    // Read surface

    pub fn selection(&self) -> Selection {
        self.selection.read().clone()
    }

    pub fn status(&self) -> RuntimeStatus {
        self.machine.status()
    }

    pub fn global_state(&self) -> GlobalState {
        self.bridge.snapshot().unwrap_or_default()
    }

    pub fn widgets(&self) -> &[WidgetDefinition] {
        self.registry.widgets()
    }

    /// Data-source keys offered for the active widget
    pub fn data_source_keys(&self) -> Vec<DataSourceKey> {
        self.registry
            .list_data_source_keys_for(&self.selection.read().active_widget_id)
    }

    pub fn render(&self) -> RenderOutput {
        let selection = self.selection();
        match self.registry.widget(&selection.active_widget_id) {
            Some(widget) => RenderOutput::Widget(widget.render.render(&self.global_state())),
            None => RenderOutput::NothingConfigured,
        }
    }

    /// Listen to every global-state update
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GlobalStateUpdate) + Send + Sync + 'static,
    {
        self.bridge.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.bridge.unsubscribe(id)
    }

    pub fn bridge(&self) -> &Arc<GlobalStateBridge> {
        &self.bridge
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn persistence(&self) -> &SelectionPersistence {
        &self.persistence
    }

    pub fn options(&self) -> &DevBridgeOptions {
        &self.options
    }
}

/// Resolve and persist the selection a mount starts from
fn initial_selection(
    registry: &WidgetRegistry,
    options: &DevBridgeOptions,
    persistence: &SelectionPersistence,
    widget_ids: &[WidgetId],
) -> Selection {
    let Some(widget_id) = persistence.read_initial(widget_ids, options.default_widget_id.as_ref())
    else {
        tracing::warn!("no widgets configured");
        return Selection::new(WidgetId::default_widget(), None);
    };

    persistence.commit(&widget_id, CommitOrigin::Restore);

    let offered = registry.data_sources().keys();
    let preferred = registry.default_data_source_key(options.default_data_source_key.as_ref());
    let key = persistence.read_initial_data_source(&offered, preferred.as_ref());

    Selection::new(widget_id, key)
}

impl std::fmt::Debug for DevBridgeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevBridgeController")
            .field("selection", &*self.selection.read())
            .field("status", &self.machine.status())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
