//! Widget registry and loader resolution
//!
//! Configuration arrives either as a single render target with one loader
//! pair, or as a list of widget definitions plus a shared data-source
//! registry. [`WidgetRegistry::normalize`] folds both into one canonical
//! form, and [`WidgetRegistry::resolve_loaders`] picks the loaders that apply
//! to a (widget, data source) selection.

use crate::loader::Loader;
use devbridge_types::{DataSourceKey, GlobalState, WidgetId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Something that can render a widget from the global state it observes
pub trait WidgetView: Send + Sync {
    fn render(&self, globals: &GlobalState) -> String;
}

impl<F> WidgetView for F
where
    F: Fn(&GlobalState) -> String + Send + Sync,
{
    fn render(&self, globals: &GlobalState) -> String {
        self(globals)
    }
}

/// A registered widget
#[derive(Clone)]
pub struct WidgetDefinition {
    pub id: WidgetId,
    pub display_name: String,
    pub render: Arc<dyn WidgetView>,
    pub data_loader: Option<Loader>,
    pub empty_data_loader: Option<Loader>,
}

impl WidgetDefinition {
    pub fn new(
        id: impl Into<WidgetId>,
        display_name: impl Into<String>,
        render: impl WidgetView + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            render: Arc::new(render),
            data_loader: None,
            empty_data_loader: None,
        }
    }

    pub fn with_data_loader(mut self, loader: Loader) -> Self {
        self.data_loader = Some(loader);
        self
    }

    pub fn with_empty_data_loader(mut self, loader: Loader) -> Self {
        self.empty_data_loader = Some(loader);
        self
    }

    /// Whether this widget shadows the shared data-source registry
    pub fn has_dedicated_loader(&self) -> bool {
        self.data_loader.is_some()
    }
}

impl fmt::Debug for WidgetDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetDefinition")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("data_loader", &self.data_loader.is_some())
            .field("empty_data_loader", &self.empty_data_loader.is_some())
            .finish()
    }
}

/// Ordered maps from data-source key to loader
///
/// Insertion order is the order offered to the user; the first key is the
/// default when no valid default is configured.
#[derive(Debug, Clone, Default)]
pub struct DataSourceRegistry {
    loaders: Vec<(DataSourceKey, Loader)>,
    empty_loaders: Vec<(DataSourceKey, Loader)>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the data loader for `key`
    pub fn insert(&mut self, key: impl Into<DataSourceKey>, loader: Loader) {
        upsert(&mut self.loaders, key.into(), loader);
    }

    /// Add or replace the empty-state loader for `key`
    pub fn insert_empty(&mut self, key: impl Into<DataSourceKey>, loader: Loader) {
        upsert(&mut self.empty_loaders, key.into(), loader);
    }

    pub fn get(&self, key: &DataSourceKey) -> Option<&Loader> {
        lookup(&self.loaders, key)
    }

    pub fn get_empty(&self, key: &DataSourceKey) -> Option<&Loader> {
        lookup(&self.empty_loaders, key)
    }

    pub fn contains(&self, key: &DataSourceKey) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<DataSourceKey> {
        self.loaders.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

fn upsert(entries: &mut Vec<(DataSourceKey, Loader)>, key: DataSourceKey, loader: Loader) {
    match entries.iter_mut().find(|(existing, _)| *existing == key) {
        Some(entry) => entry.1 = loader,
        None => entries.push((key, loader)),
    }
}

fn lookup<'a>(entries: &'a [(DataSourceKey, Loader)], key: &DataSourceKey) -> Option<&'a Loader> {
    entries
        .iter()
        .find(|(existing, _)| existing == key)
        .map(|(_, loader)| loader)
}

/// Caller-supplied registry configuration
///
/// Either the single-child fields or `widgets` is expected. When `widgets`
/// is `Some`, the list form wins even if a single child is also given.
#[derive(Clone, Default)]
pub struct RegistryConfig {
    pub single_child: Option<Arc<dyn WidgetView>>,
    pub data_loader: Option<Loader>,
    pub empty_data_loader: Option<Loader>,
    pub widgets: Option<Vec<WidgetDefinition>>,
    pub data_sources: DataSourceRegistry,
}

impl RegistryConfig {
    /// Single render target with no loaders yet
    pub fn single(render: impl WidgetView + 'static) -> Self {
        Self {
            single_child: Some(Arc::new(render)),
            ..Self::default()
        }
    }

    /// List of widget definitions
    pub fn list(widgets: Vec<WidgetDefinition>) -> Self {
        Self {
            widgets: Some(widgets),
            ..Self::default()
        }
    }

    pub fn with_data_loader(mut self, loader: Loader) -> Self {
        self.data_loader = Some(loader);
        self
    }

    pub fn with_empty_data_loader(mut self, loader: Loader) -> Self {
        self.empty_data_loader = Some(loader);
        self
    }

    pub fn with_data_source(mut self, key: impl Into<DataSourceKey>, loader: Loader) -> Self {
        self.data_sources.insert(key, loader);
        self
    }

    pub fn with_empty_data_source(mut self, key: impl Into<DataSourceKey>, loader: Loader) -> Self {
        self.data_sources.insert_empty(key, loader);
        self
    }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("single_child", &self.single_child.is_some())
            .field("widgets", &self.widgets)
            .field("data_sources", &self.data_sources)
            .finish_non_exhaustive()
    }
}

/// The loaders that apply to one selection
#[derive(Debug, Clone, Default)]
pub struct LoaderPair {
    pub loader: Option<Loader>,
    pub empty_loader: Option<Loader>,
}

/// Canonical, immutable registry for one session
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    widgets: Vec<WidgetDefinition>,
    data_sources: DataSourceRegistry,
}

impl WidgetRegistry {
    /// Fold either configuration form into the canonical registry
    ///
    /// Never fails: an empty registry is valid and means nothing is
    /// configured.
    pub fn normalize(config: RegistryConfig) -> Self {
        let RegistryConfig {
            single_child,
            data_loader,
            empty_data_loader,
            widgets,
            data_sources,
        } = config;

        let widgets = match (widgets, single_child) {
            (Some(list), single) => {
                if single.is_some() {
                    tracing::debug!("both a single child and a widget list were given; using the list");
                }
                dedupe(list)
            }
            (None, Some(render)) => vec![WidgetDefinition {
                id: WidgetId::default_widget(),
                display_name: "Default".to_string(),
                render,
                data_loader,
                empty_data_loader,
            }],
            (None, None) => Vec::new(),
        };

        tracing::debug!(
            widgets = widgets.len(),
            data_sources = data_sources.len(),
            "normalized widget registry"
        );

        Self {
            widgets,
            data_sources,
        }
    }

    /// Resolve the data and empty-state loaders for a selection
    ///
    /// A widget's own loader shadows the shared registry; the two loaders
    /// are resolved independently. A missing loader is not an error.
    pub fn resolve_loaders(
        &self,
        widget_id: &WidgetId,
        data_source_key: Option<&DataSourceKey>,
    ) -> LoaderPair {
        let widget = self.widget(widget_id);

        let loader = widget
            .and_then(|w| w.data_loader.clone())
            .or_else(|| data_source_key.and_then(|key| self.data_sources.get(key).cloned()));

        let empty_loader = widget
            .and_then(|w| w.empty_data_loader.clone())
            .or_else(|| data_source_key.and_then(|key| self.data_sources.get_empty(key).cloned()));

        LoaderPair {
            loader,
            empty_loader,
        }
    }

    /// Data-source keys to offer for a widget
    ///
    /// Empty when the widget has its own loader, since the choice would
    /// have no effect.
    pub fn list_data_source_keys_for(&self, widget_id: &WidgetId) -> Vec<DataSourceKey> {
        match self.widget(widget_id) {
            Some(widget) if widget.has_dedicated_loader() => Vec::new(),
            _ => self.data_sources.keys(),
        }
    }

    pub fn widget(&self, id: &WidgetId) -> Option<&WidgetDefinition> {
        self.widgets.iter().find(|w| &w.id == id)
    }

    pub fn widgets(&self) -> &[WidgetDefinition] {
        &self.widgets
    }

    pub fn widget_ids(&self) -> Vec<WidgetId> {
        self.widgets.iter().map(|w| w.id.clone()).collect()
    }

    pub fn data_sources(&self) -> &DataSourceRegistry {
        &self.data_sources
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    /// `requested` if registered, else the first registered widget
    pub fn resolve_widget_id(&self, requested: Option<&WidgetId>) -> Option<WidgetId> {
        if let Some(id) = requested {
            if self.widget(id).is_some() {
                return Some(id.clone());
            }
        }
        self.widgets.first().map(|w| w.id.clone())
    }

    /// `preferred` if it is a shared key, else the first shared key
    pub fn default_data_source_key(&self, preferred: Option<&DataSourceKey>) -> Option<DataSourceKey> {
        if let Some(key) = preferred {
            if self.data_sources.contains(key) {
                return Some(key.clone());
            }
        }
        self.data_sources.keys().into_iter().next()
    }
}

fn dedupe(widgets: Vec<WidgetDefinition>) -> Vec<WidgetDefinition> {
    let mut seen = HashSet::new();
    widgets
        .into_iter()
        .filter(|widget| {
            let fresh = seen.insert(widget.id.clone());
            if !fresh {
                tracing::warn!(widget = %widget.id, "duplicate widget id ignored");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(name: &'static str) -> impl WidgetView + 'static {
        move |_: &GlobalState| name.to_string()
    }

    async fn resolve(loader: Option<Loader>) -> Option<serde_json::Value> {
        match loader {
            Some(loader) => Some(loader.invoke().await.unwrap()),
            None => None,
        }
    }

    #[test]
    fn test_single_child_normalizes_to_default_widget() {
        let registry = WidgetRegistry::normalize(
            RegistryConfig::single(view("only")).with_data_loader(Loader::value(json!(1))),
        );

        assert_eq!(registry.widget_ids(), vec![WidgetId::default_widget()]);
        let widget = registry.widget(&WidgetId::default_widget()).unwrap();
        assert!(widget.has_dedicated_loader());
        assert_eq!(widget.render.render(&GlobalState::default()), "only");
    }

    #[test]
    fn test_list_form_wins_over_single_child() {
        let mut config = RegistryConfig::list(vec![
            WidgetDefinition::new("a", "A", view("a")),
            WidgetDefinition::new("b", "B", view("b")),
        ]);
        config.single_child = Some(Arc::new(view("ignored")));

        let registry = WidgetRegistry::normalize(config);
        assert_eq!(registry.widget_ids(), vec![WidgetId::new("a"), WidgetId::new("b")]);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let registry = WidgetRegistry::normalize(RegistryConfig::default());
        assert!(registry.is_empty());
        assert_eq!(registry.resolve_widget_id(None), None);

        let pair = registry.resolve_loaders(&WidgetId::default_widget(), None);
        assert!(pair.loader.is_none());
        assert!(pair.empty_loader.is_none());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let registry = WidgetRegistry::normalize(RegistryConfig::list(vec![
            WidgetDefinition::new("a", "First", view("1")),
            WidgetDefinition::new("a", "Second", view("2")),
        ]));
        assert_eq!(registry.widgets().len(), 1);
        assert_eq!(registry.widgets()[0].display_name, "First");
    }

    #[tokio::test]
    async fn test_widget_loader_shadows_shared_registry() {
        let registry = WidgetRegistry::normalize(
            RegistryConfig::list(vec![
                WidgetDefinition::new("own", "Own", view("own"))
                    .with_data_loader(Loader::value(json!("widget"))),
                WidgetDefinition::new("shared", "Shared", view("shared")),
            ])
            .with_data_source("sunny", Loader::value(json!("registry")))
            .with_empty_data_source("sunny", Loader::value(json!("registry-empty"))),
        );
        let sunny = DataSourceKey::new("sunny");

        let own = registry.resolve_loaders(&WidgetId::new("own"), Some(&sunny));
        assert_eq!(resolve(own.loader).await, Some(json!("widget")));
        // empty loader resolves independently
        assert_eq!(resolve(own.empty_loader).await, Some(json!("registry-empty")));

        let shared = registry.resolve_loaders(&WidgetId::new("shared"), Some(&sunny));
        assert_eq!(resolve(shared.loader).await, Some(json!("registry")));

        assert!(registry.list_data_source_keys_for(&WidgetId::new("own")).is_empty());
        assert_eq!(
            registry.list_data_source_keys_for(&WidgetId::new("shared")),
            vec![sunny]
        );
    }

    #[test]
    fn test_missing_loader_is_none() {
        let registry = WidgetRegistry::normalize(
            RegistryConfig::list(vec![WidgetDefinition::new("a", "A", view("a"))])
                .with_data_source("sunny", Loader::value(json!(1))),
        );

        let pair = registry.resolve_loaders(&WidgetId::new("a"), Some(&DataSourceKey::new("rainy")));
        assert!(pair.loader.is_none());

        let pair = registry.resolve_loaders(&WidgetId::new("a"), None);
        assert!(pair.loader.is_none());
    }

    #[test]
    fn test_data_source_order_and_default() {
        let registry = WidgetRegistry::normalize(
            RegistryConfig::list(vec![WidgetDefinition::new("a", "A", view("a"))])
                .with_data_source("zeta", Loader::value(json!(1)))
                .with_data_source("alpha", Loader::value(json!(2)))
                .with_data_source("zeta", Loader::value(json!(3))),
        );

        assert_eq!(
            registry.data_sources().keys(),
            vec![DataSourceKey::new("zeta"), DataSourceKey::new("alpha")]
        );
        assert_eq!(
            registry.default_data_source_key(Some(&DataSourceKey::new("alpha"))),
            Some(DataSourceKey::new("alpha"))
        );
        assert_eq!(
            registry.default_data_source_key(Some(&DataSourceKey::new("missing"))),
            Some(DataSourceKey::new("zeta"))
        );
    }

    #[test]
    fn test_resolve_widget_id_falls_back_to_first() {
        let registry = WidgetRegistry::normalize(RegistryConfig::list(vec![
            WidgetDefinition::new("a", "A", view("a")),
            WidgetDefinition::new("b", "B", view("b")),
        ]));

        assert_eq!(
            registry.resolve_widget_id(Some(&WidgetId::new("b"))),
            Some(WidgetId::new("b"))
        );
        assert_eq!(
            registry.resolve_widget_id(Some(&WidgetId::new("zzz"))),
            Some(WidgetId::new("a"))
        );
    }
}
