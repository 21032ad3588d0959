//! Configuration parsing for `devbridge.yml`.

use devbridge_runtime::{
    DevBridgeOptions, JsonFileStorage, KeyValueStore, Loader, LoaderError, MemoryHistory,
    MemoryStorage, RegistryConfig, SelectionPersistence, WidgetDefinition,
};
use devbridge_types::{
    DataSourceKey, DeviceClass, DisplayMode, GlobalState, Theme, UserAgentInfo, WidgetId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid fixture for {owner}: {reason}")]
    InvalidFixture { owner: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct matching the devbridge.yml schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Single-widget form
    #[serde(default)]
    pub widget: Option<SingleWidgetConfig>,

    /// List form; wins over `widget` when both are present
    #[serde(default)]
    pub widgets: Option<Vec<WidgetConfig>>,

    /// Shared data sources, offered in this order
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SingleWidgetConfig {
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub loader: Option<FixtureConfig>,

    #[serde(default)]
    pub empty_loader: Option<FixtureConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Render template; see [`render_template`]
    #[serde(default)]
    pub template: Option<String>,

    /// Dedicated loader; shadows the shared data sources
    #[serde(default)]
    pub loader: Option<FixtureConfig>,

    #[serde(default)]
    pub empty_loader: Option<FixtureConfig>,
}

impl WidgetConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub key: String,

    #[serde(flatten)]
    pub fixture: FixtureConfig,

    /// Empty-state fixture for this key
    #[serde(default)]
    pub empty: Option<FixtureConfig>,
}

/// A canned data producer
///
/// Exactly one of `data`, `file`, `error` or `pending` must be given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Inline payload
    #[serde(default)]
    pub data: Option<Value>,

    /// JSON file read on every load, relative to the config file
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Fail every load with this message
    #[serde(default)]
    pub error: Option<String>,

    /// Never resolve
    #[serde(default)]
    pub pending: bool,

    /// Simulated latency before the fixture answers
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub widget: Option<String>,

    #[serde(default)]
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_true")]
    pub auto_load: bool,

    #[serde(default = "default_loading_delay_ms")]
    pub loading_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_loading_delay_ms() -> u64 {
    1000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_load: default_true(),
            loading_delay_ms: default_loading_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub theme: Theme,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_max_height")]
    pub max_height: u32,

    #[serde(default)]
    pub display_mode: DisplayMode,

    #[serde(default)]
    pub device: DeviceClass,
}

fn default_locale() -> String {
    String::from("en-US")
}

fn default_max_height() -> u32 {
    600
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            locale: default_locale(),
            max_height: default_max_height(),
            display_mode: DisplayMode::default(),
            device: DeviceClass::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the persisted selection; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Check fixtures and keys without building anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(widgets) = &self.widgets {
            for widget in widgets {
                if widget.id.trim().is_empty() {
                    return Err(ConfigError::Invalid("widget id must not be empty".into()));
                }
                let owner = format!("widget {}", widget.id);
                validate_optional(&owner, widget.loader.as_ref())?;
                validate_optional(&owner, widget.empty_loader.as_ref())?;
            }
        } else if let Some(single) = &self.widget {
            validate_optional("widget", single.loader.as_ref())?;
            validate_optional("widget", single.empty_loader.as_ref())?;
        }

        let mut keys = HashSet::new();
        for source in &self.data_sources {
            if !keys.insert(source.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate data source: {}",
                    source.key
                )));
            }
            let owner = format!("data source {}", source.key);
            source.fixture.validate(&owner)?;
            validate_optional(&owner, source.empty.as_ref())?;
        }

        if let Some(key) = &self.defaults.data_source {
            if !keys.contains(key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "default data source {key} is not configured"
                )));
            }
        }

        Ok(())
    }

    /// Build the registry configuration with fixture-backed loaders
    pub fn registry_config(&self) -> Result<RegistryConfig, ConfigError> {
        self.validate()?;

        let mut registry = match (&self.widgets, &self.widget) {
            (Some(widgets), _) => RegistryConfig::list(
                widgets
                    .iter()
                    .map(|widget| self.widget_definition(widget))
                    .collect(),
            ),
            (None, Some(single)) => {
                let template = single
                    .template
                    .clone()
                    .unwrap_or_else(|| default_template("Default"));
                let mut config = RegistryConfig::single(move |globals: &GlobalState| {
                    render_template(&template, globals)
                });
                config.data_loader = single.loader.as_ref().map(|f| self.loader(f));
                config.empty_data_loader = single.empty_loader.as_ref().map(|f| self.loader(f));
                config
            }
            (None, None) => RegistryConfig::default(),
        };

        for source in &self.data_sources {
            registry.data_sources.insert(source.key.as_str(), self.loader(&source.fixture));
            if let Some(empty) = &source.empty {
                registry
                    .data_sources
                    .insert_empty(source.key.as_str(), self.loader(empty));
            }
        }

        Ok(registry)
    }

    fn widget_definition(&self, widget: &WidgetConfig) -> WidgetDefinition {
        let template = widget
            .template
            .clone()
            .unwrap_or_else(|| default_template(widget.display_name()));
        let mut definition = WidgetDefinition::new(
            widget.id.as_str(),
            widget.display_name(),
            move |globals: &GlobalState| render_template(&template, globals),
        );
        definition.data_loader = widget.loader.as_ref().map(|f| self.loader(f));
        definition.empty_data_loader = widget.empty_loader.as_ref().map(|f| self.loader(f));
        definition
    }

    fn loader(&self, fixture: &FixtureConfig) -> Loader {
        let loader = if fixture.pending {
            Loader::pending()
        } else if let Some(message) = &fixture.error {
            Loader::failing(message.clone())
        } else if let Some(path) = &fixture.file {
            file_loader(self.resolve_path(path))
        } else {
            Loader::value(fixture.data.clone().unwrap_or(Value::Null))
        };
        loader.with_latency(Duration::from_millis(fixture.latency_ms))
    }

    /// Mount options, with the host section as the initial global state
    pub fn options(&self) -> DevBridgeOptions {
        DevBridgeOptions {
            default_widget_id: self.defaults.widget.as_deref().map(WidgetId::new),
            default_data_source_key: self.defaults.data_source.as_deref().map(DataSourceKey::new),
            auto_load_on_mount: self.runtime.auto_load,
            loading_delay: Duration::from_millis(self.runtime.loading_delay_ms),
            initial_state: GlobalState {
                theme: self.host.theme,
                locale: self.host.locale.clone(),
                max_height: self.host.max_height,
                user_agent_info: UserAgentInfo::for_device(self.host.device),
                display_mode: self.host.display_mode,
                ..GlobalState::default()
            },
        }
    }

    /// Key-value store for the persisted selection
    pub fn storage(&self) -> Arc<dyn KeyValueStore> {
        match self.storage_path() {
            Some(path) => Arc::new(JsonFileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        }
    }

    /// Persistence over the configured storage and a fresh history
    pub fn persistence(&self, history: Arc<MemoryHistory>) -> SelectionPersistence {
        SelectionPersistence::new(self.storage(), history)
    }

    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage.path.as_ref().map(|p| self.resolve_path(p))
    }

    /// Resolve a path relative to the config file location
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(config_path) = &self.config_path {
            if let Some(parent) = config_path.parent() {
                parent.join(path)
            } else {
                path.to_path_buf()
            }
        } else {
            path.to_path_buf()
        }
    }
}

impl FixtureConfig {
    fn validate(&self, owner: &str) -> Result<(), ConfigError> {
        let sources = [
            self.data.is_some(),
            self.file.is_some(),
            self.error.is_some(),
            self.pending,
        ]
        .into_iter()
        .filter(|given| *given)
        .count();

        match sources {
            1 => Ok(()),
            0 => Err(ConfigError::InvalidFixture {
                owner: owner.to_string(),
                reason: "one of data, file, error or pending is required".into(),
            }),
            _ => Err(ConfigError::InvalidFixture {
                owner: owner.to_string(),
                reason: "data, file, error and pending are mutually exclusive".into(),
            }),
        }
    }
}

fn validate_optional(owner: &str, fixture: Option<&FixtureConfig>) -> Result<(), ConfigError> {
    fixture.map_or(Ok(()), |fixture| fixture.validate(owner))
}

/// Loader that reads and parses a JSON file on every call
fn file_loader(path: PathBuf) -> Loader {
    Loader::new(move || {
        let path = path.clone();
        async move {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) => {
                    return Err(LoaderError::new(format!("Failed to read {:?}: {}", path, err)))
                }
            };
            serde_json::from_str::<Value>(&contents).map_err(LoaderError::from)
        }
    })
}

fn default_template(name: &str) -> String {
    format!("{name} [{{{{phase}}}}] {{{{toolOutput}}}}")
}

/// Substitute global-state placeholders into a widget template
///
/// Recognized: `{{toolOutput}}`, `{{phase}}`, `{{theme}}`, `{{locale}}`,
/// `{{maxHeight}}`.
pub fn render_template(template: &str, globals: &GlobalState) -> String {
    let theme = match globals.theme {
        Theme::Light => "light",
        Theme::Dark => "dark",
    };
    template
        .replace("{{toolOutput}}", &globals.tool_output.to_string())
        .replace("{{phase}}", globals.widget_state_phase.as_str())
        .replace("{{theme}}", theme)
        .replace("{{locale}}", &globals.locale)
        .replace("{{maxHeight}}", &globals.max_height.to_string())
}
