//! Shared types for devbridge
//!
//! This crate provides the plain-data types exchanged between the simulated
//! host and a wrapped widget: selection identifiers, the presentation phase,
//! and the global-state object the widget reads from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Widget identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(pub String);

impl WidgetId {
    /// Id given to the synthetic widget created from a bare single child.
    pub const DEFAULT: &'static str = "default";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn default_widget() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WidgetId {
    fn from(id: &str) -> Self {
        WidgetId(id.to_string())
    }
}

impl From<String> for WidgetId {
    fn from(id: String) -> Self {
        WidgetId(id)
    }
}

/// Key into the shared data-source registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSourceKey(pub String);

impl DataSourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataSourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataSourceKey {
    fn from(key: &str) -> Self {
        DataSourceKey(key.to_string())
    }
}

impl From<String> for DataSourceKey {
    fn from(key: String) -> Self {
        DataSourceKey(key)
    }
}

/// The (widget, data source) pair that decides which loader is in effect.
///
/// `active_data_source_key` is `None` when no shared data sources exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub active_widget_id: WidgetId,
    pub active_data_source_key: Option<DataSourceKey>,
}

impl Selection {
    pub fn new(widget: impl Into<WidgetId>, data_source: Option<DataSourceKey>) -> Self {
        Self {
            active_widget_id: widget.into(),
            active_data_source_key: data_source,
        }
    }
}

/// Error returned when parsing one of the string-valued enums below
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseVariantError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseVariantError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Presentation mode of the widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetStatePhase {
    Loading,
    Data,
    Empty,
    Error,
}

impl WidgetStatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetStatePhase::Loading => "loading",
            WidgetStatePhase::Data => "data",
            WidgetStatePhase::Empty => "empty",
            WidgetStatePhase::Error => "error",
        }
    }
}

impl fmt::Display for WidgetStatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl FromStr for Theme {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(ParseVariantError::new("theme", other)),
        }
    }
}

/// How the host is presenting the widget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Inline,
    Fullscreen,
    Pip,
}

impl FromStr for DisplayMode {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DisplayMode::Inline),
            "fullscreen" => Ok(DisplayMode::Fullscreen),
            "pip" => Ok(DisplayMode::Pip),
            other => Err(ParseVariantError::new("display mode", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    #[default]
    Desktop,
    Unknown,
}

impl FromStr for DeviceClass {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(DeviceClass::Mobile),
            "tablet" => Ok(DeviceClass::Tablet),
            "desktop" => Ok(DeviceClass::Desktop),
            "unknown" => Ok(DeviceClass::Unknown),
            other => Err(ParseVariantError::new("device class", other)),
        }
    }
}

/// Capabilities of the simulated client device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentInfo {
    pub device_class: DeviceClass,
    pub has_hover_capability: bool,
    pub has_touch_capability: bool,
}

impl UserAgentInfo {
    /// Typical capabilities for a device class
    pub fn for_device(device_class: DeviceClass) -> Self {
        let (hover, touch) = match device_class {
            DeviceClass::Desktop => (true, false),
            DeviceClass::Mobile | DeviceClass::Tablet => (false, true),
            DeviceClass::Unknown => (false, false),
        };
        Self {
            device_class,
            has_hover_capability: hover,
            has_touch_capability: touch,
        }
    }
}

impl Default for UserAgentInfo {
    fn default() -> Self {
        Self::for_device(DeviceClass::Desktop)
    }
}

/// The host-injected state object a widget reads from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalState {
    pub tool_output: Value,
    pub theme: Theme,
    pub locale: String,
    pub max_height: u32,
    pub user_agent_info: UserAgentInfo,
    pub display_mode: DisplayMode,
    pub widget_state_phase: WidgetStatePhase,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            tool_output: Value::Null,
            theme: Theme::default(),
            locale: "en-US".to_string(),
            max_height: 600,
            user_agent_info: UserAgentInfo::default(),
            display_mode: DisplayMode::default(),
            widget_state_phase: WidgetStatePhase::Loading,
        }
    }
}

impl GlobalState {
    /// Shallow-merge a partial update; keys present in `update` win.
    pub fn apply(&mut self, update: &GlobalStateUpdate) {
        if let Some(tool_output) = &update.tool_output {
            self.tool_output = tool_output.clone();
        }
        if let Some(theme) = update.theme {
            self.theme = theme;
        }
        if let Some(locale) = &update.locale {
            self.locale = locale.clone();
        }
        if let Some(max_height) = update.max_height {
            self.max_height = max_height;
        }
        if let Some(user_agent_info) = update.user_agent_info {
            self.user_agent_info = user_agent_info;
        }
        if let Some(display_mode) = update.display_mode {
            self.display_mode = display_mode;
        }
        if let Some(phase) = update.widget_state_phase {
            self.widget_state_phase = phase;
        }
    }
}

/// A partial [`GlobalState`]
///
/// `None` means "key absent". For `tool_output`, `Some(Value::Null)` is an
/// explicit null, which is how a loading state clears stale output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent_info: Option<UserAgentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<DisplayMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_state_phase: Option<WidgetStatePhase>,
}

impl GlobalStateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool_output(mut self, value: Value) -> Self {
        self.tool_output = Some(value);
        self
    }

    pub fn with_phase(mut self, phase: WidgetStatePhase) -> Self {
        self.widget_state_phase = Some(phase);
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = Some(max_height);
        self
    }

    pub fn with_user_agent_info(mut self, info: UserAgentInfo) -> Self {
        self.user_agent_info = Some(info);
        self
    }

    pub fn with_display_mode(mut self, mode: DisplayMode) -> Self {
        self.display_mode = Some(mode);
        self
    }

    /// A phase change together with its payload
    pub fn phase_with_output(phase: WidgetStatePhase, output: Value) -> Self {
        Self::new().with_phase(phase).with_tool_output(output)
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_serializes_only_present_keys() {
        let update = GlobalStateUpdate::new()
            .with_tool_output(Value::Null)
            .with_phase(WidgetStatePhase::Loading);

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, json!({ "toolOutput": null, "widgetStatePhase": "loading" }));
    }

    #[test]
    fn test_apply_is_shallow() {
        let mut state = GlobalState::default();
        state.tool_output = json!({ "items": [1, 2], "title": "old" });

        state.apply(&GlobalStateUpdate::new().with_tool_output(json!({ "items": [3] })));

        assert_eq!(state.tool_output, json!({ "items": [3] }));
        assert_eq!(state.locale, "en-US");
    }

    #[test]
    fn test_global_state_wire_names() {
        let json = serde_json::to_value(GlobalState::default()).unwrap();
        assert_eq!(json["widgetStatePhase"], "loading");
        assert_eq!(json["userAgentInfo"]["deviceClass"], "desktop");
        assert_eq!(json["userAgentInfo"]["hasHoverCapability"], true);
        assert!(json["toolOutput"].is_null());
    }

    #[test]
    fn test_parse_theme() {
        assert_eq!("Dark".parse::<Theme>().unwrap(), Theme::Dark);
        assert!("sepia".parse::<Theme>().is_err());
    }

    #[test]
    fn test_default_widget_id() {
        assert!(WidgetId::default_widget().is_default());
        assert!(!WidgetId::new("chart").is_default());
    }
}
