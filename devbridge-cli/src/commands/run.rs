//! Drive a mounted dev bridge from a line-oriented toolbar on stdin.
//!
//! Every global-state update is streamed to stdout as one JSON line; logs go
//! to stderr.

use crate::config::Config;
use anyhow::{Context, Result};
use chrono::Utc;
use devbridge_runtime::{
    DevBridgeController, MemoryHistory, ReloadHandle, RenderOutput, RuntimeResult,
};
use devbridge_types::{GlobalStateUpdate, Theme};
use serde_json::{json, Value};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Options for the run command
pub struct RunOptions {
    /// Open as if the location carried `?widget=<id>`
    pub widget: Option<String>,
    pub delay_ms: Option<u64>,
    pub no_auto_load: bool,
}

/// One toolbar action read from stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolbarCommand {
    Loading,
    Instant,
    Delayed(Option<u64>),
    Empty,
    Error,
    Widget(String),
    Source(String),
    Back,
    Forward,
    Theme(Theme),
    Locale(String),
    Height(u32),
    State,
    Render,
    Widgets,
    Sources,
    Wait(u64),
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{0} requires an argument")]
    MissingArgument(&'static str),

    #[error("invalid argument for {command}: {value}")]
    InvalidArgument { command: &'static str, value: String },
}

impl FromStr for ToolbarCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        let command = match name {
            "loading" => ToolbarCommand::Loading,
            "instant" => ToolbarCommand::Instant,
            "delayed" => ToolbarCommand::Delayed(arg.map(|v| number("delayed", v)).transpose()?),
            "empty" => ToolbarCommand::Empty,
            "error" => ToolbarCommand::Error,
            "widget" => ToolbarCommand::Widget(required("widget", arg)?.to_string()),
            "source" => ToolbarCommand::Source(required("source", arg)?.to_string()),
            "back" => ToolbarCommand::Back,
            "forward" => ToolbarCommand::Forward,
            "theme" => {
                let value = required("theme", arg)?;
                ToolbarCommand::Theme(value.parse().map_err(|_| {
                    CommandParseError::InvalidArgument {
                        command: "theme",
                        value: value.to_string(),
                    }
                })?)
            }
            "locale" => ToolbarCommand::Locale(required("locale", arg)?.to_string()),
            "height" => ToolbarCommand::Height(number("height", required("height", arg)?)?),
            "state" => ToolbarCommand::State,
            "render" => ToolbarCommand::Render,
            "widgets" => ToolbarCommand::Widgets,
            "sources" => ToolbarCommand::Sources,
            "wait" => ToolbarCommand::Wait(number("wait", required("wait", arg)?)?),
            "help" => ToolbarCommand::Help,
            "quit" | "exit" => ToolbarCommand::Quit,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn required<'a>(command: &'static str, arg: Option<&'a str>) -> Result<&'a str, CommandParseError> {
    arg.ok_or(CommandParseError::MissingArgument(command))
}

fn number<T: FromStr>(command: &'static str, value: &str) -> Result<T, CommandParseError> {
    value.parse().map_err(|_| CommandParseError::InvalidArgument {
        command,
        value: value.to_string(),
    })
}

const HELP: &[&str] = &[
    "loading            show loading, no loader",
    "instant            run the loader now",
    "delayed [ms]       clear output, wait, then run the loader",
    "empty              show the empty state",
    "error              show a simulated error",
    "widget <id>        switch widget",
    "source <key>       switch data source",
    "back | forward     navigate history",
    "theme <light|dark> set host theme",
    "locale <tag>       set host locale",
    "height <px>        set host max height",
    "state | render     print global state or rendered widget",
    "widgets | sources  list choices",
    "wait <ms>          pause input",
    "quit               exit without waiting",
];

pub async fn run_toolbar(config_path: &Path, run: RunOptions) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    let registry = config.registry_config().context("Invalid configuration")?;

    let mut options = config.options();
    if let Some(delay_ms) = run.delay_ms {
        options.loading_delay = Duration::from_millis(delay_ms);
    }
    // Loaded below so the handle can be awaited on EOF
    let auto_load = options.auto_load_on_mount && !run.no_auto_load;
    options.auto_load_on_mount = false;

    let history = Arc::new(match &run.widget {
        Some(widget) => MemoryHistory::with_query(&format!("widget={widget}")),
        None => MemoryHistory::new(),
    });

    let controller = DevBridgeController::mount(registry, options, config.persistence(history.clone()))
        .await
        .context("Failed to mount dev bridge")?;

    // Mount already published; report where it left us
    emit(json!({
        "event": "mounted",
        "selection": controller.selection(),
        "globals": controller.global_state(),
    }));
    controller.subscribe(|update: &GlobalStateUpdate| {
        emit(json!({ "event": "globals", "update": update }));
    });

    let mut pending: Vec<ReloadHandle> = Vec::new();
    if auto_load {
        pending.push(controller.reload());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let command = match line.parse::<ToolbarCommand>() {
            Ok(command) => command,
            Err(err) => {
                emit_error(&err);
                continue;
            }
        };

        if command == ToolbarCommand::Quit {
            tracing::info!("quit requested");
            controller.unmount();
            return Ok(());
        }

        pending.retain(|handle| !handle.is_finished());
        if let Some(handle) = execute(&controller, &history, command).await {
            pending.push(handle);
        }
    }

    tracing::debug!(pending = pending.len(), "stdin closed; waiting for loads");
    for handle in pending {
        match handle.await {
            Ok(Ok(outcome)) => tracing::debug!(?outcome, "load finished"),
            Ok(Err(err)) => emit_error(&err),
            Err(err) => tracing::warn!("load task failed: {}", err),
        }
    }
    controller.unmount();
    Ok(())
}

/// Run one command
///
/// Loader-backed actions run in the background, like toolbar buttons; their
/// handles are returned so EOF can wait for them.
async fn execute(
    controller: &Arc<DevBridgeController>,
    history: &MemoryHistory,
    command: ToolbarCommand,
) -> Option<ReloadHandle> {
    match command {
        ToolbarCommand::Loading => report(controller.show_loading()),
        ToolbarCommand::Instant => {
            let controller = Arc::clone(controller);
            return Some(tokio::spawn(async move { controller.load_instant().await }));
        }
        ToolbarCommand::Delayed(delay_ms) => {
            let controller = Arc::clone(controller);
            return Some(tokio::spawn(async move {
                match delay_ms {
                    Some(ms) => controller.load_delayed_by(Duration::from_millis(ms)).await,
                    None => controller.load_delayed().await,
                }
            }));
        }
        ToolbarCommand::Empty => {
            let controller = Arc::clone(controller);
            return Some(tokio::spawn(async move { controller.show_empty().await }));
        }
        ToolbarCommand::Error => report(controller.show_error()),
        ToolbarCommand::Widget(id) => match controller.set_active_widget(id) {
            Ok(handle) => return Some(handle),
            Err(err) => emit_error(&err),
        },
        ToolbarCommand::Source(key) => match controller.set_active_data_source(key) {
            Ok(handle) => return Some(handle),
            Err(err) => emit_error(&err),
        },
        ToolbarCommand::Back => {
            if !history.back() {
                emit_error(&"already at the start of history");
            }
        }
        ToolbarCommand::Forward => {
            if !history.forward() {
                emit_error(&"already at the end of history");
            }
        }
        ToolbarCommand::Theme(theme) => report(controller.set_theme(theme)),
        ToolbarCommand::Locale(locale) => report(controller.set_locale(locale)),
        ToolbarCommand::Height(height) => report(controller.set_max_height(height)),
        ToolbarCommand::State => {
            let status = controller.status();
            emit(json!({
                "event": "state",
                "globals": controller.global_state(),
                "selection": controller.selection(),
                "phase": status.phase,
                "isTransitioning": status.is_transitioning,
            }));
        }
        ToolbarCommand::Render => {
            let output = match controller.render() {
                RenderOutput::Widget(html) => Value::String(html),
                RenderOutput::NothingConfigured => Value::Null,
            };
            emit(json!({ "event": "render", "output": output }));
        }
        ToolbarCommand::Widgets => {
            let widgets: Vec<_> = controller
                .widgets()
                .iter()
                .map(|w| json!({ "id": w.id, "name": w.display_name }))
                .collect();
            emit(json!({
                "event": "widgets",
                "widgets": widgets,
                "active": controller.selection().active_widget_id,
            }));
        }
        ToolbarCommand::Sources => {
            emit(json!({
                "event": "sources",
                "keys": controller.data_source_keys(),
                "active": controller.selection().active_data_source_key,
            }));
        }
        ToolbarCommand::Wait(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        ToolbarCommand::Help => emit(json!({ "event": "help", "commands": HELP })),
        ToolbarCommand::Quit => {}
    }
    None
}

fn report(result: RuntimeResult<()>) {
    if let Err(err) = result {
        emit_error(&err);
    }
}

fn emit_error(err: &dyn std::fmt::Display) {
    tracing::warn!("{}", err);
    emit(json!({ "event": "error", "message": err.to_string() }));
}

/// Print one event line with a timestamp
fn emit(mut event: Value) {
    if let Some(fields) = event.as_object_mut() {
        fields.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    }
    println!("{}", event);
}
