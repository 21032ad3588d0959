//! Validate a configuration and report what a mount would show.

use crate::config::Config;
use anyhow::{Context, Result};
use devbridge_runtime::{MemoryHistory, WidgetRegistry};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub fn check_config(config_path: &Path, json_output: bool) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    let registry = WidgetRegistry::normalize(
        config
            .registry_config()
            .context("Invalid configuration")?,
    );

    let options = config.options();
    let persistence = config.persistence(Arc::new(MemoryHistory::new()));
    let widget = persistence.read_initial(&registry.widget_ids(), options.default_widget_id.as_ref());
    let preferred = registry.default_data_source_key(options.default_data_source_key.as_ref());
    let data_source =
        persistence.read_initial_data_source(&registry.data_sources().keys(), preferred.as_ref());

    if json_output {
        let widgets: Vec<_> = registry
            .widgets()
            .iter()
            .map(|widget| {
                json!({
                    "id": widget.id,
                    "name": widget.display_name,
                    "dedicatedLoader": widget.has_dedicated_loader(),
                    "dataSources": registry.list_data_source_keys_for(&widget.id),
                })
            })
            .collect();
        let payload = json!({
            "widgets": widgets,
            "dataSources": registry.data_sources().keys(),
            "selection": {
                "activeWidgetId": widget,
                "activeDataSourceKey": data_source,
            },
            "storage": config.storage_path(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Configuration OK: {:?}", config_path);
    if registry.is_empty() {
        println!("No widgets configured");
    }
    for definition in registry.widgets() {
        let marker = if Some(&definition.id) == widget.as_ref() { "*" } else { " " };
        let source = if definition.has_dedicated_loader() {
            "own loader".to_string()
        } else {
            format!("{} data source(s)", registry.data_sources().len())
        };
        println!("{marker} {} ({}) - {source}", definition.id, definition.display_name);
    }
    for key in registry.data_sources().keys() {
        let marker = if Some(&key) == data_source.as_ref() { "*" } else { " " };
        println!("{marker} data source {key}");
    }
    match config.storage_path() {
        Some(path) => println!("Selection stored in {:?}", path),
        None => println!("Selection kept in memory"),
    }
    Ok(())
}
