//! Init command implementation.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("../../../devbridge.yml.example");

const RAINY_FIXTURE: &str = r#"{
  "city": "Bergen",
  "temp": 9,
  "days": ["mon", "tue", "wed"]
}
"#;

/// Write a starter devbridge.yml and its fixtures
pub fn init_project(path: Option<&Path>) -> Result<()> {
    let root = path.unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(root).with_context(|| format!("Failed to create {:?}", root))?;

    let config_path = root.join("devbridge.yml");
    if config_path.exists() {
        bail!("devbridge.yml already exists at {:?}", config_path);
    }

    fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {:?}", config_path))?;
    println!("Created {:?}", config_path);

    write_fixtures(root)?;

    println!("✓ devbridge initialized in {:?}", root);
    println!("  - Edit devbridge.yml to register widgets and data sources");
    println!("  - Run `devbridge run` and type `help` for toolbar commands");
    Ok(())
}

fn write_fixtures(root: &Path) -> Result<()> {
    let fixtures = root.join("fixtures");
    fs::create_dir_all(&fixtures).with_context(|| format!("Failed to create {:?}", fixtures))?;

    let rainy = fixtures.join("rainy.json");
    if !rainy.exists() {
        fs::write(&rainy, RAINY_FIXTURE).with_context(|| format!("Failed to write {:?}", rainy))?;
        println!("Created {:?}", rainy);
    }
    Ok(())
}
