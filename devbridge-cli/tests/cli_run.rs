use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const CONFIG: &str = r#"
widgets:
  - id: forecast
    name: Forecast
    template: "{{phase}} {{toolOutput}}"
  - id: clock
    loader:
      data: { time: "12:00" }
data_sources:
  - key: sunny
    data: { temp: 30 }
  - key: rainy
    data: { temp: 12 }
runtime:
  loading_delay_ms: 0
storage:
  path: state/selection.json
"#;

fn write_config(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::write(dir.join("devbridge.yml"), CONFIG)?;
    Ok(())
}

/// Run the toolbar with `script` on stdin and parse every stdout line
fn run_script(dir: &Path, script: &str) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    #[allow(deprecated)]
    let assert = Command::cargo_bin("devbridge")?
        .current_dir(dir)
        .args(["run", "--no-auto-load"])
        .write_stdin(script)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let events = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<Vec<Value>, _>>()?;
    Ok(events)
}

fn events_named<'a>(events: &'a [Value], name: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["event"] == name).collect()
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;

    #[allow(deprecated)]
    Command::cargo_bin("devbridge")?
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    assert!(dir.path().join("devbridge.yml").exists());
    assert!(dir.path().join("fixtures/rainy.json").exists());

    #[allow(deprecated)]
    Command::cargo_bin("devbridge")?
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    Ok(())
}

#[test]
fn check_json_reports_registry_and_selection() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;

    #[allow(deprecated)]
    Command::cargo_bin("devbridge")?
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    #[allow(deprecated)]
    let assert = Command::cargo_bin("devbridge")?
        .current_dir(dir.path())
        .args(["check", "--json"])
        .assert()
        .success();

    let value: Value = serde_json::from_slice(&assert.get_output().stdout)?;
    let ids: Vec<_> = value["widgets"]
        .as_array()
        .expect("widgets array")
        .iter()
        .map(|w| w["id"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, ["forecast", "clock"]);
    assert_eq!(value["widgets"][1]["dedicatedLoader"], true);
    assert_eq!(value["dataSources"], serde_json::json!(["sunny", "rainy", "outage"]));
    assert_eq!(value["selection"]["activeWidgetId"], "forecast");
    assert_eq!(value["selection"]["activeDataSourceKey"], "sunny");
    Ok(())
}

#[test]
fn check_rejects_invalid_fixture() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("devbridge.yml"),
        "data_sources:\n  - key: broken\n    latency_ms: 5\n",
    )?;

    #[allow(deprecated)]
    Command::cargo_bin("devbridge")?
        .current_dir(dir.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid fixture for data source broken"));
    Ok(())
}

#[test]
fn run_streams_global_state_updates() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path())?;

    let events = run_script(dir.path(), "instant\nwait 50\nstate\nerror\nrender\n")?;

    let mounted = events_named(&events, "mounted");
    assert_eq!(mounted.len(), 1);
    assert_eq!(mounted[0]["globals"]["widgetStatePhase"], "loading");
    assert!(mounted[0]["globals"]["toolOutput"].is_null());

    let state = events_named(&events, "state");
    assert_eq!(state[0]["phase"], "data");
    assert_eq!(state[0]["globals"]["toolOutput"]["temp"], 30);

    let updates = events_named(&events, "globals");
    assert!(updates.iter().all(|e| e["timestamp"].is_string()));
    let last = updates.last().expect("at least one update");
    assert_eq!(last["update"]["widgetStatePhase"], "error");
    assert_eq!(last["update"]["toolOutput"]["error"], "Simulated error");

    let render = events_named(&events, "render");
    assert_eq!(render[0]["output"], r#"error {"error":"Simulated error"}"#);
    Ok(())
}

#[test]
fn run_waits_for_pending_loads_on_eof() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path())?;

    let events = run_script(dir.path(), "delayed 30\n")?;

    let updates = events_named(&events, "globals");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["update"]["widgetStatePhase"], "loading");
    assert_eq!(updates[1]["update"]["toolOutput"]["temp"], 30);
    Ok(())
}

#[test]
fn run_persists_selection_between_sessions() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path())?;

    let events = run_script(dir.path(), "widget clock\nwait 50\nsources\n")?;
    let sources = events_named(&events, "sources");
    assert_eq!(sources[0]["keys"], serde_json::json!([]));
    assert!(dir.path().join("state/selection.json").exists());

    let events = run_script(dir.path(), "state\n")?;
    let mounted = events_named(&events, "mounted");
    assert_eq!(mounted[0]["selection"]["activeWidgetId"], "clock");
    Ok(())
}

#[test]
fn run_reports_bad_commands_and_keeps_going() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_config(dir.path())?;

    let events = run_script(dir.path(), "dance\nwidget radar\nsource foggy\nwidgets\n")?;

    let errors: Vec<_> = events_named(&events, "error")
        .iter()
        .map(|e| e["message"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        errors,
        [
            "unknown command: dance",
            "Unknown widget: radar",
            "Unknown data source: foggy"
        ]
    );

    let widgets = events_named(&events, "widgets");
    assert_eq!(widgets[0]["active"], "forecast");
    Ok(())
}
