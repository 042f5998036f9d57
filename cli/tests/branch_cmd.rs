use std::path::Path;

use anyhow::Result;
use predicates::str::contains;
use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;
use serde_json::json;
use tempfile::TempDir;

const MAIN_ID: &str = "0b7f6a2e-5d0c-4c8e-9a51-3f1d2c4b5a60";
const ANNEX_ID: &str = "5e2d9c1b-8f3a-4b7e-a6d4-0c9b8a7f6e51";
const MAIN_COPY_ID: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";

fn pgdesk(store: &Path) -> Result<assert_cmd::Command> {
    let mut cmd = assert_cmd::Command::cargo_bin("pgdesk")?;
    cmd.env_remove("RUST_LOG");
    cmd.env("PGDESK_STORE", store);
    Ok(cmd)
}

fn run_json(store: &Path, args: &[&str]) -> Result<JsonValue> {
    let output = pgdesk(store)?.arg("--json").args(args).output()?;
    assert!(
        output.status.success(),
        "pgdesk {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(serde_json::from_slice(&output.stdout)?)
}

fn record(id: &str, name: &str, is_default: bool, created_at: &str) -> JsonValue {
    json!({
        "_id": id,
        "groupId": "pg-7",
        "name": name,
        "isDefault": is_default,
        "isActive": true,
        "createdAt": created_at,
        "updatedAt": created_at,
    })
}

fn write_snapshot(path: &Path, records: Vec<JsonValue>, indexes: Vec<JsonValue>) -> Result<()> {
    let snapshot = json!({
        "version": 1,
        "records": records,
        "indexes": indexes,
    });
    std::fs::write(path, serde_json::to_vec_pretty(&snapshot)?)?;
    Ok(())
}

fn unsafe_default_index() -> JsonValue {
    json!({
        "name": "groupId_1_isDefault_1",
        "keys": [
            { "field": "groupId", "order": "asc" },
            { "field": "isDefault", "order": "asc" },
        ],
        "unique": true,
    })
}

#[test]
fn create_and_transfer_default() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("branches.json");

    let main = run_json(&store, &["create", "--group", "pg-1", "--name", "Main"])?;
    let annex = run_json(
        &store,
        &["create", "--group", "pg-1", "--name", "Annex", "--attr", "city=Pune"],
    )?;
    assert_eq!(main["isDefault"], json!(true));
    assert_eq!(annex["isDefault"], json!(false));
    assert_eq!(annex["attributes"]["city"], json!("Pune"));

    let annex_id = annex["_id"].as_str().unwrap_or_default().to_string();
    let promoted = run_json(&store, &["set-default", &annex_id])?;
    assert_eq!(promoted["isDefault"], json!(true));

    let listed = run_json(&store, &["list", "--group", "pg-1"])?;
    let defaults: Vec<&str> = listed
        .as_array()
        .into_iter()
        .flatten()
        .filter(|record| record["isDefault"] == json!(true))
        .filter_map(|record| record["name"].as_str())
        .collect();
    assert_eq!(defaults, vec!["Annex"]);

    Ok(())
}

#[test]
fn deactivating_the_default_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("branches.json");

    let main = run_json(&store, &["create", "--group", "pg-2", "--name", "Main"])?;
    let main_id = main["_id"].as_str().unwrap_or_default().to_string();

    pgdesk(&store)?
        .args(["deactivate", &main_id])
        .assert()
        .failure()
        .stderr(contains("is the group default"));

    Ok(())
}

#[test]
fn duplicate_name_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("branches.json");

    run_json(&store, &["create", "--group", "pg-3", "--name", "Main"])?;
    pgdesk(&store)?
        .args(["create", "--group", "pg-3", "--name", " main "])
        .assert()
        .failure()
        .stderr(contains("already has an active branch"));

    Ok(())
}

#[test]
fn set_default_repairs_legacy_index() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("branches.json");
    write_snapshot(
        &store,
        vec![
            record(MAIN_ID, "Main", true, "2024-01-01T09:00:00Z"),
            record(ANNEX_ID, "Annex", false, "2024-01-02T09:00:00Z"),
        ],
        vec![unsafe_default_index()],
    )?;

    let before = run_json(&store, &["inspect"])?;
    assert!(
        before
            .as_array()
            .into_iter()
            .flatten()
            .any(|index| index["class"] == json!("unsafe"))
    );

    let promoted = run_json(&store, &["set-default", ANNEX_ID])?;
    assert_eq!(promoted["_id"], json!(ANNEX_ID));
    assert_eq!(promoted["isDefault"], json!(true));

    let after = run_json(&store, &["inspect"])?;
    let classes: Vec<(&str, &str)> = after
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|index| Some((index["index"]["name"].as_str()?, index["class"].as_str()?)))
        .collect();
    assert_eq!(
        classes,
        vec![
            ("_id_", "other"),
            ("groupId_1_isActive_1", "safe"),
            ("groupId_1_isDefault_1_isActive_1", "safe"),
        ]
    );

    Ok(())
}

#[test]
fn repair_indexes_is_repeatable() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("branches.json");
    write_snapshot(&store, Vec::new(), vec![unsafe_default_index()])?;

    let first = run_json(&store, &["repair-indexes"])?;
    assert_eq!(first["dropped"], json!(["groupId_1_isDefault_1"]));

    let second = run_json(&store, &["repair-indexes"])?;
    assert_eq!(second["dropped"], json!([]));
    assert_eq!(second["created"], json!([]));

    pgdesk(&store)?
        .arg("repair-indexes")
        .assert()
        .success()
        .stdout(contains("Indexes already in place"));

    Ok(())
}

#[test]
fn reconcile_collapses_duplicate_main() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("branches.json");
    write_snapshot(
        &store,
        vec![
            record(MAIN_ID, "Main", true, "2024-01-01T09:00:00Z"),
            record(MAIN_COPY_ID, "Main", true, "2024-01-03T09:00:00Z"),
            record(ANNEX_ID, "Annex", false, "2024-01-02T09:00:00Z"),
        ],
        Vec::new(),
    )?;

    let summaries = run_json(&store, &["reconcile", "--group", "pg-7"])?;
    assert_eq!(summaries[0]["group_id"], json!("pg-7"));
    assert_eq!(summaries[0]["names_collapsed"], json!(1));

    let listed = run_json(&store, &["list", "--group", "pg-7"])?;
    let active: Vec<(&str, bool)> = listed
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|record| Some((record["_id"].as_str()?, record["isDefault"].as_bool()?)))
        .collect();
    assert_eq!(active, vec![(MAIN_ID, true), (ANNEX_ID, false)]);

    let again = run_json(&store, &["reconcile"])?;
    assert_eq!(again[0]["names_collapsed"], json!(0));
    assert_eq!(again[0]["defaults_collapsed"], json!(0));

    Ok(())
}

#[test]
fn missing_store_is_reported() -> Result<()> {
    let mut cmd = assert_cmd::Command::cargo_bin("pgdesk")?;
    cmd.env_remove("PGDESK_STORE")
        .args(["list", "--group", "pg-1"])
        .assert()
        .failure()
        .stderr(contains("PGDESK_STORE"));
    Ok(())
}

#[test]
fn corrupt_store_is_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("branches.json");
    std::fs::write(&store, "{ not json")?;

    pgdesk(&store)?
        .args(["list", "--group", "pg-1"])
        .assert()
        .failure()
        .stderr(contains("failed to open branch collection"));
    Ok(())
}
