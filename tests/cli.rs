// ABOUTME: End-to-end tests of the stagelog binary against a seeded SQLite journal.
// ABOUTME: Covers listing with cursors, paging, showing, entity lookup, crash queries and deletion.

use std::path::Path;
use std::process::{Command, Output};

use chrono::{DateTime, Duration, TimeZone, Utc};
use stagelog_core::entry::{Entry, Stage};
use stagelog_store::{Database, JournalStore, SqliteDatabase};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn seed(db_path: &Path, count: i64) -> Vec<Entry> {
    let db = SqliteDatabase::open(db_path).unwrap();
    let store = JournalStore::new(36, 32);
    let entries: Vec<Entry> = (0..count)
        .map(|i| {
            let mut entry = Entry::new("host-1", if i % 2 == 0 { "shop" } else { "billing" });
            entry.start = base() + Duration::seconds(i);
            entry.chain = vec![Stage::model(20, format!("ORD-{}", i % 3), "touched")];
            entry
        })
        .collect();
    db.with_tx(|tx| store.import(tx, &entries)).unwrap();
    entries
}

fn stagelog(db_path: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stagelog"))
        .arg("--db")
        .arg(db_path)
        .args(args)
        .env_remove("STAGELOG_JOURNAL_TABLE")
        .env_remove("STAGELOG_CRASH_TABLE")
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn json(output: Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "stagelog failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn ids(page: &serde_json::Value) -> Vec<String> {
    page["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn list_then_next_walks_every_entry() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("journal.db");
    let entries = seed(&db, 7);

    let from = base().to_rfc3339();
    let to = (base() + Duration::minutes(1)).to_rfc3339();
    let first = json(stagelog(
        &db,
        &["--format", "json", "list", "--from", &from, "--to", &to, "--page", "3"],
    ));

    let cursor = first["cursor"].as_str().unwrap().to_string();
    let mut seen = ids(&first);
    assert_eq!(seen.len(), 3);

    loop {
        let page = json(stagelog(&db, &["--format", "json", "next", &cursor]));
        if page["exhausted"].as_bool().unwrap() {
            assert!(ids(&page).is_empty());
            break;
        }
        seen.extend(ids(&page));
    }

    let expected: Vec<String> = entries.iter().rev().map(|e| e.id.to_string()).collect();
    assert_eq!(seen, expected);
}

#[test]
fn list_filters_services() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("journal.db");
    seed(&db, 6);

    let from = base().to_rfc3339();
    let to = (base() + Duration::minutes(1)).to_rfc3339();
    let page = json(stagelog(
        &db,
        &[
            "--format", "json", "list", "--from", &from, "--to", &to, "--service", "BILLING",
        ],
    ));

    let services: Vec<&str> = page["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["service"].as_str().unwrap())
        .collect();
    assert_eq!(services, vec!["billing", "billing", "billing"]);
}

#[test]
fn show_entity_and_delete() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("journal.db");
    let entries = seed(&db, 6);
    let id = entries[0].id.to_string();

    let shown = json(stagelog(&db, &["--format", "json", "show", &id]));
    assert_eq!(ids(&shown), vec![id.clone()]);

    let by_entity = json(stagelog(&db, &["--format", "json", "entity", "20", "ORD-0"]));
    assert_eq!(
        ids(&by_entity),
        vec![entries[3].id.to_string(), entries[0].id.to_string()]
    );

    assert!(stagelog(&db, &["delete", &id]).status.success());
    assert!(stagelog(&db, &["delete", &id]).status.success());

    let missing = stagelog(&db, &["show", &id]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("Error:"));
}

#[test]
fn text_output_names_the_cursor() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("journal.db");
    seed(&db, 4);

    let from = base().to_rfc3339();
    let to = (base() + Duration::minutes(1)).to_rfc3339();
    let output = stagelog(&db, &["list", "--from", &from, "--to", &to, "--page", "2"]);
    assert!(output.status.success());

    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("touched"));
    assert!(text.lines().last().unwrap().starts_with("cursor: "));
}

#[test]
fn invalid_id_is_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("journal.db");
    seed(&db, 1);

    let output = stagelog(&db, &["show", "not-an-id"]);
    assert!(!output.status.success());
}
