//! Converter runs against a realistic source, in-process and with worker processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use discourse_migrate::converters::pool::WorkerCommand;
use discourse_migrate::converters::{
    ConverterRunner, ConverterSettings, RunStats, RunnerOptions, CONVERTER_STEPS,
};
use discourse_migrate::database::IntermediateStore;
use discourse_migrate::progress::NoProgress;
use rusqlite::Connection;

mod common;

use common::forum_fixture;

const TIMEOUT: Duration = Duration::from_secs(5);

fn dmig() -> WorkerCommand {
    WorkerCommand::new(PathBuf::from(env!("CARGO_BIN_EXE_dmig")))
}

fn options(workers: usize, batch_size: usize) -> RunnerOptions {
    RunnerOptions {
        workers,
        batch_size,
        worker_command: Some(dmig()),
    }
}

async fn convert_all(
    store_path: &Path,
    settings: &ConverterSettings,
    options: RunnerOptions,
) -> Vec<RunStats> {
    let (mut store, _) = IntermediateStore::open(store_path, TIMEOUT).unwrap();
    let mut runner = ConverterRunner::new(&mut store, settings.clone(), options);
    let mut results = Vec::new();
    for step in CONVERTER_STEPS {
        results.push(runner.run_step(step, &mut NoProgress).await.unwrap());
    }
    results
}

fn staged(store_path: &Path, table: &str) -> i64 {
    let conn = Connection::open(store_path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .unwrap()
}

#[tokio::test]
async fn test_inline_step_with_one_failing_row() {
    let fixture = forum_fixture();
    let store = fixture.dir.path().join("intermediate.db");
    let (mut intermediate, _) = IntermediateStore::open(&store, TIMEOUT).unwrap();

    let stats = ConverterRunner::new(&mut intermediate, fixture.settings.clone(), options(0, 2))
        .run_step("users", &mut NoProgress)
        .await
        .unwrap();

    assert_eq!(stats.processed_count, 3);
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.errors[0].message, "user 2 has no username");
    assert!(stats.errors[0].item.is_some());
    assert_eq!(intermediate.count("users").unwrap(), 2);
}

#[tokio::test]
async fn test_failing_item_does_not_stop_its_batch() {
    let fixture = forum_fixture();
    let store = fixture.dir.path().join("intermediate.db");
    let (mut intermediate, _) = IntermediateStore::open(&store, TIMEOUT).unwrap();

    // One batch holds every tag group; the bad one sits in the middle.
    let stats = ConverterRunner::new(&mut intermediate, fixture.settings.clone(), options(1, 10))
        .run_step("tag_groups", &mut NoProgress)
        .await
        .unwrap();

    assert_eq!(stats.processed_count, 3);
    assert_eq!(stats.error_count, 1);
    assert_eq!(intermediate.count("tag_groups").unwrap(), 2);
}

#[tokio::test]
async fn test_worker_processes_match_inline_run() {
    let fixture = forum_fixture();
    let inline_store = fixture.dir.path().join("inline.db");
    let parallel_store = fixture.dir.path().join("parallel.db");

    let inline = convert_all(&inline_store, &fixture.settings, options(0, 2)).await;
    let parallel = convert_all(&parallel_store, &fixture.settings, options(3, 1)).await;

    for (a, b) in inline.iter().zip(&parallel) {
        assert_eq!(a.processed_count, b.processed_count);
        assert_eq!(a.error_count, b.error_count);
    }
    for table in ["users", "uploads", "site_settings", "tag_groups", "tags"] {
        assert_eq!(
            staged(&inline_store, table),
            staged(&parallel_store, table),
            "{} differs",
            table
        );
    }

    // users: ghost; uploads: missing attachment; tag_groups: unnamed group
    let errors: Vec<u64> = parallel.iter().map(|s| s.error_count).collect();
    assert_eq!(errors, vec![1, 1, 0, 1, 0]);
    assert_eq!(staged(&parallel_store, "users"), 2);
    assert_eq!(staged(&parallel_store, "uploads"), 2);
    assert_eq!(staged(&parallel_store, "site_settings"), 3);
}

#[tokio::test]
async fn test_staged_values_are_normalized() {
    let fixture = forum_fixture();
    let store = fixture.dir.path().join("intermediate.db");
    convert_all(&store, &fixture.settings, options(2, 2)).await;

    let conn = Connection::open(&store).unwrap();
    let email: String = conn
        .query_row("SELECT email FROM users WHERE original_id = '1'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(email, "alice@example.com");

    let created: String = conn
        .query_row("SELECT created_at FROM users WHERE original_id = '3'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(created, "2021-03-02T10:00:00Z");

    let logo: String = conn
        .query_row("SELECT value FROM site_settings WHERE name = 'logo'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(logo, "10");
    let max_len: String = conn
        .query_row(
            "SELECT value FROM site_settings WHERE name = 'max_post_length'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(max_len, "32000");

    let sha: String = conn
        .query_row("SELECT sha256 FROM uploads WHERE id = '11'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(sha.len(), 64);
}

#[tokio::test]
async fn test_unknown_step_is_fatal() {
    let fixture = forum_fixture();
    let store = fixture.dir.path().join("intermediate.db");
    let (mut intermediate, _) = IntermediateStore::open(&store, TIMEOUT).unwrap();

    let result = ConverterRunner::new(&mut intermediate, fixture.settings.clone(), options(2, 2))
        .run_step("polls", &mut NoProgress)
        .await;
    assert!(result.is_err());
}

fn source(dir: &Path, sql: &str) -> ConverterSettings {
    let path = dir.join("source.db");
    Connection::open(&path).unwrap().execute_batch(sql).unwrap();
    ConverterSettings {
        source_db: path,
        attachments_dir: Some(dir.to_path_buf()),
    }
}

#[tokio::test]
async fn test_infinite_timestamp_fails_only_its_row() {
    let dir = tempfile::tempdir().unwrap();
    // No declared type on created_at, so the value stays an infinite REAL.
    let settings = source(
        dir.path(),
        "CREATE TABLE tag_groups (id INTEGER, name TEXT, one_per_topic INTEGER, created_at);
         INSERT INTO tag_groups VALUES (1, 'a', 0, NULL);
         INSERT INTO tag_groups VALUES (2, 'b', 0, 9e999);
         INSERT INTO tag_groups VALUES (3, 'c', 0, NULL);",
    );

    for workers in [0, 1] {
        let store = dir.path().join(format!("intermediate-{}.db", workers));
        let (mut intermediate, _) = IntermediateStore::open(&store, TIMEOUT).unwrap();
        let stats = ConverterRunner::new(&mut intermediate, settings.clone(), options(workers, 10))
            .run_step("tag_groups", &mut NoProgress)
            .await
            .unwrap();

        assert_eq!(stats.processed_count, 3, "workers = {}", workers);
        assert_eq!(stats.error_count, 1, "workers = {}", workers);
        assert_eq!(
            stats.errors[0].item.as_ref().and_then(|r| r.text("name")),
            Some("b".to_string())
        );
        assert_eq!(intermediate.count("tag_groups").unwrap(), 2);
    }
}

#[tokio::test]
async fn test_rejected_setting_takes_its_upload_with_it() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("logo.png"), b"\x89PNG\r\n\x1a\nold").unwrap();
    std::fs::write(dir.path().join("logo2.png"), b"\x89PNG\r\n\x1a\nnew").unwrap();
    let settings = source(
        dir.path(),
        "CREATE TABLE uploads (id INTEGER, user_id INTEGER, filename TEXT, attachment_key TEXT, created_at TEXT);
         INSERT INTO uploads VALUES (10, NULL, 'logo.png', 'logo.png', NULL);
         INSERT INTO uploads VALUES (11, NULL, 'logo2.png', 'logo2.png', NULL);
         CREATE TABLE site_settings (name TEXT, data_type TEXT, value TEXT, updated_at TEXT);
         INSERT INTO site_settings VALUES ('logo', 'upload', '10', NULL);
         INSERT INTO site_settings VALUES ('logo', 'upload', '11', NULL);",
    );

    for workers in [0, 2] {
        let store = dir.path().join(format!("intermediate-{}.db", workers));
        let (mut intermediate, _) = IntermediateStore::open(&store, TIMEOUT).unwrap();
        let stats = ConverterRunner::new(&mut intermediate, settings.clone(), options(workers, 1))
            .run_step("site_settings", &mut NoProgress)
            .await
            .unwrap();

        assert_eq!(stats.processed_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.errors[0].message, "staging write rejected");
        assert!(stats.errors[0].item.is_some());
        assert_eq!(intermediate.count("site_settings").unwrap(), 1);
        assert_eq!(intermediate.count("uploads").unwrap(), 1);
    }
}
