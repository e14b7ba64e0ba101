//! Schema migrator scenarios against real store files.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use discourse_migrate::database::{self, migrate, MigrationSource, SchemaKind};
use discourse_migrate::error::Error;
use rusqlite::Connection;
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(1);

fn tables(conn: &Connection) -> BTreeSet<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
        .unwrap();
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<BTreeSet<_>, _>>()
        .unwrap();
    names
}

fn tracked(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
        .unwrap()
}

fn write_migrations(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("001_create_foo.sql"),
        "CREATE TABLE foo (id INTEGER PRIMARY KEY, label TEXT);",
    )
    .unwrap();
    std::fs::write(
        dir.join("002_create_bar.sql"),
        "CREATE TABLE bar (id INTEGER PRIMARY KEY, foo_id INTEGER REFERENCES foo (id));",
    )
    .unwrap();
    std::fs::write(dir.join("README.md"), "not a migration").unwrap();
}

#[test]
fn test_directory_scenario_creates_exact_tables() {
    let dir = tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    write_migrations(&migrations);
    let store = dir.path().join("store.db");
    let source = MigrationSource::Directory(migrations);

    let (conn, report) = migrate(&store, &source, TIMEOUT).unwrap();
    assert_eq!(report.applied, vec!["001_create_foo.sql", "002_create_bar.sql"]);
    assert_eq!(
        tables(&conn),
        ["bar", "foo", "schema_migrations"]
            .into_iter()
            .map(String::from)
            .collect()
    );
    drop(conn);

    let (conn, report) = migrate(&store, &source, TIMEOUT).unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.already_applied, 2);
    assert_eq!(tracked(&conn), 2);
}

#[test]
fn test_new_script_applies_only_itself() {
    let dir = tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    write_migrations(&migrations);
    let store = dir.path().join("store.db");
    let source = MigrationSource::Directory(migrations.clone());
    migrate(&store, &source, TIMEOUT).unwrap();

    std::fs::write(
        migrations.join("003_add_baz.sql"),
        "CREATE TABLE baz (id INTEGER PRIMARY KEY);",
    )
    .unwrap();
    let (conn, report) = migrate(&store, &source, TIMEOUT).unwrap();
    assert_eq!(report.applied, vec!["003_add_baz.sql"]);
    assert_eq!(tracked(&conn), 3);
}

#[test]
fn test_failing_script_is_fatal_and_not_recorded() {
    let dir = tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    write_migrations(&migrations);
    std::fs::write(migrations.join("003_broken.sql"), "CREATE TABLE oops (;").unwrap();
    let store = dir.path().join("store.db");

    let err = migrate(&store, &MigrationSource::Directory(migrations), TIMEOUT).unwrap_err();
    match err {
        Error::MigrationFailed { path, .. } => assert_eq!(path, "003_broken.sql"),
        other => panic!("unexpected error: {other}"),
    }

    let conn = Connection::open(&store).unwrap();
    assert_eq!(tracked(&conn), 2);
    assert!(!tables(&conn).contains("oops"));
}

#[test]
fn test_reset_is_total_and_migrate_recreates() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("intermediate.db");
    let (conn, _) = migrate(&store, &SchemaKind::Intermediate.into(), TIMEOUT).unwrap();
    conn.execute(
        "INSERT INTO tag_groups (original_id, name) VALUES ('1', 'colors')",
        [],
    )
    .unwrap();
    drop(conn);

    database::reset(&store).unwrap();
    for file in database::store_files(&store) {
        assert!(!file.exists(), "{} survived reset", file.display());
    }

    let (conn, report) = migrate(&store, &SchemaKind::Intermediate.into(), TIMEOUT).unwrap();
    assert_eq!(report.applied.len(), SchemaKind::Intermediate.scripts().len());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM tag_groups", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_script_with_own_transaction_is_rejected() {
    let dir = tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    write_migrations(&migrations);
    std::fs::write(
        migrations.join("003_wrapped.sql"),
        "BEGIN; CREATE TABLE baz (id INTEGER PRIMARY KEY); COMMIT;",
    )
    .unwrap();
    let store = dir.path().join("store.db");

    let err = migrate(&store, &MigrationSource::Directory(migrations), TIMEOUT).unwrap_err();
    match err {
        Error::MigrationFailed { path, .. } => assert_eq!(path, "003_wrapped.sql"),
        other => panic!("unexpected error: {other}"),
    }

    let conn = Connection::open(&store).unwrap();
    assert_eq!(tracked(&conn), 2);
    assert!(!tables(&conn).contains("baz"));
}
