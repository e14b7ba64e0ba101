//! Shared source fixture for the pipeline tests.

use rusqlite::Connection;
use tempfile::{tempdir, TempDir};

use discourse_migrate::converters::ConverterSettings;

pub struct Fixture {
    pub dir: TempDir,
    pub settings: ConverterSettings,
}

/// A forum export with one bad row in users, uploads and tag groups.
pub fn forum_fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let attachments = dir.path().join("attachments");
    std::fs::create_dir_all(attachments.join("2021")).unwrap();
    std::fs::write(attachments.join("2021/logo.png"), b"\x89PNG\r\n\x1a\nlogo").unwrap();
    std::fs::write(attachments.join("2021/notes.txt"), b"meeting notes").unwrap();

    let source = dir.path().join("forum.db");
    Connection::open(&source)
        .unwrap()
        .execute_batch(
            "CREATE TABLE users (id INTEGER, username TEXT, email TEXT, name TEXT, created_at TEXT);
             INSERT INTO users VALUES (1, 'alice', 'ALICE@example.com', 'Alice', '2021-03-01T10:00:00Z');
             INSERT INTO users VALUES (2, NULL, 'ghost@example.com', NULL, '2021-03-02T10:00:00Z');
             INSERT INTO users VALUES (3, 'bob', NULL, 'Bob', 1614679200);

             CREATE TABLE uploads (id INTEGER, user_id INTEGER, filename TEXT, attachment_key TEXT, created_at TEXT);
             INSERT INTO uploads VALUES (10, 1, 'logo.png', '2021/logo.png', '2021-03-05 08:00:00');
             INSERT INTO uploads VALUES (11, 3, 'notes.txt', '2021/notes.txt', NULL);
             INSERT INTO uploads VALUES (12, 3, 'lost.pdf', '2021/lost.pdf', NULL);

             CREATE TABLE site_settings (name TEXT, data_type TEXT, value TEXT, updated_at TEXT);
             INSERT INTO site_settings VALUES ('title', 'string', 'Community', NULL);
             INSERT INTO site_settings VALUES ('max_post_length', 'integer', ' 32000 ', NULL);
             INSERT INTO site_settings VALUES ('logo', 'upload', '10', NULL);

             CREATE TABLE tag_groups (id INTEGER, name TEXT, one_per_topic INTEGER, created_at TEXT);
             INSERT INTO tag_groups VALUES (1, 'Platforms', 0, NULL);
             INSERT INTO tag_groups VALUES (2, NULL, 0, NULL);
             INSERT INTO tag_groups VALUES (3, 'Status', 1, NULL);

             CREATE TABLE tags (id INTEGER, name TEXT, tag_group_id INTEGER, created_at TEXT);
             INSERT INTO tags VALUES (1, 'Linux', 1, NULL);
             INSERT INTO tags VALUES (2, 'Mac OS', 1, NULL);
             INSERT INTO tags VALUES (3, 'solved', 3, NULL);",
        )
        .unwrap();

    Fixture {
        settings: ConverterSettings {
            source_db: source,
            attachments_dir: Some(attachments),
        },
        dir,
    }
}
