use anyhow::Context;
use sha2::{Digest, Sha256};

use super::{count_table, normalize_timestamp, required_text, stream_table};
use crate::converters::{ConverterStep, ItemContext, StepEnv};
use crate::database::records::Upload;
use crate::error::Result;
use crate::value::Row;

/// Columns every upload-producing query must select.
pub(crate) const UPLOAD_COLUMNS: &str = "id, user_id, filename, attachment_key, created_at";

pub struct UploadsStep;

impl ConverterStep for UploadsStep {
    fn name(&self) -> &'static str {
        "uploads"
    }

    fn max_progress(&self, env: &StepEnv) -> Result<Option<u64>> {
        count_table(env, "uploads")
    }

    fn items(&self, env: &StepEnv, emit: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        let sql = format!("SELECT {} FROM uploads ORDER BY id", UPLOAD_COLUMNS);
        stream_table(env, "uploads", &sql, emit)
    }

    fn process_item(&self, item: &Row, ctx: &mut ItemContext<'_>) -> anyhow::Result<()> {
        let upload = build_upload(item, ctx, None)?;
        ctx.insert(&upload)
    }
}

/// Fetch an upload's attachment and describe it as a staging record.
///
/// Shared by every step that references uploads so the same source upload
/// always yields the same record.
pub(crate) fn build_upload(
    item: &Row,
    ctx: &ItemContext<'_>,
    origin: Option<String>,
) -> anyhow::Result<Upload> {
    let id = required_text(item, "id")?;
    let key = required_text(item, "attachment_key")
        .with_context(|| format!("upload {} has no attachment", id))?;
    let data = ctx
        .fetch_attachment(&key)
        .with_context(|| format!("failed to fetch upload {}", id))?;

    let filename = item
        .text("filename")
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .or_else(|| key.rsplit('/').next().map(str::to_string))
        .unwrap_or_else(|| id.clone());

    Ok(Upload {
        sha256: sha256_hex(&data),
        filesize: data.len() as i64,
        user_id: item.text("user_id"),
        filename,
        created_at: normalize_timestamp(item.get("created_at"))?,
        data: Some(data),
        origin,
        id,
    })
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::process_batch;
    use crate::database::OfflineConnection;
    use crate::source::{DirectoryAttachments, SourceDb};
    use crate::value::SqlValue;
    use rusqlite::Connection;
    use tempfile::tempdir;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_uploads_fetch_and_hash_attachments() {
        let dir = tempdir().unwrap();
        let files = dir.path().join("files");
        std::fs::create_dir_all(files.join("2024")).unwrap();
        std::fs::write(files.join("2024/logo.png"), b"abc").unwrap();

        let path = dir.path().join("source.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE uploads (id INTEGER, user_id INTEGER, filename TEXT, attachment_key TEXT, created_at TEXT);
                 INSERT INTO uploads VALUES (1, 7, NULL, '2024/logo.png', '2024-01-01 00:00:00');
                 INSERT INTO uploads VALUES (2, 7, 'gone.png', '2024/gone.png', NULL);",
            )
            .unwrap();
        let env = StepEnv::new(
            SourceDb::open(&path).unwrap(),
            Some(Box::new(DirectoryAttachments::new(&files))),
        );

        let mut items = Vec::new();
        UploadsStep
            .items(&env, &mut |row| {
                items.push(row);
                Ok(())
            })
            .unwrap();
        let mut offline = OfflineConnection::new();
        let stats = process_batch(&UploadsStep, &env, &items, &mut offline);

        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.errors[0].message, "failed to fetch upload 2");
        let params = &offline.statements()[0].params;
        assert_eq!(params[0], SqlValue::from("1"));
        assert_eq!(params[1], SqlValue::from("7"));
        assert_eq!(params[2], SqlValue::from("logo.png"));
        assert_eq!(params[3], SqlValue::from(sha256_hex(b"abc")));
        assert_eq!(params[4], SqlValue::Integer(3));
    }
}
