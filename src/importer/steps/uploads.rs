use anyhow::Context;

use super::count_query;
use crate::importer::{
    unmapped_join, ImportRecord, ImporterStep, MappingType, SetRequirement, StepDescriptor,
    TransformContext,
};
use crate::value::{Row, SqlValue};

/// Owner of uploads that have no user in the source.
pub const SYSTEM_USER_ID: i64 = -1;

const EXISTING_HASHES: &str = "existing_hashes";

/// Loads staging uploads joined with their materialized files.
///
/// Uploads the materializer rejected are left out, and an upload whose
/// content hash already exists in the destination is skipped without a
/// mapping entry. An upload whose owner was not imported fails.
pub struct UploadsStep;

impl UploadsStep {
    fn body() -> String {
        format!(
            "FROM src.uploads u \
             LEFT JOIN files.uploads f ON f.id = u.id \
             LEFT JOIN main.mapped_ids owner ON owner.original_id = u.user_id AND owner.type = {} \
             {} \
             WHERE mapped.original_id IS NULL AND f.skip_reason IS NULL",
            MappingType::Users.id(),
            unmapped_join("u.id", MappingType::Uploads)
        )
    }
}

impl ImporterStep for UploadsStep {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: "uploads",
            table: "uploads",
            column_names: &[
                "user_id",
                "original_filename",
                "sha256",
                "filesize",
                "url",
                "created_at",
            ],
            depends_on: &["users"],
            store_mapped_ids: Some(MappingType::Uploads),
        }
    }

    fn total_rows_query(&self) -> String {
        count_query(&Self::body())
    }

    fn rows_query(&self) -> String {
        format!(
            "SELECT u.id, u.filename, u.sha256, coalesce(f.filesize, u.filesize) AS filesize, \
                    coalesce(f.url, '/uploads/original/' || substr(u.sha256, 1, 2) || '/' || u.sha256) AS url, \
                    u.user_id AS source_user_id, owner.destination_id AS user_id, u.created_at \
             {} ORDER BY u.id",
            Self::body()
        )
    }

    fn required_sets(&self) -> Vec<SetRequirement> {
        vec![SetRequirement {
            name: EXISTING_HASHES,
            query: "SELECT sha256 FROM uploads",
        }]
    }

    fn transform_row(
        &mut self,
        row: &Row,
        ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        let id = row.text("id").context("upload without id")?;
        let sha256 = row
            .text("sha256")
            .with_context(|| format!("upload {} has no sha256", id))?;
        let user_id = match (row.int("user_id"), row.text("source_user_id")) {
            (Some(user_id), _) => user_id,
            (None, None) => SYSTEM_USER_ID,
            (None, Some(user)) => {
                anyhow::bail!("user {} of upload {} was not imported", user, id)
            }
        };
        if !ctx.claim(EXISTING_HASHES, &sha256) {
            return Ok(None);
        }

        Ok(Some(
            ImportRecord::new(
                id,
                vec![
                    user_id.into(),
                    row.get("filename").cloned().unwrap_or(SqlValue::Null),
                    sha256.as_str().into(),
                    row.int("filesize").unwrap_or(0).into(),
                    row.get("url").cloned().unwrap_or(SqlValue::Null),
                    row.get("created_at").cloned().unwrap_or(SqlValue::Null),
                ],
            )
            .with_claim(EXISTING_HASHES, sha256),
        ))
    }
}
