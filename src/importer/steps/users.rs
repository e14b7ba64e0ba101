use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

use super::count_query;
use crate::importer::{
    unmapped_join, ImportRecord, ImporterStep, MappingType, SetRequirement, StepDescriptor,
    TransformContext,
};
use crate::value::{Row, SqlValue};

const MAX_USERNAME_LENGTH: usize = 20;
const EXISTING_USERNAMES: &str = "existing_usernames";

static INVALID_USERNAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]+").unwrap());
static REPEATED_SPECIALS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_.\-]{2,}").unwrap());

pub struct UsersStep;

impl UsersStep {
    fn body() -> String {
        format!(
            "FROM src.users u {} WHERE mapped.original_id IS NULL",
            unmapped_join("u.original_id", MappingType::Users)
        )
    }
}

impl ImporterStep for UsersStep {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: "users",
            table: "users",
            column_names: &["username", "username_lower", "email", "name", "created_at"],
            depends_on: &[],
            store_mapped_ids: Some(MappingType::Users),
        }
    }

    fn total_rows_query(&self) -> String {
        count_query(&Self::body())
    }

    fn rows_query(&self) -> String {
        format!(
            "SELECT u.original_id, u.username, u.email, u.name, u.created_at {} ORDER BY u.original_id",
            Self::body()
        )
    }

    fn required_sets(&self) -> Vec<SetRequirement> {
        vec![SetRequirement {
            name: EXISTING_USERNAMES,
            query: "SELECT username_lower FROM users",
        }]
    }

    fn transform_row(
        &mut self,
        row: &Row,
        ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        let original_id = row.text("original_id").context("user without original_id")?;
        let base = sanitize_username(&row.text("username").unwrap_or_default());
        let username = unique_username(&base, ctx);
        let lower = username.to_lowercase();

        Ok(Some(
            ImportRecord::new(
                original_id,
                vec![
                    SqlValue::from(username.as_str()),
                    lower.as_str().into(),
                    row.get("email").cloned().unwrap_or(SqlValue::Null),
                    row.get("name").cloned().unwrap_or(SqlValue::Null),
                    row.get("created_at").cloned().unwrap_or(SqlValue::Null),
                ],
            )
            .with_claim(EXISTING_USERNAMES, lower),
        ))
    }
}

/// Reduce a source username to the characters the destination accepts.
pub fn sanitize_username(name: &str) -> String {
    let replaced = INVALID_USERNAME_CHARS.replace_all(name.trim(), "_");
    let collapsed = REPEATED_SPECIALS.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let truncated: String = trimmed.chars().take(MAX_USERNAME_LENGTH).collect();
    let truncated = truncated.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    if truncated.is_empty() {
        "user".to_string()
    } else {
        truncated.to_string()
    }
}

/// Claim `base`, or the first free `base` + number, in the username set.
fn unique_username(base: &str, ctx: &mut TransformContext<'_>) -> String {
    if ctx.claim(EXISTING_USERNAMES, &base.to_lowercase()) {
        return base.to_string();
    }
    let mut suffix = 1u32;
    loop {
        let suffix_text = suffix.to_string();
        let keep = MAX_USERNAME_LENGTH.saturating_sub(suffix_text.len());
        let candidate: String = base.chars().take(keep).chain(suffix_text.chars()).collect();
        if ctx.claim(EXISTING_USERNAMES, &candidate.to_lowercase()) {
            return candidate;
        }
        suffix += 1;
    }
}
