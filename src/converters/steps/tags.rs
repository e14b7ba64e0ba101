use std::sync::LazyLock;

use anyhow::bail;
use regex::Regex;

use super::{count_table, normalize_timestamp, required_text, stream_table};
use crate::converters::{ConverterStep, ItemContext, StepEnv};
use crate::database::records::Tag;
use crate::error::Result;
use crate::value::Row;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub struct TagsStep;

impl ConverterStep for TagsStep {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn max_progress(&self, env: &StepEnv) -> Result<Option<u64>> {
        count_table(env, "tags")
    }

    fn items(&self, env: &StepEnv, emit: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        stream_table(
            env,
            "tags",
            "SELECT id, name, tag_group_id, created_at FROM tags ORDER BY id",
            emit,
        )
    }

    fn process_item(&self, item: &Row, ctx: &mut ItemContext<'_>) -> anyhow::Result<()> {
        let original_id = required_text(item, "id")?;
        let name = normalize_tag_name(&required_text(item, "name")?);
        if name.is_empty() {
            bail!("tag {} has an empty name", original_id);
        }

        ctx.insert(&Tag {
            original_id,
            name,
            tag_group_id: item.text("tag_group_id"),
            created_at: normalize_timestamp(item.get("created_at"))?,
        })
    }
}

/// Lowercase, with runs of whitespace collapsed into a single dash.
pub fn normalize_tag_name(name: &str) -> String {
    WHITESPACE
        .replace_all(name.trim(), "-")
        .trim_matches('-')
        .to_lowercase()
}
