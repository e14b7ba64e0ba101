use super::{count_table, normalize_timestamp, required_text, stream_table};
use crate::converters::{ConverterStep, ItemContext, StepEnv};
use crate::database::records::TagGroup;
use crate::error::Result;
use crate::value::Row;

pub struct TagGroupsStep;

impl ConverterStep for TagGroupsStep {
    fn name(&self) -> &'static str {
        "tag_groups"
    }

    fn max_progress(&self, env: &StepEnv) -> Result<Option<u64>> {
        count_table(env, "tag_groups")
    }

    fn items(&self, env: &StepEnv, emit: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        stream_table(
            env,
            "tag_groups",
            "SELECT id, name, one_per_topic, created_at FROM tag_groups ORDER BY id",
            emit,
        )
    }

    fn process_item(&self, item: &Row, ctx: &mut ItemContext<'_>) -> anyhow::Result<()> {
        ctx.insert(&TagGroup {
            original_id: required_text(item, "id")?,
            name: required_text(item, "name")?,
            one_per_topic: item.flag("one_per_topic"),
            created_at: normalize_timestamp(item.get("created_at"))?,
        })
    }
}
