use anyhow::Context;

use super::count_query;
use crate::importer::{
    unmapped_join, ImportRecord, ImporterStep, MappingType, SetRequirement, StepDescriptor,
    TransformContext,
};
use crate::value::{Row, SqlValue};

const EXISTING_NAMES: &str = "existing_tag_group_names";

pub struct TagGroupsStep;

impl TagGroupsStep {
    fn body() -> String {
        format!(
            "FROM src.tag_groups g {} WHERE mapped.original_id IS NULL",
            unmapped_join("g.original_id", MappingType::TagGroups)
        )
    }
}

impl ImporterStep for TagGroupsStep {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: "tag_groups",
            table: "tag_groups",
            column_names: &["name", "one_per_topic", "created_at"],
            depends_on: &[],
            store_mapped_ids: Some(MappingType::TagGroups),
        }
    }

    fn total_rows_query(&self) -> String {
        count_query(&Self::body())
    }

    fn rows_query(&self) -> String {
        format!(
            "SELECT g.original_id, g.name, g.one_per_topic, g.created_at {} ORDER BY g.original_id",
            Self::body()
        )
    }

    fn required_sets(&self) -> Vec<SetRequirement> {
        vec![SetRequirement {
            name: EXISTING_NAMES,
            query: "SELECT lower(name) FROM tag_groups",
        }]
    }

    fn transform_row(
        &mut self,
        row: &Row,
        ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        let original_id = row.text("original_id").context("tag group without original_id")?;
        let name = row
            .text("name")
            .with_context(|| format!("tag group {} has no name", original_id))?;
        let lower = name.to_lowercase();
        if !ctx.claim(EXISTING_NAMES, &lower) {
            return Ok(None);
        }

        Ok(Some(
            ImportRecord::new(
                original_id,
                vec![
                    name.into(),
                    row.flag("one_per_topic").into(),
                    row.get("created_at").cloned().unwrap_or(SqlValue::Null),
                ],
            )
            .with_claim(EXISTING_NAMES, lower),
        ))
    }
}
