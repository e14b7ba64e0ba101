use anyhow::Context;

use super::count_query;
use crate::importer::{
    unmapped_join, ImportRecord, ImporterStep, MappingType, SetRequirement, StepDescriptor,
    TransformContext,
};
use crate::value::{Row, SqlValue};

const EXISTING_NAMES: &str = "existing_tag_names";

pub struct TagsStep;

impl TagsStep {
    fn body() -> String {
        format!(
            "FROM src.tags t \
             LEFT JOIN main.mapped_ids grp ON grp.original_id = t.tag_group_id AND grp.type = {} \
             {} \
             WHERE mapped.original_id IS NULL",
            MappingType::TagGroups.id(),
            unmapped_join("t.original_id", MappingType::Tags)
        )
    }
}

impl ImporterStep for TagsStep {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: "tags",
            table: "tags",
            column_names: &["name", "tag_group_id", "created_at"],
            depends_on: &["tag_groups"],
            store_mapped_ids: Some(MappingType::Tags),
        }
    }

    fn total_rows_query(&self) -> String {
        count_query(&Self::body())
    }

    fn rows_query(&self) -> String {
        format!(
            "SELECT t.original_id, t.name, t.tag_group_id AS source_group_id, \
                    grp.destination_id AS tag_group_id, t.created_at \
             {} ORDER BY t.original_id",
            Self::body()
        )
    }

    fn required_sets(&self) -> Vec<SetRequirement> {
        vec![SetRequirement {
            name: EXISTING_NAMES,
            query: "SELECT lower(name) FROM tags",
        }]
    }

    fn transform_row(
        &mut self,
        row: &Row,
        ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        let original_id = row.text("original_id").context("tag without original_id")?;
        let name = row
            .text("name")
            .with_context(|| format!("tag {} has no name", original_id))?;
        let tag_group_id = row.int("tag_group_id");
        if tag_group_id.is_none() {
            if let Some(group) = row.text("source_group_id") {
                anyhow::bail!("tag group {} of tag {} was not imported", group, original_id);
            }
        }
        let lower = name.to_lowercase();
        if !ctx.claim(EXISTING_NAMES, &lower) {
            return Ok(None);
        }

        Ok(Some(
            ImportRecord::new(
                original_id,
                vec![
                    name.into(),
                    tag_group_id.into(),
                    row.get("created_at").cloned().unwrap_or(SqlValue::Null),
                ],
            )
            .with_claim(EXISTING_NAMES, lower),
        ))
    }
}
