use anyhow::{anyhow, Context};

use super::count_query;
use crate::importer::{
    unmapped_join, ImportRecord, ImporterStep, MappingType, SetRequirement, StepDescriptor,
    TransformContext,
};
use crate::value::{Row, SqlValue};

const EXISTING_SETTINGS: &str = "existing_site_settings";

/// Loads site settings that the destination does not define yet.
///
/// Upload settings store the destination upload id, resolved through the
/// mapping the uploads step wrote.
pub struct SiteSettingsStep;

impl SiteSettingsStep {
    fn body() -> String {
        format!(
            "FROM src.site_settings s {} WHERE mapped.original_id IS NULL",
            unmapped_join("s.name", MappingType::SiteSettings)
        )
    }
}

impl ImporterStep for SiteSettingsStep {
    fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: "site_settings",
            table: "site_settings",
            column_names: &["name", "data_type", "value", "updated_at"],
            depends_on: &["uploads"],
            store_mapped_ids: Some(MappingType::SiteSettings),
        }
    }

    fn total_rows_query(&self) -> String {
        count_query(&Self::body())
    }

    fn rows_query(&self) -> String {
        format!(
            "SELECT s.name, s.data_type, s.value, s.last_changed_at {} ORDER BY s.name",
            Self::body()
        )
    }

    fn required_sets(&self) -> Vec<SetRequirement> {
        vec![SetRequirement {
            name: EXISTING_SETTINGS,
            query: "SELECT name FROM site_settings",
        }]
    }

    fn transform_row(
        &mut self,
        row: &Row,
        ctx: &mut TransformContext<'_>,
    ) -> anyhow::Result<Option<ImportRecord>> {
        let name = row.text("name").context("site setting without name")?;
        if ctx.contains(EXISTING_SETTINGS, &name) {
            return Ok(None);
        }
        let data_type = row.text("data_type").unwrap_or_else(|| "string".to_string());

        let value = match row.text("value") {
            Some(upload_id) if data_type == "upload" => {
                let destination_id = ctx
                    .destination_id(MappingType::Uploads, &upload_id)?
                    .ok_or_else(|| {
                        anyhow!("upload {} for setting '{}' was not imported", upload_id, name)
                    })?;
                SqlValue::from(destination_id.to_string())
            }
            other => SqlValue::from(other),
        };
        ctx.claim(EXISTING_SETTINGS, &name);

        Ok(Some(
            ImportRecord::new(
                name.clone(),
                vec![
                    name.as_str().into(),
                    data_type.into(),
                    value,
                    row.get("last_changed_at").cloned().unwrap_or(SqlValue::Null),
                ],
            )
            .with_claim(EXISTING_SETTINGS, name),
        ))
    }
}
