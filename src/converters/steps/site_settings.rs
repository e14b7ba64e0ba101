use std::collections::HashMap;

use anyhow::{anyhow, bail, Context};
use tracing::debug;

use super::uploads::build_upload;
use super::{count_table, normalize_timestamp, required_text, stream_table};
use crate::converters::{ConverterStep, ItemContext, StepEnv};
use crate::database::records::SiteSetting;
use crate::error::Result;
use crate::value::Row;

/// Converts site settings, validating each value against its declared type.
///
/// Upload settings reference a source upload by id. Those uploads are
/// pre-joined once in [`ConverterStep::execute`] and emitted alongside the
/// setting, so `process_item` never queries the source. They are keyed by
/// setting name and raw value, since an export may repeat a name.
#[derive(Default)]
pub struct SiteSettingsStep {
    referenced_uploads: HashMap<(String, String), Row>,
}

impl ConverterStep for SiteSettingsStep {
    fn name(&self) -> &'static str {
        "site_settings"
    }

    fn execute(&mut self, env: &StepEnv) -> anyhow::Result<()> {
        self.referenced_uploads.clear();
        let source = env.source();
        if !source.has_table("site_settings")? || !source.has_table("uploads")? {
            return Ok(());
        }

        let sql = "SELECT s.name AS setting_name, s.value AS setting_value, \
                          u.id, u.user_id, u.filename, \
                          u.attachment_key, u.created_at \
                   FROM site_settings s \
                   JOIN uploads u ON CAST(u.id AS TEXT) = s.value \
                   WHERE s.data_type = 'upload'";
        source.each_row(sql, &[], &mut |row| {
            let key = (row.text("setting_name"), row.text("setting_value"));
            if let (Some(name), Some(value)) = key {
                self.referenced_uploads.insert((name, value), row);
            }
            Ok(())
        })?;

        debug!(
            "{} site settings reference uploads",
            self.referenced_uploads.len()
        );
        Ok(())
    }

    fn max_progress(&self, env: &StepEnv) -> Result<Option<u64>> {
        count_table(env, "site_settings")
    }

    fn items(&self, env: &StepEnv, emit: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        stream_table(
            env,
            "site_settings",
            "SELECT name, data_type, value, updated_at FROM site_settings ORDER BY name",
            emit,
        )
    }

    fn process_item(&self, item: &Row, ctx: &mut ItemContext<'_>) -> anyhow::Result<()> {
        let name = required_text(item, "name")?;
        let data_type = required_text(item, "data_type")?.to_lowercase();
        let raw = item.text("value");

        let value = if data_type == "upload" {
            self.convert_upload(&name, raw.as_deref(), ctx)?
        } else {
            raw.map(|raw| normalize_value(&data_type, &raw))
                .transpose()
                .with_context(|| format!("invalid {} value for setting '{}'", data_type, name))?
        };

        ctx.insert(&SiteSetting {
            name,
            value,
            data_type,
            last_changed_at: normalize_timestamp(item.get("updated_at"))?,
        })
    }
}

impl SiteSettingsStep {
    /// Emit the referenced upload and return its id as the setting value.
    fn convert_upload(
        &self,
        name: &str,
        raw: Option<&str>,
        ctx: &mut ItemContext<'_>,
    ) -> anyhow::Result<Option<String>> {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Ok(None);
        };
        let upload_row = self
            .referenced_uploads
            .get(&(name.to_string(), raw.to_string()))
            .ok_or_else(|| {
                anyhow!("setting '{}' references unknown upload {}", name, raw.trim())
            })?;

        let upload = build_upload(upload_row, ctx, Some(format!("site_setting:{}", name)))?;
        let id = upload.id.clone();
        ctx.insert(&upload)?;
        Ok(Some(id))
    }
}

/// Validate `raw` against a setting type and return its canonical text form.
pub fn normalize_value(data_type: &str, raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    let value = match data_type {
        "string" => raw.to_string(),
        "integer" => trimmed
            .parse::<i64>()
            .map_err(|e| anyhow!("'{}' is not an integer: {}", trimmed, e))?
            .to_string(),
        "float" => {
            let f = trimmed
                .parse::<f64>()
                .map_err(|e| anyhow!("'{}' is not a number: {}", trimmed, e))?;
            if !f.is_finite() {
                bail!("'{}' is not a finite number", trimmed);
            }
            f.to_string()
        }
        "bool" => match trimmed.to_lowercase().as_str() {
            "t" | "true" | "1" | "yes" => "true".to_string(),
            "f" | "false" | "0" | "no" => "false".to_string(),
            _ => bail!("'{}' is not a boolean", trimmed),
        },
        "json" => {
            let parsed: serde_json::Value = serde_json::from_str(trimmed)?;
            serde_json::to_string(&parsed)?
        }
        "list" => trimmed
            .split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("|"),
        "enum" => {
            if trimmed.is_empty() {
                bail!("enum value is empty");
            }
            trimmed.to_string()
        }
        other => bail!("unknown setting type '{}'", other),
    };
    Ok(value)
}
