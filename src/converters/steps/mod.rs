//! Bundled converter steps for a SQLite-exported source.

mod site_settings;
mod tag_groups;
mod tags;
mod uploads;
mod users;

pub use site_settings::SiteSettingsStep;
pub use tag_groups::TagGroupsStep;
pub use tags::TagsStep;
pub use uploads::UploadsStep;
pub use users::UsersStep;

use anyhow::{anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use super::StepEnv;
use crate::error::Result;
use crate::value::{Row, SqlValue};

/// Count rows of a source table; a missing table has nothing to convert.
pub(crate) fn count_table(env: &StepEnv, table: &str) -> Result<Option<u64>> {
    if !env.source().has_table(table)? {
        return Ok(Some(0));
    }
    let count = env
        .source()
        .count(&format!("SELECT COUNT(*) FROM {}", table))?;
    Ok(Some(count))
}

/// Stream `sql` if `table` exists in the source.
pub(crate) fn stream_table(
    env: &StepEnv,
    table: &str,
    sql: &str,
    emit: &mut dyn FnMut(Row) -> Result<()>,
) -> Result<()> {
    if !env.source().has_table(table)? {
        return Ok(());
    }
    env.source().each_row(sql, &[], emit)
}

/// Required, non-blank text column.
pub(crate) fn required_text(item: &Row, column: &str) -> anyhow::Result<String> {
    item.text(column)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("missing {}", column))
}

/// Normalize a source timestamp to RFC 3339 in UTC.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD HH:MM:SS` (taken as UTC), bare
/// dates and unix seconds. Null and blank values yield `None`.
pub fn normalize_timestamp(value: Option<&SqlValue>) -> anyhow::Result<Option<String>> {
    let parsed = match value {
        None | Some(SqlValue::Null) => return Ok(None),
        Some(SqlValue::Integer(secs)) => from_unix(*secs)?,
        Some(SqlValue::Real(secs)) if !secs.is_finite() => bail!("timestamp {} is not finite", secs),
        Some(SqlValue::Real(secs)) => from_unix(secs.trunc() as i64)?,
        Some(SqlValue::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            parse_timestamp(text)?
        }
        Some(SqlValue::Blob(_)) => bail!("timestamp cannot be a blob"),
    };
    Ok(Some(parsed.to_rfc3339_opts(SecondsFormat::Secs, true)))
}

fn from_unix(secs: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp {} out of range", secs))
}

fn parse_timestamp(text: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(secs) = text.parse::<i64>() {
        return from_unix(secs);
    }
    bail!("unrecognized timestamp '{}'", text)
}
