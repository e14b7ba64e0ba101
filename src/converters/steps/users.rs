use anyhow::Context;

use super::{count_table, normalize_timestamp, required_text, stream_table};
use crate::converters::{ConverterStep, ItemContext, StepEnv};
use crate::database::records::User;
use crate::error::Result;
use crate::value::Row;

pub struct UsersStep;

impl ConverterStep for UsersStep {
    fn name(&self) -> &'static str {
        "users"
    }

    fn max_progress(&self, env: &StepEnv) -> Result<Option<u64>> {
        count_table(env, "users")
    }

    fn items(&self, env: &StepEnv, emit: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        stream_table(
            env,
            "users",
            "SELECT id, username, email, name, created_at FROM users ORDER BY id",
            emit,
        )
    }

    fn process_item(&self, item: &Row, ctx: &mut ItemContext<'_>) -> anyhow::Result<()> {
        let original_id = required_text(item, "id")?;
        let username = required_text(item, "username")
            .with_context(|| format!("user {} has no username", original_id))?;
        let created_at = normalize_timestamp(item.get("created_at"))
            .with_context(|| format!("user {} has an invalid created_at", original_id))?
            .with_context(|| format!("user {} has no created_at", original_id))?;

        ctx.insert(&User {
            original_id,
            username,
            email: item
                .text("email")
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty()),
            name: item.text("name").filter(|n| !n.trim().is_empty()),
            created_at,
        })
    }
}
