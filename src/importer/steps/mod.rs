//! Bundled importer steps for the reference destination schema.

mod site_settings;
mod tag_groups;
mod tags;
mod uploads;
mod users;

pub use site_settings::SiteSettingsStep;
pub use tag_groups::TagGroupsStep;
pub use tags::TagsStep;
pub use uploads::{UploadsStep, SYSTEM_USER_ID};
pub use users::{sanitize_username, UsersStep};

/// Wrap a row query body (everything after the select list) as a count.
pub(crate) fn count_query(body: &str) -> String {
    format!("SELECT COUNT(*) {}", body)
}
