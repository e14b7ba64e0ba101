//! Staging record types stored in the Intermediate Store.

use crate::value::{SqlValue, Statement};

/// How an insert behaves when the row's key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Fail the statement.
    Abort,
    /// Keep the existing row.
    Ignore,
}

/// A normalized, source-agnostic record with a fixed staging table.
pub trait StagingRecord {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const ON_CONFLICT: OnConflict = OnConflict::Abort;

    /// Values in `COLUMNS` order.
    fn values(&self) -> Vec<SqlValue>;

    fn insert_sql() -> String {
        let verb = match Self::ON_CONFLICT {
            OnConflict::Abort => "INSERT",
            OnConflict::Ignore => "INSERT OR IGNORE",
        };
        let placeholders = vec!["?"; Self::COLUMNS.len()].join(", ");
        format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            Self::TABLE,
            Self::COLUMNS.join(", "),
            placeholders
        )
    }

    fn to_statement(&self) -> Statement {
        Statement::new(Self::insert_sql(), self.values())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub original_id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: String,
}

impl StagingRecord for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] =
        &["original_id", "username", "email", "name", "created_at"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.original_id.clone().into(),
            self.username.clone().into(),
            self.email.clone().into(),
            self.name.clone().into(),
            self.created_at.clone().into(),
        ]
    }
}

/// An uploaded file with its content already fetched from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub id: String,
    pub user_id: Option<String>,
    pub filename: String,
    pub sha256: String,
    pub filesize: i64,
    pub data: Option<Vec<u8>>,
    pub origin: Option<String>,
    pub created_at: Option<String>,
}

impl StagingRecord for Upload {
    const TABLE: &'static str = "uploads";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "filename",
        "sha256",
        "filesize",
        "data",
        "origin",
        "created_at",
    ];
    const ON_CONFLICT: OnConflict = OnConflict::Ignore;

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.clone().into(),
            self.user_id.clone().into(),
            self.filename.clone().into(),
            self.sha256.clone().into(),
            self.filesize.into(),
            self.data.clone().into(),
            self.origin.clone().into(),
            self.created_at.clone().into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteSetting {
    pub name: String,
    pub value: Option<String>,
    pub data_type: String,
    pub last_changed_at: Option<String>,
}

impl StagingRecord for SiteSetting {
    const TABLE: &'static str = "site_settings";
    const COLUMNS: &'static [&'static str] = &["name", "value", "data_type", "last_changed_at"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.name.clone().into(),
            self.value.clone().into(),
            self.data_type.clone().into(),
            self.last_changed_at.clone().into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagGroup {
    pub original_id: String,
    pub name: String,
    pub one_per_topic: bool,
    pub created_at: Option<String>,
}

impl StagingRecord for TagGroup {
    const TABLE: &'static str = "tag_groups";
    const COLUMNS: &'static [&'static str] = &["original_id", "name", "one_per_topic", "created_at"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.original_id.clone().into(),
            self.name.clone().into(),
            self.one_per_topic.into(),
            self.created_at.clone().into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub original_id: String,
    pub name: String,
    pub tag_group_id: Option<String>,
    pub created_at: Option<String>,
}

impl StagingRecord for Tag {
    const TABLE: &'static str = "tags";
    const COLUMNS: &'static [&'static str] = &["original_id", "name", "tag_group_id", "created_at"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.original_id.clone().into(),
            self.name.clone().into(),
            self.tag_group_id.clone().into(),
            self.created_at.clone().into(),
        ]
    }
}
