//! Schema scripts embedded at compile time.

use std::fmt;
use std::str::FromStr;

/// Which embedded schema a store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SchemaKind {
    /// Staging tables written by converters.
    #[default]
    Intermediate,
    /// ID mapping table written by importers.
    Mappings,
    /// Materialized upload artifacts.
    Uploads,
    /// Reference SQLite destination schema.
    Destination,
}

static INTERMEDIATE_SCRIPTS: &[(&str, &str)] = &[
    (
        "intermediate/001-base-schema.sql",
        include_str!("../../db/intermediate/001-base-schema.sql"),
    ),
    (
        "intermediate/002-indexes.sql",
        include_str!("../../db/intermediate/002-indexes.sql"),
    ),
];

static MAPPINGS_SCRIPTS: &[(&str, &str)] = &[(
    "mappings/001-mapped-ids.sql",
    include_str!("../../db/mappings/001-mapped-ids.sql"),
)];

static UPLOADS_SCRIPTS: &[(&str, &str)] = &[(
    "uploads/001-uploads.sql",
    include_str!("../../db/uploads/001-uploads.sql"),
)];

static DESTINATION_SCRIPTS: &[(&str, &str)] = &[(
    "destination/001-reference-schema.sql",
    include_str!("../../db/destination/001-reference-schema.sql"),
)];

impl SchemaKind {
    /// Embedded `(path, sql)` scripts for this schema.
    pub fn scripts(self) -> &'static [(&'static str, &'static str)] {
        match self {
            SchemaKind::Intermediate => INTERMEDIATE_SCRIPTS,
            SchemaKind::Mappings => MAPPINGS_SCRIPTS,
            SchemaKind::Uploads => UPLOADS_SCRIPTS,
            SchemaKind::Destination => DESTINATION_SCRIPTS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaKind::Intermediate => "intermediate",
            SchemaKind::Mappings => "mappings",
            SchemaKind::Uploads => "uploads",
            SchemaKind::Destination => "destination",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intermediate" => Ok(SchemaKind::Intermediate),
            "mappings" => Ok(SchemaKind::Mappings),
            "uploads" => Ok(SchemaKind::Uploads),
            "destination" => Ok(SchemaKind::Destination),
            other => Err(format!("unknown schema: {}", other)),
        }
    }
}
