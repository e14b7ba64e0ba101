//! Discourse migration pipeline.
//!
//! Converters extract rows from a source platform into an Intermediate
//! Store, optionally fanned out over worker processes. Importers then load
//! the staged data into the destination in dependency order, recording an
//! ID mapping that makes every run resumable.

pub mod cli;
pub mod config;
pub mod converters;
pub mod database;
pub mod error;
pub mod importer;
pub mod progress;
pub mod source;
pub mod uploads;
pub mod value;
