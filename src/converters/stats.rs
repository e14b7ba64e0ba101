//! Run statistics collected per step execution.

use serde::{Deserialize, Serialize};

use crate::error::cause_chain;
use crate::value::Row;

/// A failure confined to a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub message: String,
    pub cause: Option<String>,
    /// The offending item, when the failure can be traced to one.
    pub item: Option<Row>,
}

impl ItemError {
    pub fn new(message: impl Into<String>, cause: Option<String>, item: Option<Row>) -> Self {
        Self {
            message: message.into(),
            cause,
            item,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error, item: Option<Row>) -> Self {
        Self::new(err.to_string(), cause_chain(&**err), item)
    }
}

/// Counters and errors for one step run (or one worker batch).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub processed_count: u64,
    pub error_count: u64,
    #[serde(default)]
    pub skipped_count: u64,
    pub errors: Vec<ItemError>,
}

impl RunStats {
    pub fn record_error(&mut self, error: ItemError) {
        self.error_count += 1;
        self.errors.push(error);
    }

    /// Fold another run's counters into this one.
    pub fn merge(&mut self, other: RunStats) {
        self.processed_count += other.processed_count;
        self.error_count += other.error_count;
        self.skipped_count += other.skipped_count;
        self.errors.extend(other.errors);
    }

    /// Stats for a batch that was lost as a whole, e.g. because its worker died.
    pub fn failed_batch(items: &[Row], message: &str) -> Self {
        let mut stats = Self::default();
        for item in items {
            stats.processed_count += 1;
            stats.record_error(ItemError::new(
                "item was not processed",
                Some(message.to_string()),
                Some(item.clone()),
            ));
        }
        stats
    }

    /// The first `limit` errors, for summaries.
    pub fn sample(&self, limit: usize) -> &[ItemError] {
        &self.errors[..self.errors.len().min(limit)]
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_accumulates() {
        let mut total = RunStats {
            processed_count: 2,
            ..RunStats::default()
        };
        let mut batch = RunStats {
            processed_count: 3,
            skipped_count: 1,
            ..RunStats::default()
        };
        batch.record_error(ItemError::new("bad row", None, None));

        total.merge(batch);
        assert_eq!(total.processed_count, 5);
        assert_eq!(total.error_count, 1);
        assert_eq!(total.skipped_count, 1);
        assert_eq!(total.errors[0].message, "bad row");
    }

    #[test]
    fn test_failed_batch_counts_every_item() {
        let items = vec![Row::new().with("id", 1i64), Row::new().with("id", 2i64)];
        let stats = RunStats::failed_batch(&items, "worker 0 exited");
        assert_eq!(stats.processed_count, 2);
        assert_eq!(stats.error_count, 2);
        assert_eq!(stats.errors[1].item.as_ref().and_then(|r| r.int("id")), Some(2));
        assert_eq!(stats.sample(1).len(), 1);
    }

    #[test]
    fn test_item_error_from_anyhow_keeps_chain() {
        let err = anyhow::anyhow!("not a number").context("invalid integer setting");
        let item_error = ItemError::from_anyhow(&err, None);
        assert_eq!(item_error.message, "invalid integer setting");
        assert_eq!(item_error.cause.as_deref(), Some("not a number"));
    }
}
