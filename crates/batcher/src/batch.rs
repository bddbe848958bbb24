use chrono::{DateTime, Utc};
use serde::Serialize;

/// All items that were pending when a flush happened, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub sequence: u64,
    pub flushed_at: DateTime<Utc>,
    items: Vec<String>,
}

impl Batch {
    pub fn new(sequence: u64, items: Vec<String>) -> Self {
        Self {
            sequence,
            flushed_at: Utc::now(),
            items,
        }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn into_items(self) -> Vec<String> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
