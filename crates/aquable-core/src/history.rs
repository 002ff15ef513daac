//! Per-device command history.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use crate::pipeline::CommandRecord;

/// Records kept per address.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Records returned by [`CommandHistory::list`] when no limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// The most recent command records for every address, newest last.
#[derive(Debug)]
pub struct CommandHistory {
    capacity: usize,
    records: RwLock<HashMap<String, VecDeque<CommandRecord>>>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Store a record, replacing an earlier one with the same id.
    pub async fn save(&self, record: CommandRecord) {
        let mut records = self.records.write().await;
        let entries = records.entry(record.address.clone()).or_default();
        if let Some(existing) = entries.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
            return;
        }
        entries.push_back(record);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Up to `limit` records for `address`, newest first.
    pub async fn list(&self, address: &str, limit: Option<usize>) -> Vec<CommandRecord> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        self.records
            .read()
            .await
            .get(address)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get(&self, address: &str, id: &str) -> Option<CommandRecord> {
        self.records
            .read()
            .await
            .get(address)?
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}
