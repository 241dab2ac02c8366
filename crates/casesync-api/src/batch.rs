use serde::{Deserialize, Serialize};

/// Result of applying one remote record to the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    /// Formatted as `"{kind} {external_id}: {message}"`
    Failed(String),
}

/// Per-batch aggregation of record outcomes. Not persisted on its own;
/// folded into the parent run's details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn record(&mut self, outcome: RecordOutcome) {
        self.processed += 1;
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Failed(message) => self.errors.push(message),
        }
    }

    pub fn merge(&mut self, other: BatchResult) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.errors.extend(other.errors);
    }

    pub fn failed(&self) -> u64 {
        self.errors.len() as u64
    }
}

impl FromIterator<RecordOutcome> for BatchResult {
    fn from_iter<I: IntoIterator<Item = RecordOutcome>>(iter: I) -> Self {
        let mut result = BatchResult::default();
        for outcome in iter {
            result.record(outcome);
        }
        result
    }
}
