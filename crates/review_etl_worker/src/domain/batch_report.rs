use common::domain::{EtlError, EtlResult};
use std::fmt;

/// Processing stage of one item: `Received -> Fetching -> Transforming ->
/// Writing -> Notifying -> Done`, with any stage able to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Received,
    Fetching,
    Transforming,
    Writing,
    Notifying,
    Done,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::Received => "received",
            ItemStage::Fetching => "fetching",
            ItemStage::Transforming => "transforming",
            ItemStage::Writing => "writing",
            ItemStage::Notifying => "notifying",
            ItemStage::Done => "done",
        }
    }
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ItemOutcome {
    /// Object written and notification accepted by the broker
    Completed {
        source_key: String,
        destination_key: String,
    },
    /// Notification could not be parsed; nothing to retry
    Skipped { reason: String },
    /// Aborted at `stage`; any earlier side effects are left in place
    Failed {
        source_key: String,
        stage: ItemStage,
        error: EtlError,
    },
}

impl ItemOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed { .. })
    }
}

/// Per-item outcomes of one batch invocation, in delivery order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn new(outcomes: Vec<ItemOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Completed { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(ItemOutcome::is_failed)
    }

    /// The error of the earliest failed item in delivery order
    pub fn first_failure(&self) -> Option<&EtlError> {
        self.outcomes.iter().find_map(|o| match o {
            ItemOutcome::Failed { error, .. } => Some(error),
            _ => None,
        })
    }

    /// Batch-level result: the first failure if any item failed.
    ///
    /// Completed items in a failed batch keep their side effects; whoever
    /// redelivers the batch will repeat them.
    pub fn into_result(self) -> EtlResult<Self> {
        let Some(position) = self.outcomes.iter().position(ItemOutcome::is_failed) else {
            return Ok(self);
        };

        let mut outcomes = self.outcomes;
        match outcomes.swap_remove(position) {
            ItemOutcome::Failed { error, .. } => Err(error),
            _ => unreachable!("position points at a failed outcome"),
        }
    }
}
