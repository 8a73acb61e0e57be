//! Per-instruction attempt bookkeeping.
//!
//! One record per dispatched instruction. A retry replaces the action of the
//! current record instead of appending a new one, so the history always holds
//! exactly one logical attempt per instruction.

use serde::{Deserialize, Serialize};

use crate::core::types::{ActionRecord, Instruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    /// Synthesized and provisionally counted as finished; not yet executed cleanly.
    Attempted,
    /// Executed without error.
    Confirmed,
    /// Ran out of attempts.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub instruction: Instruction,
    pub action: String,
    pub state: AttemptState,
    /// Synthesis requests issued for this instruction so far (1-based).
    pub attempts: u32,
}

impl AttemptRecord {
    pub fn to_action_record(&self) -> ActionRecord {
        ActionRecord::new(self.instruction.clone(), self.action.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    records: Vec<AttemptRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly synthesized record in the `Attempted` state.
    pub fn begin(&mut self, record: ActionRecord) -> &AttemptRecord {
        self.records.push(AttemptRecord {
            instruction: record.instruction,
            action: record.action,
            state: AttemptState::Attempted,
            attempts: 1,
        });
        let last = self.records.len() - 1;
        &self.records[last]
    }

    /// Swap in a re-synthesized action for the in-flight record.
    ///
    /// Returns `None` when there is no in-flight record.
    pub fn replace_current(&mut self, record: ActionRecord) -> Option<&AttemptRecord> {
        let current = self.current_mut()?;
        current.action = record.action;
        current.state = AttemptState::Attempted;
        current.attempts += 1;
        Some(&*current)
    }

    pub fn confirm_current(&mut self) {
        if let Some(current) = self.current_mut() {
            current.state = AttemptState::Confirmed;
        }
    }

    pub fn fail_current(&mut self) {
        if let Some(current) = self.current_mut() {
            current.state = AttemptState::Failed;
        }
    }

    /// The most recent record while it is still in flight.
    pub fn current(&self) -> Option<&AttemptRecord> {
        self.records
            .last()
            .filter(|record| record.state == AttemptState::Attempted)
    }

    fn current_mut(&mut self) -> Option<&mut AttemptRecord> {
        self.records
            .last_mut()
            .filter(|record| record.state == AttemptState::Attempted)
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn action_records(&self) -> Vec<ActionRecord> {
        self.records
            .iter()
            .map(AttemptRecord::to_action_record)
            .collect()
    }

    /// Instructions counted as finished (attempted or confirmed), in order.
    pub fn finished_instructions(&self) -> Vec<&Instruction> {
        self.records
            .iter()
            .filter(|record| record.state != AttemptState::Failed)
            .map(|record| &record.instruction)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
