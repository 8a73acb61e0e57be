//! Shared deterministic types for the script compiler and execution engine.
//!
//! These types define stable contracts between core components. They must not
//! depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One natural-language unit of work submitted to the synthesizer.
///
/// Immutable once dequeued. Queue order is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instruction(String);

impl Instruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the block holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.split('\n')
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Instruction {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An instruction paired with the action text synthesized for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub instruction: Instruction,
    pub action: String,
}

impl ActionRecord {
    pub fn new(instruction: Instruction, action: impl Into<String>) -> Self {
        Self {
            instruction,
            action: action.into(),
        }
    }
}

/// Policy applied when an instruction runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExhausted {
    /// Stop the run and return the failure to the caller.
    Fatal,
    /// Report the failure and move on to the next instruction.
    Continue,
}

/// Policy applied when a pre-compiled step fails during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOnFailure {
    /// Replay failures end the run.
    Fatal,
    /// Re-synthesize the failing step and every step after it.
    StepThrough,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_instruction_detects_whitespace_only() {
        assert!(Instruction::new(" \n\t").is_blank());
        assert!(!Instruction::new("go to example.com").is_blank());
    }

    #[test]
    fn on_exhausted_uses_snake_case() {
        let value: OnExhausted = serde_json::from_str("\"continue\"").expect("parse");
        assert_eq!(value, OnExhausted::Continue);
        let value: ReplayOnFailure = serde_json::from_str("\"step_through\"").expect("parse");
        assert_eq!(value, ReplayOnFailure::StepThrough);
    }
}
