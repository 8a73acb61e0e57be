//! Errors that end a run.

use thiserror::Error;

use crate::core::script::ParseError;
use crate::io::model::ModelError;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("invalid script: {0}")]
    Parse(#[from] ParseError),

    #[error("synthesis failed: {0}")]
    Synthesis(ModelError),

    #[error("render prompt: {0}")]
    Prompt(#[from] minijinja::Error),

    #[error("unsafe action for instruction `{instruction}` (matched `{token}`):\n{action}")]
    SafetyViolation {
        instruction: String,
        action: String,
        token: &'static str,
    },

    #[error("instruction `{instruction}` still failing after {attempts} attempts: {diagnostic}")]
    RetriesExhausted {
        instruction: String,
        attempts: u32,
        diagnostic: String,
    },

    #[error("replay of step {step} failed: {diagnostic}")]
    Replay { step: usize, diagnostic: String },
}

impl From<ModelError> for PilotError {
    fn from(err: ModelError) -> Self {
        PilotError::Synthesis(err)
    }
}
