//! Language-model backend abstraction.
//!
//! The [`LanguageModel`] trait decouples synthesis from the actual provider.
//! [`CommandModel`] shells out to a configured CLI (prompt on stdin, completion
//! on stdout). Tests use scripted models that return predetermined completions
//! without spawning processes.

use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;

/// Stop sequence the action prompt is built around.
pub const CODE_FENCE: &str = "```";

/// Parameters for one completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            max_tokens,
            stop: vec![CODE_FENCE.to_string()],
        }
    }
}

/// Provider failure classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Rate limiting, timeouts and connectivity faults. The same request is resent.
    #[error("transient model error: {0}")]
    Transient(String),
    /// Anything else. Ends the run.
    #[error("model error: {0}")]
    Fatal(String),
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// Abstraction over completion providers.
pub trait LanguageModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        (**self).complete(request)
    }
}

/// Markers in provider stderr that indicate a fault worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "429",
    "timeout",
    "timed out",
    "connection",
    "temporarily unavailable",
    "503",
    "overloaded",
];

/// Model backend that spawns a command per request.
#[derive(Debug, Clone)]
pub struct CommandModel {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.timeout(), cfg.output_limit_bytes)
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(program = %self.argv.first().map(String::as_str).unwrap_or(""), timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| ModelError::Fatal("model command is empty".to_string()))?;
        info!("requesting completion");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("PILOT_TEMPERATURE", request.temperature.to_string())
            .env("PILOT_MAX_TOKENS", request.max_tokens.to_string())
            .env("PILOT_STOP", request.stop.join("\n"));

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        // A command that cannot be spawned will not start working on its own.
        .map_err(|err| ModelError::Fatal(format!("{err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(ModelError::Transient(format!(
                "model command timed out after {:?}",
                self.timeout
            )));
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(classify_failure(output.status.code(), &stderr));
        }

        let completion = truncate_at_stop(&output.stdout_lossy(), &request.stop);
        debug!(bytes = completion.len(), "completion received");
        Ok(completion)
    }
}

fn classify_failure(code: Option<i32>, stderr: &str) -> ModelError {
    let lowered = stderr.to_lowercase();
    let summary = stderr.trim().lines().last().unwrap_or("").to_string();
    let message = format!("exit status {code:?}: {summary}");
    if TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        ModelError::Transient(message)
    } else {
        ModelError::Fatal(message)
    }
}

/// Cut the completion at the first stop sequence that follows some content.
///
/// A leading fence (the model opening a code block) is skipped, not treated as a stop.
fn truncate_at_stop(text: &str, stop: &[String]) -> String {
    let trimmed = text.trim_start();
    let body = match trimmed.strip_prefix(CODE_FENCE) {
        // Drop the info string (e.g. "text") on the opening fence line.
        Some(rest) => rest.split_once('\n').map(|(_, body)| body).unwrap_or(""),
        None => trimmed,
    };
    let cut = stop
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| body.find(s.as_str()))
        .min()
        .unwrap_or(body.len());
    body[..cut].to_string()
}
