//! Failure diagnostics and re-synthesis of a failed attempt.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument};

use crate::core::history::{AttemptRecord, History};
use crate::core::types::ActionRecord;
use crate::error::PilotError;
use crate::interpret::ExecutionFailure;
use crate::io::model::LanguageModel;
use crate::synth::Synthesizer;

/// Alias the prompt uses for the capability surface.
pub const SURFACE_ALIAS: &str = "env";

/// Message lines kept in a diagnostic.
const MAX_MESSAGE_LINES: usize = 6;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ansi regex"));
static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid whitespace regex"));

/// Short name of a surface type, e.g. `TranscriptBrowser`.
pub fn host_name<B: ?Sized>() -> &'static str {
    let full = std::any::type_name::<B>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Build the diagnostic fed back to the model.
///
/// `Failed on line {n}: {source}` followed by the first lines of the error
/// message with ANSI escapes removed, runs of spaces collapsed and the
/// surface type name replaced with its prompt alias. The result is cut to
/// `limit` bytes on a char boundary.
pub fn reduce_failure(failure: &ExecutionFailure, host_name: &str, limit: usize) -> String {
    let message = ANSI_ESCAPE.replace_all(&failure.message, "");
    let message = if host_name.is_empty() {
        message.into_owned()
    } else {
        let pattern = format!(r"\b{}\b", regex::escape(host_name));
        match Regex::new(&pattern) {
            Ok(host) => host.replace_all(&message, SURFACE_ALIAS).into_owned(),
            Err(_) => message.into_owned(),
        }
    };
    let lines: Vec<String> = message
        .lines()
        .map(|line| HORIZONTAL_SPACE.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .take(MAX_MESSAGE_LINES)
        .collect();

    let mut diagnostic = format!("Failed on line {}: {}", failure.line, failure.source_line);
    if !lines.is_empty() {
        diagnostic.push('\n');
        diagnostic.push_str(&lines.join("\n"));
    }
    truncate_to_boundary(&mut diagnostic, limit);
    diagnostic
}

fn truncate_to_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Replaces the in-flight attempt with a re-synthesized one.
#[derive(Debug, Clone)]
pub struct RetryController {
    host_name: String,
    diagnostic_limit: usize,
}

impl RetryController {
    pub fn new(host_name: impl Into<String>, diagnostic_limit: usize) -> Self {
        Self {
            host_name: host_name.into(),
            diagnostic_limit,
        }
    }

    pub fn diagnose(&self, failure: &ExecutionFailure) -> String {
        reduce_failure(failure, &self.host_name, self.diagnostic_limit)
    }

    /// Re-synthesize the current attempt with `diagnostic` and swap it into
    /// `history`. Returns `None` when no attempt is in flight.
    #[instrument(skip_all)]
    pub fn retry<M: LanguageModel>(
        &self,
        history: &mut History,
        synth: &mut Synthesizer<M>,
        diagnostic: &str,
    ) -> Result<Option<ActionRecord>, PilotError> {
        let Some(previous) = history.current().map(AttemptRecord::to_action_record) else {
            return Ok(None);
        };
        let record = synth.synthesize_retry(&previous, diagnostic)?;
        if let Some(current) = history.replace_current(record.clone()) {
            info!(attempts = current.attempts, "replaced failed attempt");
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::history::AttemptState;
    use crate::core::types::Instruction;
    use crate::synth::SynthSettings;
    use crate::test_support::ScriptedModel;

    fn failure(message: &str) -> ExecutionFailure {
        ExecutionFailure {
            line: 2,
            source_line: "click(box)".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn diagnostic_names_line_and_normalizes_message() {
        let diagnostic = reduce_failure(
            &failure("click failed:\x1b[31m  FakeBrowser   refused\x1b[0m\n\n  element   hidden"),
            "FakeBrowser",
            2000,
        );
        assert_eq!(
            diagnostic,
            "Failed on line 2: click(box)\nclick failed: env refused\nelement hidden"
        );
    }

    #[test]
    fn diagnostic_is_truncated_on_char_boundary() {
        let diagnostic = reduce_failure(&failure("ééééééééé"), "", 40);
        assert!(diagnostic.len() <= 40);
        assert!(diagnostic.starts_with("Failed on line 2: click(box)\n"));
    }

    #[test]
    fn host_name_strips_module_path() {
        assert_eq!(host_name::<crate::test_support::FakeBrowser>(), "FakeBrowser");
    }

    #[test]
    fn retry_replaces_current_attempt() {
        let model = ScriptedModel::new(["click(find_element(\"id\", \"box\"))"]);
        let mut synth = Synthesizer::new(
            &model,
            SynthSettings {
                temperature: 0.0,
                max_tokens: 64,
                transient_backoff: Duration::ZERO,
            },
        );
        let mut history = History::new();
        history.begin(ActionRecord::new(Instruction::new("Click the box"), "click(box)"));
        let controller = RetryController::new("FakeBrowser", 2000);

        let record = controller
            .retry(&mut history, &mut synth, "Failed on line 1: click(box)")
            .expect("retry")
            .expect("in flight");

        assert_eq!(record.action, "click(find_element(\"id\", \"box\"))");
        assert_eq!(history.len(), 1);
        let current = &history.records()[0];
        assert_eq!(current.attempts, 2);
        assert_eq!(current.state, AttemptState::Attempted);
        assert_eq!(current.action, record.action);
    }

    #[test]
    fn retry_without_attempt_is_a_no_op() {
        let model = ScriptedModel::default();
        let mut synth = Synthesizer::new(
            &model,
            SynthSettings {
                temperature: 0.0,
                max_tokens: 64,
                transient_backoff: Duration::ZERO,
            },
        );
        let mut history = History::new();
        let controller = RetryController::new("FakeBrowser", 2000);
        assert_eq!(
            controller.retry(&mut history, &mut synth, "x").expect("retry"),
            None
        );
        assert_eq!(model.calls(), 0);
    }
}
