//! The retry-driven execution engine.
//!
//! One instruction is in flight at a time. Each `step` walks it through
//! `Dispatch → Synthesize → Gate → Execute` and then `Advance`, `Retry`
//! (back through `Gate`) or `Fatal`. Retries replace the failed attempt in
//! the history instead of appending after it, so execution order always
//! matches queue order.

use std::collections::VecDeque;

use tracing::{info, instrument, warn};

use crate::core::action::parse_action;
use crate::core::gate;
use crate::core::history::History;
use crate::core::script::Script;
use crate::core::types::{ActionRecord, Instruction, OnExhausted, ReplayOnFailure};
use crate::error::PilotError;
use crate::interpret::{ExecutionFailure, execute};
use crate::io::compiled::{CompiledScript, serialize};
use crate::io::config::EngineConfig;
use crate::io::model::LanguageModel;
use crate::io::surface::Browser;
use crate::retry::{RetryController, host_name};
use crate::synth::{SynthSettings, Synthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dispatch,
    Synthesize,
    Gate,
    Execute,
    Advance,
    Retry,
    Fatal,
}

/// Engine behavior knobs, usually taken from `[engine]` in the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Synthesis requests allowed per instruction, the first one included.
    pub max_attempts: u32,
    pub on_exhausted: OnExhausted,
    pub safety_check: bool,
    pub replay_on_failure: ReplayOnFailure,
    pub diagnostic_limit_bytes: usize,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            on_exhausted: cfg.on_exhausted,
            safety_check: cfg.safety_check,
            replay_on_failure: cfg.replay_on_failure,
            diagnostic_limit_bytes: cfg.diagnostic_limit_bytes,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The queue is empty.
    Idle,
    /// The instruction executed cleanly after `attempts` synthesis requests.
    Advanced { index: usize, attempts: u32 },
    /// Attempts ran out and the engine moved on (`on_exhausted = "continue"`).
    Surfaced { index: usize, diagnostic: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub advanced: usize,
    pub surfaced: usize,
    pub skipped_blank: usize,
    pub replayed: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct Engine<M, B> {
    queue: VecDeque<Instruction>,
    history: History,
    synth: Synthesizer<M>,
    browser: B,
    retry: RetryController,
    settings: EngineSettings,
    phase: Phase,
    dispatched: usize,
    summary: RunSummary,
}

impl<M: LanguageModel, B: Browser> Engine<M, B> {
    pub fn new(
        script: Script,
        model: M,
        browser: B,
        synth_settings: SynthSettings,
        settings: EngineSettings,
    ) -> Self {
        Self {
            queue: script.queue,
            history: History::new(),
            synth: Synthesizer::new(model, synth_settings),
            browser,
            retry: RetryController::new(host_name::<B>(), settings.diagnostic_limit_bytes),
            settings,
            phase: Phase::Idle,
            dispatched: 0,
            summary: RunSummary::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    pub fn synthesizer(&self) -> &Synthesizer<M> {
        &self.synth
    }

    /// Instructions still queued.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Run the next instruction to its resolution.
    #[instrument(skip_all, fields(index = self.dispatched))]
    pub fn step(&mut self) -> Result<StepOutcome, PilotError> {
        self.phase = Phase::Dispatch;
        let instruction = loop {
            match self.queue.pop_front() {
                None => {
                    self.phase = Phase::Idle;
                    return Ok(StepOutcome::Idle);
                }
                Some(instruction) if instruction.is_blank() => {
                    self.summary.skipped_blank += 1;
                }
                Some(instruction) => break instruction,
            }
        };
        let index = self.dispatched;
        self.dispatched += 1;

        self.phase = Phase::Synthesize;
        let record = match self.synth.synthesize(&instruction) {
            Ok(record) => record,
            Err(err) => return self.fatal(err),
        };
        let mut action = self.history.begin(record).action.clone();
        let mut attempts = 1u32;

        loop {
            self.phase = Phase::Gate;
            if self.settings.safety_check
                && let Err(violation) = gate::check(&action)
            {
                warn!(token = violation.token, action = %action, "gate rejected action");
                self.history.fail_current();
                return self.fatal(PilotError::SafetyViolation {
                    instruction: instruction.as_str().to_string(),
                    action,
                    token: violation.token,
                });
            }

            self.phase = Phase::Execute;
            let failure = match self.execute_action(&action) {
                Ok(()) => {
                    self.history.confirm_current();
                    self.phase = Phase::Advance;
                    self.summary.advanced += 1;
                    info!(index, attempts, "instruction advanced");
                    return Ok(StepOutcome::Advanced { index, attempts });
                }
                Err(failure) => failure,
            };

            let diagnostic = self.retry.diagnose(&failure);
            warn!(index, attempts, diagnostic = %diagnostic, "action failed");

            if attempts >= self.settings.max_attempts {
                self.history.fail_current();
                return match self.settings.on_exhausted {
                    OnExhausted::Fatal => self.fatal(PilotError::RetriesExhausted {
                        instruction: instruction.as_str().to_string(),
                        attempts,
                        diagnostic,
                    }),
                    OnExhausted::Continue => {
                        warn!(index, attempts, "attempts exhausted, continuing");
                        self.phase = Phase::Advance;
                        self.summary.surfaced += 1;
                        Ok(StepOutcome::Surfaced { index, diagnostic })
                    }
                };
            }

            self.phase = Phase::Retry;
            let retried = match self
                .retry
                .retry(&mut self.history, &mut self.synth, &diagnostic)
            {
                Ok(retried) => retried,
                Err(err) => return self.fatal(err),
            };
            let Some(record) = retried else {
                return self.fatal(PilotError::RetriesExhausted {
                    instruction: instruction.as_str().to_string(),
                    attempts,
                    diagnostic,
                });
            };
            action = record.action;
            attempts += 1;
        }
    }

    /// Step until the queue is empty.
    pub fn run(&mut self) -> Result<RunSummary, PilotError> {
        while self.step()? != StepOutcome::Idle {}
        Ok(self.summary())
    }

    /// Execute pre-baked actions in order without synthesis, gate or cache.
    ///
    /// A failure is fatal unless `replay_on_failure` is `step_through` and
    /// the records are explicit steps; then the failing step and every later
    /// one are queued for synthesis and the run continues step by step.
    #[instrument(skip_all, fields(records = records.len(), explicit_steps = explicit_steps))]
    pub fn replay(
        &mut self,
        records: Vec<ActionRecord>,
        explicit_steps: bool,
    ) -> Result<RunSummary, PilotError> {
        for (position, record) in records.iter().enumerate() {
            self.phase = Phase::Execute;
            match self.execute_action(&record.action) {
                Ok(()) => {
                    self.history.begin(record.clone());
                    self.history.confirm_current();
                    self.summary.replayed += 1;
                }
                Err(failure) => {
                    let step = position + 1;
                    let diagnostic = self.retry.diagnose(&failure);
                    if explicit_steps
                        && self.settings.replay_on_failure == ReplayOnFailure::StepThrough
                    {
                        warn!(step, diagnostic = %diagnostic, "replay failed, stepping through the rest");
                        self.queue = records[position..]
                            .iter()
                            .map(|record| record.instruction.clone())
                            .collect();
                        return self.run();
                    }
                    return self.fatal(PilotError::Replay { step, diagnostic });
                }
            }
        }
        self.phase = Phase::Idle;
        Ok(self.summary())
    }

    /// Compiled document of everything that did not fail.
    pub fn into_compiled(self) -> CompiledScript {
        serialize(&self.history)
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            cache_hits: self.synth.cache().hits(),
            cache_misses: self.synth.cache().misses(),
            ..self.summary.clone()
        }
    }

    fn execute_action(&mut self, action: &str) -> Result<(), ExecutionFailure> {
        let program = parse_action(action)?;
        if program.statements.is_empty() {
            return Err(ExecutionFailure {
                line: 1,
                source_line: String::new(),
                message: "action is empty".to_string(),
            });
        }
        execute(&program, &mut self.browser)?;
        Ok(())
    }

    fn fatal<T>(&mut self, err: PilotError) -> Result<T, PilotError> {
        self.phase = Phase::Fatal;
        Err(err)
    }
}
