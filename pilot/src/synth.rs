//! Action synthesis: prompt rendering, cache lookup and the model call.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::action::strip_fences;
use crate::core::cache::{PromptCache, content_hash};
use crate::core::types::{ActionRecord, Instruction};
use crate::error::PilotError;
use crate::io::config::ModelConfig;
use crate::io::model::{CompletionRequest, LanguageModel, ModelError};
use crate::io::prompt::PromptEngine;

/// Request parameters shared by every synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Pause before resending a request that failed transiently.
    pub transient_backoff: Duration,
}

impl From<&ModelConfig> for SynthSettings {
    fn from(cfg: &ModelConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            transient_backoff: cfg.transient_backoff(),
        }
    }
}

/// Turns instruction blocks into action text.
///
/// Completions are cached by the exact prompt, so an identical instruction
/// (or an identical retry) never reaches the model twice in one run.
pub struct Synthesizer<M> {
    model: M,
    prompts: PromptEngine,
    cache: PromptCache,
    settings: SynthSettings,
}

impl<M: LanguageModel> Synthesizer<M> {
    pub fn new(model: M, settings: SynthSettings) -> Self {
        Self {
            model,
            prompts: PromptEngine::new(),
            cache: PromptCache::new(),
            settings,
        }
    }

    pub fn cache(&self) -> &PromptCache {
        &self.cache
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// First attempt for an instruction block.
    #[instrument(skip_all, fields(chars = instruction.as_str().len()))]
    pub fn synthesize(&mut self, instruction: &Instruction) -> Result<ActionRecord, PilotError> {
        let prompt = self.prompts.render_action(instruction)?;
        let action = self.complete(prompt)?;
        info!(instruction = %instruction, action = %action, "synthesized action");
        Ok(ActionRecord::new(instruction.clone(), action))
    }

    /// Replacement for `previous`, which failed with `diagnostic`.
    ///
    /// The returned record keeps the instruction text of `previous`.
    #[instrument(skip_all, fields(chars = previous.instruction.as_str().len()))]
    pub fn synthesize_retry(
        &mut self,
        previous: &ActionRecord,
        diagnostic: &str,
    ) -> Result<ActionRecord, PilotError> {
        let prompt =
            self.prompts
                .render_retry(&previous.instruction, &previous.action, diagnostic)?;
        let action = self.complete(prompt)?;
        info!(instruction = %previous.instruction, action = %action, "re-synthesized action");
        Ok(ActionRecord::new(previous.instruction.clone(), action))
    }

    fn complete(&mut self, prompt: String) -> Result<String, PilotError> {
        let hash = content_hash(&prompt);
        if let Some(cached) = self.cache.get(&prompt) {
            debug!(prompt_hash = %hash, "prompt cache hit");
            return Ok(strip_fences(cached));
        }
        debug!(prompt_hash = %hash, "prompt cache miss");

        let request = CompletionRequest::new(
            prompt,
            self.settings.temperature,
            self.settings.max_tokens,
        );
        let mut transient_failures = 0u32;
        let completion = loop {
            match self.model.complete(&request) {
                Ok(completion) => break completion,
                Err(ModelError::Transient(message)) => {
                    transient_failures += 1;
                    warn!(
                        prompt_hash = %hash,
                        failures = transient_failures,
                        backoff_secs = self.settings.transient_backoff.as_secs_f64(),
                        error = %message,
                        "transient model error, resending"
                    );
                    thread::sleep(self.settings.transient_backoff);
                }
                Err(err @ ModelError::Fatal(_)) => return Err(PilotError::Synthesis(err)),
            }
        };

        let action = strip_fences(&completion);
        self.cache.insert(request.prompt, completion);
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;

    fn settings() -> SynthSettings {
        SynthSettings {
            temperature: 0.0,
            max_tokens: 256,
            transient_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn identical_prompt_is_served_from_cache() {
        let model = ScriptedModel::new(["navigate(\"example.com\")"]);
        let mut synth = Synthesizer::new(&model, settings());
        let instruction = Instruction::new("Go to example.com");

        let first = synth.synthesize(&instruction).expect("first");
        let second = synth.synthesize(&instruction).expect("second");

        assert_eq!(first, second);
        assert_eq!(model.calls(), 1);
        assert_eq!(synth.cache().hits(), 1);
        assert_eq!(synth.cache().misses(), 1);
    }

    #[test]
    fn transient_errors_resend_the_same_request() {
        let model = ScriptedModel::default();
        model.push_transient("rate limit");
        model.push_transient("timed out");
        model.push("wait(1)");
        let mut synth = Synthesizer::new(&model, settings());

        let record = synth
            .synthesize(&Instruction::new("Wait a second"))
            .expect("synthesize");

        assert_eq!(record.action, "wait(1)");
        assert_eq!(model.calls(), 3);
        let prompts = model.prompts();
        assert!(prompts.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn fatal_error_ends_synthesis() {
        let model = ScriptedModel::default();
        model.push_fatal("invalid api key");
        let mut synth = Synthesizer::new(&model, settings());

        let err = synth
            .synthesize(&Instruction::new("Go to example.com"))
            .unwrap_err();

        assert!(matches!(err, PilotError::Synthesis(ModelError::Fatal(_))));
        assert!(synth.cache().is_empty());
    }

    #[test]
    fn retry_prompt_extends_base_prompt_and_keeps_instruction() {
        let model = ScriptedModel::new(["```\nclick(find_element(\"css\", \"#go\"))\n```"]);
        let mut synth = Synthesizer::new(&model, settings());
        let previous = ActionRecord::new(Instruction::new("Click go"), "click(go)");

        let record = synth
            .synthesize_retry(&previous, "Failed on line 1: click(go)\n`go` is not defined")
            .expect("retry");

        assert_eq!(record.instruction, previous.instruction);
        assert_eq!(record.action, "click(find_element(\"css\", \"#go\"))");
        let prompt = &model.prompts()[0];
        let base = PromptEngine::new()
            .render_action(&previous.instruction)
            .expect("render");
        assert!(prompt.starts_with(&base));
        assert!(prompt.contains("The action above failed. See diagnostic: Failed on line 1"));
    }
}
