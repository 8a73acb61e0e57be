//! Pilot configuration stored in `pilot.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{OnExhausted, ReplayOnFailure};

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "pilot.toml";

/// Pilot configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PilotConfig {
    pub model: ModelConfig,
    pub engine: EngineConfig,
}

/// Language-model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command that reads a prompt on stdin and prints the completion (e.g. `["llm","-m","gpt-4o-mini"]`).
    pub command: Vec<String>,

    /// Wall-clock limit for one completion request.
    pub timeout_secs: u64,

    /// Truncate model stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Fixed delay before resending a request after a transient provider fault.
    pub transient_backoff_secs: u64,

    pub temperature: f32,

    pub max_tokens: u32,
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Synthesis requests allowed per instruction, first attempt included.
    pub max_attempts: u32,

    pub on_exhausted: OnExhausted,

    /// Run the static deny-list check before executing each action.
    pub safety_check: bool,

    /// Replay pre-compiled actions when a document carries them.
    pub use_compiled: bool,

    pub replay_on_failure: ReplayOnFailure,

    /// Upper bound on the failure diagnostic fed back into retry prompts.
    pub diagnostic_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "llm".to_string(),
                "-m".to_string(),
                "gpt-4o-mini".to_string(),
            ],
            timeout_secs: 120,
            output_limit_bytes: 100_000,
            transient_backoff_secs: 5,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            on_exhausted: OnExhausted::Fatal,
            safety_check: true,
            use_compiled: true,
            replay_on_failure: ReplayOnFailure::Fatal,
            diagnostic_limit_bytes: 2_000,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn transient_backoff(&self) -> Duration {
        Duration::from_secs(self.transient_backoff_secs)
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!("model.temperature must be within 0.0..=2.0"));
        }
        if self.model.max_tokens == 0 {
            return Err(anyhow!("model.max_tokens must be > 0"));
        }
        if self.engine.max_attempts == 0 {
            return Err(anyhow!("engine.max_attempts must be > 0"));
        }
        if self.engine.diagnostic_limit_bytes == 0 {
            return Err(anyhow!("engine.diagnostic_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PilotConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        let mut cfg = PilotConfig::default();
        cfg.engine.on_exhausted = OnExhausted::Continue;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pilot.toml");
        fs::write(
            &path,
            "[engine]\nmax_attempts = 5\nreplay_on_failure = \"step_through\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.engine.max_attempts, 5);
        assert_eq!(cfg.engine.replay_on_failure, ReplayOnFailure::StepThrough);
        assert_eq!(cfg.model, ModelConfig::default());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut cfg = PilotConfig::default();
        cfg.engine.max_attempts = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }
}
