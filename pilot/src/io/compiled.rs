//! Compiled-script documents.
//!
//! A finished step-through run can be saved as YAML or JSON and replayed
//! later without model calls:
//!
//! ```yaml
//! instructions: [ ...instruction lines... ]
//! compiled: [ ...action lines... ]
//! steps:
//!   - instruction: ...
//!     action: ...
//! ```
//!
//! `instructions` and `compiled` are flat line lists: every record's text is
//! split on `\n` and concatenated, so record boundaries are lost. `steps`
//! keeps the instruction/action pairs intact and is preferred when present.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::history::{AttemptState, History};
use crate::core::script::{ParseError, Script, parse_script};
use crate::core::types::{ActionRecord, Instruction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledStep {
    pub instruction: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledScript {
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<CompiledStep>>,
}

/// Document encodings, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// `None` for anything other than `.yaml`, `.yml` or `.json`.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Some(DocumentFormat::Yaml),
            Some("json") => Some(DocumentFormat::Json),
            _ => None,
        }
    }
}

/// How a loaded document should be run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedPlan {
    /// Synthesize each instruction in turn.
    StepThrough(Script),
    /// Execute pre-baked actions.
    Replay {
        records: Vec<ActionRecord>,
        /// True when the records came from `steps` and keep their boundaries.
        explicit_steps: bool,
    },
}

/// Split each record's instruction and action on `\n` and concatenate.
pub fn flatten(records: &[ActionRecord]) -> (Vec<String>, Vec<String>) {
    let instructions = records
        .iter()
        .flat_map(|record| record.instruction.lines().map(str::to_string))
        .collect();
    let actions = records
        .iter()
        .flat_map(|record| record.action.split('\n').map(str::to_string))
        .collect();
    (instructions, actions)
}

/// Build a document from every non-failed record in `history`.
pub fn serialize(history: &History) -> CompiledScript {
    let records: Vec<ActionRecord> = history
        .records()
        .iter()
        .filter(|record| record.state != AttemptState::Failed)
        .map(|record| record.to_action_record())
        .collect();
    let (instructions, compiled) = flatten(&records);
    let steps = records
        .into_iter()
        .map(|record| CompiledStep {
            instruction: record.instruction.as_str().to_string(),
            action: record.action,
        })
        .collect();
    CompiledScript {
        instructions,
        compiled: Some(compiled),
        steps: Some(steps),
    }
}

/// The flat instruction and action lines of a document.
pub fn deserialize(doc: &CompiledScript) -> (Vec<String>, Vec<String>) {
    (
        doc.instructions.clone(),
        doc.compiled.clone().unwrap_or_default(),
    )
}

impl CompiledScript {
    /// True when the document carries pre-baked actions.
    pub fn has_actions(&self) -> bool {
        self.steps.as_ref().is_some_and(|steps| !steps.is_empty())
            || self.compiled.as_ref().is_some_and(|lines| !lines.is_empty())
    }

    /// Decide between replay and step-through.
    ///
    /// With `use_compiled` and actions present, `steps` replay one record per
    /// step while legacy `compiled` lines replay as a single record. Otherwise
    /// the instructions are synthesized again: from `steps` when present, else
    /// by parsing the joined `instructions` lines as a script.
    pub fn plan(&self, use_compiled: bool) -> Result<LoadedPlan, ParseError> {
        if use_compiled && self.has_actions() {
            if let Some(steps) = self.steps.as_ref().filter(|steps| !steps.is_empty()) {
                let records = steps
                    .iter()
                    .map(|step| {
                        ActionRecord::new(Instruction::new(step.instruction.clone()), &step.action)
                    })
                    .collect();
                return Ok(LoadedPlan::Replay {
                    records,
                    explicit_steps: true,
                });
            }
            let (instructions, actions) = deserialize(self);
            let record = ActionRecord::new(Instruction::new(instructions.join("\n")), actions.join("\n"));
            return Ok(LoadedPlan::Replay {
                records: vec![record],
                explicit_steps: false,
            });
        }
        if let Some(steps) = self.steps.as_ref().filter(|steps| !steps.is_empty()) {
            let queue = steps
                .iter()
                .map(|step| Instruction::new(step.instruction.clone()))
                .filter(|instruction| !instruction.is_blank())
                .collect();
            return Ok(LoadedPlan::StepThrough(Script {
                queue,
                functions: Default::default(),
            }));
        }
        parse_script(&self.instructions.join("\n")).map(LoadedPlan::StepThrough)
    }
}

/// Load a compiled document; the format follows the file extension.
pub fn load_compiled(path: &Path) -> Result<CompiledScript> {
    let Some(format) = DocumentFormat::from_path(path) else {
        bail!(
            "compiled script {} must end with .yaml, .yml or .json",
            path.display()
        );
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let doc = match format {
        DocumentFormat::Yaml => serde_yaml::from_str(&contents)
            .with_context(|| format!("parse yaml {}", path.display()))?,
        DocumentFormat::Json => serde_json::from_str(&contents)
            .with_context(|| format!("parse json {}", path.display()))?,
    };
    Ok(doc)
}

/// Atomically write a compiled document (temp file + rename).
pub fn save_compiled(path: &Path, doc: &CompiledScript) -> Result<()> {
    let Some(format) = DocumentFormat::from_path(path) else {
        bail!(
            "output {} must end with .yaml, .yml or .json",
            path.display()
        );
    };
    let buf = match format {
        DocumentFormat::Yaml => serde_yaml::to_string(doc).context("serialize compiled yaml")?,
        DocumentFormat::Json => {
            let mut buf = serde_json::to_string_pretty(doc).context("serialize compiled json")?;
            buf.push('\n');
            buf
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);
    fs::write(tmp_path, buf).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
