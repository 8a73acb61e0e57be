//! `pilot`: compile and run natural-language browser task scripts.
//!
//! Scripts are plain text. Contiguous instruction lines merge into one block
//! and each `RUN_FUNCTION` call stands alone, alongside the
//! `BEGIN_FUNCTION`/`END_FUNCTION` and `INJECT_FUNCTION` markers. `.yaml`,
//! `.yml` and `.json` inputs are compiled documents from a previous run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use pilot::core::script::{Script, parse_script};
use pilot::engine::{Engine, EngineSettings, RunSummary};
use pilot::error::PilotError;
use pilot::exit_codes;
use pilot::io::compiled::{DocumentFormat, LoadedPlan, load_compiled, save_compiled};
use pilot::io::config::{DEFAULT_CONFIG_PATH, PilotConfig, load_config, write_config};
use pilot::io::model::CommandModel;
use pilot::io::surface::TranscriptBrowser;
use pilot::logging;
use pilot::synth::SynthSettings;

#[derive(Parser)]
#[command(
    name = "pilot",
    version,
    about = "Compile natural-language browser scripts into actions and run them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a script and print its instruction blocks (no model calls).
    Compile {
        script: PathBuf,
    },
    /// Run a script, or replay a compiled document.
    Run {
        script: PathBuf,
        /// Config file; defaults apply when it does not exist.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Save the compiled document here (.yaml, .yml or .json).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Append every browser call to this file as JSON lines.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    /// Write the default config file.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Compile { script } => cmd_compile(&script),
        Command::Run {
            script,
            config,
            output,
            transcript,
        } => cmd_run(
            &script,
            &config,
            output.as_deref(),
            transcript.as_deref(),
        ),
        Command::InitConfig { config, force } => cmd_init_config(&config, force),
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PilotError>() {
        Some(PilotError::SafetyViolation { .. }) => exit_codes::SAFETY_VIOLATION,
        Some(
            PilotError::Synthesis(_)
            | PilotError::RetriesExhausted { .. }
            | PilotError::Replay { .. },
        ) => exit_codes::FAILED,
        Some(PilotError::Parse(_) | PilotError::Prompt(_)) | None => exit_codes::INVALID,
    }
}

fn cmd_compile(path: &Path) -> Result<()> {
    let script = read_script(path)?;
    info!(
        blocks = script.queue.len(),
        functions = script.functions.len(),
        "compiled script"
    );
    for (idx, instruction) in script.queue.iter().enumerate() {
        if idx > 0 {
            println!();
        }
        println!("[{}]", idx + 1);
        println!("{instruction}");
    }
    Ok(())
}

fn cmd_run(
    path: &Path,
    config_path: &Path,
    output: Option<&Path>,
    transcript: Option<&Path>,
) -> Result<()> {
    let cfg = load_config(config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    if let Some(output) = output
        && DocumentFormat::from_path(output).is_none()
    {
        bail!("output {} must end with .yaml, .yml or .json", output.display());
    }

    let plan = if DocumentFormat::from_path(path).is_some() {
        load_compiled(path)?
            .plan(cfg.engine.use_compiled)
            .map_err(PilotError::from)
            .with_context(|| format!("parse instructions in {}", path.display()))?
    } else {
        LoadedPlan::StepThrough(read_script(path)?)
    };

    let browser = match transcript {
        Some(transcript) => TranscriptBrowser::with_transcript(transcript)?,
        None => TranscriptBrowser::new(),
    };
    let (script, replay) = match plan {
        LoadedPlan::StepThrough(script) => (script, None),
        LoadedPlan::Replay {
            records,
            explicit_steps,
        } => (Script::default(), Some((records, explicit_steps))),
    };
    let mut engine = new_engine(&cfg, script, browser);
    let summary = match replay {
        Some((records, explicit_steps)) => engine.replay(records, explicit_steps)?,
        None => engine.run()?,
    };
    print_summary(&summary);

    if let Some(output) = output {
        save_compiled(output, &engine.into_compiled())?;
        println!("wrote {}", output.display());
    }
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &PilotConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn read_script(path: &Path) -> Result<Script> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let script = parse_script(&raw)
        .map_err(PilotError::from)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(script)
}

fn new_engine(
    cfg: &PilotConfig,
    script: Script,
    browser: TranscriptBrowser,
) -> Engine<CommandModel, TranscriptBrowser> {
    Engine::new(
        script,
        CommandModel::from_config(&cfg.model),
        browser,
        SynthSettings::from(&cfg.model),
        EngineSettings::from(&cfg.engine),
    )
}

fn print_summary(summary: &RunSummary) {
    println!(
        "advanced: {}, surfaced: {}, replayed: {}, skipped blank: {}, cache hits: {}",
        summary.advanced,
        summary.surfaced,
        summary.replayed,
        summary.skipped_blank,
        summary.cache_hits
    );
}
