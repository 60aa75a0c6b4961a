//! Parley CLI - headless developer tooling for the conversation engine.
//!
//! ```text
//! parley replay <file.jsonl>   reconcile recorded wire messages, print history
//! parley config                show the resolved configuration
//! ```

use std::{
    env,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use parley_engine::types::{UiMessage, WireMessage};
use parley_engine::{EngineSettings, ParleyConfig, reconcile};

const USAGE: &str = "usage: parley <command>

commands:
  replay <file.jsonl>   reconcile one wire message per line and print the history
  config                print the configuration path and effective values";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_parley_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries command output, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_parley_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in parley_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn parley_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.parley/logs/parley.log, even when PARLEY_CONFIG points elsewhere
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".parley").join("logs").join("parley.log"));
    }

    // Fallback: ./.parley/logs/parley.log
    candidates.push(PathBuf::from(".parley").join("logs").join("parley.log"));

    candidates
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Replay(PathBuf),
    Config,
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        match args.next().as_deref() {
            Some("replay") => {
                let Some(path) = args.next() else {
                    bail!("replay needs a file\n\n{USAGE}");
                };
                if let Some(extra) = args.next() {
                    bail!("unexpected argument `{extra}`\n\n{USAGE}");
                }
                Ok(Command::Replay(PathBuf::from(path)))
            }
            Some("config") => Ok(Command::Config),
            Some(other) => bail!("unknown command `{other}`\n\n{USAGE}"),
            None => bail!("{USAGE}"),
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let result = Command::parse(env::args().skip(1)).and_then(|command| match command {
        Command::Replay(path) => replay(&path),
        Command::Config => show_config(),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn replay(path: &Path) -> Result<()> {
    let history = read_history(path)?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

fn read_history(path: &Path) -> Result<Vec<UiMessage>> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    replay_lines(BufReader::new(file)).with_context(|| format!("replaying {}", path.display()))
}

/// Blank lines are skipped; line numbers in errors are 1-based.
fn replay_lines(reader: impl BufRead) -> Result<Vec<UiMessage>> {
    let mut history = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let number = index + 1;
        let line = line.with_context(|| format!("reading line {number}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let message: WireMessage = serde_json::from_str(&line)
            .with_context(|| format!("line {number}: not a wire message"))?;
        let outcome = reconcile(&mut history, message)
            .with_context(|| format!("line {number}: protocol violation"))?;
        tracing::debug!(line = number, ?outcome, "reconciled");
    }

    Ok(history)
}

fn show_config() -> Result<()> {
    let path = ParleyConfig::path();
    let config = ParleyConfig::load()?;
    let settings = config
        .as_ref()
        .map(EngineSettings::from_config)
        .unwrap_or_default();

    let report = json!({
        "path": path.as_ref().map(|p| p.display().to_string()),
        "loaded": config.is_some(),
        "model": settings.default_model,
        "approvalMode": settings.default_approval_mode,
        "telemetry": settings.telemetry,
        "summary": {
            "enabled": settings.summary.enabled,
            "maxChars": settings.summary.max_chars,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
