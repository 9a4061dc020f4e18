use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use affex_core::export::read_records;
use affex_core::{summarize, write_summary_csv};
use affex_experiment::config::query_pairs;
use affex_experiment::{Configuration, ExpressionDetector, FileSink, SessionController};
use affex_timing::SessionClock;

mod detector;
mod participant;

use detector::{ReplayDetector, SyntheticDetector};

/// Affect-gated reaction experiment, run headless against a simulated or
/// replayed expression sensor.
#[derive(Parser)]
#[command(name = "affex")]
#[command(version)]
#[command(about = "Run affect-gated reaction sessions and condense their logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one session and export its log
    Run {
        /// Settings as a URL query string, e.g. "subject_id=1&session_number=2"
        #[arg(short, long, default_value = "")]
        query: String,

        /// One setting as key=value; wins over the query string
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Directory for the exported log
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Where participant clicks come from
        #[arg(long, value_enum, default_value = "auto")]
        participant: ParticipantKind,

        /// Click period of the automatic participant
        #[arg(long, default_value = "500")]
        click_every_ms: u64,

        /// Seed for trial randomization and the synthetic sensor
        #[arg(long)]
        seed: Option<u64>,

        /// Replay expression rows from a recording instead of synthesizing them
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Mean happiness reported by the synthetic sensor
        #[arg(long, default_value = "0.6")]
        happy: f64,

        /// Detection latency of the simulated sensor
        #[arg(long, default_value = "40")]
        latency_ms: u64,

        /// Also write the per-trial summary next to the export
        #[arg(long)]
        summarize: bool,
    },

    /// Condense exported session logs into per-trial summaries
    Summarize {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ParticipantKind {
    /// Click the agent at a fixed period
    Auto,
    /// One click per line on stdin
    Stdin,
}

struct RunOptions {
    output_dir: PathBuf,
    participant: ParticipantKind,
    click_every: Duration,
    summarize: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            query,
            params,
            output_dir,
            participant,
            click_every_ms,
            seed,
            replay,
            happy,
            latency_ms,
            summarize,
        } => {
            // --param pairs come first so they win over the query string
            let config = Configuration::from_pairs(params.into_iter().chain(query_pairs(&query)))?;
            let seed = seed.unwrap_or_else(rand::random);
            info!("Random seed {seed}");

            let latency = Duration::from_millis(latency_ms);
            let options = RunOptions {
                output_dir,
                participant,
                click_every: Duration::from_millis(click_every_ms),
                summarize,
            };
            match replay {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("reading recording {}", path.display()))?;
                    let detector = ReplayDetector::from_csv(&text, latency)?;
                    info!("Replaying {} expression rows from {}", detector.len(), path.display());
                    run_session(config, detector, seed, &options).await
                }
                None => {
                    let detector = SyntheticDetector::new(seed, happy, latency);
                    run_session(config, detector, seed, &options).await
                }
            }
        }
        Commands::Summarize { inputs } => {
            for input in &inputs {
                let out = summarize_file(input)?;
                println!("{}", out.display());
            }
            Ok(())
        }
    }
}

async fn run_session<D: ExpressionDetector>(
    config: Configuration,
    detector: D,
    seed: u64,
    options: &RunOptions,
) -> Result<()> {
    info!(
        "Subject {} session {}: {} trials of {} ms",
        config.subject_id,
        config.session_number,
        config.trial_count,
        config.trial_duration.as_millis()
    );
    let mut session =
        SessionController::new(config, detector, SessionClock::new(), StdRng::seed_from_u64(seed));
    session.prepare().await?;

    let (tx, mut rx) = mpsc::channel(64);
    let token = CancellationToken::new();
    match options.participant {
        ParticipantKind::Auto => {
            tokio::spawn(participant::autoclick(options.click_every, tx, token.clone()));
        }
        ParticipantKind::Stdin => participant::spawn_stdin_reader(tx),
    }

    let report = session.run_until_ended(&mut rx).await?;
    token.cancel();

    let path = session.export(&FileSink::new(&options.output_dir))?;
    info!(
        "{}/{} trials correct, log exported to {}",
        report.correct(),
        report.trials.len(),
        path.display()
    );
    if options.summarize {
        summarize_file(&path)?;
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn summarize_file(input: &Path) -> Result<PathBuf> {
    let text =
        fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let records = read_records(&text)?;
    let trials = summarize(&records)?;
    let out = simplified_path(input);
    fs::write(&out, write_summary_csv(&trials)?)
        .with_context(|| format!("writing {}", out.display()))?;
    info!("Summarized {} trials into {}", trials.len(), out.display());
    Ok(out)
}

fn simplified_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}_simplified.csv"))
}
