#![forbid(unsafe_code)]

use std::env;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vellum_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use vellum_sim::oracle::describe;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Race simulated writers against a vellum history store",
    long_about = None
)]
struct Cli {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    seed_start: u64,

    /// Number of seeds to run.
    #[arg(long, default_value_t = 50)]
    seeds: u64,

    /// Writers per simulation.
    #[arg(long, default_value_t = 3)]
    writers: usize,

    /// Rounds per simulation.
    #[arg(long, default_value_t = 30)]
    rounds: u64,

    /// Changes per chunk before it is sealed.
    #[arg(long, default_value_t = 5)]
    chunk_size: u64,

    /// Chance per round (percent) that a writer keeps a stale view.
    #[arg(long, default_value_t = 40)]
    stale_percent: u8,

    /// Replay one seed and print its trace instead of running a campaign.
    #[arg(long)]
    replay: Option<u64>,

    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn campaign(&self) -> CampaignConfig {
        CampaignConfig {
            seed_range: self.seed_start..self.seed_start.saturating_add(self.seeds),
            writers: self.writers,
            rounds: self.rounds,
            max_changes_per_chunk: self.chunk_size,
            stale_view_percent: self.stale_percent,
            ..CampaignConfig::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("VELLUM_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "vellum_core=debug,vellum_sim=debug,info"
        } else {
            "vellum_sim=info,warn"
        })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.campaign();

    if let Some(seed) = cli.replay {
        let trace = replay_seed(seed, &config)?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&trace.result)?);
        } else {
            for event in &trace.result.trace {
                println!("round {:>3}  {:?}", event.round, event.kind);
            }
            for violation in &trace.oracle.violations {
                println!("VIOLATION {}", describe(violation));
            }
            println!(
                "seed {seed}: versions={} passed={}",
                trace.result.model.len().saturating_sub(1),
                trace.oracle.passed
            );
        }
        return Ok(if trace.oracle.passed {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let report = run_campaign(&config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} conflicts={} versions={} interesting={}",
            report.seeds_run,
            report.seeds_passed,
            report.conflicts_observed,
            report.versions_committed,
            report.interesting_seeds
        );
        for failure in &report.failures {
            println!("seed {} failed:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }
    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
