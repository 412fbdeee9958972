//! Campaigns: many seeds, one report.
//!
//! Each seed runs a fresh simulation and the oracle judges it. The first
//! failing seed is reported so it can be replayed alone.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::ActionMix;
use crate::oracle::{HistoryOracle, OracleResult, describe};
use crate::{SimulationConfig, SimulationResult, Simulator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub writers: usize,
    pub rounds: u64,
    pub max_changes_per_chunk: u64,
    pub stale_view_percent: u8,
    pub max_retries: u32,
    pub mix: ActionMix,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..50,
            writers: sim.writers,
            rounds: sim.rounds,
            max_changes_per_chunk: sim.max_changes_per_chunk,
            stale_view_percent: sim.stale_view_percent,
            max_retries: sim.max_retries,
            mix: sim.mix,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            writers: self.writers,
            rounds: self.rounds,
            max_changes_per_chunk: self.max_changes_per_chunk,
            stale_view_percent: self.stale_view_percent,
            max_retries: self.max_retries,
            mix: self.mix,
            ..SimulationConfig::default()
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that saw both a lost race and a compaction.
    pub interesting_seeds: usize,
    pub conflicts_observed: usize,
    pub versions_committed: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A replayed seed with everything needed to debug it.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// # Errors
///
/// Returns an error if the config is invalid or a simulation cannot run.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_seeds: 0,
        conflicts_observed: 0,
        versions_committed: 0,
    };
    for seed in config.seed_range.clone() {
        let trace = replay_seed(seed, config)?;
        report.seeds_run += 1;
        report.conflicts_observed += trace.result.count("conflict");
        report.versions_committed += trace.result.model.len().saturating_sub(1);
        if trace.result.interesting() {
            report.interesting_seeds += 1;
        }

        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.oracle.violations.iter().map(describe).collect(),
            });
        }
    }
    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        conflicts = report.conflicts_observed,
        "campaign finished"
    );
    Ok(report)
}

/// Run one seed and judge it.
///
/// # Errors
///
/// Returns an error if the simulation cannot run.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = HistoryOracle::check_all(simulator.history(), simulator.project_id(), &result);
    Ok(DetailedTrace { result, oracle })
}

#[cfg(test)]
mod tests {
    use super::{CampaignConfig, replay_seed, run_campaign};

    #[test]
    fn default_config_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_seed_range_is_rejected() {
        let config = CampaignConfig {
            seed_range: 5..5,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(run_campaign(&config).is_err());
    }

    #[test]
    fn small_campaign_passes() {
        let config = CampaignConfig {
            seed_range: 0..8,
            writers: 4,
            rounds: 25,
            max_changes_per_chunk: 3,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign");
        assert_eq!(report.seeds_run, 8);
        assert!(report.all_passed(), "{:?}", report.failures);
        assert!(report.conflicts_observed > 0);
        assert!(report.versions_committed > 8);
    }

    #[test]
    fn replay_matches_the_campaign_run() {
        let config = CampaignConfig::default();
        let first = replay_seed(3, &config).expect("replay");
        let second = replay_seed(3, &config).expect("replay");
        assert_eq!(first.result.trace, second.result.trace);
        assert!(first.oracle.passed);
    }
}
