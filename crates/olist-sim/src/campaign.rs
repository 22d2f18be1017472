//! Campaign runner: many seeds, one configuration, first failure first.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::network::LinkConfig;
use crate::oracle::{ConvergenceOracle, InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    pub clients: usize,
    pub texts_per_client: usize,
    pub rounds: u64,
    pub max_edits_per_round: u64,
    pub max_latency_ms: u64,
    /// Chance, in percent, that a list read or write fails.
    pub fault_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..32,
            clients: sim.clients,
            texts_per_client: sim.texts_per_client,
            rounds: sim.rounds,
            max_edits_per_round: sim.max_edits_per_round,
            max_latency_ms: sim.link.max_latency_ms,
            fault_percent: sim.link.fault_percent,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            clients: self.clients,
            texts_per_client: self.texts_per_client,
            rounds: self.rounds,
            max_edits_per_round: self.max_edits_per_round,
            link: LinkConfig {
                max_latency_ms: self.max_latency_ms,
                fault_percent: self.fault_percent,
            },
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.clients == 0 {
            bail!("clients must be > 0");
        }
        if self.texts_per_client == 0 {
            bail!("texts_per_client must be > 0");
        }
        if self.fault_percent > 100 {
            bail!("fault_percent must be <= 100");
        }
        Ok(())
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
    /// First failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds in which at least one pass failed and had to recover.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A single seed replayed with its full trace.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed in the config.
///
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
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let trace = replay_seed(seed, config)?;
        if trace.result.interesting_state_reached() {
            report.interesting_states_reached += 1;
        }
        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            tracing::warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace
                    .oracle
                    .violations
                    .iter()
                    .map(InvariantViolation::to_string)
                    .collect(),
            });
        }
    }

    Ok(report)
}

/// Run one seed; the inner result separates a pass from violations.
///
/// # Errors
///
/// Returns an error if the simulation itself cannot run.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let trace = replay_seed(seed, config)?;
    if trace.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(trace.oracle.violations))
    }
}

/// Replay a single seed with its full trace, for debugging.
///
/// # Errors
///
/// Returns an error when config validation or the simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let result = Simulator::new(config.sim_config_for_seed(seed))?.run()?;
    let oracle = ConvergenceOracle::check_all(&result.final_state);
    Ok(DetailedTrace { result, oracle })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> CampaignConfig {
        CampaignConfig {
            seed_range: 0..4,
            rounds: 3,
            max_latency_ms: 1,
            ..CampaignConfig::default()
        }
    }

    #[test]
    fn empty_seed_range_is_rejected() {
        let config = CampaignConfig {
            seed_range: 3..3,
            ..small()
        };
        assert!(run_campaign(&config).is_err());
    }

    #[test]
    fn fault_percent_is_bounded() {
        let config = CampaignConfig {
            fault_percent: 101,
            ..small()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn small_campaign_passes() -> Result<()> {
        let report = run_campaign(&small())?;
        assert_eq!(report.seeds_run, 4);
        assert!(report.all_passed(), "{:?}", report.failures);
        assert_eq!(report.first_failure, None);
        Ok(())
    }

    #[test]
    fn faulty_links_reach_recovery_paths() -> Result<()> {
        let config = CampaignConfig {
            fault_percent: 60,
            ..small()
        };
        let report = run_campaign(&config)?;
        assert!(report.all_passed(), "{:?}", report.failures);
        assert!(report.interesting_states_reached > 0);
        Ok(())
    }

    #[test]
    fn single_seed_matches_campaign_verdict() -> Result<()> {
        assert_eq!(run_single_seed(2, &small())?, Ok(()));
        Ok(())
    }
}
