//! Experiment runner for road-network negotiation experiments.
//!
//! Orchestrates the experiment lifecycle:
//! 1. Generate (or load) a scenario
//! 2. Spawn the coordinator, round driver and settlement observer
//! 3. Send Round until the coordinator reports completion
//! 4. Collect metrics and results

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use acton_reactive::prelude::*;
use negotiation_kernel::messages::{RegisterRoundDriver, Round};
use negotiation_kernel::network::PathFinder;
use negotiation_kernel::{NegotiationBuilder, NegotiationConfig, ScheduleStrategy};

use crate::generator::{Difficulty, GeneratorConfig, Scenario, ScenarioGenerator};
use crate::results::{ExperimentConfig, ExperimentResult, GridResults, RoundMetrics, SettlementRecord};
use crate::round_driver::{RoundDriverActor, SettlementObserver};

/// Configuration for the experiment runner.
#[derive(Debug, Clone)]
pub struct ExperimentRunnerConfig {
    /// Negotiation settings; the strategy is overridden per run
    pub negotiation: NegotiationConfig,
    /// Scenario difficulty
    pub difficulty: Difficulty,
    /// How long to wait for any single round before giving up
    pub round_timeout: Duration,
}

impl Default for ExperimentRunnerConfig {
    fn default() -> Self {
        Self {
            negotiation: NegotiationConfig::default(),
            difficulty: Difficulty::Medium,
            round_timeout: Duration::from_secs(30),
        }
    }
}

/// Layer command-line overrides on a loaded config and validate the result.
///
/// Flags left unset keep the file's values.
pub fn apply_overrides(
    base: NegotiationConfig,
    strategy: Option<ScheduleStrategy>,
    dw_budget: Option<u32>,
) -> Result<NegotiationConfig> {
    let config = NegotiationConfig {
        strategy: strategy.unwrap_or(base.strategy),
        dw_budget: dw_budget.unwrap_or(base.dw_budget),
        ..base
    };
    config.validate()?;
    Ok(config)
}

/// Runs negotiations through the actor layer.
pub struct ExperimentRunner {
    config: ExperimentRunnerConfig,
}

impl ExperimentRunner {
    /// Create a new experiment runner.
    pub fn new(config: ExperimentRunnerConfig) -> Self {
        Self { config }
    }

    fn generator_config(&self, travellers: Option<usize>, seed: Option<u64>) -> GeneratorConfig {
        let base = self.config.difficulty.config();
        GeneratorConfig {
            travellers: travellers.unwrap_or(base.travellers),
            seed,
            ..base
        }
    }

    /// Generate a scenario and negotiate it.
    pub async fn run_single(
        &self,
        strategy: ScheduleStrategy,
        travellers: Option<usize>,
        trial: usize,
        seed: Option<u64>,
    ) -> Result<ExperimentResult> {
        let gen_config = self.generator_config(travellers, seed);
        let grid = gen_config.grid;
        let scenario = ScenarioGenerator::new(gen_config).generate()?;
        self.run_scenario(scenario, strategy, grid, trial).await
    }

    /// Negotiate an existing scenario.
    pub async fn run_scenario(
        &self,
        scenario: Scenario,
        strategy: ScheduleStrategy,
        grid: usize,
        trial: usize,
    ) -> Result<ExperimentResult> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        let negotiation = NegotiationConfig {
            strategy,
            ..self.config.negotiation.clone()
        };

        let config = ExperimentConfig {
            strategy: strategy.name().to_string(),
            travellers: scenario.travellers.len(),
            dw_budget: negotiation.dw_budget,
            grid,
            roads: scenario.network.road_count(),
            trial,
            seed: scenario.seed,
        };

        info!(
            run_id = %run_id,
            strategy = strategy.name(),
            travellers = config.travellers,
            roads = config.roads,
            dw_budget = config.dw_budget,
            trial,
            "Starting experiment"
        );

        let mut runtime = ActonApp::launch_async().await;

        let (settled_tx, mut settled_rx) = mpsc::unbounded_channel();
        SettlementObserver::new(settled_tx).spawn(&mut runtime).await;

        let (round_tx, mut round_rx) = mpsc::channel(16);
        let round_driver = RoundDriverActor::new(round_tx).spawn(&mut runtime).await;

        let network: Arc<dyn PathFinder> = Arc::new(scenario.network);
        let coordinator = NegotiationBuilder::new(negotiation.clone(), network)
            .add_travellers(scenario.travellers.iter().copied())
            .spawn(&mut runtime)
            .await;
        coordinator
            .send(RegisterRoundDriver {
                handle: round_driver,
            })
            .await;

        // The coordinator enforces max_ticks; the extra round covers an
        // already complete Router answering once.
        let round_limit = negotiation.max_ticks + 1;
        let mut round_metrics = Vec::new();
        let mut simulation = None;

        while round_metrics.len() < round_limit {
            let round_start = Instant::now();
            coordinator.send(Round).await;

            let received = tokio::time::timeout(self.config.round_timeout, round_rx.recv()).await;
            let complete = match received {
                Ok(Some(complete)) => complete,
                Ok(None) => {
                    warn!("RoundComplete channel closed unexpectedly");
                    break;
                }
                Err(_) => {
                    warn!(round = round_metrics.len() + 1, "Round timed out");
                    break;
                }
            };

            let elapsed = round_start.elapsed().as_millis() as u64;
            round_metrics.push(RoundMetrics::from_report(&complete.report, elapsed));
            debug!(
                correlation_id = %complete.correlation_id,
                tick = complete.report.tick,
                active = complete.report.active_travellers,
                "Round finished"
            );

            if let Some(report) = complete.simulation {
                simulation = Some(report);
                break;
            }
        }

        let Some(report) = simulation else {
            let _ = runtime.shutdown_all().await;
            bail!("negotiation did not complete within {} rounds", round_limit);
        };

        // Settlement broadcasts race the final RoundComplete; wait briefly for stragglers
        let mut settlements = Vec::with_capacity(report.outcomes.len());
        while settlements.len() < report.outcomes.len() {
            match tokio::time::timeout(Duration::from_secs(1), settled_rx.recv()).await {
                Ok(Some(settled)) => {
                    settlements.push(SettlementRecord::new(settled.tick, &settled.outcome));
                }
                _ => break,
            }
        }
        if settlements.len() < report.outcomes.len() {
            warn!(
                received = settlements.len(),
                expected = report.outcomes.len(),
                "Missing settlement broadcasts; filling from final report"
            );
            for outcome in &report.outcomes {
                if !settlements.iter().any(|s| s.traveller == outcome.traveller.0) {
                    settlements.push(SettlementRecord::new(report.ticks, outcome));
                }
            }
        }

        let _ = runtime.shutdown_all().await;

        let result = ExperimentResult::from_report(
            config,
            run_id,
            started_at,
            &report,
            round_metrics,
            settlements,
        );

        info!(
            finalized = result.finalized,
            terminated = result.terminated,
            total_cost = result.total_cost,
            cost_difference = result.cost_difference(),
            ticks = result.total_ticks,
            "Experiment complete"
        );

        Ok(result)
    }

    /// Run every strategy × traveller count × trial combination.
    ///
    /// Trial `t` uses seed `base_seed + t` when a base seed is given, so every
    /// strategy negotiates the same scenarios.
    pub async fn run_grid(
        &self,
        strategies: &[ScheduleStrategy],
        traveller_counts: &[usize],
        trials: usize,
        base_seed: Option<u64>,
    ) -> Result<GridResults> {
        let mut results = GridResults::new();
        let total = strategies.len() * traveller_counts.len() * trials;
        let mut completed = 0;

        for &strategy in strategies {
            for &travellers in traveller_counts {
                for trial in 0..trials {
                    let seed = base_seed.map(|seed| seed + trial as u64);
                    let result = self
                        .run_single(strategy, Some(travellers), trial, seed)
                        .await?;
                    results.add(result);
                    completed += 1;

                    info!(
                        progress = format!("{}/{}", completed, total),
                        strategy = strategy.name(),
                        travellers,
                        trial,
                        "Completed run"
                    );
                }
            }
        }

        results.compute_summary();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_strategy_survives_without_flag() {
        let file = NegotiationConfig::from_toml_str("strategy = \"length\"\ndw_budget = 4").unwrap();
        let config = apply_overrides(file, None, None).unwrap();
        assert_eq!(config.strategy, ScheduleStrategy::Length);
        assert_eq!(config.dw_budget, 4);
    }

    #[test]
    fn test_flags_override_file_values() {
        let file = NegotiationConfig::from_toml_str("strategy = \"length\"\nmax_ticks = 40").unwrap();
        let config = apply_overrides(file, Some(ScheduleStrategy::Speed), Some(2)).unwrap();
        assert_eq!(config.strategy, ScheduleStrategy::Speed);
        assert_eq!(config.dw_budget, 2);
        assert_eq!(config.max_ticks, 40);
    }

    #[test]
    fn test_zero_budget_flag_rejected() {
        assert!(apply_overrides(NegotiationConfig::default(), None, Some(0)).is_err());
    }
}
