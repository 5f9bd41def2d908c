//! Results collection and output for road-network negotiation experiments.
//!
//! Captures metrics like:
//! - Finalized vs terminated Travellers
//! - Realized cost against the first-plan cost
//! - Message volume and active agents per round

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use negotiation_kernel::{RoundReport, SimulationReport, TravellerOutcome};

/// Results from a single experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Experiment configuration
    pub config: ExperimentConfig,
    /// Unique id of this run
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Router ticks executed
    pub total_ticks: usize,
    pub finalized: usize,
    pub terminated: usize,
    /// Sum of final costs over finalized Travellers
    pub total_cost: i64,
    /// Sum of first-plan costs over every routed Traveller
    pub total_initial_cost: i64,
    /// Sum of first-plan costs over finalized Travellers
    pub finalized_initial_cost: i64,
    /// Per-round metrics
    pub round_metrics: Vec<RoundMetrics>,
    /// Every Traveller outcome, in settlement order
    pub settlements: Vec<SettlementRecord>,
    pub duration_ms: u64,
}

impl ExperimentResult {
    /// Fill the aggregate fields from a final simulation report.
    pub fn from_report(
        config: ExperimentConfig,
        run_id: String,
        started_at: DateTime<Utc>,
        report: &SimulationReport,
        round_metrics: Vec<RoundMetrics>,
        settlements: Vec<SettlementRecord>,
    ) -> Self {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            config,
            run_id,
            started_at,
            ended_at,
            total_ticks: report.ticks,
            finalized: report.finalized,
            terminated: report.terminated,
            total_cost: report.total_cost,
            total_initial_cost: report.total_initial_cost,
            finalized_initial_cost: report.finalized_initial_cost,
            round_metrics,
            settlements,
            duration_ms,
        }
    }

    pub fn finalize_rate(&self) -> f64 {
        let total = self.finalized + self.terminated;
        if total == 0 {
            return 0.0;
        }
        self.finalized as f64 / total as f64
    }

    /// Extra cost the negotiation added over the finalized Travellers' first plans.
    pub fn cost_difference(&self) -> i64 {
        self.total_cost - self.finalized_initial_cost
    }

    /// Mean realized cost per finalized Traveller.
    pub fn mean_cost(&self) -> Option<f64> {
        (self.finalized > 0).then(|| self.total_cost as f64 / self.finalized as f64)
    }
}

/// Configuration for an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Location scheduling strategy name
    pub strategy: String,
    /// Number of Travellers
    pub travellers: usize,
    /// Round budget per Traveller
    pub dw_budget: u32,
    /// Lattice side length (0 when loaded from files)
    pub grid: usize,
    /// Roads in the network
    pub roads: usize,
    /// Trial number (for repeated experiments)
    pub trial: usize,
    /// Random seed (if reproducible)
    pub seed: Option<u64>,
}

/// Metrics for a single round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub tick: usize,
    pub messages_to_locations: usize,
    pub messages_to_travellers: usize,
    pub finalized: usize,
    pub terminated: usize,
    pub active_travellers: usize,
    pub active_locations: usize,
    pub violations: usize,
    pub duration_ms: u64,
}

impl RoundMetrics {
    pub fn from_report(report: &RoundReport, duration_ms: u64) -> Self {
        Self {
            tick: report.tick,
            messages_to_locations: report.messages_to_locations,
            messages_to_travellers: report.messages_to_travellers,
            finalized: report.finalized,
            terminated: report.terminated,
            active_travellers: report.active_travellers,
            active_locations: report.active_locations,
            violations: report.violations,
            duration_ms,
        }
    }
}

/// One Traveller leaving the negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Router tick after which it settled (0 for Travellers with no route)
    pub tick: usize,
    pub traveller: u32,
    pub status: String,
    pub initial_cost: Option<i64>,
    pub final_cost: Option<i64>,
    pub rounds: u32,
}

impl SettlementRecord {
    pub fn new(tick: usize, outcome: &TravellerOutcome) -> Self {
        Self {
            tick,
            traveller: outcome.traveller.0,
            status: outcome.status.to_string(),
            initial_cost: outcome.initial_cost,
            final_cost: outcome.final_cost,
            rounds: outcome.rounds,
        }
    }
}

/// Aggregate results from a grid experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridResults {
    /// All individual results
    pub results: Vec<ExperimentResult>,
    /// Summary statistics by configuration
    pub summary: HashMap<String, ConfigSummary>,
}

/// Summary statistics for a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub config_key: String,
    pub trials: usize,
    /// Finalized share over every Traveller in every trial
    pub finalize_rate: f64,
    /// Standard error of finalize rate: sqrt(p(1-p)/n)
    pub finalize_rate_se: f64,
    /// 95% confidence interval for finalize rate: (lower, upper)
    pub finalize_rate_ci: (f64, f64),
    /// Mean per-trial cost of a finalized Traveller
    pub avg_cost: f64,
    /// Standard error of avg_cost
    pub avg_cost_se: f64,
    pub avg_cost_difference: f64,
    pub avg_ticks: f64,
    pub min_ticks: usize,
    pub max_ticks: usize,
}

/// Mean and standard error (std_dev / sqrt(n)).
fn mean_and_se(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt() / n.sqrt())
}

impl GridResults {
    /// Create a new empty grid results.
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            summary: HashMap::new(),
        }
    }

    /// Add a result.
    pub fn add(&mut self, result: ExperimentResult) {
        self.results.push(result);
    }

    /// Compute summary statistics.
    pub fn compute_summary(&mut self) {
        let mut by_config: HashMap<String, Vec<&ExperimentResult>> = HashMap::new();

        for result in &self.results {
            let key = format!(
                "{}:travellers={}:dw={}",
                result.config.strategy, result.config.travellers, result.config.dw_budget
            );
            by_config.entry(key).or_default().push(result);
        }

        for (key, results) in by_config {
            let trials = results.len();
            let finalized: usize = results.iter().map(|r| r.finalized).sum();
            let travellers: usize = results.iter().map(|r| r.finalized + r.terminated).sum();
            let n = travellers.max(1) as f64;
            let finalize_rate = finalized as f64 / n;

            // Standard error for proportion: SE = sqrt(p(1-p)/n)
            let finalize_rate_se = if travellers > 1 {
                (finalize_rate * (1.0 - finalize_rate) / n).sqrt()
            } else {
                0.0
            };

            // 95% CI: p ± 1.96 * SE, clamped to [0, 1]
            let z = 1.96;
            let finalize_rate_ci = (
                (finalize_rate - z * finalize_rate_se).max(0.0),
                (finalize_rate + z * finalize_rate_se).min(1.0),
            );

            let costs: Vec<f64> = results.iter().filter_map(|r| r.mean_cost()).collect();
            let (avg_cost, avg_cost_se) = mean_and_se(&costs);

            let differences: Vec<f64> = results.iter().map(|r| r.cost_difference() as f64).collect();
            let (avg_cost_difference, _) = mean_and_se(&differences);

            let ticks: Vec<f64> = results.iter().map(|r| r.total_ticks as f64).collect();
            let (avg_ticks, _) = mean_and_se(&ticks);
            let min_ticks = results.iter().map(|r| r.total_ticks).min().unwrap_or(0);
            let max_ticks = results.iter().map(|r| r.total_ticks).max().unwrap_or(0);

            self.summary.insert(
                key.clone(),
                ConfigSummary {
                    config_key: key,
                    trials,
                    finalize_rate,
                    finalize_rate_se,
                    finalize_rate_ci,
                    avg_cost,
                    avg_cost_se,
                    avg_cost_difference,
                    avg_ticks,
                    min_ticks,
                    max_ticks,
                },
            );
        }
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

impl Default for GridResults {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}
