//! Integration tests for the experiment runner.
//!
//! Runs generated scenarios end to end through the actor layer and checks
//! that the collected metrics agree with each other.

use std::sync::Arc;

use negotiation_kernel::{NegotiationConfig, ScheduleStrategy, Simulation};
use roadnet_experiment::experiment::{ExperimentRunner, ExperimentRunnerConfig};
use roadnet_experiment::generator::{Difficulty, GeneratorConfig, ScenarioGenerator};

fn runner(dw_budget: u32) -> ExperimentRunner {
    ExperimentRunner::new(ExperimentRunnerConfig {
        negotiation: NegotiationConfig {
            dw_budget,
            ..NegotiationConfig::default()
        },
        difficulty: Difficulty::Custom {
            grid: 3,
            travellers: 5,
        },
        ..Default::default()
    })
}

#[tokio::test]
async fn test_single_run_accounts_for_every_traveller() {
    let result = runner(5)
        .run_single(ScheduleStrategy::EarliestStart, None, 0, Some(17))
        .await
        .unwrap();

    assert_eq!(result.config.travellers, 5);
    assert_eq!(result.config.roads, 12);
    assert_eq!(result.config.seed, Some(17));
    assert_eq!(result.finalized + result.terminated, 5);
    assert_eq!(result.round_metrics.len(), result.total_ticks);
    assert_eq!(result.settlements.len(), 5);

    let mut settled: Vec<u32> = result.settlements.iter().map(|s| s.traveller).collect();
    settled.sort_unstable();
    assert_eq!(settled, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_actor_run_matches_synchronous_router() {
    let seed = 23;
    let dw_budget = 3;
    let result = runner(dw_budget)
        .run_single(ScheduleStrategy::Priority, None, 0, Some(seed))
        .await
        .unwrap();

    let scenario = ScenarioGenerator::new(GeneratorConfig {
        seed: Some(seed),
        ..Difficulty::Custom {
            grid: 3,
            travellers: 5,
        }
        .config()
    })
    .generate()
    .unwrap();
    let config = NegotiationConfig {
        dw_budget,
        strategy: ScheduleStrategy::Priority,
        ..NegotiationConfig::default()
    };
    let report = Simulation::with_config(config, Arc::new(scenario.network))
        .add_travellers(scenario.travellers)
        .run();

    assert_eq!(result.finalized, report.finalized);
    assert_eq!(result.terminated, report.terminated);
    assert_eq!(result.total_cost, report.total_cost);
    assert_eq!(result.total_ticks, report.ticks);
    assert_eq!(result.cost_difference(), report.cost_difference());
}

#[tokio::test]
async fn test_grid_summary_covers_each_configuration() {
    let strategies = [ScheduleStrategy::EarliestStart, ScheduleStrategy::Length];
    let results = runner(2)
        .run_grid(&strategies, &[3, 4], 2, Some(99))
        .await
        .unwrap();

    assert_eq!(results.results.len(), 8);
    assert_eq!(results.summary.len(), 4);

    let summary = &results.summary["length:travellers=4:dw=2"];
    assert_eq!(summary.trials, 2);
    assert!((0.0..=1.0).contains(&summary.finalize_rate));
    assert!(summary.finalize_rate_ci.0 <= summary.finalize_rate);
    assert!(summary.finalize_rate_ci.1 >= summary.finalize_rate);
    assert!(summary.min_ticks <= summary.max_ticks);
}
