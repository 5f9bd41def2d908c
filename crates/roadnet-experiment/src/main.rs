//! Road-network negotiation experiment CLI.
//!
//! Commands:
//! - generate: Write a lattice scenario to disk
//! - single: Negotiate one generated or loaded scenario
//! - grid: Run strategies × Traveller counts × DW budgets × trials

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use negotiation_kernel::{NegotiationConfig, ScheduleStrategy};
use roadnet_experiment::experiment::{apply_overrides, ExperimentRunner, ExperimentRunnerConfig};
use roadnet_experiment::generator::{Difficulty, GeneratorConfig, Scenario, ScenarioGenerator};
use roadnet_experiment::results::{format_duration, GridResults};

/// Generate a timestamped output path from the given path.
/// e.g., "results.json" -> "results-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(std::path::Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "roadnet-experiment")]
#[command(version)]
#[command(about = "Time-slot negotiation experiments on road networks")]
struct Cli {
    /// Negotiation config file (TOML); missing keys use defaults
    #[arg(long, env = "ROADNET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a scenario and write it to a directory
    Generate {
        /// Lattice side length
        #[arg(long, default_value = "6")]
        grid: usize,

        /// Number of Travellers
        #[arg(long, default_value = "20")]
        travellers: usize,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Directory for network.txt and travellers.json
        #[arg(long, default_value = "scenario")]
        output_dir: PathBuf,
    },

    /// Run a single negotiation
    Single {
        /// Location scheduling strategy; overrides the config file
        #[arg(long)]
        strategy: Option<String>,

        /// Number of Travellers (generated scenarios only)
        #[arg(long, default_value = "20")]
        travellers: usize,

        /// Lattice side length (generated scenarios only)
        #[arg(long, default_value = "6")]
        grid: usize,

        /// Deliberation window budget; overrides the config file
        #[arg(long)]
        dw_budget: Option<u32>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Edge list to load instead of generating a network
        #[arg(long, requires = "traveller_file")]
        network: Option<PathBuf>,

        /// Traveller JSON to load alongside --network
        #[arg(long, requires = "network")]
        traveller_file: Option<PathBuf>,

        /// Write the full result as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run grid experiment
    Grid {
        /// Number of trials per configuration
        #[arg(long, default_value = "5")]
        trials: usize,

        /// Lattice side length
        #[arg(long, default_value = "6")]
        grid: usize,

        /// Traveller counts to test (comma-separated)
        #[arg(long, default_value = "10,20,40", value_delimiter = ',')]
        travellers: Vec<usize>,

        /// Strategies to test (comma-separated). Default: all
        /// Valid: earliest_start, priority, speed, length
        #[arg(long, value_delimiter = ',')]
        strategies: Option<Vec<String>>,

        /// DW budgets to test (comma-separated). Default: the config's budget
        #[arg(long, value_delimiter = ',')]
        dw_budgets: Option<Vec<u32>>,

        /// Base seed; trial t uses seed + t
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results
        #[arg(long, default_value = "results.json")]
        output: PathBuf,
    },
}

fn parse_strategy(s: &str) -> Result<ScheduleStrategy> {
    s.parse::<ScheduleStrategy>().map_err(anyhow::Error::msg)
}

fn load_config(path: Option<&Path>) -> Result<NegotiationConfig> {
    match path {
        Some(path) => NegotiationConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(NegotiationConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let negotiation = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            grid,
            travellers,
            seed,
            output_dir,
        } => {
            let mut generator = ScenarioGenerator::new(GeneratorConfig {
                seed,
                ..Difficulty::Custom { grid, travellers }.config()
            });
            let scenario = generator.generate()?;
            scenario.save(&output_dir)?;

            println!("=== Generated Scenario ===");
            println!("Seed: {}", generator.seed());
            println!(
                "Network: {} junctions, {} roads",
                scenario.network.node_count(),
                scenario.network.road_count()
            );
            println!("Travellers: {}", scenario.travellers.len());
            println!("Written to: {}", output_dir.display());
        }

        Commands::Single {
            strategy,
            travellers,
            grid,
            dw_budget,
            seed,
            network,
            traveller_file,
            output,
        } => {
            let strategy = strategy.map(|s| parse_strategy(&s)).transpose()?;
            let negotiation = apply_overrides(negotiation, strategy, dw_budget)?;
            let strategy = negotiation.strategy;
            let config = ExperimentRunnerConfig {
                negotiation,
                difficulty: Difficulty::Custom { grid, travellers },
                ..Default::default()
            };
            let runner = ExperimentRunner::new(config);

            let result = match (network, traveller_file) {
                (Some(network), Some(traveller_file)) => {
                    let scenario = Scenario::load(&network, &traveller_file)?;
                    runner.run_scenario(scenario, strategy, 0, 0).await?
                }
                _ => runner.run_single(strategy, Some(travellers), 0, seed).await?,
            };

            println!("\n=== Negotiation Result ===");
            println!("Strategy: {}", result.config.strategy);
            println!("Travellers: {}", result.config.travellers);
            println!("Roads: {}", result.config.roads);
            println!("DW budget: {}", result.config.dw_budget);
            if let Some(seed) = result.config.seed {
                println!("Seed: {}", seed);
            }
            println!("Finalized: {}", result.finalized);
            println!("Terminated: {}", result.terminated);
            println!("Finalize rate: {:.1}%", result.finalize_rate() * 100.0);
            println!("Total cost: {}", result.total_cost);
            println!("Cost difference: {}", result.cost_difference());
            println!("Ticks: {}", result.total_ticks);
            println!("Duration: {}", format_duration(result.duration_ms));

            println!("\nPer-Round Metrics:");
            println!(
                "  {:>4} {:>8} {:>8} {:>6} {:>6} {:>8}",
                "Tick", "To_loc", "To_trav", "Final", "Term", "Active"
            );
            for rm in &result.round_metrics {
                println!(
                    "  {:>4} {:>8} {:>8} {:>6} {:>6} {:>8}",
                    rm.tick,
                    rm.messages_to_locations,
                    rm.messages_to_travellers,
                    rm.finalized,
                    rm.terminated,
                    rm.active_travellers
                );
            }

            if let Some(output) = output {
                let output_path = timestamped_path(&output);
                let json = serde_json::to_string_pretty(&result)?;
                std::fs::write(&output_path, json)?;
                println!("\nResult saved to: {}", output_path.display());
            }
        }

        Commands::Grid {
            trials,
            grid,
            travellers,
            strategies: strategy_filter,
            dw_budgets,
            seed,
            output,
        } => {
            let strategies: Vec<ScheduleStrategy> = match strategy_filter {
                Some(names) => names
                    .iter()
                    .map(|s| parse_strategy(s))
                    .collect::<Result<_>>()?,
                None => ScheduleStrategy::all(),
            };
            let budgets = dw_budgets.unwrap_or_else(|| vec![negotiation.dw_budget]);

            info!(
                trials,
                grid,
                strategies = strategies.len(),
                budgets = budgets.len(),
                "Starting grid experiment"
            );

            let mut results = GridResults::new();
            for &dw_budget in &budgets {
                let config = ExperimentRunnerConfig {
                    negotiation: apply_overrides(negotiation.clone(), None, Some(dw_budget))?,
                    difficulty: Difficulty::Custom {
                        grid,
                        travellers: 0,
                    },
                    ..Default::default()
                };
                let runner = ExperimentRunner::new(config);
                let partial = runner
                    .run_grid(&strategies, &travellers, trials, seed)
                    .await?;
                for result in partial.results {
                    results.add(result);
                }
            }

            results.compute_summary();
            let output_path = timestamped_path(&output);
            results.save(&output_path)?;

            println!("\n=== Grid Experiment Complete ===");
            println!("Results saved to: {}", output_path.display());
            println!("\nSummary:");
            let mut keys: Vec<&String> = results.summary.keys().collect();
            keys.sort();
            for key in keys {
                let summary = &results.summary[key];
                println!(
                    "  {}: finalize_rate={:.1}% [{:.1}, {:.1}], avg_cost={:.1}±{:.1}, avg_diff={:.1}, avg_ticks={:.1}",
                    key,
                    summary.finalize_rate * 100.0,
                    summary.finalize_rate_ci.0 * 100.0,
                    summary.finalize_rate_ci.1 * 100.0,
                    summary.avg_cost,
                    summary.avg_cost_se,
                    summary.avg_cost_difference,
                    summary.avg_ticks
                );
            }
        }
    }

    Ok(())
}
