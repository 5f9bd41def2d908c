//! Scenario generator: lattice road networks and random Travellers.
//!
//! Networks are `grid × grid` lattices whose roads get random lengths and
//! speed limits; every Traveller gets a distinct source and destination.

use std::path::Path;

use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use negotiation_kernel::network::NodeId;
use negotiation_kernel::{LocationId, Road, RoadNetwork, TravellerId, TravellerSpec};

/// File name of the edge list inside a scenario directory.
pub const NETWORK_FILE: &str = "network.txt";
/// File name of the Traveller list inside a scenario directory.
pub const TRAVELLERS_FILE: &str = "travellers.json";

/// Configuration for scenario generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Lattice side length (junctions per row and column)
    pub grid: usize,
    /// Number of Travellers
    pub travellers: usize,
    /// Road length range (min, max)
    pub distance_range: (u32, u32),
    /// Road speed limit range (min, max)
    pub speed_limit_range: (u32, u32),
    /// Traveller speed range (min, max)
    pub speed_range: (u32, u32),
    /// Traveller length range (min, max)
    pub length_range: (u32, u32),
    /// Latest start time
    pub start_window: i64,
    /// Random seed for reproducibility (None for random)
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            grid: 6,
            travellers: 20,
            distance_range: (20, 60),
            speed_limit_range: (5, 15),
            speed_range: (4, 12),
            length_range: (2, 10),
            start_window: 20,
            seed: None,
        }
    }
}

/// Difficulty presets for experiments.
#[derive(Debug, Clone, Copy)]
pub enum Difficulty {
    /// Easy: 4x4 lattice with 8 Travellers
    Easy,
    /// Medium: 6x6 lattice with 20 Travellers
    Medium,
    /// Hard: 8x8 lattice with 48 Travellers and a tight start window
    Hard,
    /// Custom difficulty
    Custom { grid: usize, travellers: usize },
}

impl Difficulty {
    /// Get the generator config for this difficulty.
    pub fn config(self) -> GeneratorConfig {
        match self {
            Difficulty::Easy => GeneratorConfig {
                grid: 4,
                travellers: 8,
                ..GeneratorConfig::default()
            },
            Difficulty::Medium => GeneratorConfig::default(),
            Difficulty::Hard => GeneratorConfig {
                grid: 8,
                travellers: 48,
                start_window: 10,
                ..GeneratorConfig::default()
            },
            Difficulty::Custom { grid, travellers } => GeneratorConfig {
                grid,
                travellers,
                ..GeneratorConfig::default()
            },
        }
    }
}

/// A network plus the Travellers that will negotiate on it.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub network: RoadNetwork,
    pub travellers: Vec<TravellerSpec>,
    /// Seed used to generate it (None when loaded from files)
    pub seed: Option<u64>,
}

impl Scenario {
    /// Write `network.txt` and `travellers.json` into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating scenario directory {}", dir.display()))?;
        std::fs::write(dir.join(NETWORK_FILE), self.network.to_edge_list())?;
        let json = serde_json::to_string_pretty(&self.travellers)?;
        std::fs::write(dir.join(TRAVELLERS_FILE), json)?;
        Ok(())
    }

    /// Load a scenario from an edge list and a Traveller JSON file.
    pub fn load(network: impl AsRef<Path>, travellers: impl AsRef<Path>) -> Result<Self> {
        let network_path = network.as_ref();
        let raw = std::fs::read_to_string(network_path)
            .with_context(|| format!("reading {}", network_path.display()))?;
        let network = RoadNetwork::from_edge_list(&raw)
            .with_context(|| format!("parsing {}", network_path.display()))?;

        let travellers_path = travellers.as_ref();
        let json = std::fs::read_to_string(travellers_path)
            .with_context(|| format!("reading {}", travellers_path.display()))?;
        let travellers = serde_json::from_str(&json)
            .with_context(|| format!("parsing {}", travellers_path.display()))?;

        Ok(Self {
            network,
            travellers,
            seed: None,
        })
    }

    /// Load `network.txt` and `travellers.json` from one directory.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::load(dir.join(NETWORK_FILE), dir.join(TRAVELLERS_FILE))
    }
}

/// Generator for lattice scenarios.
pub struct ScenarioGenerator {
    config: GeneratorConfig,
    rng: ChaCha8Rng,
    seed: u64,
}

impl ScenarioGenerator {
    /// Create a new generator with the given configuration.
    pub fn new(config: GeneratorConfig) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn node(&self, row: usize, col: usize) -> NodeId {
        (row * self.config.grid + col + 1) as NodeId
    }

    /// Lattice with a road to the right and below every junction.
    pub fn generate_network(&mut self) -> Result<RoadNetwork> {
        let n = self.config.grid;
        if n < 2 {
            anyhow::bail!("grid must be at least 2, got {}", n);
        }
        let (min_dist, max_dist) = self.config.distance_range;
        let (min_limit, max_limit) = self.config.speed_limit_range;

        let mut roads = Vec::with_capacity(2 * n * (n - 1));
        for row in 0..n {
            for col in 0..n {
                let from = self.node(row, col);
                let mut neighbours = Vec::with_capacity(2);
                if col + 1 < n {
                    neighbours.push(self.node(row, col + 1));
                }
                if row + 1 < n {
                    neighbours.push(self.node(row + 1, col));
                }
                for to in neighbours {
                    roads.push(Road {
                        id: LocationId(roads.len() as u32 + 1),
                        from,
                        to,
                        distance: f64::from(self.rng.random_range(min_dist..=max_dist)),
                        speed_limit: self.rng.random_range(min_limit..=max_limit),
                    });
                }
            }
        }

        Ok(RoadNetwork::from_roads(roads)?)
    }

    /// Random Travellers over the network's junctions.
    pub fn generate_travellers(&mut self, network: &RoadNetwork) -> Vec<TravellerSpec> {
        let nodes: Vec<NodeId> = network.nodes().collect();
        if nodes.len() < 2 {
            return Vec::new();
        }
        let (min_speed, max_speed) = self.config.speed_range;
        let (min_len, max_len) = self.config.length_range;

        (0..self.config.travellers)
            .map(|index| {
                let mut ends = nodes.choose_multiple(&mut self.rng, 2).copied();
                let source = ends.next().unwrap_or(nodes[0]);
                let destination = ends.next().unwrap_or(nodes[1]);
                TravellerSpec {
                    id: TravellerId(index as u32 + 1),
                    source,
                    destination,
                    start: self.rng.random_range(0..=self.config.start_window),
                    speed: self.rng.random_range(min_speed..=max_speed),
                    length: self.rng.random_range(min_len..=max_len),
                }
            })
            .collect()
    }

    /// Generate a network and its Travellers.
    pub fn generate(&mut self) -> Result<Scenario> {
        let network = self.generate_network()?;
        let travellers = self.generate_travellers(&network);
        Ok(Scenario {
            network,
            travellers,
            seed: Some(self.seed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> GeneratorConfig {
        GeneratorConfig {
            seed: Some(seed),
            ..Difficulty::Easy.config()
        }
    }

    #[test]
    fn test_lattice_shape() {
        let scenario = ScenarioGenerator::new(config(7)).generate().unwrap();
        assert_eq!(scenario.network.node_count(), 16);
        assert_eq!(scenario.network.road_count(), 24);
        assert!(scenario
            .network
            .roads()
            .all(|road| (20.0..=60.0).contains(&road.distance)));
    }

    #[test]
    fn test_travellers_have_distinct_ends() {
        let scenario = ScenarioGenerator::new(config(11)).generate().unwrap();
        assert_eq!(scenario.travellers.len(), 8);
        for spec in &scenario.travellers {
            assert_ne!(spec.source, spec.destination);
            assert!((0..=20).contains(&spec.start));
        }
    }

    #[test]
    fn test_same_seed_same_scenario() {
        let a = ScenarioGenerator::new(config(42)).generate().unwrap();
        let b = ScenarioGenerator::new(config(42)).generate().unwrap();
        assert_eq!(a.travellers, b.travellers);
        assert_eq!(a.network.to_edge_list(), b.network.to_edge_list());
    }

    #[test]
    fn test_save_and_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = ScenarioGenerator::new(config(3)).generate().unwrap();
        scenario.save(dir.path()).unwrap();

        let loaded = Scenario::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.travellers, scenario.travellers);
        assert_eq!(loaded.network.road_count(), scenario.network.road_count());
        assert_eq!(loaded.seed, None);
    }

    #[test]
    fn test_tiny_grid_rejected() {
        let mut generator = ScenarioGenerator::new(GeneratorConfig {
            grid: 1,
            seed: Some(1),
            ..GeneratorConfig::default()
        });
        assert!(generator.generate().is_err());
    }
}
