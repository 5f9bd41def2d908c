//! Negotiation Kernel: decentralized time-slot negotiation on a road network
//!
//! Travellers reserve time intervals on every road (Location) of their route.
//! Locations resolve overlapping requests by shifting later ones, Travellers
//! check the answers for consistency and either proceed with the imposed
//! waits or reroute, and a synchronous Router delivers each population's
//! messages to the other until every Traveller finalizes or gives up.

pub mod actors;
pub mod config;
pub mod error;
pub mod interval;
pub mod kernel;
pub mod location;
pub mod messages;
pub mod network;
pub mod protocol;
pub mod router;
pub mod traveller;

pub use config::{NegotiationConfig, TimingConfig};
pub use error::{ConfigError, ParseError, PathNotFound, ProtocolError};
pub use interval::{compare, AllenRelation, TimeInterval};
pub use kernel::NegotiationBuilder;
pub use location::{LocationAgent, ScheduleStrategy};
pub use network::{PathFinder, Road, RoadNetwork, Route};
pub use protocol::{AgentId, LocationId, Message, NegotiationStatus, TravellerId};
pub use router::{run_simulation, RoundReport, Router, Simulation, SimulationReport};
pub use traveller::{TravellerAgent, TravellerOutcome, TravellerSpec};
