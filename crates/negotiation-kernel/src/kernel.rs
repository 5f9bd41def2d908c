//! Actor-driven negotiation: build a Router and hand it to a coordinator.
//!
//! ## Usage
//!
//! ```ignore
//! use negotiation_kernel::{NegotiationBuilder, NegotiationConfig};
//! use negotiation_kernel::messages::{RegisterRoundDriver, Round};
//! use acton_reactive::prelude::*;
//!
//! let mut runtime = ActonApp::launch_async().await;
//!
//! let coordinator = NegotiationBuilder::new(config, network)
//!     .add_travellers(specs)
//!     .spawn(&mut runtime)
//!     .await;
//!
//! // Register a driver that receives RoundComplete, then send Round
//! // messages until a RoundComplete reports `complete`.
//! coordinator.send(RegisterRoundDriver { handle: driver }).await;
//! coordinator.send(Round).await;
//! ```

use std::sync::Arc;

use acton_reactive::prelude::*;
use tracing::debug;

use crate::actors::NegotiationCoordinator;
use crate::config::NegotiationConfig;
use crate::network::PathFinder;
use crate::router::{Router, Simulation};
use crate::traveller::TravellerSpec;

/// Builder for an actor-driven negotiation.
pub struct NegotiationBuilder {
    simulation: Simulation,
    travellers: usize,
}

impl NegotiationBuilder {
    pub fn new(config: NegotiationConfig, network: Arc<dyn PathFinder>) -> Self {
        Self {
            simulation: Simulation::with_config(config, network),
            travellers: 0,
        }
    }

    pub fn add_travellers(mut self, specs: impl IntoIterator<Item = TravellerSpec>) -> Self {
        let specs: Vec<TravellerSpec> = specs.into_iter().collect();
        self.travellers += specs.len();
        self.simulation = self.simulation.add_travellers(specs);
        self
    }

    /// Register every Traveller and collect their initial reservations.
    pub fn build_router(self) -> Router {
        self.simulation.into_router()
    }

    /// Spawn the coordinator and return its handle.
    ///
    /// Travellers plan their routes before the actor starts, so the first
    /// `Round` already delivers reservations to Locations.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let travellers = self.travellers;
        let router = self.build_router();
        debug!(
            travellers,
            settled_at_start = router.outcomes().count(),
            "Spawning negotiation coordinator"
        );
        NegotiationCoordinator::new(router).spawn(runtime).await
    }
}
