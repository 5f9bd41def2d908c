//! Message types for acton-reactive actor communication.
//!
//! Each round gets a correlation ID (via mti) so round results and the
//! settlements broadcast during that round can be matched up by observers.

use crate::router::{RoundReport, SimulationReport};
use crate::traveller::TravellerOutcome;

/// Register the round driver handle with the coordinator.
///
/// The coordinator will send RoundComplete messages to this handle.
#[derive(Debug, Clone)]
pub struct RegisterRoundDriver {
    /// The round driver's actor handle
    pub handle: acton_reactive::prelude::ActorHandle,
}

/// Round trigger - sent to NegotiationCoordinator to run one Router step.
#[derive(Debug, Clone)]
pub struct Round;

/// Round completion notification - sent to the registered round driver.
#[derive(Debug, Clone)]
pub struct RoundComplete {
    /// Correlation ID of the round
    pub correlation_id: String,
    /// What happened during the round
    pub report: RoundReport,
    /// Final report, present once no messages remain in flight
    pub simulation: Option<SimulationReport>,
}

/// A Traveller left the negotiation - broadcast via the broker.
#[derive(Debug, Clone)]
pub struct TravellerSettled {
    /// Correlation ID of the round in which it settled
    pub correlation_id: String,
    /// Router tick after the round
    pub tick: usize,
    pub outcome: TravellerOutcome,
}
