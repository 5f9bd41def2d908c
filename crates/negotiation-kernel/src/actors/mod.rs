//! Acton-reactive actors for the negotiation kernel.
//!
//! ```text
//! Round → Coordinator
//!   ├─ Router::step (Location phase, then Traveller phase)
//!   ├─ TravellerSettled (broadcast) → observers, once per retired Traveller
//!   └─ RoundComplete → round driver
//! ```
//!
//! The coordinator owns the Router; agents never share state and only meet
//! through the Router's message lists.

mod coordinator;

pub use coordinator::{NegotiationCoordinator, NegotiationCoordinatorState};
