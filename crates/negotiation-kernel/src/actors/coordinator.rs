//! NegotiationCoordinator: drives the Router one round per `Round` message.
//!
//! The coordinator is the only owner of the Router. For every round it:
//! 1. Runs one Location phase and one Traveller phase
//! 2. Terminates leftover Travellers once the tick limit is reached
//! 3. Broadcasts TravellerSettled for every Traveller retired this round
//! 4. Sends RoundComplete to the registered round driver

use acton_reactive::prelude::*;
use dashmap::DashMap;
use mti::prelude::*;
use tracing::{debug, info, warn};

use crate::messages::{RegisterRoundDriver, Round, RoundComplete, TravellerSettled};
use crate::protocol::TravellerId;
use crate::router::{RoundReport, Router};
use crate::traveller::TravellerOutcome;

/// Actor state for NegotiationCoordinator.
pub struct NegotiationCoordinatorState {
    /// The Router owning every agent
    router: Option<Router>,
    /// Handle to round driver for sending RoundComplete
    round_driver: Option<ActorHandle>,
    /// Outcomes already broadcast, by Traveller
    settled: DashMap<TravellerId, TravellerOutcome>,
    /// Rounds handled so far
    rounds: usize,
}

impl Default for NegotiationCoordinatorState {
    fn default() -> Self {
        Self {
            router: None,
            round_driver: None,
            settled: DashMap::new(),
            rounds: 0,
        }
    }
}

impl Clone for NegotiationCoordinatorState {
    fn clone(&self) -> Self {
        let settled = DashMap::new();
        for entry in self.settled.iter() {
            settled.insert(*entry.key(), *entry.value());
        }

        Self {
            router: self.router.clone(),
            round_driver: self.round_driver.clone(),
            settled,
            rounds: self.rounds,
        }
    }
}

impl std::fmt::Debug for NegotiationCoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationCoordinatorState")
            .field("router", &self.router)
            .field("has_round_driver", &self.round_driver.is_some())
            .field("settled", &self.settled.len())
            .field("rounds", &self.rounds)
            .finish()
    }
}

/// Coordinator actor for a single negotiation.
///
/// Observers subscribe to `TravellerSettled` through the broker; the round
/// driver registers via `RegisterRoundDriver` and receives `RoundComplete`.
pub struct NegotiationCoordinator {
    router: Router,
}

impl NegotiationCoordinator {
    /// Wrap a Router whose Travellers have already submitted their reservations.
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Spawn this coordinator.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor = runtime
            .new_actor_with_name::<NegotiationCoordinatorState>("NegotiationCoordinator".to_string());

        actor.model.router = Some(self.router);

        configure_handlers(&mut actor);

        actor.start().await
    }
}

/// Run one Router step, applying the tick limit.
fn run_round(router: &mut Router) -> RoundReport {
    if router.is_complete() {
        return RoundReport {
            tick: router.tick(),
            active_travellers: router.active_travellers(),
            active_locations: router.active_locations(),
            complete: true,
            ..RoundReport::default()
        };
    }

    let mut report = router.step();
    if !report.complete && router.tick() >= router.config().max_ticks {
        let abandoned = router.abandon_remaining("tick limit reached");
        warn!(tick = router.tick(), abandoned, "Tick limit reached");
        report.terminated += abandoned;
        report.active_travellers = 0;
        report.complete = true;
    } else if report.complete && router.active_travellers() > 0 {
        report.terminated += router.abandon_remaining("no messages in flight");
        report.active_travellers = 0;
    }
    report
}

/// Configure all message handlers for the coordinator.
fn configure_handlers(actor: &mut ManagedActor<Idle, NegotiationCoordinatorState>) {
    actor.mutate_on::<RegisterRoundDriver>(|actor, context| {
        let handle = context.message().handle.clone();
        actor.model.round_driver = Some(handle);
        debug!("Registered round driver");
        Reply::ready()
    });

    actor.mutate_on::<Round>(|actor, _context| {
        let correlation_id = "round".create_type_id::<V7>().to_string();

        let Some(router) = actor.model.router.as_mut() else {
            warn!("NegotiationCoordinator: router not initialized");
            return Reply::ready();
        };

        let report = run_round(router);
        let simulation = report.complete.then(|| router.report());
        let newly_settled: Vec<TravellerOutcome> = router
            .outcomes()
            .filter(|outcome| !actor.model.settled.contains_key(&outcome.traveller))
            .copied()
            .collect();

        for outcome in &newly_settled {
            actor.model.settled.insert(outcome.traveller, *outcome);
        }
        actor.model.rounds += 1;

        info!(
            correlation_id = %correlation_id,
            tick = report.tick,
            finalized = report.finalized,
            terminated = report.terminated,
            active = report.active_travellers,
            locations = report.active_locations,
            complete = report.complete,
            "Round complete"
        );

        let tick = report.tick;
        let broker = actor.broker().clone();
        let round_driver = actor.model.round_driver.clone();

        Reply::pending(async move {
            for outcome in newly_settled {
                broker
                    .broadcast(TravellerSettled {
                        correlation_id: correlation_id.clone(),
                        tick,
                        outcome,
                    })
                    .await;
            }

            if let Some(round_driver) = round_driver {
                round_driver
                    .send(RoundComplete {
                        correlation_id,
                        report,
                        simulation,
                    })
                    .await;
            } else {
                warn!("Round finished with no round driver registered");
            }
        })
    });
}
