//! The Router: round barrier, message post office and agent registry.
//!
//! Each [`Router::step`] runs one Location phase followed by one Traveller
//! phase. A phase only completes when every active agent of that role has
//! submitted exactly one batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::NegotiationConfig;
use crate::error::ProtocolError;
use crate::location::{LocationAgent, ScheduleStrategy};
use crate::network::PathFinder;
use crate::protocol::{AgentId, LocationId, Message, NegotiationStatus, Role, TravellerId};
use crate::traveller::{TravellerAgent, TravellerOutcome, TravellerSpec};

/// Which population the Router is collecting batches from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    AwaitingTravellers,
    AwaitingLocations,
}

impl Phase {
    fn role(self) -> Role {
        match self {
            Phase::AwaitingTravellers => Role::Traveller,
            Phase::AwaitingLocations => Role::Location,
        }
    }
}

/// Summary of one Router tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub tick: usize,
    pub messages_to_locations: usize,
    pub messages_to_travellers: usize,
    /// Travellers that finalized during this tick
    pub finalized: usize,
    /// Travellers that terminated during this tick
    pub terminated: usize,
    pub active_travellers: usize,
    pub active_locations: usize,
    /// Protocol violations logged during this tick
    pub violations: usize,
    /// No messages remain in flight
    pub complete: bool,
}

/// Aggregate result of a whole negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub finalized: usize,
    pub terminated: usize,
    /// Sum of final costs over finalized Travellers
    pub total_cost: i64,
    /// Sum of initial plan costs over every Traveller that planned a route
    pub total_initial_cost: i64,
    /// Sum of initial plan costs over finalized Travellers only
    pub finalized_initial_cost: i64,
    pub ticks: usize,
    pub outcomes: Vec<TravellerOutcome>,
}

impl SimulationReport {
    fn from_outcomes(outcomes: Vec<TravellerOutcome>, ticks: usize) -> Self {
        let mut report = Self {
            ticks,
            ..Self::default()
        };
        for outcome in &outcomes {
            report.total_initial_cost += outcome.initial_cost.unwrap_or(0);
            if outcome.status == NegotiationStatus::Finalize {
                report.finalized += 1;
                report.total_cost += outcome.final_cost.unwrap_or(0);
                report.finalized_initial_cost += outcome.initial_cost.unwrap_or(0);
            } else {
                report.terminated += 1;
            }
        }
        report.outcomes = outcomes;
        report
    }

    /// Extra cost the negotiation added over the finalized Travellers' first plans.
    pub fn cost_difference(&self) -> i64 {
        self.total_cost - self.finalized_initial_cost
    }

    pub fn finalize_rate(&self) -> f64 {
        let total = self.finalized + self.terminated;
        if total == 0 {
            return 0.0;
        }
        self.finalized as f64 / total as f64
    }
}

/// Synchronous post office between the Traveller and Location populations.
#[derive(Clone)]
pub struct Router {
    config: NegotiationConfig,
    finder: Arc<dyn PathFinder>,
    phase: Phase,
    tick: usize,
    travellers: BTreeMap<TravellerId, TravellerAgent>,
    locations: BTreeMap<LocationId, LocationAgent>,
    settled: BTreeMap<TravellerId, TravellerOutcome>,
    expected: BTreeSet<AgentId>,
    submitted: BTreeSet<AgentId>,
    outbound: Vec<Message>,
    violations: Vec<ProtocolError>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("phase", &self.phase)
            .field("tick", &self.tick)
            .field("travellers", &self.travellers.len())
            .field("locations", &self.locations.len())
            .field("settled", &self.settled.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

impl Router {
    pub fn new(config: NegotiationConfig, finder: Arc<dyn PathFinder>) -> Self {
        Self {
            config,
            finder,
            phase: Phase::AwaitingTravellers,
            tick: 0,
            travellers: BTreeMap::new(),
            locations: BTreeMap::new(),
            settled: BTreeMap::new(),
            expected: BTreeSet::new(),
            submitted: BTreeSet::new(),
            outbound: Vec::new(),
            violations: Vec::new(),
        }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tick(&self) -> usize {
        self.tick
    }

    pub fn traveller(&self, id: TravellerId) -> Option<&TravellerAgent> {
        self.travellers.get(&id)
    }

    pub fn location(&self, id: LocationId) -> Option<&LocationAgent> {
        self.locations.get(&id)
    }

    pub fn active_travellers(&self) -> usize {
        self.travellers.len()
    }

    pub fn active_locations(&self) -> usize {
        self.locations.len()
    }

    /// Outcomes of every retired Traveller, by id.
    pub fn outcomes(&self) -> impl Iterator<Item = &TravellerOutcome> + '_ {
        self.settled.values()
    }

    pub fn violations(&self) -> &[ProtocolError] {
        &self.violations
    }

    /// No messages are waiting for delivery.
    pub fn is_complete(&self) -> bool {
        self.outbound.is_empty()
    }

    fn violation(&mut self, error: ProtocolError) {
        warn!(tick = self.tick, error = %error, "Protocol violation");
        self.violations.push(error);
    }

    /// Register a Traveller and submit its initial reservations.
    ///
    /// Only valid between steps, while the Router awaits Travellers.
    pub fn add_traveller(&mut self, spec: TravellerSpec) -> Result<(), ProtocolError> {
        let sender = AgentId::Traveller(spec.id);
        if self.phase != Phase::AwaitingTravellers {
            return Err(ProtocolError::WrongPhase {
                sender,
                phase: self.phase,
            });
        }
        if self.travellers.contains_key(&spec.id) || self.settled.contains_key(&spec.id) {
            return Err(ProtocolError::DuplicateSubmission { sender });
        }

        let property = self.config.strategy.sender_property();
        let mut agent =
            TravellerAgent::new(spec, self.config.dw_budget, self.config.timing.clone(), property);
        let batch = agent.plan_route(self.finder.as_ref());
        self.travellers.insert(spec.id, agent);
        self.expected.insert(sender);
        self.submit(sender, batch)?;
        self.retire_if_settled(spec.id);
        Ok(())
    }

    /// Accept one agent's complete outbound batch for the current phase.
    ///
    /// Returns `true` once every expected agent has submitted.
    pub fn submit(&mut self, sender: AgentId, batch: Vec<Message>) -> Result<bool, ProtocolError> {
        if sender.role() != self.phase.role() {
            return Err(ProtocolError::WrongPhase {
                sender,
                phase: self.phase,
            });
        }
        if self.submitted.contains(&sender) {
            return Err(ProtocolError::DuplicateSubmission { sender });
        }
        if !self.expected.contains(&sender) {
            return Err(ProtocolError::UnknownSender { sender });
        }
        self.submitted.insert(sender);

        for msg in batch {
            if msg.sender != sender || msg.receiver.role() == sender.role() {
                self.violation(ProtocolError::MisaddressedMessage {
                    sender: msg.sender,
                    receiver: msg.receiver,
                });
                continue;
            }
            trace!(message = %msg, "Collected");
            self.outbound.push(msg);
        }

        Ok(self.submitted.len() == self.expected.len())
    }

    /// Group collected messages by receiver and open the barrier for `phase`.
    fn open_phase(&mut self, phase: Phase) -> BTreeMap<AgentId, Vec<Message>> {
        let mut groups: BTreeMap<AgentId, Vec<Message>> = BTreeMap::new();
        for msg in self.outbound.drain(..) {
            groups.entry(msg.receiver).or_default().push(msg);
        }
        self.phase = phase;
        self.submitted.clear();
        self.expected = match phase {
            Phase::AwaitingLocations => groups.keys().copied().collect(),
            Phase::AwaitingTravellers => self.travellers.keys().map(|id| AgentId::Traveller(*id)).collect(),
        };
        groups
    }

    fn retire_if_settled(&mut self, id: TravellerId) -> Option<NegotiationStatus> {
        let outcome = self.travellers.get(&id)?.outcome()?;
        self.travellers.remove(&id);
        if self.settled.contains_key(&id) {
            return None;
        }
        debug!(traveller = %id, status = %outcome.status, "Traveller retired");
        self.settled.insert(id, outcome);
        Some(outcome.status)
    }

    /// Run one Location phase and one Traveller phase.
    pub fn step(&mut self) -> RoundReport {
        let violations_before = self.violations.len();
        let mut report = RoundReport::default();

        let to_locations = self.open_phase(Phase::AwaitingLocations);
        report.messages_to_locations = to_locations.values().map(Vec::len).sum();
        for (receiver, group) in to_locations {
            let Some(id) = receiver.as_location() else {
                continue;
            };
            let all_rejected = group.iter().all(|m| m.status == NegotiationStatus::Reject);
            let strategy = self.config.strategy;
            let separation = self.config.timing.separation();
            let agent = self.locations.entry(id).or_insert_with(|| {
                debug!(location = %id, "Location created");
                LocationAgent::new(id, strategy, separation)
            });
            agent.receive(group);
            let replies = agent.process();
            let retire = all_rejected && agent.constraints().is_empty();

            if let Err(error) = self.submit(receiver, replies) {
                self.violation(error);
            }
            if retire {
                self.locations.remove(&id);
                debug!(location = %id, "Location retired");
            }
        }
        self.tick += 1;

        let mut to_travellers = self.open_phase(Phase::AwaitingTravellers);
        report.messages_to_travellers = to_travellers.values().map(Vec::len).sum();
        let active: Vec<TravellerId> = self.travellers.keys().copied().collect();
        for id in active {
            let receiver = AgentId::Traveller(id);
            let inbox = to_travellers.remove(&receiver).unwrap_or_default();
            let batch = match self.travellers.get_mut(&id) {
                Some(agent) => {
                    agent.receive(inbox);
                    agent.process(self.finder.as_ref())
                }
                None => continue,
            };
            if let Err(error) = self.submit(receiver, batch) {
                self.violation(error);
            }
            match self.retire_if_settled(id) {
                Some(NegotiationStatus::Finalize) => report.finalized += 1,
                Some(_) => report.terminated += 1,
                None => {}
            }
        }
        for receiver in to_travellers.into_keys() {
            self.violation(ProtocolError::RetiredAgent { receiver });
        }

        report.tick = self.tick;
        report.active_travellers = self.travellers.len();
        report.active_locations = self.locations.len();
        report.violations = self.violations.len() - violations_before;
        report.complete = self.is_complete();
        report
    }

    /// Terminate every Traveller still negotiating.
    pub fn abandon_remaining(&mut self, reason: &str) -> usize {
        let active: Vec<TravellerId> = self.travellers.keys().copied().collect();
        for id in &active {
            if let Some(agent) = self.travellers.get_mut(id) {
                agent.abandon(reason);
            }
            self.retire_if_settled(*id);
        }
        self.outbound.clear();
        active.len()
    }

    /// Step until no messages remain or the tick limit is reached.
    pub fn run(&mut self) -> SimulationReport {
        while !self.is_complete() {
            if self.tick >= self.config.max_ticks {
                let abandoned = self.abandon_remaining("tick limit reached");
                warn!(tick = self.tick, abandoned, "Tick limit reached");
                break;
            }
            let round = self.step();
            debug!(
                tick = round.tick,
                to_locations = round.messages_to_locations,
                to_travellers = round.messages_to_travellers,
                finalized = round.finalized,
                terminated = round.terminated,
                active = round.active_travellers,
                "Round complete"
            );
        }
        if !self.travellers.is_empty() {
            self.abandon_remaining("no messages in flight");
        }
        self.report()
    }

    /// Report over every retired Traveller so far.
    pub fn report(&self) -> SimulationReport {
        SimulationReport::from_outcomes(self.settled.values().copied().collect(), self.tick)
    }
}

/// A configured negotiation over one network.
pub struct Simulation {
    config: NegotiationConfig,
    network: Arc<dyn PathFinder>,
    specs: Vec<TravellerSpec>,
}

impl Simulation {
    pub fn with_config(config: NegotiationConfig, network: Arc<dyn PathFinder>) -> Self {
        Self {
            config,
            network,
            specs: Vec::new(),
        }
    }

    pub fn add_travellers(mut self, specs: impl IntoIterator<Item = TravellerSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Build a Router with every Traveller registered and initial reservations collected.
    pub fn into_router(self) -> Router {
        let mut router = Router::new(self.config, self.network);
        for spec in self.specs {
            if let Err(error) = router.add_traveller(spec) {
                warn!(traveller = %spec.id, error = %error, "Traveller not registered");
            }
        }
        router
    }

    pub fn run(self) -> SimulationReport {
        let mut router = self.into_router();
        let report = router.run();
        info!(
            finalized = report.finalized,
            terminated = report.terminated,
            total_cost = report.total_cost,
            initial_cost = report.finalized_initial_cost,
            cost_difference = report.cost_difference(),
            ticks = report.ticks,
            "Simulation finished"
        );
        report
    }
}

/// Negotiate routes for `specs` with default timing.
pub fn run_simulation<N>(
    network: N,
    specs: impl IntoIterator<Item = TravellerSpec>,
    dw_budget: u32,
    strategy: ScheduleStrategy,
) -> SimulationReport
where
    N: PathFinder + 'static,
{
    let config = NegotiationConfig {
        dw_budget,
        strategy,
        ..NegotiationConfig::default()
    };
    Simulation::with_config(config, Arc::new(network))
        .add_travellers(specs)
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NodeId, Road, RoadNetwork};

    fn road(id: u32, from: NodeId, to: NodeId, distance: f64) -> Road {
        Road {
            id: LocationId(id),
            from,
            to,
            distance,
            speed_limit: 100,
        }
    }

    fn traveller(id: u32, source: NodeId, destination: NodeId) -> TravellerSpec {
        TravellerSpec {
            id: TravellerId(id),
            source,
            destination,
            start: 0,
            speed: 1,
            length: 0,
        }
    }

    fn outcome(report: &SimulationReport, id: u32) -> TravellerOutcome {
        *report
            .outcomes
            .iter()
            .find(|o| o.traveller == TravellerId(id))
            .unwrap()
    }

    #[test]
    fn test_disjoint_travellers_finalize_at_initial_cost() {
        let network = RoadNetwork::from_roads([road(1, 1, 2, 10.0), road(2, 3, 4, 10.0)]).unwrap();
        let report = run_simulation(
            network,
            [traveller(1, 1, 2), traveller(2, 3, 4)],
            3,
            ScheduleStrategy::EarliestStart,
        );

        assert_eq!(report.finalized, 2);
        assert_eq!(report.terminated, 0);
        assert_eq!(report.total_cost, 28);
        assert_eq!(report.cost_difference(), 0);
        assert_eq!(outcome(&report, 1).rounds, 3);
        assert_eq!(report.finalize_rate(), 1.0);
    }

    #[test]
    fn test_shared_road_separates_travellers() {
        let network = RoadNetwork::from_roads([road(1, 1, 2, 10.0), road(2, 2, 3, 10.0)]).unwrap();
        let mut router = Simulation::with_config(NegotiationConfig::default(), Arc::new(network))
            .add_travellers([traveller(1, 1, 3), traveller(2, 1, 3)])
            .into_router();
        let report = router.run();

        assert_eq!(report.finalized, 2);
        assert_eq!(outcome(&report, 1).final_cost, Some(24));
        assert_eq!(outcome(&report, 2).final_cost, Some(44));
        assert_eq!(report.total_initial_cost, 48);
        assert_eq!(report.cost_difference(), 20);

        let constraints = router.location(LocationId(1)).unwrap().constraints();
        assert_eq!(constraints.len(), 2);
        assert!(!constraints[0].interval.overlaps(&constraints[1].interval));
    }

    #[test]
    fn test_all_reject_retires_location() {
        // T2 is pushed off L1 and takes the direct road, dropping L2
        let network = RoadNetwork::from_roads([
            road(1, 1, 2, 10.0),
            road(2, 2, 3, 10.0),
            road(3, 1, 3, 25.0),
        ])
        .unwrap();
        let mut router = Simulation::with_config(NegotiationConfig::default(), Arc::new(network))
            .add_travellers([traveller(1, 1, 2), traveller(2, 1, 3)])
            .into_router();

        let first = router.step();
        assert_eq!(first.messages_to_locations, 3);
        assert_eq!(first.active_locations, 2);
        let plan = router.traveller(TravellerId(2)).unwrap().plan();
        assert_eq!(plan.locations().collect::<Vec<_>>(), vec![LocationId(3)]);

        let second = router.step();
        assert!(router.location(LocationId(2)).is_none());
        assert!(router.location(LocationId(3)).is_some());
        assert_eq!(second.active_locations, 2);

        let report = router.run();
        assert_eq!(report.finalized, 2);
        assert_eq!(outcome(&report, 2).final_cost, Some(29));
    }

    #[test]
    fn test_submit_enforces_phase_and_single_batch() {
        let network = RoadNetwork::from_roads([road(1, 1, 2, 10.0)]).unwrap();
        let mut router = Router::new(NegotiationConfig::default(), Arc::new(network));
        router.add_traveller(traveller(1, 1, 2)).unwrap();

        let location = AgentId::Location(LocationId(1));
        assert!(matches!(
            router.submit(location, Vec::new()),
            Err(ProtocolError::WrongPhase { .. })
        ));
        assert!(matches!(
            router.submit(AgentId::Traveller(TravellerId(1)), Vec::new()),
            Err(ProtocolError::DuplicateSubmission { .. })
        ));
        assert!(matches!(
            router.submit(AgentId::Traveller(TravellerId(9)), Vec::new()),
            Err(ProtocolError::UnknownSender { .. })
        ));
        assert!(matches!(
            router.add_traveller(traveller(1, 1, 2)),
            Err(ProtocolError::DuplicateSubmission { .. })
        ));
    }

    #[test]
    fn test_misaddressed_messages_are_dropped() {
        let network = RoadNetwork::from_roads([road(1, 1, 2, 10.0)]).unwrap();
        let mut router = Router::new(NegotiationConfig::default(), Arc::new(network));
        let spec = traveller(1, 1, 2);
        router.travellers.insert(
            spec.id,
            TravellerAgent::new(spec, 5, Default::default(), None),
        );
        router.expected.insert(AgentId::Traveller(spec.id));

        let forged = Message::to_location(
            TravellerId(7),
            LocationId(1),
            NegotiationStatus::Reserve,
            crate::interval::TimeInterval::with_duration(0, 5),
            0,
        );
        assert!(router.submit(AgentId::Traveller(spec.id), vec![forged]).unwrap());
        assert!(router.is_complete());
        assert_eq!(router.violations().len(), 1);
    }

    #[test]
    fn test_unroutable_traveller_terminates_immediately() {
        let network = RoadNetwork::from_roads([road(1, 1, 2, 10.0)]).unwrap();
        let report = run_simulation(
            network,
            [traveller(1, 1, 99)],
            5,
            ScheduleStrategy::EarliestStart,
        );
        assert_eq!(report.finalized, 0);
        assert_eq!(report.terminated, 1);
        assert_eq!(report.ticks, 0);
    }

    #[test]
    fn test_tick_limit_abandons_travellers() {
        let network = RoadNetwork::from_roads([road(1, 1, 2, 10.0)]).unwrap();
        let config = NegotiationConfig {
            max_ticks: 1,
            ..NegotiationConfig::default()
        };
        let report = Simulation::with_config(config, Arc::new(network))
            .add_travellers([traveller(1, 1, 2)])
            .run();
        assert_eq!(report.ticks, 1);
        assert_eq!(report.terminated, 1);
        assert_eq!(outcome(&report, 1).status, NegotiationStatus::Terminate);
    }
}
