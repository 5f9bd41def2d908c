//! Traveller agents: route planning and the negotiation state machine.
//!
//! ```text
//!            consistent               all ACCEPT               all DW, budget left
//! RESERVE ─────────────► ACCEPT ─────────────────► DW ─────────────────────────► DW
//!    ▲                     │                        │
//!    │   waits / order     │                        │ budget reached
//!    └─────────────────────┴────────────────────────┤
//!                                                   ▼
//!                              round budget gone: TERMINATE      FINALIZE
//! ```
//!
//! Every outbound batch carries a round number one higher than the previous
//! batch; the initial reservation is round 0.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::TimingConfig;
use crate::error::{PathNotFound, ProtocolError};
use crate::interval::{compare, AllenRelation, TimeInterval};
use crate::location::SenderProperty;
use crate::network::{NodeId, PathFinder, Route};
use crate::protocol::{AgentId, LocationId, Message, NegotiationStatus, TravellerId};

/// What a Traveller wants: get from `source` to `destination` leaving at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravellerSpec {
    pub id: TravellerId,
    pub source: NodeId,
    pub destination: NodeId,
    pub start: i64,
    pub speed: u32,
    pub length: u32,
}

/// Ordered Location → interval mapping, in route order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPlan {
    entries: Vec<(LocationId, TimeInterval)>,
}

impl ReservationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, location: LocationId) -> Option<TimeInterval> {
        self.entries
            .iter()
            .find(|(id, _)| *id == location)
            .map(|(_, interval)| *interval)
    }

    pub fn contains(&self, location: LocationId) -> bool {
        self.position(location).is_some()
    }

    pub fn position(&self, location: LocationId) -> Option<usize> {
        self.entries.iter().position(|(id, _)| *id == location)
    }

    /// Update an existing entry in place or append a new one.
    pub fn insert(&mut self, location: LocationId, interval: TimeInterval) {
        match self.entries.iter_mut().find(|(id, _)| *id == location) {
            Some(entry) => entry.1 = interval,
            None => self.entries.push((location, interval)),
        }
    }

    pub fn remove(&mut self, location: LocationId) -> Option<TimeInterval> {
        let index = self.position(location)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocationId, TimeInterval)> + '_ {
        self.entries.iter().copied()
    }

    pub fn locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// End of the last interval in route order.
    pub fn final_end(&self) -> Option<i64> {
        self.entries.last().map(|(_, interval)| interval.end())
    }
}

impl FromIterator<(LocationId, TimeInterval)> for ReservationPlan {
    fn from_iter<I: IntoIterator<Item = (LocationId, TimeInterval)>>(iter: I) -> Self {
        let mut plan = Self::new();
        for (location, interval) in iter {
            plan.insert(location, interval);
        }
        plan
    }
}

/// Turn a route into reserved intervals.
///
/// Each road takes `max(1, ceil(distance * time_scale / speed))` units, where
/// speed is the slowest of the Traveller, the road itself and every earlier
/// road still under the Traveller's length. The reserved interval adds the
/// turn penalty so the tail can clear; the next road starts without it.
pub fn time_plan(
    route: &Route,
    finder: &dyn PathFinder,
    spec: &TravellerSpec,
    timing: &TimingConfig,
) -> Result<ReservationPlan, PathNotFound> {
    let infos = route
        .locations()
        .map(|location| finder.edge_info(location).map(|info| (location, info)))
        .collect::<Option<Vec<_>>>()
        .ok_or(PathNotFound {
            source_node: spec.source,
            destination: spec.destination,
            excluded: 0,
        })?;

    let mut plan = ReservationPlan::new();
    let mut t = spec.start;
    for (index, (location, info)) in infos.iter().enumerate() {
        let mut speed = spec.speed.min(info.speed_limit);
        let mut trailing = 0.0;
        for (_, behind) in infos[..index].iter().rev() {
            trailing += behind.distance;
            if trailing > f64::from(spec.length) {
                break;
            }
            speed = speed.min(behind.speed_limit);
        }
        let speed = f64::from(speed.max(1));
        let travel = ((info.distance * timing.time_scale / speed).ceil() as i64).max(1);
        plan.insert(
            *location,
            TimeInterval::with_duration(t, travel + timing.turn_penalty),
        );
        t += travel;
    }
    Ok(plan)
}

/// Apply imposed waits along the plan in route order.
///
/// A Location's own wait applies in full; without one, the wait carried from
/// earlier Locations still shifts it; a wait smaller than the carried one
/// only adds the difference.
pub fn propagate_waits(
    plan: &ReservationPlan,
    proposals: &BTreeMap<LocationId, TimeInterval>,
    waits: &BTreeMap<LocationId, i64>,
) -> ReservationPlan {
    let mut carried = 0;
    plan.iter()
        .map(|(location, reserved)| {
            let interval = match (waits.get(&location), proposals.get(&location)) {
                (Some(&wait), Some(proposed)) if wait >= carried => {
                    carried = wait;
                    *proposed
                }
                (Some(&wait), Some(proposed)) => proposed.shifted(carried - wait),
                _ => reserved.shifted(carried),
            };
            (location, interval)
        })
        .collect()
}

/// Result of checking one round of Location responses against the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReview {
    /// Latest response per Location
    pub responses: BTreeMap<LocationId, (NegotiationStatus, TimeInterval)>,
    /// Responses sorted by start reproduce the route order with no shared starts
    pub ordering_consistent: bool,
    /// Positive delay imposed per Location
    pub waits: BTreeMap<LocationId, i64>,
}

impl ConsistencyReview {
    pub fn is_consistent(&self) -> bool {
        self.ordering_consistent && self.waits.is_empty()
    }

    pub fn all(&self, status: NegotiationStatus) -> bool {
        self.responses.values().all(|(s, _)| *s == status)
    }

    fn proposals(&self) -> BTreeMap<LocationId, TimeInterval> {
        self.responses
            .iter()
            .map(|(location, (_, interval))| (*location, *interval))
            .collect()
    }

    fn latest_end(&self) -> Option<i64> {
        self.responses.values().map(|(_, interval)| interval.end()).max()
    }
}

/// Final state of a Traveller that has left the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravellerOutcome {
    pub traveller: TravellerId,
    pub status: NegotiationStatus,
    /// Cost of the first plan, before any negotiation
    pub initial_cost: Option<i64>,
    /// Realized cost, only for finalized Travellers
    pub final_cost: Option<i64>,
    pub rounds: u32,
}

/// One Traveller negotiating its route.
#[derive(Debug, Clone)]
pub struct TravellerAgent {
    spec: TravellerSpec,
    budget: u32,
    timing: TimingConfig,
    property: Option<SenderProperty>,
    status: NegotiationStatus,
    round: u32,
    dw_count: u32,
    plan: ReservationPlan,
    exclusions: BTreeSet<LocationId>,
    inbox: Vec<Message>,
    initial_cost: Option<i64>,
    final_cost: Option<i64>,
}

impl TravellerAgent {
    pub fn new(
        spec: TravellerSpec,
        budget: u32,
        timing: TimingConfig,
        property: Option<SenderProperty>,
    ) -> Self {
        Self {
            spec,
            budget,
            timing,
            property,
            status: NegotiationStatus::Reserve,
            round: 0,
            dw_count: 0,
            plan: ReservationPlan::new(),
            exclusions: BTreeSet::new(),
            inbox: Vec::new(),
            initial_cost: None,
            final_cost: None,
        }
    }

    pub fn id(&self) -> TravellerId {
        self.spec.id
    }

    pub fn spec(&self) -> &TravellerSpec {
        &self.spec
    }

    pub fn status(&self) -> NegotiationStatus {
        self.status
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn dw_rounds(&self) -> u32 {
        self.dw_count
    }

    pub fn plan(&self) -> &ReservationPlan {
        &self.plan
    }

    pub fn exclusions(&self) -> &BTreeSet<LocationId> {
        &self.exclusions
    }

    pub fn initial_cost(&self) -> Option<i64> {
        self.initial_cost
    }

    pub fn final_cost(&self) -> Option<i64> {
        self.final_cost
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn outcome(&self) -> Option<TravellerOutcome> {
        self.is_settled().then(|| TravellerOutcome {
            traveller: self.spec.id,
            status: self.status,
            initial_cost: self.initial_cost,
            final_cost: self.final_cost,
            rounds: self.round,
        })
    }

    fn cost_of(&self, plan: &ReservationPlan) -> Option<i64> {
        plan.final_end().map(|end| end - self.spec.start)
    }

    fn property_value(&self) -> Option<u32> {
        self.property.map(|property| match property {
            SenderProperty::Speed => self.spec.speed,
            SenderProperty::Length => self.spec.length,
        })
    }

    fn message(&self, location: LocationId, status: NegotiationStatus, interval: TimeInterval, round: u32) -> Message {
        Message::to_location(self.spec.id, location, status, interval, round)
            .with_property(self.property_value())
    }

    fn broadcast(&self, status: NegotiationStatus, round: u32) -> Vec<Message> {
        self.plan
            .iter()
            .map(|(location, interval)| self.message(location, status, interval, round))
            .collect()
    }

    fn terminate(&mut self, reason: &str) -> Vec<Message> {
        self.status = NegotiationStatus::Terminate;
        info!(traveller = %self.spec.id, round = self.round, reason, "Traveller terminated");
        Vec::new()
    }

    /// Stop negotiating without a final plan.
    pub fn abandon(&mut self, reason: &str) {
        self.inbox.clear();
        self.terminate(reason);
    }

    fn plan_for(
        &self,
        finder: &dyn PathFinder,
        excluded: &BTreeSet<LocationId>,
    ) -> Result<ReservationPlan, PathNotFound> {
        let route = finder.find_path(self.spec.source, self.spec.destination, excluded)?;
        time_plan(&route, finder, &self.spec, &self.timing)
    }

    /// Compute the initial route and send RESERVE for every Location on it.
    pub fn plan_route(&mut self, finder: &dyn PathFinder) -> Vec<Message> {
        let plan = match self.plan_for(finder, &BTreeSet::new()) {
            Ok(plan) if !plan.is_empty() => plan,
            Ok(_) => return self.terminate("empty route"),
            Err(error) => {
                warn!(traveller = %self.spec.id, error = %error, "No initial route");
                return self.terminate("no route");
            }
        };
        self.plan = plan;
        self.initial_cost = self.cost_of(&self.plan);
        self.status = NegotiationStatus::Reserve;
        self.round = 0;
        debug!(
            traveller = %self.spec.id,
            locations = self.plan.len(),
            initial_cost = ?self.initial_cost,
            "Initial plan"
        );
        self.broadcast(NegotiationStatus::Reserve, self.round)
    }

    /// Buffer Location responses for the next [`TravellerAgent::process`].
    pub fn receive(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.inbox.extend(messages);
    }

    /// Check responses against the current plan.
    pub fn review(&self, responses: &[Message]) -> ConsistencyReview {
        let mut latest: BTreeMap<LocationId, (NegotiationStatus, TimeInterval)> = BTreeMap::new();
        for msg in responses {
            let location = match (msg.sender, msg.receiver) {
                (AgentId::Location(location), AgentId::Traveller(to))
                    if to == self.spec.id && self.plan.contains(location) =>
                {
                    location
                }
                (sender, receiver) => {
                    let error = ProtocolError::MisaddressedMessage { sender, receiver };
                    warn!(traveller = %self.spec.id, error = %error, "Dropped response");
                    continue;
                }
            };
            if latest.insert(location, (msg.status, msg.interval)).is_some() {
                warn!(traveller = %self.spec.id, location = %location, "Duplicate response");
            }
        }

        let mut by_start: Vec<(i64, usize, LocationId)> = latest
            .iter()
            .filter_map(|(location, (_, interval))| {
                let position = self.plan.position(*location)?;
                Some((interval.start(), position, *location))
            })
            .collect();
        by_start.sort_unstable();

        let distinct_starts = by_start.windows(2).all(|pair| pair[0].0 != pair[1].0);
        let same_order = by_start.len() == self.plan.len()
            && by_start
                .iter()
                .map(|(_, _, location)| *location)
                .eq(self.plan.locations());

        let mut waits = BTreeMap::new();
        for (location, (_, proposed)) in &latest {
            let Some(reserved) = self.plan.get(*location) else {
                continue;
            };
            if compare(&reserved, proposed) == AllenRelation::Equal {
                continue;
            }
            if proposed.start() < reserved.start() {
                let error = ProtocolError::EarlierProposal {
                    location: AgentId::Location(*location),
                    reserved: reserved.start(),
                    proposed: proposed.start(),
                };
                warn!(traveller = %self.spec.id, error = %error, "Protocol violation");
                continue;
            }
            waits.insert(*location, proposed.start() - reserved.start());
        }

        ConsistencyReview {
            responses: latest,
            ordering_consistent: distinct_starts && same_order,
            waits,
        }
    }

    /// Evaluate the buffered responses and produce the next batch.
    pub fn process(&mut self, finder: &dyn PathFinder) -> Vec<Message> {
        let responses = std::mem::take(&mut self.inbox);
        if self.status.is_terminal() {
            warn!(traveller = %self.spec.id, status = %self.status, "Processed after settling");
            return Vec::new();
        }
        if responses.is_empty() {
            return self.terminate("no responses");
        }

        let next = self.round + 1;
        if next > self.budget {
            return self.terminate("round budget exhausted");
        }

        let review = self.review(&responses);
        trace!(traveller = %self.spec.id, review = ?review, "Reviewed responses");

        let batch = if review.is_consistent() {
            self.advance(&review, next)
        } else {
            debug!(
                traveller = %self.spec.id,
                ordering_consistent = review.ordering_consistent,
                waits = review.waits.len(),
                "Plan inconsistent"
            );
            self.renegotiate(&review, next, finder)
        };
        self.round = next;
        batch
    }

    fn advance(&mut self, review: &ConsistencyReview, next: u32) -> Vec<Message> {
        for (location, (_, interval)) in &review.responses {
            self.plan.insert(*location, *interval);
        }

        match self.status {
            NegotiationStatus::Accept if review.all(NegotiationStatus::Accept) => {
                if next < self.budget {
                    self.status = NegotiationStatus::Dw;
                    self.dw_count = 1;
                    self.broadcast(NegotiationStatus::Dw, next)
                } else {
                    self.finalize(review, next)
                }
            }
            NegotiationStatus::Dw if review.all(NegotiationStatus::Dw) => {
                self.dw_count += 1;
                if next < self.budget {
                    self.broadcast(NegotiationStatus::Dw, next)
                } else {
                    self.finalize(review, next)
                }
            }
            _ => {
                self.status = NegotiationStatus::Accept;
                self.dw_count = 0;
                self.broadcast(NegotiationStatus::Accept, next)
            }
        }
    }

    fn finalize(&mut self, review: &ConsistencyReview, next: u32) -> Vec<Message> {
        self.status = NegotiationStatus::Finalize;
        self.final_cost = review.latest_end().map(|end| end - self.spec.start);
        info!(
            traveller = %self.spec.id,
            round = next,
            dw_rounds = self.dw_count,
            final_cost = ?self.final_cost,
            initial_cost = ?self.initial_cost,
            "Traveller finalized"
        );
        self.broadcast(NegotiationStatus::Finalize, next)
    }

    fn renegotiate(
        &mut self,
        review: &ConsistencyReview,
        next: u32,
        finder: &dyn PathFinder,
    ) -> Vec<Message> {
        self.exclusions.extend(review.waits.keys().copied());

        let proceed = propagate_waits(&self.plan, &review.proposals(), &review.waits);
        let proceed_cost = self.cost_of(&proceed);

        let alternate = match self.plan_for(finder, &self.exclusions) {
            Ok(plan) if !plan.is_empty() => Some(plan),
            Ok(_) => None,
            Err(error) => {
                debug!(traveller = %self.spec.id, error = %error, "No alternate route");
                None
            }
        };
        let alternate_cost = alternate.as_ref().and_then(|plan| self.cost_of(plan));

        let chosen = match alternate {
            Some(plan) if !review.ordering_consistent => plan,
            Some(plan) if alternate_cost < proceed_cost => plan,
            _ => proceed,
        };
        debug!(
            traveller = %self.spec.id,
            proceed_cost = ?proceed_cost,
            alternate_cost = ?alternate_cost,
            exclusions = self.exclusions.len(),
            "Renegotiating"
        );

        let mut batch: Vec<Message> = chosen
            .iter()
            .map(|(location, interval)| {
                self.message(location, NegotiationStatus::Reserve, interval, next)
            })
            .collect();
        batch.extend(
            self.plan
                .iter()
                .filter(|(location, _)| !chosen.contains(*location))
                .map(|(location, interval)| {
                    self.message(location, NegotiationStatus::Reject, interval, next)
                }),
        );

        self.plan = chosen;
        self.status = NegotiationStatus::Reserve;
        self.dw_count = 0;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Road, RoadNetwork};

    fn iv(start: i64, end: i64) -> TimeInterval {
        TimeInterval::new(start, end).unwrap()
    }

    fn road(id: u32, from: NodeId, to: NodeId, distance: f64) -> Road {
        Road {
            id: LocationId(id),
            from,
            to,
            distance,
            speed_limit: 100,
        }
    }

    /// Shortest 1→3 is L1,L2. Avoiding L2 gives L1,L3,L4; avoiding L1 gives L5,L4.
    fn network() -> RoadNetwork {
        RoadNetwork::from_roads([
            road(1, 1, 2, 100.0),
            road(2, 2, 3, 100.0),
            road(3, 2, 4, 200.0),
            road(4, 4, 3, 200.0),
            road(5, 1, 4, 350.0),
        ])
        .unwrap()
    }

    fn spec() -> TravellerSpec {
        TravellerSpec {
            id: TravellerId(1),
            source: 1,
            destination: 3,
            start: 0,
            speed: 10,
            length: 0,
        }
    }

    fn no_turn_penalty() -> TimingConfig {
        TimingConfig {
            turn_penalty: 0,
            ..TimingConfig::default()
        }
    }

    fn traveller(budget: u32) -> TravellerAgent {
        TravellerAgent::new(spec(), budget, no_turn_penalty(), None)
    }

    fn reply(location: u32, status: NegotiationStatus, start: i64, end: i64) -> Message {
        Message::to_traveller(LocationId(location), TravellerId(1), status, iv(start, end), 0)
    }

    fn sent_to(batch: &[Message], location: u32) -> &Message {
        batch
            .iter()
            .find(|m| m.receiver == AgentId::Location(LocationId(location)))
            .unwrap()
    }

    #[test]
    fn test_initial_plan_and_reservations() {
        let network = network();
        let mut agent = traveller(5);
        let batch = agent.plan_route(&network);

        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|m| m.status == NegotiationStatus::Reserve && m.round == 0));
        assert_eq!(agent.plan().get(LocationId(1)), Some(iv(0, 10)));
        assert_eq!(agent.plan().get(LocationId(2)), Some(iv(10, 20)));
        assert_eq!(agent.initial_cost(), Some(20));
    }

    #[test]
    fn test_time_plan_uses_turn_penalty_and_trailing_speed() {
        let network = RoadNetwork::from_roads([
            Road {
                id: LocationId(1),
                from: 1,
                to: 2,
                distance: 10.0,
                speed_limit: 5,
            },
            Road {
                id: LocationId(2),
                from: 2,
                to: 3,
                distance: 100.0,
                speed_limit: 50,
            },
        ])
        .unwrap();
        let route = network.find_path(1, 3, &BTreeSet::new()).unwrap();
        let timing = TimingConfig::default();

        let long = TravellerSpec {
            speed: 20,
            length: 15,
            ..spec()
        };
        let plan = time_plan(&route, &network, &long, &timing).unwrap();
        // Tail still on the 5-unit road while entering the second one
        assert_eq!(plan.get(LocationId(1)), Some(iv(0, 6)));
        assert_eq!(plan.get(LocationId(2)), Some(iv(2, 26)));

        let short = TravellerSpec {
            speed: 20,
            length: 5,
            ..spec()
        };
        let plan = time_plan(&route, &network, &short, &timing).unwrap();
        assert_eq!(plan.get(LocationId(2)), Some(iv(2, 11)));
    }

    #[test]
    fn test_wait_propagation_carries_largest_wait() {
        let plan: ReservationPlan = [
            (LocationId(1), iv(0, 10)),
            (LocationId(2), iv(10, 20)),
            (LocationId(3), iv(20, 30)),
            (LocationId(4), iv(30, 40)),
        ]
        .into_iter()
        .collect();
        let proposals = BTreeMap::from([
            (LocationId(1), iv(5, 15)),
            (LocationId(2), iv(10, 20)),
            (LocationId(3), iv(22, 32)),
            (LocationId(4), iv(38, 48)),
        ]);
        let waits = BTreeMap::from([(LocationId(1), 5), (LocationId(3), 2), (LocationId(4), 8)]);

        let adjusted = propagate_waits(&plan, &proposals, &waits);
        assert_eq!(adjusted.get(LocationId(1)), Some(iv(5, 15)));
        // No own wait: shifted by the carried wait
        assert_eq!(adjusted.get(LocationId(2)), Some(iv(15, 25)));
        // Smaller wait: only the difference is added on top of its proposal
        assert_eq!(adjusted.get(LocationId(3)), Some(iv(25, 35)));
        // Larger wait: its proposal stands
        assert_eq!(adjusted.get(LocationId(4)), Some(iv(38, 48)));
        assert_eq!(
            adjusted.locations().collect::<Vec<_>>(),
            plan.locations().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_wait_kept_when_alternate_costs_more() {
        let network = network();
        let mut agent = traveller(5);
        agent.plan_route(&network);

        agent.receive([
            reply(1, NegotiationStatus::Propose, 0, 10),
            reply(2, NegotiationStatus::Propose, 15, 25),
        ]);
        let batch = agent.process(&network);

        assert_eq!(agent.exclusions(), &BTreeSet::from([LocationId(2)]));
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|m| m.status == NegotiationStatus::Reserve && m.round == 1));
        assert_eq!(sent_to(&batch, 1).interval, iv(0, 10));
        assert_eq!(sent_to(&batch, 2).interval, iv(15, 25));
        assert_eq!(agent.status(), NegotiationStatus::Reserve);
        assert_eq!(agent.plan().get(LocationId(2)), Some(iv(15, 25)));
    }

    #[test]
    fn test_cheaper_alternate_replaces_route() {
        let network = network();
        let mut agent = traveller(5);
        agent.plan_route(&network);

        agent.receive([
            reply(1, NegotiationStatus::Propose, 0, 10),
            reply(2, NegotiationStatus::Propose, 100, 110),
        ]);
        let batch = agent.process(&network);

        assert_eq!(sent_to(&batch, 1).status, NegotiationStatus::Reserve);
        assert_eq!(sent_to(&batch, 3).interval, iv(10, 30));
        assert_eq!(sent_to(&batch, 4).interval, iv(30, 50));
        let reject = sent_to(&batch, 2);
        assert_eq!(reject.status, NegotiationStatus::Reject);
        assert!(!agent.plan().contains(LocationId(2)));
        assert_eq!(
            agent.plan().locations().collect::<Vec<_>>(),
            vec![LocationId(1), LocationId(3), LocationId(4)]
        );
    }

    #[test]
    fn test_order_change_forces_alternate() {
        let network = network();
        let mut agent = traveller(5);
        agent.plan_route(&network);

        // L1 now starts after L2: visiting order broken
        agent.receive([
            reply(1, NegotiationStatus::Propose, 20, 30),
            reply(2, NegotiationStatus::Propose, 10, 20),
        ]);
        let review = agent.review(&agent.inbox.clone());
        assert!(!review.ordering_consistent);

        let batch = agent.process(&network);
        assert_eq!(sent_to(&batch, 5).interval, iv(0, 35));
        assert_eq!(sent_to(&batch, 4).interval, iv(35, 55));
        assert_eq!(sent_to(&batch, 1).status, NegotiationStatus::Reject);
        assert_eq!(sent_to(&batch, 2).status, NegotiationStatus::Reject);
    }

    #[test]
    fn test_review_ignores_response_order() {
        let network = network();
        let mut agent = traveller(5);
        agent.plan_route(&network);

        let forward = [
            reply(1, NegotiationStatus::Propose, 0, 10),
            reply(2, NegotiationStatus::Propose, 15, 25),
        ];
        let mut backward = forward.clone();
        backward.reverse();
        assert_eq!(agent.review(&forward), agent.review(&backward));
    }

    #[test]
    fn test_shared_start_is_ordering_inconsistent() {
        let network = network();
        let mut agent = traveller(5);
        agent.plan_route(&network);
        let review = agent.review(&[
            reply(1, NegotiationStatus::Propose, 10, 20),
            reply(2, NegotiationStatus::Propose, 10, 20),
        ]);
        assert!(!review.ordering_consistent);
    }

    #[test]
    fn test_deliberation_window_then_finalize() {
        let network = network();
        let mut agent = traveller(3);
        agent.plan_route(&network);

        agent.receive([
            reply(1, NegotiationStatus::Propose, 0, 10),
            reply(2, NegotiationStatus::Propose, 10, 20),
        ]);
        let batch = agent.process(&network);
        assert!(batch.iter().all(|m| m.status == NegotiationStatus::Accept && m.round == 1));
        assert_eq!(agent.status(), NegotiationStatus::Accept);

        agent.receive([
            reply(1, NegotiationStatus::Accept, 0, 10),
            reply(2, NegotiationStatus::Accept, 10, 20),
        ]);
        let batch = agent.process(&network);
        assert!(batch.iter().all(|m| m.status == NegotiationStatus::Dw && m.round == 2));

        agent.receive([
            reply(1, NegotiationStatus::Dw, 0, 10),
            reply(2, NegotiationStatus::Dw, 10, 20),
        ]);
        let batch = agent.process(&network);
        assert!(batch.iter().all(|m| m.status == NegotiationStatus::Finalize && m.round == 3));
        assert_eq!(agent.status(), NegotiationStatus::Finalize);
        assert_eq!(agent.dw_rounds(), 2);
        assert_eq!(agent.final_cost(), Some(20));

        let outcome = agent.outcome().unwrap();
        assert_eq!(outcome.initial_cost, Some(20));
        assert_eq!(outcome.rounds, 3);

        // Settled travellers stay silent
        agent.receive([reply(1, NegotiationStatus::Dw, 0, 10)]);
        assert!(agent.process(&network).is_empty());
    }

    #[test]
    fn test_budget_exhaustion_terminates() {
        let network = network();
        let mut agent = traveller(1);
        agent.plan_route(&network);

        agent.receive([
            reply(1, NegotiationStatus::Propose, 0, 10),
            reply(2, NegotiationStatus::Propose, 10, 20),
        ]);
        assert_eq!(agent.process(&network).len(), 2);

        agent.receive([
            reply(1, NegotiationStatus::Accept, 0, 10),
            reply(2, NegotiationStatus::Accept, 10, 20),
        ]);
        assert!(agent.process(&network).is_empty());
        assert_eq!(agent.status(), NegotiationStatus::Terminate);
        assert_eq!(agent.final_cost(), None);
    }

    #[test]
    fn test_changed_slot_during_dw_falls_back_to_accept() {
        let network = network();
        let mut agent = traveller(6);
        agent.plan_route(&network);
        for status in [NegotiationStatus::Propose, NegotiationStatus::Accept] {
            agent.receive([reply(1, status, 0, 10), reply(2, status, 10, 20)]);
            agent.process(&network);
        }
        assert_eq!(agent.status(), NegotiationStatus::Dw);

        agent.receive([
            reply(1, NegotiationStatus::Dw, 0, 10),
            reply(2, NegotiationStatus::Accept, 10, 20),
        ]);
        let batch = agent.process(&network);
        assert!(batch.iter().all(|m| m.status == NegotiationStatus::Accept));
        assert_eq!(agent.dw_rounds(), 0);
    }

    #[test]
    fn test_rounds_strictly_increase() {
        let network = network();
        let mut agent = traveller(6);
        let mut rounds = vec![agent.plan_route(&network)[0].round];
        let replies = [
            (NegotiationStatus::Propose, 15, 25),
            (NegotiationStatus::Propose, 15, 25),
            (NegotiationStatus::Accept, 15, 25),
            (NegotiationStatus::Dw, 15, 25),
        ];
        for (status, start, end) in replies {
            agent.receive([reply(1, status, 0, 10), reply(2, status, start, end)]);
            let batch = agent.process(&network);
            rounds.push(batch[0].round);
        }
        assert!(rounds.windows(2).all(|pair| pair[0] < pair[1]), "{rounds:?}");
    }

    #[test]
    fn test_no_route_terminates() {
        let network = network();
        let mut agent = TravellerAgent::new(
            TravellerSpec {
                destination: 42,
                ..spec()
            },
            5,
            no_turn_penalty(),
            None,
        );
        assert!(agent.plan_route(&network).is_empty());
        assert_eq!(agent.status(), NegotiationStatus::Terminate);
    }

    #[test]
    fn test_empty_inbox_terminates() {
        let network = network();
        let mut agent = traveller(5);
        agent.plan_route(&network);
        assert!(agent.process(&network).is_empty());
        assert_eq!(agent.status(), NegotiationStatus::Terminate);
    }

    #[test]
    fn test_spec_from_json() {
        let raw = r#"{"id":4,"source":1,"destination":3,"start":12,"speed":30,"length":5}"#;
        let parsed: TravellerSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id, TravellerId(4));
        assert_eq!(parsed.start, 12);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), raw);
    }

    #[test]
    fn test_property_attached_for_speed_strategy() {
        let network = network();
        let mut agent =
            TravellerAgent::new(spec(), 5, no_turn_penalty(), Some(SenderProperty::Speed));
        let batch = agent.plan_route(&network);
        assert!(batch.iter().all(|m| m.property == Some(10)));
    }
}
