//! Location agents: per-road schedulers.
//!
//! Each round a Location takes its whole inbox, validates it against what it
//! knows about every Traveller, rebuilds a conflict free schedule from the
//! reservation-like requests and answers each requester:
//!
//! ```text
//! RESERVE ──────────────────────────────► PROPOSE(resolved)
//! ACCEPT  ── resolved == requested ? ───► ACCEPT : PROPOSE(resolved)
//! DW      ── resolved == requested ? ───► DW     : PROPOSE(resolved)
//! REJECT  ── slot released, no reply
//! FINALIZE ─ slot committed as Constraint, no reply
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::ProtocolError;
use crate::interval::TimeInterval;
use crate::protocol::{AgentId, LocationId, Message, NegotiationStatus, TravellerId};

/// Order in which a Location places competing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStrategy {
    /// Earliest requested start first (shortest duration breaks ties)
    #[default]
    EarliestStart,
    /// Lowest Traveller id first
    Priority,
    /// Fastest Traveller first
    Speed,
    /// Shortest Traveller first
    Length,
}

/// Traveller attribute a strategy needs to see on incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderProperty {
    Speed,
    Length,
}

impl ScheduleStrategy {
    pub fn all() -> Vec<Self> {
        vec![
            ScheduleStrategy::EarliestStart,
            ScheduleStrategy::Priority,
            ScheduleStrategy::Speed,
            ScheduleStrategy::Length,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScheduleStrategy::EarliestStart => "earliest_start",
            ScheduleStrategy::Priority => "priority",
            ScheduleStrategy::Speed => "speed",
            ScheduleStrategy::Length => "length",
        }
    }

    /// Whether placement also has to clear committed Constraints.
    ///
    /// Only the earliest-start ordering consults them; the others compare
    /// against placements made earlier in the same pass.
    pub fn checks_constraints(&self) -> bool {
        matches!(self, ScheduleStrategy::EarliestStart)
    }

    /// Property Travellers must attach to their messages.
    pub fn sender_property(&self) -> Option<SenderProperty> {
        match self {
            ScheduleStrategy::Speed => Some(SenderProperty::Speed),
            ScheduleStrategy::Length => Some(SenderProperty::Length),
            ScheduleStrategy::EarliestStart | ScheduleStrategy::Priority => None,
        }
    }

    fn order(&self, a: &ScheduleCandidate, b: &ScheduleCandidate) -> Ordering {
        let by_time = |a: &ScheduleCandidate, b: &ScheduleCandidate| {
            a.interval
                .start()
                .cmp(&b.interval.start())
                .then(a.interval.duration().cmp(&b.interval.duration()))
                .then(a.traveller.cmp(&b.traveller))
        };
        match self {
            ScheduleStrategy::EarliestStart => by_time(a, b),
            ScheduleStrategy::Priority => a.traveller.cmp(&b.traveller),
            // Missing values sort last
            ScheduleStrategy::Speed => a
                .property
                .is_none()
                .cmp(&b.property.is_none())
                .then(Reverse(a.property).cmp(&Reverse(b.property)))
                .then_with(|| by_time(a, b)),
            ScheduleStrategy::Length => a
                .property
                .is_none()
                .cmp(&b.property.is_none())
                .then(a.property.cmp(&b.property))
                .then_with(|| by_time(a, b)),
        }
    }
}

impl fmt::Display for ScheduleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScheduleStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "earliest_start" | "spt" => Ok(ScheduleStrategy::EarliestStart),
            "priority" => Ok(ScheduleStrategy::Priority),
            "speed" => Ok(ScheduleStrategy::Speed),
            "length" => Ok(ScheduleStrategy::Length),
            other => Err(format!(
                "unknown strategy `{other}` (expected earliest_start, priority, speed or length)"
            )),
        }
    }
}

/// A committed slot that later placements must not conflict with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub interval: TimeInterval,
    pub traveller: TravellerId,
}

/// One request competing for a place in this round's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleCandidate {
    pub traveller: TravellerId,
    pub status: NegotiationStatus,
    pub interval: TimeInterval,
    /// Speed or length, for the strategies that order by it
    pub property: Option<u32>,
    pub round: u32,
}

/// Expected next status of a Traveller this Location negotiates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentRecord {
    pub expected: NegotiationStatus,
}

impl Default for AgentRecord {
    fn default() -> Self {
        Self {
            expected: NegotiationStatus::Reserve,
        }
    }
}

impl AgentRecord {
    /// Record `status` and advance the expectation.
    ///
    /// RESERVE is always admissible (renegotiation restarts the progression).
    /// The record advances even when the status was unexpected.
    pub fn observe(
        &mut self,
        traveller: TravellerId,
        status: NegotiationStatus,
    ) -> Result<(), ProtocolError> {
        use NegotiationStatus::*;
        let admitted = match status {
            Reserve => true,
            Accept => matches!(self.expected, Accept | Dw),
            Dw => self.expected == Dw,
            _ => false,
        };
        let expected = self.expected;
        self.expected = match status {
            Reserve => Accept,
            Accept | Dw => Dw,
            other => other,
        };
        if admitted {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedStatus {
                traveller,
                expected,
                actual: status,
            })
        }
    }
}

/// Place `candidates` without conflicts.
///
/// Candidates are walked in strategy order. A candidate that conflicts with a
/// placed interval (or a Constraint, when the strategy checks them) moves to
/// start `separation` units after the end of what it hit, keeping its
/// duration, until nothing conflicts.
pub fn resolve_schedule(
    candidates: &[ScheduleCandidate],
    strategy: ScheduleStrategy,
    constraints: &[Constraint],
    separation: i64,
) -> BTreeMap<TravellerId, TimeInterval> {
    let mut ordered: Vec<&ScheduleCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| strategy.order(a, b));

    let fixed: Vec<TimeInterval> = if strategy.checks_constraints() {
        constraints.iter().map(|c| c.interval).collect()
    } else {
        Vec::new()
    };

    let mut placed: Vec<TimeInterval> = Vec::with_capacity(ordered.len());
    let mut schedule = BTreeMap::new();

    for candidate in ordered {
        let mut slot = candidate.interval;
        while let Some(blocker) = fixed
            .iter()
            .chain(placed.iter())
            .find(|other| slot.conflicts_with(other))
        {
            // A non-positive shift could reproduce the same slot forever
            let moved = slot.starting_at(blocker.end() + separation.max(1));
            trace!(
                traveller = %candidate.traveller,
                from = %slot,
                to = %moved,
                blocker = %blocker,
                "Shifted conflicting request"
            );
            slot = moved;
        }
        placed.push(slot);
        schedule.insert(candidate.traveller, slot);
    }

    schedule
}

/// Scheduler for one road segment.
#[derive(Debug, Clone)]
pub struct LocationAgent {
    id: LocationId,
    strategy: ScheduleStrategy,
    separation: i64,
    constraints: Vec<Constraint>,
    known: BTreeMap<TravellerId, AgentRecord>,
    finalized: BTreeSet<TravellerId>,
    proposed: BTreeMap<TravellerId, TimeInterval>,
    properties: BTreeMap<TravellerId, u32>,
    inbox: Vec<Message>,
    violations: Vec<ProtocolError>,
}

impl LocationAgent {
    pub fn new(id: LocationId, strategy: ScheduleStrategy, separation: i64) -> Self {
        Self {
            id,
            strategy,
            separation,
            constraints: Vec::new(),
            known: BTreeMap::new(),
            finalized: BTreeSet::new(),
            proposed: BTreeMap::new(),
            properties: BTreeMap::new(),
            inbox: Vec::new(),
            violations: Vec::new(),
        }
    }

    pub fn id(&self) -> LocationId {
        self.id
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Schedule proposed in the most recent round that had requests.
    pub fn proposed_schedule(&self) -> &BTreeMap<TravellerId, TimeInterval> {
        &self.proposed
    }

    /// Protocol violations seen while processing the last round.
    pub fn violations(&self) -> &[ProtocolError] {
        &self.violations
    }

    pub fn expected_status(&self, traveller: TravellerId) -> Option<NegotiationStatus> {
        self.known.get(&traveller).map(|record| record.expected)
    }

    /// No Traveller is negotiating here.
    pub fn is_idle(&self) -> bool {
        self.known.is_empty() && self.proposed.is_empty()
    }

    /// Buffer a round's messages. Nothing happens until [`LocationAgent::process`].
    pub fn receive(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.inbox.extend(messages);
    }

    fn violation(&mut self, error: ProtocolError) {
        warn!(location = %self.id, error = %error, "Protocol violation");
        self.violations.push(error);
    }

    /// Process the buffered batch and produce one reply per requester.
    pub fn process(&mut self) -> Vec<Message> {
        let inbox = std::mem::take(&mut self.inbox);
        self.violations.clear();

        let mut seen: BTreeSet<TravellerId> = BTreeSet::new();
        let mut commits = Vec::new();
        let mut rejections = Vec::new();
        let mut candidates = Vec::new();

        for msg in inbox {
            let traveller = match (msg.sender, msg.receiver) {
                (AgentId::Traveller(traveller), AgentId::Location(to)) if to == self.id => {
                    traveller
                }
                (sender, receiver) => {
                    self.violation(ProtocolError::MisaddressedMessage { sender, receiver });
                    continue;
                }
            };
            if self.finalized.contains(&traveller) {
                self.violation(ProtocolError::FinalizedResubmission {
                    traveller,
                    status: msg.status,
                });
                continue;
            }
            if !seen.insert(traveller) {
                self.violation(ProtocolError::DuplicateMessage { traveller });
                continue;
            }
            trace!(location = %self.id, message = %msg, "Received");

            match msg.status {
                NegotiationStatus::Finalize => commits.push((traveller, msg.interval)),
                NegotiationStatus::Reject => rejections.push(traveller),
                status if status.is_reservation_like() => {
                    let property = msg
                        .property
                        .or_else(|| self.properties.get(&traveller).copied());
                    candidates.push(ScheduleCandidate {
                        traveller,
                        status,
                        interval: msg.interval,
                        property,
                        round: msg.round,
                    });
                }
                status => {
                    let expected = self
                        .expected_status(traveller)
                        .unwrap_or(NegotiationStatus::Reserve);
                    self.violation(ProtocolError::UnexpectedStatus {
                        traveller,
                        expected,
                        actual: status,
                    });
                }
            }
        }

        for (traveller, interval) in commits {
            self.commit(traveller, interval);
        }

        // Travellers that went silent or cancelled are forgotten
        self.known.retain(|traveller, _| seen.contains(traveller));
        for traveller in rejections {
            self.release(traveller);
            debug!(location = %self.id, traveller = %traveller, "Reservation released");
        }

        for candidate in &candidates {
            if let Some(property) = candidate.property {
                self.properties.insert(candidate.traveller, property);
            }
            let record = self.known.entry(candidate.traveller).or_default();
            if let Err(error) = record.observe(candidate.traveller, candidate.status) {
                self.violation(error);
            }
        }

        if candidates.is_empty() {
            return Vec::new();
        }

        self.proposed = resolve_schedule(
            &candidates,
            self.strategy,
            &self.constraints,
            self.separation,
        );
        debug!(
            location = %self.id,
            requests = candidates.len(),
            constraints = self.constraints.len(),
            "Schedule regenerated"
        );

        candidates
            .iter()
            .filter_map(|candidate| {
                let resolved = *self.proposed.get(&candidate.traveller)?;
                let status = match candidate.status {
                    NegotiationStatus::Accept if resolved == candidate.interval => {
                        NegotiationStatus::Accept
                    }
                    NegotiationStatus::Dw if resolved == candidate.interval => {
                        NegotiationStatus::Dw
                    }
                    _ => NegotiationStatus::Propose,
                };
                Some(Message::to_traveller(
                    self.id,
                    candidate.traveller,
                    status,
                    resolved,
                    candidate.round,
                ))
            })
            .collect()
    }

    fn release(&mut self, traveller: TravellerId) {
        self.known.remove(&traveller);
        self.proposed.remove(&traveller);
        self.properties.remove(&traveller);
    }

    /// Turn a finalized reservation into a Constraint.
    fn commit(&mut self, traveller: TravellerId, interval: TimeInterval) {
        self.release(traveller);
        self.finalized.insert(traveller);
        if self
            .constraints
            .iter()
            .any(|constraint| constraint.interval.overlaps(&interval))
        {
            self.violation(ProtocolError::OverlappingCommit { traveller });
            return;
        }
        debug!(
            location = %self.id,
            traveller = %traveller,
            interval = %interval,
            "Committed constraint"
        );
        self.constraints.push(Constraint {
            interval,
            traveller,
        });
    }
}
