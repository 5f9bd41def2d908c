//! Error taxonomy for the negotiation kernel.
//!
//! None of these abort a simulation. Protocol and parse errors are logged and
//! the offending message is dropped; a missing path only affects the Traveller
//! that asked for it.

use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::{AgentId, NegotiationStatus, TravellerId};
use crate::router::Phase;

/// Violations of the round protocol between Router, Travellers and Locations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A batch arrived from the role the Router is not currently collecting.
    #[error("{sender} submitted while the router is {phase:?}")]
    WrongPhase { sender: AgentId, phase: Phase },

    /// The sender already delivered its batch for this round.
    #[error("{sender} already submitted a batch this round")]
    DuplicateSubmission { sender: AgentId },

    /// The sender is not one of the agents the Router expects this round.
    #[error("{sender} is not active this round")]
    UnknownSender { sender: AgentId },

    /// A message was addressed to an agent the Router already retired.
    #[error("{receiver} has been retired")]
    RetiredAgent { receiver: AgentId },

    /// A finalized Traveller tried to negotiate with the same Location again.
    #[error("{traveller} resubmitted {status} after finalizing")]
    FinalizedResubmission {
        traveller: TravellerId,
        status: NegotiationStatus,
    },

    /// The message's sender field or receiver role does not fit the batch.
    #[error("message from {sender} to {receiver} does not belong to this batch")]
    MisaddressedMessage { sender: AgentId, receiver: AgentId },

    /// A Traveller sent a status out of its expected progression.
    #[error("{traveller} sent {actual}, expected {expected}")]
    UnexpectedStatus {
        traveller: TravellerId,
        expected: NegotiationStatus,
        actual: NegotiationStatus,
    },

    /// A second message from the same Traveller in one Location round.
    #[error("{traveller} sent more than one message this round")]
    DuplicateMessage { traveller: TravellerId },

    /// A Location proposed a slot that starts before the reserved one.
    #[error("{location} proposed start {proposed} before reserved start {reserved}")]
    EarlierProposal {
        location: AgentId,
        reserved: i64,
        proposed: i64,
    },

    /// A committed interval overlaps a Constraint the Location already holds.
    #[error("{traveller} commit overlaps an existing constraint")]
    OverlappingCommit { traveller: TravellerId },
}

/// Malformed wire fields, intervals or network descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid number `{0}`")]
    InvalidNumber(String),

    #[error("unknown status code `{0}`")]
    InvalidStatus(String),

    #[error("invalid agent tag `{0}`")]
    InvalidRole(String),

    #[error("interval [{start}, {end}] has negative duration")]
    NegativeDuration { start: i64, end: i64 },

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<ParseError>,
    },

    #[error("duplicate road id {0}")]
    DuplicateRoad(u32),
}

/// No route exists between two junctions once exclusions are applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no path from {source_node} to {destination} avoiding {excluded} locations")]
pub struct PathNotFound {
    pub source_node: u32,
    pub destination: u32,
    pub excluded: usize,
}

/// Failures while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
