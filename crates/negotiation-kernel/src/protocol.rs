//! Negotiation messages exchanged through the Router.
//!
//! Messages are typed values inside the kernel. The `#`/`%` wire form is only
//! produced at the edges (trace output, saved transcripts):
//!
//! ```text
//! status#start%end#T<id>[%property]#L<id>#round
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::interval::TimeInterval;

/// Separator between message body fields.
pub const FIELD_DELIMITER: char = '#';
/// Separator between a sender id and its attached property.
pub const PROPERTY_DELIMITER: char = '%';

/// Identifier of a Traveller agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TravellerId(pub u32);

/// Identifier of a Location agent (one road segment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub u32);

impl fmt::Display for TravellerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Either side of the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentId {
    Traveller(TravellerId),
    Location(LocationId),
}

/// Which population an agent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Traveller,
    Location,
}

impl AgentId {
    pub fn role(&self) -> Role {
        match self {
            AgentId::Traveller(_) => Role::Traveller,
            AgentId::Location(_) => Role::Location,
        }
    }

    pub fn as_traveller(&self) -> Option<TravellerId> {
        match self {
            AgentId::Traveller(id) => Some(*id),
            AgentId::Location(_) => None,
        }
    }

    pub fn as_location(&self) -> Option<LocationId> {
        match self {
            AgentId::Location(id) => Some(*id),
            AgentId::Traveller(_) => None,
        }
    }
}

impl From<TravellerId> for AgentId {
    fn from(id: TravellerId) -> Self {
        AgentId::Traveller(id)
    }
}

impl From<LocationId> for AgentId {
    fn from(id: LocationId) -> Self {
        AgentId::Location(id)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentId::Traveller(id) => id.fmt(f),
            AgentId::Location(id) => id.fmt(f),
        }
    }
}

impl FromStr for AgentId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let tag = chars.next().ok_or(ParseError::MissingField("agent id"))?;
        let raw = chars.as_str();
        let id: u32 = raw
            .parse()
            .map_err(|_| ParseError::InvalidNumber(raw.to_string()))?;
        match tag {
            'T' => Ok(AgentId::Traveller(TravellerId(id))),
            'L' => Ok(AgentId::Location(LocationId(id))),
            _ => Err(ParseError::InvalidRole(s.to_string())),
        }
    }
}

/// Negotiation status carried by every message.
///
/// Wire codes are fixed and shared by both agent kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Reserve,
    Accept,
    Dw,
    Reject,
    Finalize,
    Propose,
    Terminate,
}

impl NegotiationStatus {
    pub fn code(&self) -> u8 {
        match self {
            NegotiationStatus::Reserve => 0,
            NegotiationStatus::Accept => 1,
            NegotiationStatus::Dw => 2,
            NegotiationStatus::Reject => 3,
            NegotiationStatus::Finalize => 4,
            NegotiationStatus::Propose => 5,
            NegotiationStatus::Terminate => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => NegotiationStatus::Reserve,
            1 => NegotiationStatus::Accept,
            2 => NegotiationStatus::Dw,
            3 => NegotiationStatus::Reject,
            4 => NegotiationStatus::Finalize,
            5 => NegotiationStatus::Propose,
            6 => NegotiationStatus::Terminate,
            _ => return None,
        })
    }

    /// Statuses a Location schedules for (as opposed to cancellations).
    pub fn is_reservation_like(&self) -> bool {
        matches!(
            self,
            NegotiationStatus::Reserve | NegotiationStatus::Accept | NegotiationStatus::Dw
        )
    }

    /// Traveller states after which no further messages are sent.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationStatus::Finalize | NegotiationStatus::Terminate
        )
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStatus::Reserve => "RESERVE",
            NegotiationStatus::Accept => "ACCEPT",
            NegotiationStatus::Dw => "DW",
            NegotiationStatus::Reject => "REJECT",
            NegotiationStatus::Finalize => "FINALIZE",
            NegotiationStatus::Propose => "PROPOSE",
            NegotiationStatus::Terminate => "TERMINATE",
        };
        f.write_str(name)
    }
}

/// One negotiation message. Never mutated after it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: AgentId,
    /// Speed or length of a sending Traveller, when the Location strategy orders by it
    pub property: Option<u32>,
    pub receiver: AgentId,
    pub status: NegotiationStatus,
    pub interval: TimeInterval,
    /// Sender-side negotiation round, distinct from the Router tick
    pub round: u32,
}

impl Message {
    /// Message from a Traveller to a Location.
    pub fn to_location(
        traveller: TravellerId,
        location: LocationId,
        status: NegotiationStatus,
        interval: TimeInterval,
        round: u32,
    ) -> Self {
        Self {
            sender: AgentId::Traveller(traveller),
            property: None,
            receiver: AgentId::Location(location),
            status,
            interval,
            round,
        }
    }

    /// Reply from a Location to a Traveller.
    pub fn to_traveller(
        location: LocationId,
        traveller: TravellerId,
        status: NegotiationStatus,
        interval: TimeInterval,
        round: u32,
    ) -> Self {
        Self {
            sender: AgentId::Location(location),
            property: None,
            receiver: AgentId::Traveller(traveller),
            status,
            interval,
            round,
        }
    }

    pub fn with_property(mut self, property: Option<u32>) -> Self {
        self.property = property;
        self
    }

    /// Encode into the delimited wire form.
    pub fn encode(&self) -> String {
        let sender = match self.property {
            Some(property) => format!("{}{}{}", self.sender, PROPERTY_DELIMITER, property),
            None => self.sender.to_string(),
        };
        format!(
            "{code}{d}{interval}{d}{sender}{d}{receiver}{d}{round}",
            code = self.status.code(),
            d = FIELD_DELIMITER,
            interval = self.interval,
            receiver = self.receiver,
            round = self.round,
        )
    }

    /// Decode the wire form produced by [`Message::encode`].
    pub fn decode(raw: &str) -> Result<Self, ParseError> {
        let mut fields = raw.trim().split(FIELD_DELIMITER);
        let mut next = |name: &'static str| fields.next().ok_or(ParseError::MissingField(name));

        let status_raw = next("status")?;
        let code: u8 = status_raw
            .parse()
            .map_err(|_| ParseError::InvalidStatus(status_raw.to_string()))?;
        let status = NegotiationStatus::from_code(code)
            .ok_or_else(|| ParseError::InvalidStatus(status_raw.to_string()))?;

        let interval: TimeInterval = next("interval")?.parse()?;

        let sender_raw = next("sender")?;
        let (sender, property) = match sender_raw.split_once(PROPERTY_DELIMITER) {
            Some((id, property)) => {
                let property = property
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber(property.to_string()))?;
                (id.parse::<AgentId>()?, Some(property))
            }
            None => (sender_raw.parse::<AgentId>()?, None),
        };

        let receiver: AgentId = next("receiver")?.parse()?;

        let round_raw = next("round")?;
        let round = round_raw
            .parse()
            .map_err(|_| ParseError::InvalidNumber(round_raw.to_string()))?;

        Ok(Self {
            sender,
            property,
            receiver,
            status,
            interval,
            round,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
