//! Time intervals and the Allen relation algebra used by both agent kinds.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Separator between start and end in the wire form.
pub const INTERVAL_DELIMITER: char = '%';

/// Closed interval of abstract time units. `end >= start` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    start: i64,
    end: i64,
}

impl TimeInterval {
    /// Create an interval, rejecting negative durations.
    pub fn new(start: i64, end: i64) -> Result<Self, ParseError> {
        if end < start {
            return Err(ParseError::NegativeDuration { start, end });
        }
        Ok(Self { start, end })
    }

    /// Create an interval of `duration` units beginning at `start`.
    pub fn with_duration(start: i64, duration: i64) -> Self {
        Self {
            start,
            end: start + duration.max(0),
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// Move the whole interval by `offset` units.
    pub fn shifted(&self, offset: i64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }

    /// Same duration, new start.
    pub fn starting_at(&self, start: i64) -> Self {
        Self::with_duration(start, self.duration())
    }

    /// Relation of `self` to `other`.
    pub fn relation_to(&self, other: &TimeInterval) -> AllenRelation {
        compare(self, other)
    }

    /// Whether `self` may not be scheduled alongside `other`.
    ///
    /// Only strictly later (`After`) or exactly abutting after
    /// (`MeetsInverse`) placements are conflict free. The test is
    /// directional: an interval placed entirely before `other` still
    /// conflicts with it.
    pub fn conflicts_with(&self, other: &TimeInterval) -> bool {
        !matches!(
            compare(self, other),
            AllenRelation::After | AllenRelation::MeetsInverse
        )
    }

    /// Symmetric overlap: neither interval lies after the other.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.conflicts_with(other) && other.conflicts_with(self)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.start, INTERVAL_DELIMITER, self.end)
    }
}

impl FromStr for TimeInterval {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(INTERVAL_DELIMITER)
            .ok_or(ParseError::MissingField("interval end"))?;
        let start = parse_i64(start)?;
        let end = parse_i64(end)?;
        Self::new(start, end)
    }
}

fn parse_i64(raw: &str) -> Result<i64, ParseError> {
    raw.trim()
        .parse()
        .map_err(|_| ParseError::InvalidNumber(raw.to_string()))
}

/// The thirteen Allen relations, read as "a is <relation> b".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllenRelation {
    Equal,
    /// a ends strictly before b starts
    Before,
    /// a starts strictly after b ends
    After,
    /// a ends exactly where b starts
    Meets,
    /// a starts exactly where b ends
    MeetsInverse,
    Overlaps,
    OverlapsInverse,
    /// a lies strictly inside b
    During,
    /// b lies strictly inside a
    DuringInverse,
    Starts,
    StartsInverse,
    Finishes,
    FinishesInverse,
}

impl AllenRelation {
    /// The relation of b to a, given the relation of a to b.
    pub fn inverse(self) -> Self {
        use AllenRelation::*;
        match self {
            Equal => Equal,
            Before => After,
            After => Before,
            Meets => MeetsInverse,
            MeetsInverse => Meets,
            Overlaps => OverlapsInverse,
            OverlapsInverse => Overlaps,
            During => DuringInverse,
            DuringInverse => During,
            Starts => StartsInverse,
            StartsInverse => Starts,
            Finishes => FinishesInverse,
            FinishesInverse => Finishes,
        }
    }
}

/// Classify how interval `a` relates to interval `b`.
pub fn compare(a: &TimeInterval, b: &TimeInterval) -> AllenRelation {
    use AllenRelation::*;

    if a == b {
        return Equal;
    }
    if a.end < b.start {
        return Before;
    }
    if a.start > b.end {
        return After;
    }
    if a.end == b.start {
        return Meets;
    }
    if a.start == b.end {
        return MeetsInverse;
    }
    if a.start == b.start {
        return if a.end < b.end { Starts } else { StartsInverse };
    }
    if a.end == b.end {
        return if a.start > b.start {
            Finishes
        } else {
            FinishesInverse
        };
    }
    match (a.start.cmp(&b.start), a.end.cmp(&b.end)) {
        (Ordering::Greater, Ordering::Less) => During,
        (Ordering::Less, Ordering::Greater) => DuringInverse,
        (Ordering::Less, _) => Overlaps,
        _ => OverlapsInverse,
    }
}
