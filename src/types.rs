//! # Core Types for the Election Engine
//!
//! This module defines the records the engine reads and writes: elections and
//! their configuration (districts, positions, candidates), the delegates who
//! vote, the ballots issued to them and the immutable cast-vote facts produced
//! when a ballot is submitted.
//!
//! ## Design Principles
//!
//! - **Plain data**: records carry no persistence logic; rules live in
//!   [`crate::engine`] as functions over these structs
//! - **Explicit archival**: soft deletion is an [`Archive`] stamp, never a
//!   scattered null check
//! - **Civil time**: timestamps are local wall-clock values because election
//!   days are civil dates
//!
//! ## Usage Examples
//!
//! ```rust
//! use election_engine::types::{Election, NewElection, Phase};
//! use chrono::Local;
//!
//! let election = Election::new(
//!     NewElection {
//!         name: "Annual Convention".to_string(),
//!         description: None,
//!         date: Local::now().date_naive(),
//!         address: "Main Hall".to_string(),
//!         capacity: 500,
//!     },
//!     Local::now(),
//! );
//!
//! assert_eq!(election.phase, Phase::Scheduled);
//! assert!(!election.accepts_votes());
//! ```

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A Blake3 digest (32 bytes), used by the audit hash chain
pub type Hash = [u8; 32];

/// Election identifier
pub type ElectionId = Uuid;

/// Delegate identifier
pub type DelegateId = Uuid;

/// Ballot identifier
pub type BallotId = Uuid;

/// Candidate identifier (store-assigned serial)
pub type CandidateId = u64;

/// Position identifier (store-assigned serial)
pub type PositionId = u64;

/// District identifier (store-assigned serial)
pub type DistrictId = u64;

/// Lifecycle phase of an election
///
/// ```text
/// Scheduled ──start──▶ Started ──close──▶ Closed
///     │                   │
///     └──────cancel───────┴──────────────▶ Cancelled
/// ```
///
/// `Closed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scheduled,
    Started,
    Closed,
    Cancelled,
}

impl Phase {
    /// No lifecycle transition leaves a terminal phase
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Scheduled => "scheduled",
            Phase::Started => "started",
            Phase::Closed => "closed",
            Phase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Soft-delete stamp
///
/// A record carrying `Some(Archive)` is archived; restoring it clears the
/// stamp. Archived records stay in the store for audit and reprint purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    /// When the record was archived
    pub at: DateTime<Local>,
    /// Label of the operator who archived it
    pub by: String,
}

/// Input for creating a new election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewElection {
    pub name: String,
    pub description: Option<String>,
    /// Civil date on which the election may be started
    pub date: NaiveDate,
    pub address: String,
    pub capacity: u32,
}

/// An election and its lifecycle state
///
/// Elections are created in [`Phase::Scheduled`] and change phase only
/// through the transitions in [`crate::engine::lifecycle`]. `start_time` is
/// stamped exactly once on entering `Started`, `end_time` exactly once on
/// entering `Closed`; cancellation clears both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    /// Unique election identifier
    pub id: ElectionId,

    /// Human-readable election name shown on receipts
    pub name: String,

    /// Free-form description; replaced by the reason on cancellation
    pub description: Option<String>,

    /// Scheduled civil date
    ///
    /// The election can only be started on this date, compared against the
    /// local calendar rather than an instant.
    pub date: NaiveDate,

    /// Venue address
    pub address: String,

    /// Expected number of attendees
    pub capacity: u32,

    /// Current lifecycle phase
    pub phase: Phase,

    /// Stamped on transition to `Started`
    pub start_time: Option<DateTime<Local>>,

    /// Stamped on transition to `Closed`
    pub end_time: Option<DateTime<Local>>,

    /// Soft-delete stamp
    pub archived: Option<Archive>,

    /// Creation time
    pub created_at: DateTime<Local>,
}

impl Election {
    /// Create a new scheduled election
    pub fn new(input: NewElection, now: DateTime<Local>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            date: input.date,
            address: input.address,
            capacity: input.capacity,
            phase: Phase::Scheduled,
            start_time: None,
            end_time: None,
            archived: None,
            created_at: now,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived.is_some()
    }

    /// Whether ballots may currently be cast in this election
    pub fn accepts_votes(&self) -> bool {
        self.phase == Phase::Started && !self.is_archived()
    }

    /// Compact view embedded in cast and reprint results
    pub fn summary(&self) -> ElectionSummary {
        ElectionSummary {
            id: self.id,
            name: self.name.clone(),
            date: self.date,
            address: self.address.clone(),
        }
    }
}

/// Election identity as printed on a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionSummary {
    pub id: ElectionId,
    pub name: String,
    pub date: NaiveDate,
    pub address: String,
}

/// A geographic district within an election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub id: DistrictId,
    pub election_id: ElectionId,
    pub name: String,
}

/// An electable office
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub election_id: ElectionId,
    pub title: String,

    /// Ceiling on how many candidates one ballot may select for this position
    pub max_candidates: u32,

    /// Term descriptor, e.g. "2 years"
    pub term_limit: String,
}

/// A candidate standing for a position in a district
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub election_id: ElectionId,
    pub position_id: PositionId,
    pub district_id: DistrictId,
    pub display_name: String,
    pub archived: Option<Archive>,
}

impl Candidate {
    pub fn is_archived(&self) -> bool {
        self.archived.is_some()
    }
}

/// An eligible voter scoped to one election
///
/// `has_voted` is the authoritative single-vote flag. It is set only as a
/// side effect of a committed cast and never cleared by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegate {
    pub id: DelegateId,
    pub election_id: ElectionId,

    /// Unique per election; the key poll workers type in
    pub control_number: String,

    pub display_name: String,
    pub has_voted: bool,
    pub archived: Option<Archive>,
}

impl Delegate {
    pub fn is_archived(&self) -> bool {
        self.archived.is_some()
    }
}

/// Ballot status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotStatus {
    Issued,
    Submitted,
}

impl fmt::Display for BallotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BallotStatus::Issued => f.write_str("issued"),
            BallotStatus::Submitted => f.write_str("submitted"),
        }
    }
}

/// The voting token issued to one delegate for one election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub id: BallotId,
    pub election_id: ElectionId,
    pub delegate_id: DelegateId,

    /// Human-facing receipt identifier, e.g. `B-42`
    pub ballot_number: String,

    pub status: BallotStatus,
    pub issued_at: DateTime<Local>,

    /// Set together with `status = Submitted`
    pub submitted_at: Option<DateTime<Local>>,

    /// Precinct the ballot was submitted from
    pub precinct: Option<String>,
}

/// One immutable candidate selection within a submitted ballot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastVote {
    pub election_id: ElectionId,
    pub ballot_number: String,
    pub precinct: String,
    pub candidate_id: CandidateId,
    pub position_id: PositionId,
    pub district_id: DistrictId,
    pub cast_at: DateTime<Local>,
}

/// Number of configuration records an election has, used to gate `start`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterCounts {
    pub delegates: usize,
    pub districts: usize,
    pub positions: usize,
    pub candidates: usize,
}

/// Votes received by one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTotal {
    pub candidate_id: CandidateId,
    pub position_id: PositionId,
    pub display_name: String,
    pub votes: u64,
}

/// Running tally of an election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub election_id: ElectionId,

    /// Submitted ballots, including empty ones
    pub ballots_cast: u64,

    /// One entry per non-archived candidate, ordered by position then candidate
    pub totals: Vec<CandidateTotal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_election() -> Election {
        Election::new(
            NewElection {
                name: "Regional Assembly".to_string(),
                description: Some("Officer elections".to_string()),
                date: Local::now().date_naive(),
                address: "Civic Center".to_string(),
                capacity: 120,
            },
            Local::now(),
        )
    }

    #[test]
    fn test_new_election_is_scheduled() {
        let election = sample_election();

        assert_eq!(election.phase, Phase::Scheduled);
        assert!(election.start_time.is_none());
        assert!(election.end_time.is_none());
        assert!(!election.is_archived());
        assert!(!election.accepts_votes());
    }

    #[test]
    fn test_accepts_votes_requires_started_and_unarchived() {
        let mut election = sample_election();
        election.phase = Phase::Started;
        assert!(election.accepts_votes());

        election.archived = Some(Archive {
            at: Local::now(),
            by: "admin".to_string(),
        });
        assert!(!election.accepts_votes());
    }

    #[test]
    fn test_phase_terminality_and_display() {
        assert!(!Phase::Scheduled.is_terminal());
        assert!(!Phase::Started.is_terminal());
        assert!(Phase::Closed.is_terminal());
        assert!(Phase::Cancelled.is_terminal());

        assert_eq!(Phase::Cancelled.to_string(), "cancelled");
        assert_eq!(BallotStatus::Submitted.to_string(), "submitted");
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&Phase::Started).unwrap();
        assert_eq!(json, "\"started\"");
    }
}
