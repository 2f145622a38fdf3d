//! Ballot ledger
//!
//! One ballot per delegate per election. A ballot is issued when the delegate
//! is registered and moves `issued -> submitted` exactly once, in the same
//! transaction that flips the delegate's `has_voted` flag.

use crate::types::{Ballot, BallotStatus, DelegateId, ElectionId};
use crate::{Error, Result};
use chrono::{DateTime, Local};
use uuid::Uuid;

/// Format a human-facing receipt number, e.g. `B-42`
pub fn receipt_number(prefix: &str, sequence: u64) -> String {
    format!("{prefix}-{sequence}")
}

/// Issue a fresh ballot
pub fn issue(
    election_id: ElectionId,
    delegate_id: DelegateId,
    ballot_number: String,
    now: DateTime<Local>,
) -> Ballot {
    Ballot {
        id: Uuid::new_v4(),
        election_id,
        delegate_id,
        ballot_number,
        status: BallotStatus::Issued,
        issued_at: now,
        submitted_at: None,
        precinct: None,
    }
}

/// Mark a ballot as submitted from `precinct`
pub fn submit(ballot: &mut Ballot, precinct: &str, now: DateTime<Local>) -> Result<()> {
    if ballot.status != BallotStatus::Issued {
        return Err(Error::conflict(format!(
            "ballot {} is already {}",
            ballot.ballot_number, ballot.status
        )));
    }

    ballot.status = BallotStatus::Submitted;
    ballot.submitted_at = Some(now);
    ballot.precinct = Some(precinct.to_string());
    Ok(())
}

/// Whether the ballot has been used
pub fn is_consumed(ballot: &Ballot) -> bool {
    ballot.status == BallotStatus::Submitted
}
