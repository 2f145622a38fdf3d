//! Election lifecycle state machine
//!
//! Legal transitions:
//! 1. `Scheduled -> Started` via [`start`], on the scheduled civil date with a
//!    complete roster
//! 2. `Started -> Closed` via [`close`]
//! 3. `Scheduled | Started -> Cancelled` via [`cancel`]
//!
//! Every other transition is refused. Archival is orthogonal to the phase but
//! refused while voting is in progress. All functions here are pure: they
//! mutate the record handed to them and leave persistence to the caller.

use crate::errors::Precondition;
use crate::types::{Archive, Election, Phase, RosterCounts};
use crate::{Error, Result, invalid_input};
use chrono::{DateTime, Local};

/// Start voting
///
/// Prerequisites are checked in a fixed order so that the reported reason is
/// stable: phase, archival, roster (delegates, districts, positions,
/// candidates), then the civil date.
pub fn start(election: &mut Election, roster: &RosterCounts, now: DateTime<Local>) -> Result<()> {
    if election.phase != Phase::Scheduled {
        return Err(Precondition::NotScheduled(election.phase).into());
    }

    if election.is_archived() {
        return Err(Precondition::ElectionArchived.into());
    }

    if roster.delegates == 0 {
        return Err(Precondition::NoDelegates.into());
    }
    if roster.districts == 0 {
        return Err(Precondition::NoDistricts.into());
    }
    if roster.positions == 0 {
        return Err(Precondition::NoPositions.into());
    }
    if roster.candidates == 0 {
        return Err(Precondition::NoCandidates.into());
    }

    let today = now.date_naive();
    if election.date != today {
        return Err(Precondition::NotElectionDay {
            scheduled: election.date,
            today,
        }
        .into());
    }

    election.phase = Phase::Started;
    election.start_time = Some(now);
    election.end_time = None;
    Ok(())
}

/// Close voting; terminal
pub fn close(election: &mut Election, now: DateTime<Local>) -> Result<()> {
    if election.phase != Phase::Started {
        return Err(Error::InvalidTransition {
            phase: election.phase,
            action: "close",
        });
    }

    election.phase = Phase::Closed;
    election.end_time = Some(now);
    Ok(())
}

/// Cancel the election; terminal
///
/// A non-blank reason replaces the election description; a blank one keeps it.
pub fn cancel(election: &mut Election, reason: &str) -> Result<()> {
    if !matches!(election.phase, Phase::Scheduled | Phase::Started) {
        return Err(Error::InvalidTransition {
            phase: election.phase,
            action: "cancel",
        });
    }

    election.phase = Phase::Cancelled;
    election.start_time = None;
    election.end_time = None;
    let reason = reason.trim();
    if !reason.is_empty() {
        election.description = Some(reason.to_string());
    }
    Ok(())
}

/// Guard for configuration writes (districts, positions, candidates, delegates)
pub fn validate_mutable(election: &Election) -> Result<()> {
    if election.phase != Phase::Scheduled {
        return Err(Error::MutationLocked {
            phase: election.phase,
        });
    }
    Ok(())
}

/// Soft-delete the election
pub fn archive(election: &mut Election, by: &str, now: DateTime<Local>) -> Result<()> {
    if election.phase == Phase::Started {
        return Err(Precondition::ElectionStarted.into());
    }
    if election.is_archived() {
        return Err(invalid_input!("election {} is already archived", election.id));
    }

    election.archived = Some(Archive {
        at: now,
        by: by.to_string(),
    });
    Ok(())
}

/// Undo [`archive`]
pub fn restore(election: &mut Election) -> Result<()> {
    if election.archived.take().is_none() {
        return Err(invalid_input!("election {} is not archived", election.id));
    }
    Ok(())
}
