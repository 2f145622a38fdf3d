//! Delegate eligibility tracking
//!
//! `Delegate::has_voted` is the single source of truth for "this delegate's
//! vote has been used". The ballot status is kept in step with it by the
//! coordinator; [`status`] reports both so an inconsistent pair is visible.

use crate::types::{Archive, Ballot, BallotStatus, Delegate};
use crate::{Error, Result, invalid_input};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Read-only eligibility probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateStatus {
    pub control_number: String,
    pub display_name: String,
    pub has_voted: bool,
    pub ballot_number: Option<String>,
    pub ballot_status: Option<BallotStatus>,
}

impl DelegateStatus {
    /// Whether a cast would pass the eligibility checks
    pub fn can_vote(&self) -> bool {
        !self.has_voted && self.ballot_status == Some(BallotStatus::Issued)
    }

    /// `has_voted` and the ballot status disagree
    pub fn is_inconsistent(&self) -> bool {
        matches!(
            (self.has_voted, self.ballot_status),
            (true, Some(BallotStatus::Issued)) | (false, Some(BallotStatus::Submitted))
        )
    }
}

/// Build the probe result for a delegate and their ballot
pub fn status(delegate: &Delegate, ballot: Option<&Ballot>) -> DelegateStatus {
    DelegateStatus {
        control_number: delegate.control_number.clone(),
        display_name: delegate.display_name.clone(),
        has_voted: delegate.has_voted,
        ballot_number: ballot.map(|b| b.ballot_number.clone()),
        ballot_status: ballot.map(|b| b.status),
    }
}

/// Record that the delegate's vote has been used
pub fn mark_voted(delegate: &mut Delegate) -> Result<()> {
    if delegate.has_voted {
        return Err(Error::conflict(format!(
            "delegate {} has already voted",
            delegate.control_number
        )));
    }
    delegate.has_voted = true;
    Ok(())
}

/// Normalize and check a control number
pub fn normalize_control_number(raw: &str) -> Result<String> {
    let control_number = raw.trim();
    if control_number.is_empty() {
        return Err(invalid_input!("control number must not be empty"));
    }
    if control_number.chars().any(char::is_whitespace) {
        return Err(invalid_input!(
            "control number {:?} must not contain whitespace",
            control_number
        ));
    }
    Ok(control_number.to_string())
}

pub fn archive(delegate: &mut Delegate, by: &str, now: DateTime<Local>) -> Result<()> {
    if delegate.is_archived() {
        return Err(invalid_input!(
            "delegate {} is already archived",
            delegate.control_number
        ));
    }
    delegate.archived = Some(Archive {
        at: now,
        by: by.to_string(),
    });
    Ok(())
}

pub fn restore(delegate: &mut Delegate) -> Result<()> {
    if delegate.archived.take().is_none() {
        return Err(invalid_input!(
            "delegate {} is not archived",
            delegate.control_number
        ));
    }
    Ok(())
}
