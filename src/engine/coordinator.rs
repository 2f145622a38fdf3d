//! Vote-casting transaction coordinator
//!
//! Runs every voting-side operation against the active election:
//! 1. `cast_vote` validates and records one delegate's ballot in a single
//!    store transaction, then hands the tally to the notifier
//! 2. `reprint` rebuilds a submitted ballot from its cast-vote rows
//! 3. `start_election`, `close_election` and `cancel_election` drive the
//!    lifecycle
//!
//! The active election pointer is read fresh inside each operation and never
//! cached on the coordinator.

use crate::config::EngineConfig;
use crate::engine::audit::{AuditAction, AuditEntry};
use crate::engine::clock::Clock;
use crate::engine::delegate::{self, DelegateStatus};
use crate::engine::notifier::{ResultNotifier, TallyUpdate};
use crate::engine::store::{MemoryStore, Transaction};
use crate::engine::validation::{self, Selection};
use crate::engine::{ballot, lifecycle};
use crate::errors::Precondition;
use crate::types::{
    CandidateId, CastVote, DistrictId, Election, ElectionId, ElectionSummary, PositionId, Tally,
};
use crate::{Error, Result, internal_error, invalid_input};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A delegate's ballot as submitted from a voting station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastRequest {
    pub control_number: String,
    /// Chosen candidates; empty means abstaining on every position
    pub selections: Vec<CandidateId>,
    pub precinct: String,
}

impl CastRequest {
    pub fn new(
        control_number: impl Into<String>,
        selections: Vec<CandidateId>,
        precinct: impl Into<String>,
    ) -> Self {
        Self {
            control_number: control_number.into(),
            selections,
            precinct: precinct.into(),
        }
    }
}

/// One recorded selection as shown on a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastCandidate {
    pub candidate_id: CandidateId,
    pub display_name: String,
    pub position_id: PositionId,
    pub position_title: String,
    pub district_id: DistrictId,
}

/// Selections of one position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionGroup {
    pub position_id: PositionId,
    pub position_title: String,
    pub candidates: Vec<CastCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastResult {
    pub ballot_receipt: String,
    pub precinct: String,
    pub cast_at: DateTime<Local>,
    pub election: ElectionSummary,
    pub candidates: Vec<CastCandidate>,
}

impl CastResult {
    /// Receipt layout: selections grouped by position
    pub fn grouped(&self) -> Vec<PositionGroup> {
        group_by_position(&self.candidates)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprintResult {
    pub ballot_receipt: String,
    pub precinct: String,
    /// Submission time; absent only for a ballot whose status disagrees with its delegate
    pub cast_at: Option<DateTime<Local>>,
    pub election: ElectionSummary,
    pub grouped: Vec<PositionGroup>,
}

fn group_by_position(candidates: &[CastCandidate]) -> Vec<PositionGroup> {
    let mut groups: BTreeMap<PositionId, PositionGroup> = BTreeMap::new();
    for candidate in candidates {
        groups
            .entry(candidate.position_id)
            .or_insert_with(|| PositionGroup {
                position_id: candidate.position_id,
                position_title: candidate.position_title.clone(),
                candidates: Vec::new(),
            })
            .candidates
            .push(candidate.clone());
    }
    groups.into_values().collect()
}

enum Transition<'r> {
    Start,
    Close,
    Cancel(&'r str),
}

impl Transition<'_> {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Close => "close",
            Transition::Cancel(_) => "cancel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    store: Arc<MemoryStore>,
    notifier: ResultNotifier,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<MemoryStore>,
        notifier: ResultNotifier,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
        }
    }

    /// Subscribe to tally updates published after each committed cast
    pub fn subscribe(&self) -> broadcast::Receiver<TallyUpdate> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &ResultNotifier {
        &self.notifier
    }

    /// Cast one delegate's ballot in the active election
    ///
    /// Either every effect lands (cast-vote rows, the delegate's `has_voted`
    /// flag, the ballot's `submitted` status and the audit entries) or none
    /// does. A cast that loses a race with another cast for the same
    /// delegate reports the business rejection, not the storage conflict.
    /// One that loses a race to an unrelated write is retried.
    pub async fn cast_vote(&self, request: CastRequest, actor: &str) -> Result<CastResult> {
        let deadline = self.config.cast_timeout();

        let outcome = tokio::time::timeout(deadline, self.cast_or_explain(&request, actor)).await;
        let result = match outcome {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    control_number = %request.control_number,
                    timeout_ms = deadline.as_millis() as u64,
                    "Cast timed out before commit"
                );
                return Err(Error::Timeout { after: deadline });
            }
        };

        // Detached: the caller never waits on result publication
        drop(
            self.notifier
                .publish_detached(Arc::clone(&self.store), result.election.id),
        );

        Ok(result)
    }

    /// Run the cast, turning storage conflicts into rejections
    ///
    /// A conflicting cast that is still eligible against committed state lost
    /// its race to an unrelated write, and nothing of it was applied. It is
    /// retried inside the caller's deadline, at most `conflict_retries` times.
    async fn cast_or_explain(&self, request: &CastRequest, actor: &str) -> Result<CastResult> {
        let mut attempt = 0;
        loop {
            let message = match self.try_cast(request, actor).await {
                Err(Error::Conflict { message }) => message,
                other => return other,
            };
            tracing::debug!(
                control_number = %request.control_number,
                attempt,
                %message,
                "Cast lost a commit race, re-checking eligibility"
            );
            self.recheck_eligibility(request).await?;

            if attempt >= self.config.conflict_retries {
                tracing::warn!(
                    control_number = %request.control_number,
                    attempts = attempt + 1,
                    "Cast kept conflicting, giving up"
                );
                return Err(Error::conflict(message));
            }
            attempt += 1;
        }
    }

    /// Re-run the eligibility checks against committed state
    async fn recheck_eligibility(&self, request: &CastRequest) -> Result<()> {
        let control_number = request.control_number.trim();
        let mut tx = self.store.begin();

        let election_id = active_election_id(&mut tx).await?;
        let election = tx.election(election_id).await;
        let delegate = tx.delegate_by_control_number(election_id, control_number).await;
        let ballot = match &delegate {
            Some(d) => tx.ballot_for_delegate(d.id).await,
            None => None,
        };
        let positions = tx.positions(election_id).await;

        validation::validate(
            election.as_ref(),
            control_number,
            delegate.as_ref(),
            ballot.as_ref(),
            &[],
            &positions,
        )
        .into_result()
        .inspect_err(|rejection| tracing::warn!(%control_number, %rejection, "Cast rejected"))?;
        Ok(())
    }

    async fn try_cast(&self, request: &CastRequest, actor: &str) -> Result<CastResult> {
        let control_number = request.control_number.trim();
        let precinct = request.precinct.trim();
        if precinct.is_empty() {
            return Err(invalid_input!("precinct must not be empty"));
        }

        let mut tx = self.store.begin();
        let election_id = active_election_id(&mut tx).await?;

        let election = tx.election(election_id).await;
        let delegate = tx.delegate_by_control_number(election_id, control_number).await;
        let ballot = match &delegate {
            Some(d) => tx.ballot_for_delegate(d.id).await,
            None => None,
        };
        let positions = tx.positions(election_id).await;

        let mut selections = Vec::with_capacity(request.selections.len());
        for &candidate_id in &request.selections {
            selections.push(Selection {
                candidate_id,
                candidate: tx.candidate(candidate_id).await,
            });
        }

        if let (Some(d), Some(b)) = (&delegate, &ballot) {
            if delegate::status(d, Some(b)).is_inconsistent() {
                tracing::warn!(
                    %control_number,
                    has_voted = d.has_voted,
                    ballot_status = %b.status,
                    "Delegate and ballot disagree on whether the vote was used"
                );
            }
        }

        validation::validate(
            election.as_ref(),
            control_number,
            delegate.as_ref(),
            ballot.as_ref(),
            &selections,
            &positions,
        )
        .into_result()
        .inspect_err(|rejection| tracing::warn!(%control_number, %rejection, "Cast rejected"))?;

        let (Some(election), Some(mut delegate), Some(mut ballot)) = (election, delegate, ballot)
        else {
            return Err(internal_error!("accepted cast for {} is missing records", control_number));
        };

        let now = self.clock.now();
        let mut candidates = Vec::with_capacity(selections.len());

        for selection in selections {
            let candidate = selection.candidate.ok_or_else(|| {
                internal_error!("accepted candidate {} was not loaded", selection.candidate_id)
            })?;
            let position = positions
                .get(&candidate.position_id)
                .ok_or_else(|| Error::not_found("position", candidate.position_id))?;

            tx.insert_cast_vote(CastVote {
                election_id,
                ballot_number: ballot.ballot_number.clone(),
                precinct: precinct.to_string(),
                candidate_id: candidate.id,
                position_id: candidate.position_id,
                district_id: candidate.district_id,
                cast_at: now,
            })
            .inspect_err(|err| {
                tracing::warn!(
                    %control_number,
                    ballot = %ballot.ballot_number,
                    %err,
                    "Cast vote insert failed"
                );
            })?;
            tx.append_audit(AuditEntry::new(
                AuditAction::VoteCast,
                format!("ballot:{}", ballot.ballot_number),
                format!("candidate {} for {}", candidate.id, position.title),
                actor,
                now,
            ));

            candidates.push(CastCandidate {
                candidate_id: candidate.id,
                display_name: candidate.display_name,
                position_id: position.id,
                position_title: position.title.clone(),
                district_id: candidate.district_id,
            });
        }

        if candidates.is_empty() {
            tx.append_audit(AuditEntry::new(
                AuditAction::EmptyBallotCast,
                format!("ballot:{}", ballot.ballot_number),
                format!("intentionally empty ballot from precinct {precinct}"),
                actor,
                now,
            ));
        }

        delegate::mark_voted(&mut delegate)?;
        ballot::submit(&mut ballot, precinct, now)?;
        let receipt = ballot.ballot_number.clone();
        tx.put_delegate(delegate);
        tx.put_ballot(ballot);

        tx.commit().await.inspect_err(|err| {
            if !matches!(err, Error::Conflict { .. }) {
                tracing::warn!(%control_number, %err, "Cast commit failed");
            }
        })?;

        tracing::info!(
            %election_id,
            %control_number,
            ballot = %receipt,
            %precinct,
            selections = candidates.len(),
            "Ballot cast"
        );

        Ok(CastResult {
            ballot_receipt: receipt,
            precinct: precinct.to_string(),
            cast_at: now,
            election: election.summary(),
            candidates,
        })
    }

    /// Rebuild a submitted ballot for reprinting
    ///
    /// Reads committed state only; the one write is the audit entry
    /// recording the reprint.
    pub async fn reprint(&self, control_number: &str, actor: &str) -> Result<ReprintResult> {
        let control_number = control_number.trim();

        let mut reads = self.store.begin();
        let election_id = active_election_id(&mut reads).await?;
        let election = reads
            .election(election_id)
            .await
            .ok_or_else(|| Error::not_found("election", election_id))?;
        let delegate = reads
            .delegate_by_control_number(election_id, control_number)
            .await
            .ok_or_else(|| Error::not_found("delegate", control_number))?;
        if !delegate.has_voted {
            return Err(Precondition::DelegateHasNotVoted {
                control_number: control_number.to_string(),
            }
            .into());
        }
        let ballot = reads
            .ballot_for_delegate(delegate.id)
            .await
            .ok_or_else(|| Error::not_found("ballot", control_number))?;

        let votes = reads
            .cast_votes_for_ballot(election_id, &ballot.ballot_number)
            .await;
        let mut candidates = Vec::with_capacity(votes.len());
        for vote in &votes {
            let candidate = reads
                .candidate(vote.candidate_id)
                .await
                .ok_or_else(|| Error::not_found("candidate", vote.candidate_id))?;
            let position = reads
                .position(vote.position_id)
                .await
                .ok_or_else(|| Error::not_found("position", vote.position_id))?;
            candidates.push(CastCandidate {
                candidate_id: candidate.id,
                display_name: candidate.display_name,
                position_id: position.id,
                position_title: position.title,
                district_id: vote.district_id,
            });
        }
        drop(reads);

        let mut tx = self.store.begin();
        tx.append_audit(AuditEntry::new(
            AuditAction::BallotReprinted,
            format!("ballot:{}", ballot.ballot_number),
            format!("reprint for delegate {control_number}"),
            actor,
            self.clock.now(),
        ));
        tx.commit().await?;

        tracing::info!(%control_number, ballot = %ballot.ballot_number, "Ballot reprinted");

        Ok(ReprintResult {
            ballot_receipt: ballot.ballot_number,
            precinct: ballot
                .precinct
                .or_else(|| votes.first().map(|v| v.precinct.clone()))
                .unwrap_or_default(),
            cast_at: ballot
                .submitted_at
                .or_else(|| votes.first().map(|v| v.cast_at)),
            election: election.summary(),
            grouped: group_by_position(&candidates),
        })
    }

    /// Eligibility probe for the active election; reads only
    pub async fn delegate_status(&self, control_number: &str) -> Result<DelegateStatus> {
        let control_number = control_number.trim();
        let mut reads = self.store.begin();
        let election_id = active_election_id(&mut reads).await?;
        let delegate = reads
            .delegate_by_control_number(election_id, control_number)
            .await
            .ok_or_else(|| Error::not_found("delegate", control_number))?;
        let ballot = reads.ballot_for_delegate(delegate.id).await;

        Ok(delegate::status(&delegate, ballot.as_ref()))
    }

    /// Current tally of the active election
    pub async fn tally(&self) -> Result<Tally> {
        let mut reads = self.store.begin();
        let election_id = active_election_id(&mut reads).await?;
        drop(reads);
        Ok(self.store.tally(election_id).await)
    }

    pub async fn start_election(&self, actor: &str) -> Result<Election> {
        self.transition(Transition::Start, actor).await
    }

    pub async fn close_election(&self, actor: &str) -> Result<Election> {
        self.transition(Transition::Close, actor).await
    }

    pub async fn cancel_election(&self, reason: &str, actor: &str) -> Result<Election> {
        self.transition(Transition::Cancel(reason), actor).await
    }

    /// Apply a lifecycle transition, retrying on storage conflicts
    async fn transition(&self, transition: Transition<'_>, actor: &str) -> Result<Election> {
        let mut attempt = 0;
        loop {
            match self.try_transition(&transition, actor).await {
                Err(Error::Conflict { message }) if attempt < self.config.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(
                        action = transition.name(),
                        attempt,
                        %message,
                        "Retrying election transition after conflict"
                    );
                }
                Err(err) => {
                    tracing::warn!(action = transition.name(), %err, "Election transition refused");
                    return Err(err);
                }
                Ok(election) => return Ok(election),
            }
        }
    }

    async fn try_transition(&self, transition: &Transition<'_>, actor: &str) -> Result<Election> {
        let mut tx = self.store.begin();
        let election_id = active_election_id(&mut tx).await?;
        let mut election = tx
            .election(election_id)
            .await
            .ok_or_else(|| Error::not_found("election", election_id))?;
        let now = self.clock.now();

        let (action, details) = match transition {
            Transition::Start => {
                let roster = tx.roster_counts(election_id).await;
                lifecycle::start(&mut election, &roster, now)?;
                (
                    AuditAction::ElectionStarted,
                    format!(
                        "{} delegates, {} districts, {} positions, {} candidates",
                        roster.delegates, roster.districts, roster.positions, roster.candidates
                    ),
                )
            }
            Transition::Close => {
                lifecycle::close(&mut election, now)?;
                (AuditAction::ElectionClosed, format!("closed at {now}"))
            }
            Transition::Cancel(reason) => {
                lifecycle::cancel(&mut election, reason)?;
                let reason = match reason.trim() {
                    "" => "no reason given",
                    reason => reason,
                };
                (AuditAction::ElectionCancelled, reason.to_string())
            }
        };

        tx.put_election(election.clone());
        tx.append_audit(AuditEntry::new(
            action,
            format!("election:{election_id}"),
            details,
            actor,
            now,
        ));
        tx.commit().await?;

        tracing::info!(%election_id, phase = %election.phase, "Election {}", action);
        Ok(election)
    }
}

async fn active_election_id(tx: &mut Transaction<'_>) -> Result<ElectionId> {
    tx.active_election_id()
        .await
        .ok_or_else(|| Error::not_found("active election", "none"))
}
