//! Election configuration
//!
//! The administrative side of the engine: creating elections, choosing the
//! active one, and populating districts, positions, candidates and delegates.
//! Every configuration write runs [`lifecycle::validate_mutable`] inside the
//! same transaction as the write and bumps the election's roster version, so
//! a concurrent `start` either sees the change or conflicts with it.

use crate::engine::audit::{AuditAction, AuditEntry};
use crate::engine::clock::Clock;
use crate::engine::store::{MemoryStore, Transaction};
use crate::engine::{ballot, delegate, lifecycle};
use crate::types::{
    Archive, Ballot, Candidate, CandidateId, Delegate, District, DistrictId, Election, ElectionId,
    NewElection, Position, PositionId,
};
use crate::{Error, Result, invalid_input};
use std::sync::Arc;
use uuid::Uuid;

/// Newly registered delegate with the ballot issued to them
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub delegate: Delegate,
    pub ballot: Ballot,
}

#[derive(Debug, Clone)]
pub struct ElectionRegistry {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    ballot_prefix: String,
}

impl ElectionRegistry {
    pub fn new(
        store: Arc<MemoryStore>,
        clock: Arc<dyn Clock>,
        ballot_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            ballot_prefix: ballot_prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Create a scheduled election
    pub async fn create_election(&self, input: NewElection, actor: &str) -> Result<Election> {
        if input.name.trim().is_empty() {
            return Err(invalid_input!("election name must not be empty"));
        }

        let now = self.clock.now();
        let election = Election::new(input, now);

        let mut tx = self.store.begin();
        tx.put_election(election.clone());
        tx.append_audit(AuditEntry::new(
            AuditAction::ElectionCreated,
            format!("election:{}", election.id),
            format!("created '{}' for {}", election.name, election.date),
            actor,
            now,
        ));
        tx.commit().await?;

        tracing::info!(election_id = %election.id, date = %election.date, "Election created");
        Ok(election)
    }

    /// Point all voting operations at `election_id`
    ///
    /// Re-selecting the election that is already active writes nothing.
    pub async fn set_active(&self, election_id: ElectionId, actor: &str) -> Result<()> {
        let mut tx = self.store.begin();
        let election = tx
            .election(election_id)
            .await
            .ok_or_else(|| Error::not_found("election", election_id))?;
        if election.is_archived() {
            return Err(invalid_input!("election {} is archived", election_id));
        }

        let previous = tx.active_election_id().await;
        if previous == Some(election_id) {
            return Ok(());
        }
        tx.set_active_election(Some(election_id));
        tx.append_audit(AuditEntry::new(
            AuditAction::ActiveElectionSelected,
            format!("election:{election_id}"),
            match previous {
                Some(previous) => format!("replaces {previous}"),
                None => "no previous active election".to_string(),
            },
            actor,
            self.clock.now(),
        ));
        tx.commit().await?;

        tracing::info!(%election_id, "Active election selected");
        Ok(())
    }

    /// Clear the active election pointer
    pub async fn clear_active(&self, actor: &str) -> Result<()> {
        let mut tx = self.store.begin();
        let Some(previous) = tx.active_election_id().await else {
            return Ok(());
        };
        tx.set_active_election(None);
        tx.append_audit(AuditEntry::new(
            AuditAction::ActiveElectionSelected,
            format!("election:{previous}"),
            "deselected",
            actor,
            self.clock.now(),
        ));
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_district(
        &self,
        election_id: ElectionId,
        name: &str,
        actor: &str,
    ) -> Result<District> {
        let name = required("district name", name)?;

        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        let district = District {
            id: self.store.allocate_id(),
            election_id,
            name,
        };
        tx.put_district(district.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!("district {} added", district.name),
            actor,
        );
        tx.commit().await?;

        Ok(district)
    }

    pub async fn add_position(
        &self,
        election_id: ElectionId,
        title: &str,
        max_candidates: u32,
        term_limit: &str,
        actor: &str,
    ) -> Result<Position> {
        let title = required("position title", title)?;
        if max_candidates == 0 {
            return Err(invalid_input!(
                "position {} must allow at least one candidate",
                title
            ));
        }

        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        let position = Position {
            id: self.store.allocate_id(),
            election_id,
            title,
            max_candidates,
            term_limit: term_limit.trim().to_string(),
        };
        tx.put_position(position.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!("position {} added (max {})", position.title, max_candidates),
            actor,
        );
        tx.commit().await?;

        Ok(position)
    }

    pub async fn add_candidate(
        &self,
        election_id: ElectionId,
        position_id: PositionId,
        district_id: DistrictId,
        display_name: &str,
        actor: &str,
    ) -> Result<Candidate> {
        let display_name = required("candidate name", display_name)?;

        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        let position = tx
            .position(position_id)
            .await
            .filter(|p| p.election_id == election_id)
            .ok_or_else(|| Error::not_found("position", position_id))?;
        let district = tx
            .district(district_id)
            .await
            .filter(|d| d.election_id == election_id)
            .ok_or_else(|| Error::not_found("district", district_id))?;

        let candidate = Candidate {
            id: self.store.allocate_id(),
            election_id,
            position_id: position.id,
            district_id: district.id,
            display_name,
            archived: None,
        };
        tx.put_candidate(candidate.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!("candidate {} added for {}", candidate.display_name, position.title),
            actor,
        );
        tx.commit().await?;

        Ok(candidate)
    }

    /// Register a delegate and issue their ballot
    pub async fn register_delegate(
        &self,
        election_id: ElectionId,
        control_number: &str,
        display_name: &str,
        actor: &str,
    ) -> Result<Registration> {
        let control_number = delegate::normalize_control_number(control_number)?;
        let display_name = required("delegate name", display_name)?;

        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        if tx
            .delegate_by_control_number(election_id, &control_number)
            .await
            .is_some()
        {
            return Err(invalid_input!(
                "control number {} is already registered",
                control_number
            ));
        }

        let now = self.clock.now();
        let delegate = Delegate {
            id: Uuid::new_v4(),
            election_id,
            control_number,
            display_name,
            has_voted: false,
            archived: None,
        };
        let ballot = ballot::issue(
            election_id,
            delegate.id,
            ballot::receipt_number(&self.ballot_prefix, self.store.next_ballot_sequence()),
            now,
        );

        tx.put_delegate(delegate.clone());
        tx.put_ballot(ballot.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!(
                "delegate {} registered with ballot {}",
                delegate.control_number, ballot.ballot_number
            ),
            actor,
        );
        tx.commit().await?;

        tracing::debug!(
            %election_id,
            control_number = %delegate.control_number,
            ballot = %ballot.ballot_number,
            "Delegate registered"
        );
        Ok(Registration { delegate, ballot })
    }

    pub async fn archive_candidate(
        &self,
        election_id: ElectionId,
        candidate_id: CandidateId,
        actor: &str,
    ) -> Result<Candidate> {
        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        let mut candidate = tx
            .candidate(candidate_id)
            .await
            .filter(|c| c.election_id == election_id)
            .ok_or_else(|| Error::not_found("candidate", candidate_id))?;
        if candidate.is_archived() {
            return Err(invalid_input!("candidate {} is already archived", candidate_id));
        }

        let now = self.clock.now();
        candidate.archived = Some(Archive {
            at: now,
            by: actor.to_string(),
        });
        tx.put_candidate(candidate.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!("candidate {} archived", candidate.display_name),
            actor,
        );
        tx.commit().await?;

        Ok(candidate)
    }

    pub async fn archive_delegate(
        &self,
        election_id: ElectionId,
        control_number: &str,
        actor: &str,
    ) -> Result<Delegate> {
        let control_number = delegate::normalize_control_number(control_number)?;

        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        let mut record = tx
            .delegate_by_control_number(election_id, &control_number)
            .await
            .ok_or_else(|| Error::not_found("delegate", &control_number))?;
        delegate::archive(&mut record, actor, self.clock.now())?;

        tx.put_delegate(record.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!("delegate {control_number} archived"),
            actor,
        );
        tx.commit().await?;

        Ok(record)
    }

    pub async fn restore_candidate(
        &self,
        election_id: ElectionId,
        candidate_id: CandidateId,
        actor: &str,
    ) -> Result<Candidate> {
        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        let mut candidate = tx
            .candidate(candidate_id)
            .await
            .filter(|c| c.election_id == election_id)
            .ok_or_else(|| Error::not_found("candidate", candidate_id))?;
        if candidate.archived.take().is_none() {
            return Err(invalid_input!("candidate {} is not archived", candidate_id));
        }

        tx.put_candidate(candidate.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!("candidate {} restored", candidate.display_name),
            actor,
        );
        tx.commit().await?;

        Ok(candidate)
    }

    pub async fn restore_delegate(
        &self,
        election_id: ElectionId,
        control_number: &str,
        actor: &str,
    ) -> Result<Delegate> {
        let control_number = delegate::normalize_control_number(control_number)?;

        let mut tx = self.store.begin();
        mutable_election(&mut tx, election_id).await?;

        let mut record = tx
            .delegate_by_control_number(election_id, &control_number)
            .await
            .ok_or_else(|| Error::not_found("delegate", &control_number))?;
        delegate::restore(&mut record)?;

        tx.put_delegate(record.clone());
        self.configuration_changed(
            &mut tx,
            election_id,
            format!("delegate {control_number} restored"),
            actor,
        );
        tx.commit().await?;

        Ok(record)
    }

    /// Soft-delete an election; refused while it is running
    pub async fn archive_election(&self, election_id: ElectionId, actor: &str) -> Result<Election> {
        let now = self.clock.now();

        let mut tx = self.store.begin();
        let mut election = tx
            .election(election_id)
            .await
            .ok_or_else(|| Error::not_found("election", election_id))?;
        lifecycle::archive(&mut election, actor, now)?;

        if tx.active_election_id().await == Some(election_id) {
            tx.set_active_election(None);
        }
        tx.put_election(election.clone());
        tx.append_audit(AuditEntry::new(
            AuditAction::ElectionArchived,
            format!("election:{election_id}"),
            format!("archived in phase {}", election.phase),
            actor,
            now,
        ));
        tx.commit().await?;

        tracing::info!(%election_id, "Election archived");
        Ok(election)
    }

    pub async fn restore_election(&self, election_id: ElectionId, actor: &str) -> Result<Election> {
        let mut tx = self.store.begin();
        let mut election = tx
            .election(election_id)
            .await
            .ok_or_else(|| Error::not_found("election", election_id))?;
        lifecycle::restore(&mut election)?;

        tx.put_election(election.clone());
        tx.append_audit(AuditEntry::new(
            AuditAction::ElectionRestored,
            format!("election:{election_id}"),
            format!("restored in phase {}", election.phase),
            actor,
            self.clock.now(),
        ));
        tx.commit().await?;

        tracing::info!(%election_id, "Election restored");
        Ok(election)
    }

    fn configuration_changed(
        &self,
        tx: &mut Transaction<'_>,
        election_id: ElectionId,
        details: String,
        actor: &str,
    ) {
        tx.touch_roster(election_id);
        tx.append_audit(AuditEntry::new(
            AuditAction::ConfigurationChanged,
            format!("election:{election_id}"),
            details,
            actor,
            self.clock.now(),
        ));
    }
}

/// Load the election and refuse unless it still accepts configuration
async fn mutable_election(tx: &mut Transaction<'_>, election_id: ElectionId) -> Result<Election> {
    let election = tx
        .election(election_id)
        .await
        .ok_or_else(|| Error::not_found("election", election_id))?;
    lifecycle::validate_mutable(&election)?;
    if election.is_archived() {
        return Err(invalid_input!("election {} is archived", election_id));
    }
    Ok(election)
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid_input!("{} must not be empty", field));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::engine::audit::AuditQuery;
    use crate::engine::clock::FixedClock;
    use crate::types::Phase;
    use chrono::Local;

    fn registry() -> ElectionRegistry {
        ElectionRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedClock::at(Local::now())),
            "B",
        )
    }

    fn new_election() -> NewElection {
        NewElection {
            name: "Annual Convention".to_string(),
            description: None,
            date: Local::now().date_naive(),
            address: "Main Hall".to_string(),
            capacity: 100,
        }
    }

    #[tokio::test]
    async fn test_configuration_flow() {
        let registry = registry();
        let election = registry.create_election(new_election(), "admin").await.unwrap();
        registry.set_active(election.id, "admin").await.unwrap();

        let district = registry.add_district(election.id, "North", "admin").await.unwrap();
        let position = registry
            .add_position(election.id, "Chair", 1, "2 years", "admin")
            .await
            .unwrap();
        let candidate = registry
            .add_candidate(election.id, position.id, district.id, "Alex Kim", "admin")
            .await
            .unwrap();
        let registration = registry
            .register_delegate(election.id, " A100 ", "Dana Reyes", "admin")
            .await
            .unwrap();

        assert_eq!(candidate.position_id, position.id);
        assert_eq!(registration.delegate.control_number, "A100");
        assert!(registration.ballot.ballot_number.starts_with("B-"));

        let mut tx = registry.store().begin();
        assert_eq!(tx.active_election_id().await, Some(election.id));
        let counts = tx.roster_counts(election.id).await;
        assert_eq!(
            (counts.delegates, counts.districts, counts.positions, counts.candidates),
            (1, 1, 1, 1)
        );

        let changes = registry
            .store()
            .query_audit(&AuditQuery::action(AuditAction::ConfigurationChanged))
            .await;
        assert_eq!(changes.len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_control_number_rejected() {
        let registry = registry();
        let election = registry.create_election(new_election(), "admin").await.unwrap();

        registry
            .register_delegate(election.id, "A100", "Dana", "admin")
            .await
            .unwrap();
        let err = registry
            .register_delegate(election.id, "A100", "Other", "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_candidate_requires_own_position() {
        let registry = registry();
        let first = registry.create_election(new_election(), "admin").await.unwrap();
        let second = registry.create_election(new_election(), "admin").await.unwrap();

        let district = registry.add_district(first.id, "North", "admin").await.unwrap();
        let foreign = registry
            .add_position(second.id, "Chair", 1, "1 year", "admin")
            .await
            .unwrap();

        let err = registry
            .add_candidate(first.id, foreign.id, district.id, "Alex", "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_zero_ceiling_rejected() {
        let registry = registry();
        let election = registry.create_election(new_election(), "admin").await.unwrap();
        let err = registry
            .add_position(election.id, "Chair", 0, "1 year", "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_archive_and_restore_election() {
        let registry = registry();
        let election = registry.create_election(new_election(), "admin").await.unwrap();
        registry.set_active(election.id, "admin").await.unwrap();

        let archived = registry.archive_election(election.id, "admin").await.unwrap();
        assert!(archived.is_archived());
        assert_eq!(archived.phase, Phase::Scheduled);

        let mut tx = registry.store().begin();
        assert_eq!(tx.active_election_id().await, None);

        let err = registry.add_district(election.id, "North", "admin").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let restored = registry.restore_election(election.id, "admin").await.unwrap();
        assert!(!restored.is_archived());
        registry.add_district(election.id, "North", "admin").await.unwrap();
    }

    #[tokio::test]
    async fn test_archive_delegate_hides_from_roster() {
        let registry = registry();
        let election = registry.create_election(new_election(), "admin").await.unwrap();
        registry
            .register_delegate(election.id, "A100", "Dana", "admin")
            .await
            .unwrap();

        let archived = registry
            .archive_delegate(election.id, "A100", "admin")
            .await
            .unwrap();
        assert!(archived.is_archived());

        let mut tx = registry.store().begin();
        assert_eq!(tx.roster_counts(election.id).await.delegates, 0);
        drop(tx);

        let restored = registry
            .restore_delegate(election.id, " A100 ", "admin")
            .await
            .unwrap();
        assert!(!restored.is_archived());
        let mut tx = registry.store().begin();
        assert_eq!(tx.roster_counts(election.id).await.delegates, 1);
        drop(tx);

        let err = registry
            .restore_delegate(election.id, "A100", "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_archive_and_restore_candidate() {
        let registry = registry();
        let election = registry.create_election(new_election(), "admin").await.unwrap();
        let district = registry.add_district(election.id, "North", "admin").await.unwrap();
        let position = registry
            .add_position(election.id, "Chair", 1, "1 year", "admin")
            .await
            .unwrap();
        let candidate = registry
            .add_candidate(election.id, position.id, district.id, "Alex", "admin")
            .await
            .unwrap();

        let err = registry
            .restore_candidate(election.id, candidate.id, "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        registry
            .archive_candidate(election.id, candidate.id, "admin")
            .await
            .unwrap();
        let mut tx = registry.store().begin();
        assert_eq!(tx.roster_counts(election.id).await.candidates, 0);
        drop(tx);

        let restored = registry
            .restore_candidate(election.id, candidate.id, "admin")
            .await
            .unwrap();
        assert!(!restored.is_archived());

        let mut tx = registry.store().begin();
        assert_eq!(tx.roster_counts(election.id).await.candidates, 1);
        let stored = tx.candidate(candidate.id).await.unwrap();
        assert!(!stored.is_archived());
        drop(tx);

        let changes = registry
            .store()
            .query_audit(&AuditQuery::action(AuditAction::ConfigurationChanged))
            .await;
        assert!(changes.iter().any(|r| r.entry.details == "candidate Alex restored"));
    }

    #[tokio::test]
    async fn test_reselecting_active_election_writes_nothing() {
        let registry = registry();
        let election = registry.create_election(new_election(), "admin").await.unwrap();
        registry.set_active(election.id, "admin").await.unwrap();
        let before = registry.store().audit_records().await.len();

        // A cast that read the pointer before the re-selection still commits
        let mut reader = registry.store().begin();
        assert_eq!(reader.active_election_id().await, Some(election.id));

        registry.set_active(election.id, "admin").await.unwrap();
        assert_eq!(registry.store().audit_records().await.len(), before);

        reader.append_audit(AuditEntry::new(
            AuditAction::BallotReprinted,
            "ballot:B-1",
            "after re-selection",
            "desk",
            Local::now(),
        ));
        reader.commit().await.unwrap();
    }
}
