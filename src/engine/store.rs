//! Transactional in-process store
//!
//! Stands in for the backing database. Isolation is optimistic and
//! serializable:
//! 1. a [`Transaction`] records the version of every row it reads
//! 2. writes, cast votes and audit entries are buffered inside it
//! 3. [`Transaction::commit`] takes the write lock, re-checks every recorded
//!    version and applies everything at once, or nothing on any mismatch
//!
//! Absent rows are read as version 0, so "no delegate with this control
//! number" is a fact a later commit can invalidate too. Dropping a
//! transaction without committing discards it.

use crate::engine::audit::{
    AuditEntry, AuditIntegrityReport, AuditLog, AuditQuery, AuditRecord,
};
use crate::types::{
    Ballot, BallotId, BallotStatus, Candidate, CandidateId, CandidateTotal, CastVote, Delegate,
    DelegateId, District, DistrictId, Election, ElectionId, Position, PositionId, RosterCounts,
    Tally,
};
use crate::{Error, Result, internal_error};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Injected storage failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Fail the `nth` (1-based) cast-vote insert of the next transaction reaching it
    CastVoteInsert { nth: usize },
    /// Fail the next commit after its conflict check
    Commit,
    /// Refuse the next commit as if a row it read had changed
    Conflict,
}

#[derive(Debug, Clone, Default)]
struct Row<T> {
    version: u64,
    value: T,
}

/// Keys of the versioned facts a transaction can depend on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    ActiveElection,
    Election(ElectionId),
    Delegate(DelegateId),
    Ballot(BallotId),
    ControlNumber(ElectionId, String),
    BallotOf(DelegateId),
    Roster(ElectionId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::ActiveElection => f.write_str("active election"),
            RowKey::Election(id) => write!(f, "election {id}"),
            RowKey::Delegate(id) => write!(f, "delegate {id}"),
            RowKey::Ballot(id) => write!(f, "ballot {id}"),
            RowKey::ControlNumber(election, number) => {
                write!(f, "control number {number} in election {election}")
            }
            RowKey::BallotOf(id) => write!(f, "ballot of delegate {id}"),
            RowKey::Roster(id) => write!(f, "roster of election {id}"),
        }
    }
}

#[derive(Debug, Clone)]
enum Write {
    ActiveElection(Option<ElectionId>),
    Election(Election),
    District(District),
    Position(Position),
    Candidate(Candidate),
    Delegate(Delegate),
    Ballot(Ballot),
    TouchRoster(ElectionId),
}

#[derive(Debug, Default)]
struct Tables {
    active_election: Row<Option<ElectionId>>,
    elections: HashMap<ElectionId, Row<Election>>,
    districts: HashMap<DistrictId, District>,
    positions: HashMap<PositionId, Position>,
    candidates: HashMap<CandidateId, Candidate>,
    delegates: HashMap<DelegateId, Row<Delegate>>,
    control_numbers: HashMap<(ElectionId, String), DelegateId>,
    ballots: HashMap<BallotId, Row<Ballot>>,
    ballot_of: HashMap<DelegateId, BallotId>,
    rosters: HashMap<ElectionId, u64>,
    cast_votes: Vec<CastVote>,
    audit: AuditLog,
}

impl Tables {
    fn version(&self, key: &RowKey) -> u64 {
        match key {
            RowKey::ActiveElection => self.active_election.version,
            RowKey::Election(id) => self.elections.get(id).map_or(0, |row| row.version),
            RowKey::Delegate(id) => self.delegates.get(id).map_or(0, |row| row.version),
            RowKey::Ballot(id) => self.ballots.get(id).map_or(0, |row| row.version),
            RowKey::ControlNumber(election, number) => {
                u64::from(self.control_numbers.contains_key(&(*election, number.clone())))
            }
            RowKey::BallotOf(id) => u64::from(self.ballot_of.contains_key(id)),
            RowKey::Roster(id) => self.rosters.get(id).copied().unwrap_or(0),
        }
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::ActiveElection(value) => {
                self.active_election.version += 1;
                self.active_election.value = value;
            }
            Write::Election(election) => upsert(&mut self.elections, election.id, election),
            Write::District(district) => {
                self.districts.insert(district.id, district);
            }
            Write::Position(position) => {
                self.positions.insert(position.id, position);
            }
            Write::Candidate(candidate) => {
                self.candidates.insert(candidate.id, candidate);
            }
            Write::Delegate(delegate) => {
                self.control_numbers
                    .insert((delegate.election_id, delegate.control_number.clone()), delegate.id);
                upsert(&mut self.delegates, delegate.id, delegate);
            }
            Write::Ballot(ballot) => {
                self.ballot_of.insert(ballot.delegate_id, ballot.id);
                upsert(&mut self.ballots, ballot.id, ballot);
            }
            Write::TouchRoster(election_id) => {
                *self.rosters.entry(election_id).or_default() += 1;
            }
        }
    }

    fn roster_counts(&self, election_id: ElectionId) -> RosterCounts {
        RosterCounts {
            delegates: self
                .delegates
                .values()
                .filter(|row| row.value.election_id == election_id && !row.value.is_archived())
                .count(),
            districts: self
                .districts
                .values()
                .filter(|d| d.election_id == election_id)
                .count(),
            positions: self
                .positions
                .values()
                .filter(|p| p.election_id == election_id)
                .count(),
            candidates: self
                .candidates
                .values()
                .filter(|c| c.election_id == election_id && !c.is_archived())
                .count(),
        }
    }

    fn tally(&self, election_id: ElectionId) -> Tally {
        let ballots_cast = self
            .ballots
            .values()
            .filter(|row| {
                row.value.election_id == election_id && row.value.status == BallotStatus::Submitted
            })
            .count() as u64;

        let mut votes: HashMap<CandidateId, u64> = HashMap::new();
        for vote in self.cast_votes.iter().filter(|v| v.election_id == election_id) {
            *votes.entry(vote.candidate_id).or_default() += 1;
        }

        let mut totals: Vec<CandidateTotal> = self
            .candidates
            .values()
            .filter(|c| c.election_id == election_id && !c.is_archived())
            .map(|c| CandidateTotal {
                candidate_id: c.id,
                position_id: c.position_id,
                display_name: c.display_name.clone(),
                votes: votes.get(&c.id).copied().unwrap_or(0),
            })
            .collect();
        totals.sort_by_key(|t| (t.position_id, t.candidate_id));

        Tally {
            election_id,
            ballots_cast,
            totals,
        }
    }
}

fn upsert<K: std::hash::Hash + Eq, T>(table: &mut HashMap<K, Row<T>>, key: K, value: T) {
    match table.get_mut(&key) {
        Some(row) => {
            row.version += 1;
            row.value = value;
        }
        None => {
            table.insert(key, Row { version: 1, value });
        }
    }
}

/// Shared handle to all engine state
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_serial: AtomicU64,
    next_ballot: AtomicU64,
    fault: Mutex<Option<StoreFault>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_serial: AtomicU64::new(1),
            next_ballot: AtomicU64::new(1),
            fault: Mutex::new(None),
        }
    }

    /// Open a transaction
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            reads: HashMap::new(),
            writes: Vec::new(),
            cast_votes: Vec::new(),
            audit: Vec::new(),
        }
    }

    /// Next district/position/candidate id; gaps are possible on rollback
    pub fn allocate_id(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Next ballot receipt sequence
    pub fn next_ballot_sequence(&self) -> u64 {
        self.next_ballot.fetch_add(1, Ordering::Relaxed)
    }

    /// Arm a one-shot storage failure
    pub fn inject_fault(&self, fault: StoreFault) -> Result<()> {
        let mut slot = self
            .fault
            .lock()
            .map_err(|_| internal_error!("Store fault slot poisoned"))?;
        *slot = Some(fault);
        Ok(())
    }

    /// Consume the armed fault if `trips` accepts it
    fn trip_fault(&self, trips: impl Fn(StoreFault) -> bool) -> Result<bool> {
        let mut slot = self
            .fault
            .lock()
            .map_err(|_| internal_error!("Store fault slot poisoned"))?;
        let tripped = slot.is_some_and(&trips);
        if tripped {
            *slot = None;
        }
        Ok(tripped)
    }

    /// Block every transaction until the returned guard is dropped
    pub async fn exclusive(&self) -> ExclusiveGuard<'_> {
        ExclusiveGuard {
            _guard: self.tables.write().await,
        }
    }

    /// Current tally, computed from committed rows
    pub async fn tally(&self, election_id: ElectionId) -> Tally {
        self.tables.read().await.tally(election_id)
    }

    /// Committed cast votes of one ballot, in insertion order
    pub async fn cast_votes_for_ballot(
        &self,
        election_id: ElectionId,
        ballot_number: &str,
    ) -> Vec<CastVote> {
        let tables = self.tables.read().await;
        tables
            .cast_votes
            .iter()
            .filter(|v| v.election_id == election_id && v.ballot_number == ballot_number)
            .cloned()
            .collect()
    }

    /// Number of committed cast votes in an election
    pub async fn cast_vote_count(&self, election_id: ElectionId) -> usize {
        let tables = self.tables.read().await;
        tables
            .cast_votes
            .iter()
            .filter(|v| v.election_id == election_id)
            .count()
    }

    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.tables.read().await.audit.records().to_vec()
    }

    pub async fn query_audit(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        self.tables.read().await.audit.query(query)
    }

    pub async fn verify_audit_integrity(&self) -> Result<AuditIntegrityReport> {
        self.tables.read().await.audit.verify_integrity()
    }
}

/// Holds the store's write lock
pub struct ExclusiveGuard<'a> {
    _guard: RwLockWriteGuard<'a, Tables>,
}

/// A unit of work against [`MemoryStore`]
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a MemoryStore,
    reads: HashMap<RowKey, u64>,
    writes: Vec<Write>,
    cast_votes: Vec<CastVote>,
    audit: Vec<AuditEntry>,
}

impl<'a> Transaction<'a> {
    /// Remember the first version seen for `key`
    fn track(&mut self, key: RowKey, version: u64) {
        self.reads.entry(key).or_insert(version);
    }

    pub async fn active_election_id(&mut self) -> Option<ElectionId> {
        let store = self.store;
        let tables = store.tables.read().await;
        self.track(RowKey::ActiveElection, tables.active_election.version);
        tables.active_election.value
    }

    pub async fn election(&mut self, id: ElectionId) -> Option<Election> {
        let store = self.store;
        let tables = store.tables.read().await;
        let row = tables.elections.get(&id);
        self.track(RowKey::Election(id), row.map_or(0, |r| r.version));
        row.map(|r| r.value.clone())
    }

    pub async fn delegate_by_control_number(
        &mut self,
        election_id: ElectionId,
        control_number: &str,
    ) -> Option<Delegate> {
        let store = self.store;
        let tables = store.tables.read().await;
        let key = (election_id, control_number.to_string());

        let Some(delegate_id) = tables.control_numbers.get(&key).copied() else {
            self.track(RowKey::ControlNumber(key.0, key.1), 0);
            return None;
        };
        self.track(RowKey::ControlNumber(key.0, key.1), 1);

        let row = tables.delegates.get(&delegate_id)?;
        self.track(RowKey::Delegate(delegate_id), row.version);
        Some(row.value.clone())
    }

    pub async fn delegate(&mut self, id: DelegateId) -> Option<Delegate> {
        let store = self.store;
        let tables = store.tables.read().await;
        let row = tables.delegates.get(&id);
        self.track(RowKey::Delegate(id), row.map_or(0, |r| r.version));
        row.map(|r| r.value.clone())
    }

    pub async fn ballot_for_delegate(&mut self, delegate_id: DelegateId) -> Option<Ballot> {
        let store = self.store;
        let tables = store.tables.read().await;

        let Some(ballot_id) = tables.ballot_of.get(&delegate_id).copied() else {
            self.track(RowKey::BallotOf(delegate_id), 0);
            return None;
        };
        self.track(RowKey::BallotOf(delegate_id), 1);

        let row = tables.ballots.get(&ballot_id)?;
        self.track(RowKey::Ballot(ballot_id), row.version);
        Some(row.value.clone())
    }

    pub async fn district(&mut self, id: DistrictId) -> Option<District> {
        self.store.tables.read().await.districts.get(&id).cloned()
    }

    pub async fn position(&mut self, id: PositionId) -> Option<Position> {
        self.store.tables.read().await.positions.get(&id).cloned()
    }

    pub async fn positions(&mut self, election_id: ElectionId) -> HashMap<PositionId, Position> {
        let tables = self.store.tables.read().await;
        tables
            .positions
            .values()
            .filter(|p| p.election_id == election_id)
            .map(|p| (p.id, p.clone()))
            .collect()
    }

    pub async fn candidate(&mut self, id: CandidateId) -> Option<Candidate> {
        self.store.tables.read().await.candidates.get(&id).cloned()
    }

    /// Configuration counts; the read conflicts with any later roster change
    pub async fn roster_counts(&mut self, election_id: ElectionId) -> RosterCounts {
        let store = self.store;
        let tables = store.tables.read().await;
        self.track(RowKey::Roster(election_id), tables.version(&RowKey::Roster(election_id)));
        tables.roster_counts(election_id)
    }

    pub async fn cast_votes_for_ballot(
        &mut self,
        election_id: ElectionId,
        ballot_number: &str,
    ) -> Vec<CastVote> {
        self.store
            .cast_votes_for_ballot(election_id, ballot_number)
            .await
    }

    pub fn set_active_election(&mut self, election_id: Option<ElectionId>) {
        self.writes.push(Write::ActiveElection(election_id));
    }

    pub fn put_election(&mut self, election: Election) {
        self.writes.push(Write::Election(election));
    }

    pub fn put_district(&mut self, district: District) {
        self.writes.push(Write::District(district));
    }

    pub fn put_position(&mut self, position: Position) {
        self.writes.push(Write::Position(position));
    }

    pub fn put_candidate(&mut self, candidate: Candidate) {
        self.writes.push(Write::Candidate(candidate));
    }

    pub fn put_delegate(&mut self, delegate: Delegate) {
        self.writes.push(Write::Delegate(delegate));
    }

    pub fn put_ballot(&mut self, ballot: Ballot) {
        self.writes.push(Write::Ballot(ballot));
    }

    /// Mark the election's configuration as changed
    pub fn touch_roster(&mut self, election_id: ElectionId) {
        self.writes.push(Write::TouchRoster(election_id));
    }

    /// Stage one cast-vote row
    pub fn insert_cast_vote(&mut self, vote: CastVote) -> Result<()> {
        let nth = self.cast_votes.len() + 1;
        let failed = self
            .store
            .trip_fault(|fault| fault == StoreFault::CastVoteInsert { nth })?;
        if failed {
            return Err(Error::write_failed(format!(
                "insert of vote {nth} for ballot {} was not acknowledged",
                vote.ballot_number
            )));
        }

        self.cast_votes.push(vote);
        Ok(())
    }

    pub fn append_audit(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
    }

    /// Validate the read set and apply everything atomically
    ///
    /// Returns the audit records appended by this transaction.
    pub async fn commit(self) -> Result<Vec<AuditRecord>> {
        let mut tables = self.store.tables.write().await;

        for (key, seen) in &self.reads {
            if tables.version(key) != *seen {
                return Err(Error::conflict(format!("{key} changed since it was read")));
            }
        }

        if self.store.trip_fault(|fault| fault == StoreFault::Conflict)? {
            return Err(Error::conflict("a row changed since it was read"));
        }
        if self.store.trip_fault(|fault| fault == StoreFault::Commit)? {
            return Err(Error::write_failed("commit was not acknowledged"));
        }

        let prepared = tables.audit.prepare(self.audit)?;
        let records = prepared.records().to_vec();

        for write in self.writes {
            tables.apply(write);
        }
        tables.cast_votes.extend(self.cast_votes);
        tables.audit.append(prepared);

        Ok(records)
    }
}
