//! Tamper-evident audit log
//!
//! Every business write appends one or more audit records in the same
//! transaction as the write itself. Records form a hash chain:
//!
//! - each record stores a Blake3 hash of its entry (`content_hash`)
//! - each record stores the hash of the full previous record
//! - [`AuditLog::verify_integrity`] walks the chain and reports breaks
//!
//! Entries are staged with [`AuditLog::prepare`], which does not mutate the
//! log, and appended with [`AuditLog::append`] once the rest of the commit is
//! known to succeed.

use crate::types::Hash;
use crate::{Result, internal_error};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ElectionCreated,
    ActiveElectionSelected,
    ElectionStarted,
    ElectionClosed,
    ElectionCancelled,
    ElectionArchived,
    ElectionRestored,
    ConfigurationChanged,
    VoteCast,
    EmptyBallotCast,
    BallotReprinted,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AuditAction::ElectionCreated => "election_created",
            AuditAction::ActiveElectionSelected => "active_election_selected",
            AuditAction::ElectionStarted => "election_started",
            AuditAction::ElectionClosed => "election_closed",
            AuditAction::ElectionCancelled => "election_cancelled",
            AuditAction::ElectionArchived => "election_archived",
            AuditAction::ElectionRestored => "election_restored",
            AuditAction::ConfigurationChanged => "configuration_changed",
            AuditAction::VoteCast => "vote_cast",
            AuditAction::EmptyBallotCast => "empty_ballot_cast",
            AuditAction::BallotReprinted => "ballot_reprinted",
        };
        f.write_str(text)
    }
}

/// One audit write as submitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,

    /// Entity reference such as `election:<id>` or `ballot:B-42`
    pub entity: String,

    pub details: String,

    /// Label of the acting operator or station
    pub actor: String,

    pub timestamp: DateTime<Local>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        entity: impl Into<String>,
        details: impl Into<String>,
        actor: &str,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            action,
            entity: entity.into(),
            details: details.into(),
            actor: actor.to_string(),
            timestamp,
        }
    }
}

/// A chained, integrity-protected audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,

    /// Position in the log, starting at 1
    pub sequence_number: u64,

    /// Hash of the previous record, `None` for the first one
    pub previous_hash: Option<Hash>,

    /// Hash of `entry`
    pub content_hash: Hash,

    pub entry: AuditEntry,
}

impl AuditRecord {
    pub fn new(
        sequence_number: u64,
        previous_hash: Option<Hash>,
        entry: AuditEntry,
    ) -> Result<Self> {
        let content_hash = hash_entry(&entry)?;

        Ok(Self {
            record_id: Uuid::new_v4(),
            sequence_number,
            previous_hash,
            content_hash,
            entry,
        })
    }

    /// Hash of this entire record, used as the next record's `previous_hash`
    pub fn calculate_record_hash(&self) -> Result<Hash> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| internal_error!("Failed to serialize audit record: {}", e))?;
        Ok(blake3::hash(&bytes).into())
    }

    /// Recompute the content hash and compare in constant time
    pub fn verify_integrity(&self) -> Result<bool> {
        let expected = hash_entry(&self.entry)?;
        Ok(self.content_hash[..].ct_eq(&expected[..]).into())
    }

    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

fn hash_entry(entry: &AuditEntry) -> Result<Hash> {
    let bytes = serde_json::to_vec(entry)
        .map_err(|e| internal_error!("Failed to serialize audit entry: {}", e))?;
    Ok(blake3::hash(&bytes).into())
}

/// Filter for [`AuditLog::query`]
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    /// Exact entity reference
    pub entity: Option<String>,
    pub actor: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn action(action: AuditAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(action) = self.action {
            if record.entry.action != action {
                return false;
            }
        }
        if let Some(ref entity) = self.entity {
            if &record.entry.entity != entity {
                return false;
            }
        }
        if let Some(ref actor) = self.actor {
            if &record.entry.actor != actor {
                return false;
            }
        }
        true
    }
}

/// Types of integrity violations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntegrityViolationType {
    ContentHashMismatch,
    HashChainBroken,
    SequenceNumberGap,
}

/// Audit integrity violation details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditIntegrityViolation {
    pub record_id: Uuid,
    pub sequence_number: u64,
    pub violation_type: IntegrityViolationType,
}

/// Audit integrity verification report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditIntegrityReport {
    pub total_records_checked: usize,
    pub violations: Vec<AuditIntegrityViolation>,
    pub hash_chain_valid: bool,
}

/// Records staged by [`AuditLog::prepare`]
#[derive(Debug, Clone)]
pub struct PreparedAudit {
    base_len: usize,
    tail_hash: Option<Hash>,
    records: Vec<AuditRecord>,
}

impl PreparedAudit {
    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }
}

/// Append-only audit log
#[derive(Debug, Default, Clone)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
    last_hash: Option<Hash>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build chained records for `entries` without appending them
    pub fn prepare(&self, entries: Vec<AuditEntry>) -> Result<PreparedAudit> {
        let mut previous_hash = self.last_hash;
        let mut next_sequence = self.records.len() as u64 + 1;
        let mut records = Vec::with_capacity(entries.len());

        for entry in entries {
            let record = AuditRecord::new(next_sequence, previous_hash, entry)?;
            previous_hash = Some(record.calculate_record_hash()?);
            next_sequence += 1;
            records.push(record);
        }

        Ok(PreparedAudit {
            base_len: self.records.len(),
            tail_hash: previous_hash,
            records,
        })
    }

    /// Whether `prepared` was built against the current tail
    pub fn extends_tail(&self, prepared: &PreparedAudit) -> bool {
        prepared.base_len == self.records.len()
    }

    /// Append staged records; callers check [`AuditLog::extends_tail`] first
    pub fn append(&mut self, prepared: PreparedAudit) {
        debug_assert!(self.extends_tail(&prepared));
        if prepared.records.is_empty() {
            return;
        }
        self.last_hash = prepared.tail_hash;
        self.records.extend(prepared.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        let matching = self.records.iter().filter(|r| query.matches(r)).cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Walk the chain and report every violation found
    pub fn verify_integrity(&self) -> Result<AuditIntegrityReport> {
        let mut report = AuditIntegrityReport {
            total_records_checked: 0,
            violations: Vec::new(),
            hash_chain_valid: true,
        };

        let mut previous_hash: Option<Hash> = None;

        for (index, record) in self.records.iter().enumerate() {
            report.total_records_checked += 1;

            let mut flag = |violation_type| {
                report.violations.push(AuditIntegrityViolation {
                    record_id: record.record_id,
                    sequence_number: record.sequence_number,
                    violation_type,
                });
            };

            if !record.verify_integrity()? {
                flag(IntegrityViolationType::ContentHashMismatch);
            }
            if record.previous_hash != previous_hash {
                flag(IntegrityViolationType::HashChainBroken);
            }
            if record.sequence_number != index as u64 + 1 {
                flag(IntegrityViolationType::SequenceNumberGap);
            }

            previous_hash = Some(record.calculate_record_hash()?);
        }

        report.hash_chain_valid = report.violations.is_empty();
        Ok(report)
    }

    #[cfg(test)]
    pub(crate) fn records_mut(&mut self) -> &mut Vec<AuditRecord> {
        &mut self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: AuditAction, entity: &str, actor: &str) -> AuditEntry {
        AuditEntry::new(action, entity, "details", actor, Local::now())
    }

    #[test]
    fn test_audit_record_creation_and_integrity() {
        let vote = entry(AuditAction::VoteCast, "ballot:B-1", "station-1");
        let record = AuditRecord::new(1, None, vote).unwrap();

        assert_eq!(record.sequence_number, 1);
        assert_eq!(record.previous_hash, None);
        assert!(record.verify_integrity().unwrap());
        assert_eq!(record.content_hash_hex().len(), 64);
    }

    #[test]
    fn test_audit_log_hash_chain() {
        let mut log = AuditLog::new();
        let prepared = log
            .prepare(vec![
                entry(AuditAction::ElectionStarted, "election:1", "admin"),
                entry(AuditAction::VoteCast, "ballot:B-1", "station-1"),
            ])
            .unwrap();

        // Staging leaves the log untouched
        assert!(log.is_empty());
        assert_eq!(prepared.records().len(), 2);

        log.append(prepared);
        assert_eq!(log.len(), 2);

        let records = log.records();
        assert_eq!(records[0].sequence_number, 1);
        assert_eq!(records[1].sequence_number, 2);
        assert_eq!(
            records[1].previous_hash,
            Some(records[0].calculate_record_hash().unwrap())
        );

        let report = log.verify_integrity().unwrap();
        assert!(report.hash_chain_valid);
        assert_eq!(report.total_records_checked, 2);
    }

    #[test]
    fn test_stale_preparation_is_detected() {
        let mut log = AuditLog::new();
        let first = log.prepare(vec![entry(AuditAction::VoteCast, "ballot:B-1", "s1")]).unwrap();
        let second = log.prepare(vec![entry(AuditAction::VoteCast, "ballot:B-2", "s2")]).unwrap();

        assert!(log.extends_tail(&first));
        log.append(first);
        assert!(!log.extends_tail(&second));

        let rebuilt = log.prepare(vec![entry(AuditAction::VoteCast, "ballot:B-2", "s2")]).unwrap();
        log.append(rebuilt);
        assert!(log.verify_integrity().unwrap().hash_chain_valid);
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut log = AuditLog::new();
        let prepared = log
            .prepare(vec![
                entry(AuditAction::VoteCast, "ballot:B-1", "s1"),
                entry(AuditAction::VoteCast, "ballot:B-2", "s1"),
            ])
            .unwrap();
        log.append(prepared);

        log.records_mut()[0].entry.details = "rewritten".to_string();

        let report = log.verify_integrity().unwrap();
        assert!(!report.hash_chain_valid);
        assert!(report
            .violations
            .iter()
            .any(|v| v.violation_type == IntegrityViolationType::ContentHashMismatch));
        assert!(report
            .violations
            .iter()
            .any(|v| v.violation_type == IntegrityViolationType::HashChainBroken));
    }

    #[test]
    fn test_query_filters() {
        let mut log = AuditLog::new();
        let prepared = log
            .prepare(vec![
                entry(AuditAction::VoteCast, "ballot:B-1", "s1"),
                entry(AuditAction::VoteCast, "ballot:B-1", "s1"),
                entry(AuditAction::EmptyBallotCast, "ballot:B-2", "s2"),
                entry(AuditAction::BallotReprinted, "ballot:B-1", "s2"),
            ])
            .unwrap();
        log.append(prepared);

        assert_eq!(log.query(&AuditQuery::action(AuditAction::VoteCast)).len(), 2);

        let by_entity = AuditQuery {
            entity: Some("ballot:B-1".to_string()),
            ..Default::default()
        };
        assert_eq!(log.query(&by_entity).len(), 3);

        let by_actor_limited = AuditQuery {
            actor: Some("s2".to_string()),
            limit: Some(1),
            ..Default::default()
        };
        let results = log.query(&by_actor_limited);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.action, AuditAction::EmptyBallotCast);
    }
}
