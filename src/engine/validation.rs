//! Vote validation policy
//!
//! A stateless rule-checker that turns the records loaded for a cast into a
//! single accept/reject decision. Rules run in a fixed order and stop at the
//! first failure:
//!
//! 1. the election exists and is `Started`
//! 2. the delegate exists and has not voted
//! 3. the ballot exists and is `issued`
//! 4. an empty selection is accepted as a deliberate abstention
//! 5. every candidate exists, belongs to the election and is not archived
//! 6. no position receives more selections than its `max_candidates`
//!
//! State checks come before data checks so a delegate who already voted
//! never sees candidate-level errors.

use crate::errors::ErrorKind;
use crate::types::{
    Ballot, BallotStatus, Candidate, CandidateId, Delegate, Election, Phase, Position, PositionId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// A requested candidate together with the record it resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub candidate_id: CandidateId,
    pub candidate: Option<Candidate>,
}

/// Why a candidate cannot be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateProblem {
    Unknown,
    OtherElection,
    Archived,
    UnknownPosition,
}

impl fmt::Display for CandidateProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CandidateProblem::Unknown => "no such candidate",
            CandidateProblem::OtherElection => "candidate belongs to a different election",
            CandidateProblem::Archived => "candidate has been withdrawn",
            CandidateProblem::UnknownPosition => "candidate's position is not on this ballot",
        };
        f.write_str(text)
    }
}

/// Stable, poll-worker readable reasons for refusing a cast
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    #[error("The active election could not be found")]
    ElectionUnavailable,

    #[error("{}", not_votable_message(.0))]
    NotVotable(Phase),

    #[error("No delegate with control number {control_number} is registered for this election")]
    UnknownDelegate { control_number: String },

    #[error("Delegate has already voted in this election")]
    AlreadyVoted,

    #[error("{}", ballot_state_message(.status))]
    InvalidBallotState { status: Option<BallotStatus> },

    #[error("Candidate {candidate_id} cannot be selected: {problem}")]
    InvalidCandidate {
        candidate_id: CandidateId,
        problem: CandidateProblem,
    },

    #[error("Candidate {candidate_id} was selected more than once")]
    DuplicateSelection { candidate_id: CandidateId },

    #[error(
        "Too many candidates selected for {position}: at most {limit} allowed, {selected} selected"
    )]
    PositionLimitExceeded {
        position: String,
        limit: u32,
        selected: usize,
    },
}

fn not_votable_message(phase: &Phase) -> &'static str {
    match phase {
        Phase::Scheduled => "Voting has not started for this election",
        Phase::Closed => "Voting has closed for this election",
        Phase::Cancelled => "This election has been cancelled",
        Phase::Started => "This election is not accepting votes",
    }
}

fn ballot_state_message(status: &Option<BallotStatus>) -> &'static str {
    match status {
        None => "Delegate has no ballot issued for this election",
        Some(BallotStatus::Submitted) => "Ballot has already been submitted",
        Some(BallotStatus::Issued) => "Ballot is not in a submittable state",
    }
}

impl Rejection {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Rejection::ElectionUnavailable | Rejection::UnknownDelegate { .. } => {
                ErrorKind::NotFound
            }
            Rejection::NotVotable(_)
            | Rejection::AlreadyVoted
            | Rejection::InvalidBallotState { .. } => ErrorKind::InvalidState,
            Rejection::InvalidCandidate { .. } | Rejection::DuplicateSelection { .. } => {
                ErrorKind::InvalidInput
            }
            Rejection::PositionLimitExceeded { .. } => ErrorKind::LimitExceeded,
        }
    }
}

/// Outcome of [`validate`]
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Verdict::Accept => Ok(()),
            Verdict::Reject(rejection) => Err(rejection),
        }
    }
}

/// Decide whether a cast may proceed
///
/// `control_number` is only used to word the unknown-delegate rejection.
pub fn validate(
    election: Option<&Election>,
    control_number: &str,
    delegate: Option<&Delegate>,
    ballot: Option<&Ballot>,
    selections: &[Selection],
    positions: &HashMap<PositionId, Position>,
) -> Verdict {
    match check(election, control_number, delegate, ballot, selections, positions) {
        Ok(()) => Verdict::Accept,
        Err(rejection) => Verdict::Reject(rejection),
    }
}

fn check(
    election: Option<&Election>,
    control_number: &str,
    delegate: Option<&Delegate>,
    ballot: Option<&Ballot>,
    selections: &[Selection],
    positions: &HashMap<PositionId, Position>,
) -> Result<(), Rejection> {
    let election = election.ok_or(Rejection::ElectionUnavailable)?;
    if !election.accepts_votes() {
        return Err(Rejection::NotVotable(election.phase));
    }

    let delegate = delegate
        .filter(|d| d.election_id == election.id && !d.is_archived())
        .ok_or_else(|| Rejection::UnknownDelegate {
            control_number: control_number.to_string(),
        })?;
    if delegate.has_voted {
        return Err(Rejection::AlreadyVoted);
    }

    let ballot = ballot
        .filter(|b| b.delegate_id == delegate.id && b.election_id == election.id)
        .ok_or(Rejection::InvalidBallotState { status: None })?;
    if ballot.status != BallotStatus::Issued {
        return Err(Rejection::InvalidBallotState {
            status: Some(ballot.status),
        });
    }

    if selections.is_empty() {
        return Ok(());
    }

    let mut seen = HashSet::with_capacity(selections.len());
    let mut per_position: BTreeMap<PositionId, usize> = BTreeMap::new();

    for selection in selections {
        if !seen.insert(selection.candidate_id) {
            return Err(Rejection::DuplicateSelection {
                candidate_id: selection.candidate_id,
            });
        }

        let invalid = |problem| Rejection::InvalidCandidate {
            candidate_id: selection.candidate_id,
            problem,
        };

        let candidate = selection
            .candidate
            .as_ref()
            .filter(|c| c.id == selection.candidate_id)
            .ok_or_else(|| invalid(CandidateProblem::Unknown))?;
        if candidate.election_id != election.id {
            return Err(invalid(CandidateProblem::OtherElection));
        }
        if candidate.is_archived() {
            return Err(invalid(CandidateProblem::Archived));
        }
        match positions.get(&candidate.position_id) {
            Some(position) if position.election_id == election.id => {}
            _ => return Err(invalid(CandidateProblem::UnknownPosition)),
        }

        *per_position.entry(candidate.position_id).or_default() += 1;
    }

    for (position_id, selected) in per_position {
        // Presence checked in the loop above
        let Some(position) = positions.get(&position_id) else {
            continue;
        };
        if selected > position.max_candidates as usize {
            return Err(Rejection::PositionLimitExceeded {
                position: position.title.clone(),
                limit: position.max_candidates,
                selected,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ballot;
    use crate::types::{Archive, NewElection};
    use chrono::Local;
    use uuid::Uuid;

    struct Scenario {
        election: Election,
        delegate: Delegate,
        ballot: Ballot,
        positions: HashMap<PositionId, Position>,
        candidates: Vec<Candidate>,
    }

    impl Scenario {
        fn new() -> Self {
            let mut election = Election::new(
                NewElection {
                    name: "Convention".to_string(),
                    description: None,
                    date: Local::now().date_naive(),
                    address: "Hall".to_string(),
                    capacity: 50,
                },
                Local::now(),
            );
            election.phase = Phase::Started;

            let delegate = Delegate {
                id: Uuid::new_v4(),
                election_id: election.id,
                control_number: "A100".to_string(),
                display_name: "Dana Reyes".to_string(),
                has_voted: false,
                archived: None,
            };
            let ballot = ballot::issue(election.id, delegate.id, "B-42".to_string(), Local::now());

            let mut positions = HashMap::new();
            for (id, title, max) in [(1, "Chair", 1), (2, "Board", 2)] {
                positions.insert(
                    id,
                    Position {
                        id,
                        election_id: election.id,
                        title: title.to_string(),
                        max_candidates: max,
                        term_limit: "2 years".to_string(),
                    },
                );
            }

            let candidates = [(7, 1), (8, 1), (9, 2), (10, 2), (11, 2)]
                .into_iter()
                .map(|(id, position_id)| Candidate {
                    id,
                    election_id: election.id,
                    position_id,
                    district_id: 1,
                    display_name: format!("Candidate {id}"),
                    archived: None,
                })
                .collect();

            Self {
                election,
                delegate,
                ballot,
                positions,
                candidates,
            }
        }

        fn select(&self, ids: &[CandidateId]) -> Vec<Selection> {
            ids.iter()
                .map(|id| Selection {
                    candidate_id: *id,
                    candidate: self.candidates.iter().find(|c| c.id == *id).cloned(),
                })
                .collect()
        }

        fn run(&self, selections: &[Selection]) -> Verdict {
            validate(
                Some(&self.election),
                &self.delegate.control_number,
                Some(&self.delegate),
                Some(&self.ballot),
                selections,
                &self.positions,
            )
        }
    }

    #[test]
    fn test_accepts_valid_selection() {
        let scenario = Scenario::new();
        assert!(scenario.run(&scenario.select(&[7, 9, 10])).is_accept());
    }

    #[test]
    fn test_accepts_empty_ballot() {
        let scenario = Scenario::new();
        assert_eq!(scenario.run(&[]), Verdict::Accept);
    }

    #[test]
    fn test_verdict_into_result() {
        let scenario = Scenario::new();
        assert_eq!(scenario.run(&[]).into_result(), Ok(()));

        let mut scenario = Scenario::new();
        scenario.delegate.has_voted = true;
        assert_eq!(scenario.run(&[]).into_result(), Err(Rejection::AlreadyVoted));
    }

    #[test]
    fn test_phase_gating_has_distinct_messages() {
        let mut messages = HashSet::new();
        for phase in [Phase::Scheduled, Phase::Closed, Phase::Cancelled] {
            let mut scenario = Scenario::new();
            scenario.election.phase = phase;
            let verdict = scenario.run(&scenario.select(&[7]));
            assert_eq!(verdict, Verdict::Reject(Rejection::NotVotable(phase)));
            if let Verdict::Reject(rejection) = verdict {
                messages.insert(rejection.to_string());
            }
        }
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_missing_election_rejected() {
        let scenario = Scenario::new();
        let verdict = validate(
            None,
            "A100",
            Some(&scenario.delegate),
            Some(&scenario.ballot),
            &[],
            &scenario.positions,
        );
        assert_eq!(verdict, Verdict::Reject(Rejection::ElectionUnavailable));
    }

    #[test]
    fn test_state_checks_precede_candidate_checks() {
        let mut scenario = Scenario::new();
        scenario.delegate.has_voted = true;

        // Unknown candidate and over-limit selections are hidden behind AlreadyVoted
        let verdict = scenario.run(&scenario.select(&[7, 8, 999]));
        assert_eq!(verdict, Verdict::Reject(Rejection::AlreadyVoted));
    }

    #[test]
    fn test_unknown_or_archived_delegate() {
        let scenario = Scenario::new();
        let verdict = validate(
            Some(&scenario.election),
            "Z999",
            None,
            None,
            &[],
            &scenario.positions,
        );
        assert_eq!(
            verdict,
            Verdict::Reject(Rejection::UnknownDelegate {
                control_number: "Z999".to_string()
            })
        );

        let mut archived = Scenario::new();
        archived.delegate.archived = Some(Archive {
            at: Local::now(),
            by: "admin".to_string(),
        });
        assert!(matches!(
            archived.run(&[]),
            Verdict::Reject(Rejection::UnknownDelegate { .. })
        ));
    }

    #[test]
    fn test_ballot_state() {
        let scenario = Scenario::new();
        let no_ballot = validate(
            Some(&scenario.election),
            "A100",
            Some(&scenario.delegate),
            None,
            &[],
            &scenario.positions,
        );
        assert_eq!(
            no_ballot,
            Verdict::Reject(Rejection::InvalidBallotState { status: None })
        );

        let mut submitted = Scenario::new();
        submitted.ballot.status = BallotStatus::Submitted;
        assert_eq!(
            submitted.run(&[]),
            Verdict::Reject(Rejection::InvalidBallotState {
                status: Some(BallotStatus::Submitted)
            })
        );
    }

    #[test]
    fn test_invalid_candidates() {
        let scenario = Scenario::new();
        assert_eq!(
            scenario.run(&scenario.select(&[999])),
            Verdict::Reject(Rejection::InvalidCandidate {
                candidate_id: 999,
                problem: CandidateProblem::Unknown
            })
        );

        let mut foreign = Scenario::new();
        foreign.candidates[0].election_id = Uuid::new_v4();
        assert_eq!(
            foreign.run(&foreign.select(&[7])),
            Verdict::Reject(Rejection::InvalidCandidate {
                candidate_id: 7,
                problem: CandidateProblem::OtherElection
            })
        );

        let mut withdrawn = Scenario::new();
        withdrawn.candidates[0].archived = Some(Archive {
            at: Local::now(),
            by: "admin".to_string(),
        });
        assert_eq!(
            withdrawn.run(&withdrawn.select(&[7])),
            Verdict::Reject(Rejection::InvalidCandidate {
                candidate_id: 7,
                problem: CandidateProblem::Archived
            })
        );

        let mut orphan = Scenario::new();
        orphan.positions.remove(&2);
        assert_eq!(
            orphan.run(&orphan.select(&[9])),
            Verdict::Reject(Rejection::InvalidCandidate {
                candidate_id: 9,
                problem: CandidateProblem::UnknownPosition
            })
        );
    }

    #[test]
    fn test_duplicate_selection() {
        let scenario = Scenario::new();
        assert_eq!(
            scenario.run(&scenario.select(&[9, 9])),
            Verdict::Reject(Rejection::DuplicateSelection { candidate_id: 9 })
        );
    }

    #[test]
    fn test_position_ceiling() {
        let scenario = Scenario::new();

        // Board allows exactly two
        assert!(scenario.run(&scenario.select(&[9, 10])).is_accept());

        let verdict = scenario.run(&scenario.select(&[9, 10, 11]));
        assert_eq!(
            verdict,
            Verdict::Reject(Rejection::PositionLimitExceeded {
                position: "Board".to_string(),
                limit: 2,
                selected: 3
            })
        );
        if let Verdict::Reject(rejection) = verdict {
            assert_eq!(rejection.kind(), ErrorKind::LimitExceeded);
            assert!(rejection.to_string().contains("at most 2"));
        }

        assert!(matches!(
            scenario.run(&scenario.select(&[7, 8])),
            Verdict::Reject(Rejection::PositionLimitExceeded { limit: 1, .. })
        ));
    }
}
