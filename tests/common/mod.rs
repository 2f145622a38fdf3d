//! Shared setup for the engine integration tests

#![allow(dead_code)]

use chrono::Local;
use election_engine::config::EngineConfig;
use election_engine::engine::{CastRequest, Clock, ElectionEngine, FixedClock};
use election_engine::types::{Candidate, CandidateId, District, Election, NewElection, Position};
use election_engine::Result;
use std::sync::Arc;

pub const ADMIN: &str = "admin";
pub const STATION: &str = "station-1";
pub const PRECINCT: &str = "P1";

/// A configured election: one district, "Chair" (max 1) with two candidates
/// and "Council" (max 2) with three candidates
pub struct Fixture {
    pub engine: ElectionEngine,
    pub clock: Arc<FixedClock>,
    pub election: Election,
    pub district: District,
    pub chair: Position,
    pub council: Position,
    pub chair_candidates: Vec<Candidate>,
    pub council_candidates: Vec<Candidate>,
}

impl Fixture {
    /// Configured, active and still scheduled
    pub async fn scheduled(control_numbers: &[&str]) -> Result<Self> {
        Self::with_config(EngineConfig::for_testing(), control_numbers).await
    }

    /// Configured, active and started
    pub async fn started(control_numbers: &[&str]) -> Result<Self> {
        let fixture = Self::scheduled(control_numbers).await?;
        fixture.engine.coordinator.start_election(ADMIN).await?;
        Ok(fixture)
    }

    pub async fn with_config(config: EngineConfig, control_numbers: &[&str]) -> Result<Self> {
        let clock = Arc::new(FixedClock::at(Local::now()));
        let engine = ElectionEngine::new(config, clock.clone())?;
        let registry = &engine.registry;

        let election = registry
            .create_election(
                NewElection {
                    name: "Annual Convention".to_string(),
                    description: Some("Officer elections".to_string()),
                    date: clock.today(),
                    address: "Main Hall".to_string(),
                    capacity: 500,
                },
                ADMIN,
            )
            .await?;
        registry.set_active(election.id, ADMIN).await?;

        let district = registry.add_district(election.id, "North", ADMIN).await?;
        let chair = registry
            .add_position(election.id, "Chair", 1, "2 years", ADMIN)
            .await?;
        let council = registry
            .add_position(election.id, "Council", 2, "1 year", ADMIN)
            .await?;

        let mut chair_candidates = Vec::new();
        for name in ["Alex Kim", "Morgan Lee"] {
            chair_candidates.push(
                registry
                    .add_candidate(election.id, chair.id, district.id, name, ADMIN)
                    .await?,
            );
        }
        let mut council_candidates = Vec::new();
        for name in ["Sam Ortiz", "Jordan Wu", "Riley Park"] {
            council_candidates.push(
                registry
                    .add_candidate(election.id, council.id, district.id, name, ADMIN)
                    .await?,
            );
        }

        for (i, control_number) in control_numbers.iter().enumerate() {
            registry
                .register_delegate(election.id, control_number, &format!("Delegate {i}"), ADMIN)
                .await?;
        }

        Ok(Self {
            engine,
            clock,
            election,
            district,
            chair,
            council,
            chair_candidates,
            council_candidates,
        })
    }

    pub fn chair_id(&self, index: usize) -> CandidateId {
        self.chair_candidates[index].id
    }

    pub fn council_id(&self, index: usize) -> CandidateId {
        self.council_candidates[index].id
    }

    pub fn request(&self, control_number: &str, selections: Vec<CandidateId>) -> CastRequest {
        CastRequest::new(control_number, selections, PRECINCT)
    }
}
