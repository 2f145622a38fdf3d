//! Election lifecycle and vote-casting engine
//!
//! Pure rules (`lifecycle`, `ballot`, `delegate`, `validation`) operate on
//! plain records. `store`, `audit`, `coordinator`, `registry` and `notifier`
//! run them inside store transactions.

pub mod audit;
pub mod ballot;
pub mod clock;
pub mod coordinator;
pub mod delegate;
pub mod lifecycle;
pub mod notifier;
pub mod registry;
pub mod store;
pub mod validation;

pub use audit::{AuditAction, AuditEntry, AuditIntegrityReport, AuditQuery, AuditRecord};
pub use clock::{Clock, FixedClock, SystemClock};
pub use coordinator::{
    CastCandidate, CastRequest, CastResult, Coordinator, PositionGroup, ReprintResult,
};
pub use delegate::DelegateStatus;
pub use notifier::{ResultNotifier, TallyUpdate};
pub use registry::{ElectionRegistry, Registration};
pub use store::{MemoryStore, StoreFault, Transaction};
pub use validation::{CandidateProblem, Rejection, Selection, Verdict};

use crate::config::EngineConfig;
use crate::Result;
use std::sync::Arc;

/// Registry and coordinator sharing one store, notifier and clock
#[derive(Debug, Clone)]
pub struct ElectionEngine {
    pub registry: ElectionRegistry,
    pub coordinator: Coordinator,
}

impl ElectionEngine {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::new());
        let notifier = ResultNotifier::new(config.notifier_capacity);
        let registry = ElectionRegistry::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.ballot_prefix.clone(),
        );
        let coordinator = Coordinator::new(store, notifier, clock, config);

        Ok(Self {
            registry,
            coordinator,
        })
    }

    /// Engine on the system clock
    pub fn with_system_clock(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        self.registry.store()
    }
}
