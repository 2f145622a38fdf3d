//! Post-commit result notifications
//!
//! After a cast commits, the coordinator hands the election id to
//! [`ResultNotifier::publish_detached`], which computes the updated tally on
//! a spawned task and broadcasts it. The voter's response never waits on it,
//! and a failed publication is only logged.

use crate::engine::store::MemoryStore;
use crate::types::{CandidateTotal, ElectionId};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tally snapshot pushed to live result displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyUpdate {
    pub election_id: ElectionId,
    pub ballots_cast: u64,
    pub totals: Vec<CandidateTotal>,
    pub published_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct ResultNotifier {
    sender: broadcast::Sender<TallyUpdate>,
}

impl ResultNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TallyUpdate> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Compute and broadcast the election's tally on a detached task
    pub fn publish_detached(
        &self,
        store: Arc<MemoryStore>,
        election_id: ElectionId,
    ) -> JoinHandle<()> {
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let tally = store.tally(election_id).await;
            let update = TallyUpdate {
                election_id,
                ballots_cast: tally.ballots_cast,
                totals: tally.totals,
                published_at: Local::now(),
            };

            match sender.send(update) {
                Ok(receivers) => debug!(%election_id, receivers, "Published tally update"),
                Err(_) => warn!(%election_id, "Tally update dropped, no subscribers"),
            }
        })
    }
}
