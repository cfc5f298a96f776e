//! Server reconciliation
//!
//! When the authoritative snapshot for the predicted entity arrives the
//! predicted state is overwritten with it, the input history is rewound to the
//! sample the server last applied, and every newer sample is replayed through
//! the gameplay dispatch. Replay never sends input and its side effects are
//! discarded, so the live notifications raised at capture time are the only
//! ones the rest of the client sees.

use crate::{PredictionEngine, Rewind, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How a client leaves `waitResync` after its history lost the sample a
/// snapshot refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResyncPolicy {
    /// Wait for a snapshot that matches a sample with no buttons held. Input
    /// captured while waiting is sent quiet, so this happens once the server
    /// has caught up with the quiet period.
    #[default]
    QuietSample,
    /// Accept the first snapshot whose sample is still in the history
    NextSnapshot,
}

/// What a call to [`PredictionEngine::reconcile`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Older than or equal to an applied snapshot, or for another entity;
    /// nothing changed
    Stale,
    /// State overwritten and `replayed` newer samples re-applied
    Replayed { replayed: usize },
    /// The matching sample was overwritten; prediction is suspended
    Desync,
    /// Still waiting for a snapshot that confirms the quiet period
    AwaitingResync,
    /// A waiting client was confirmed and replayed `replayed` samples
    Resynced { replayed: usize },
}

impl PredictionEngine {
    /// Correct the prediction against an authoritative snapshot
    pub fn reconcile(&mut self, snapshot: &Snapshot) -> ReconcileOutcome {
        if snapshot.entity != self.entity {
            return ReconcileOutcome::Stale;
        }
        if self
            .last_snapshot
            .is_some_and(|last| snapshot.timestamp <= last)
        {
            return ReconcileOutcome::Stale;
        }
        self.last_snapshot = Some(snapshot.timestamp);

        snapshot.apply_to(&mut self.state);

        let confirmed = match self.history.rewind_to(snapshot.timestamp) {
            Rewind::Lost => {
                if !self.wait_resync {
                    warn!(
                        entity = %self.entity,
                        snapshot = snapshot.timestamp,
                        newest = ?self.history.newest_timestamp(),
                        "reconciliation lost the acknowledged input, waiting for resync"
                    );
                }
                self.wait_resync = true;
                // Nothing retained can be trusted against this snapshot
                self.history.drain();
                return ReconcileOutcome::Desync;
            }
            Rewind::Found(_) => self.history.last_consumed().map_or(true, |s| s.is_quiet()),
            Rewind::BeforeFirst(_) => true,
        };

        if self.wait_resync {
            let accept = match self.policy {
                ResyncPolicy::QuietSample => confirmed,
                ResyncPolicy::NextSnapshot => true,
            };
            if !accept {
                self.history.drain();
                return ReconcileOutcome::AwaitingResync;
            }
            self.wait_resync = false;
            let replayed = self.replay();
            debug!(entity = %self.entity, replayed, "resynced with server");
            return ReconcileOutcome::Resynced { replayed };
        }

        ReconcileOutcome::Replayed {
            replayed: self.replay(),
        }
    }

    /// Re-apply every unread sample, dropping side effects
    fn replay(&mut self) -> usize {
        let samples = self.history.drain();
        for sample in &samples {
            let _ = self.apply(sample);
        }
        samples.len()
    }
}
