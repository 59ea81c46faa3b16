//! Background runs: one worker thread per reconciliation, progress over a
//! channel, cancellation through a shared flag.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use crate::config::MatchConfiguration;
use crate::engine::{panic_message, ReconciliationEngine};
use crate::error::{ConfigError, ReconError};
use crate::model::{Phase, ProgressEvent, RunOutcome};
use crate::progress::{cancel_token, CancelToken};
use crate::store::RecordStore;

/// Validate on the calling thread, then run on a dedicated worker thread.
/// Configuration errors are returned before any thread is spawned.
pub fn start(store: RecordStore, config: MatchConfiguration) -> Result<ReconHandle, ConfigError> {
    let engine = ReconciliationEngine::new(store, config)?;
    Ok(spawn(engine, cancel_token()))
}

fn spawn(engine: ReconciliationEngine, cancel: CancelToken) -> ReconHandle {
    let (tx, rx) = mpsc::channel();
    let engine = engine.with_progress(tx).with_cancel_token(cancel.clone());
    let join = thread::spawn(move || engine.run());
    ReconHandle {
        cancel,
        progress: rx,
        join: Some(join),
    }
}

/// Caller's side of a background run.
pub struct ReconHandle {
    cancel: CancelToken,
    progress: Receiver<ProgressEvent>,
    join: Option<JoinHandle<Result<RunOutcome, ReconError>>>,
}

impl ReconHandle {
    /// Ask the worker to stop. Observed at the next batch boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Progress events, in emission order. The channel closes when the run ends.
    pub fn progress(&self) -> &Receiver<ProgressEvent> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the worker finishes and return its outcome.
    pub fn result(mut self) -> Result<RunOutcome, ReconError> {
        let Some(join) = self.join.take() else {
            return Err(ReconError::Internal {
                phase: Phase::Finalize,
                message: "result already taken".into(),
            });
        };
        join.join().unwrap_or_else(|payload| {
            Err(ReconError::Internal {
                phase: Phase::Finalize,
                message: panic_message(payload.as_ref()),
            })
        })
    }
}

impl Drop for ReconHandle {
    fn drop(&mut self) {
        // An abandoned run stops at its next batch boundary instead of running on.
        if self.join.is_some() {
            self.cancel();
        }
    }
}

impl std::fmt::Debug for ReconHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconHandle")
            .field("cancelled", &self.cancel.load(Ordering::Relaxed))
            .field("finished", &self.is_finished())
            .finish()
    }
}
