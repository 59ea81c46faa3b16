//! Batched progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use crate::model::{Phase, ProgressEvent};

/// Shared flag a caller sets to stop a running reconciliation.
pub type CancelToken = Arc<AtomicBool>;

pub fn cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

/// Marker returned up the phase stack once cancellation has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;

pub(crate) struct Reporter {
    sender: Option<Sender<ProgressEvent>>,
    cancel: CancelToken,
    batch: usize,
}

impl Reporter {
    pub fn new(sender: Option<Sender<ProgressEvent>>, cancel: CancelToken, batch: usize) -> Self {
        Self {
            sender,
            cancel,
            batch: batch.max(1),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Open a phase. Fails fast if cancellation was requested before it started.
    pub fn begin(&self, phase: Phase, total: usize) -> Result<PhaseProgress<'_>, Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        let mut progress = PhaseProgress {
            reporter: self,
            phase,
            total,
            processed: 0,
            last_sent: None,
            started: Instant::now(),
        };
        progress.emit();
        Ok(progress)
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            // A dropped receiver just means nobody is watching.
            let _ = sender.send(event);
        }
    }
}

pub(crate) struct PhaseProgress<'a> {
    reporter: &'a Reporter,
    phase: Phase,
    total: usize,
    processed: usize,
    last_sent: Option<usize>,
    started: Instant,
}

impl PhaseProgress<'_> {
    /// Count one processed record. Every `batch` records an event goes out and
    /// the cancellation flag is checked.
    pub fn step(&mut self) -> Result<(), Cancelled> {
        self.processed += 1;
        if self.processed % self.reporter.batch == 0 {
            self.emit();
            if self.reporter.is_cancelled() {
                return Err(Cancelled);
            }
        }
        Ok(())
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Close the phase with a final 100% event.
    pub fn finish(mut self) {
        self.processed = self.total;
        self.emit();
    }

    fn emit(&mut self) {
        if self.last_sent == Some(self.processed) {
            return;
        }
        self.last_sent = Some(self.processed);

        let percent_complete = if self.total == 0 {
            100.0
        } else {
            (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
        };
        let secs = self.started.elapsed().as_secs_f64();
        let throughput = if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        };
        self.reporter.send(ProgressEvent {
            phase: self.phase,
            processed: self.processed,
            total: self.total,
            percent_complete,
            throughput,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn events_are_batched() {
        let (tx, rx) = mpsc::channel();
        let reporter = Reporter::new(Some(tx), cancel_token(), 2);
        let mut progress = reporter.begin(Phase::ExactFuzzy, 5).unwrap();
        for _ in 0..5 {
            progress.step().unwrap();
        }
        progress.finish();
        drop(reporter);

        let processed: Vec<usize> = rx.iter().map(|e| e.processed).collect();
        assert_eq!(processed, vec![0, 2, 4, 5]);
    }

    #[test]
    fn finish_does_not_repeat_last_event() {
        let (tx, rx) = mpsc::channel();
        let reporter = Reporter::new(Some(tx), cancel_token(), 2);
        let mut progress = reporter.begin(Phase::ForeignCredit, 2).unwrap();
        progress.step().unwrap();
        progress.step().unwrap();
        progress.finish();
        drop(reporter);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].percent_complete, 100.0);
    }

    #[test]
    fn empty_phase_reports_complete() {
        let (tx, rx) = mpsc::channel();
        let reporter = Reporter::new(Some(tx), cancel_token(), 10);
        reporter.begin(Phase::SplitLedgerAnchor, 0).unwrap().finish();
        drop(reporter);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].percent_complete, 100.0);
    }

    #[test]
    fn cancellation_seen_at_batch_boundary() {
        let token = cancel_token();
        let reporter = Reporter::new(None, token.clone(), 3);
        let mut progress = reporter.begin(Phase::ExactFuzzy, 10).unwrap();
        token.store(true, Ordering::Relaxed);
        assert!(progress.step().is_ok());
        assert!(progress.step().is_ok());
        assert_eq!(progress.step(), Err(Cancelled));
        assert_eq!(progress.processed(), 3);
    }

    #[test]
    fn cancelled_before_begin() {
        let token = cancel_token();
        token.store(true, Ordering::Relaxed);
        let reporter = Reporter::new(None, token, 1);
        assert!(reporter.begin(Phase::ExactFuzzy, 1).is_err());
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let reporter = Reporter::new(Some(tx), cancel_token(), 1);
        let mut progress = reporter.begin(Phase::ExactFuzzy, 1).unwrap();
        assert!(progress.step().is_ok());
    }
}
