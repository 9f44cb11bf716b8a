use crate::domains::export::types::{ExportError, ExportFormat, ExportResult};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;

/// Point-in-time progress of one export, emitted after every page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub format: ExportFormat,
    /// Page that was just written
    pub page: u32,
    /// Expected total as supplied by the caller, possibly an estimate
    pub total: u64,
    pub processed: u64,
    /// 0..=100, saturating
    pub percentage: u8,
    /// False when the caller supplied no total
    pub total_known: bool,
    pub elapsed: Duration,
    /// `None` until the first row has been processed or when the total is unknown
    pub remaining: Option<Duration>,
    pub message: String,
}

impl ProgressSnapshot {
    /// Compute percentage and remaining time from raw counts.
    ///
    /// On the terminal page the percentage is forced to 100 even when the
    /// supplied total undercounts the rows actually written. This hides
    /// estimate drift rather than reporting it.
    pub fn compute(total: u64, processed: u64, elapsed: Duration, terminal: bool) -> (u8, bool, Option<Duration>) {
        let total_known = total > 0;

        let percentage = if terminal {
            100
        } else if total_known {
            (processed.saturating_mul(100) / total).min(100) as u8
        } else {
            0
        };

        let remaining = if terminal {
            Some(Duration::ZERO)
        } else if !total_known || processed == 0 {
            None
        } else if processed >= total {
            Some(Duration::ZERO)
        } else {
            let per_row = elapsed.as_secs_f64() / processed as f64;
            let secs = per_row * (total - processed) as f64;
            if secs.is_finite() {
                Some(Duration::from_secs_f64(secs.max(0.0)))
            } else {
                None
            }
        };

        (percentage, total_known, remaining)
    }
}

/// Tracks elapsed time for one format pass and builds snapshots.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    format: ExportFormat,
    total: u64,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(format: ExportFormat, total: u64) -> Self {
        Self::starting_at(format, total, Instant::now())
    }

    pub fn starting_at(format: ExportFormat, total: u64, started: Instant) -> Self {
        Self { format, total, started }
    }

    pub fn snapshot(&self, page: u32, processed: u64, terminal: bool) -> ProgressSnapshot {
        self.snapshot_at(page, processed, terminal, Instant::now())
    }

    pub fn snapshot_at(&self, page: u32, processed: u64, terminal: bool, now: Instant) -> ProgressSnapshot {
        let elapsed = now.saturating_duration_since(self.started);
        let (percentage, total_known, remaining) =
            ProgressSnapshot::compute(self.total, processed, elapsed, terminal);

        let message = if terminal {
            format!("{} export complete: {} rows", self.format, processed)
        } else if total_known {
            format!("{} export page {}: {}/{} rows", self.format, page, processed, self.total)
        } else {
            format!("{} export page {}: {} rows (total unknown)", self.format, page, processed)
        };

        ProgressSnapshot {
            format: self.format,
            page,
            total: self.total,
            processed,
            percentage,
            total_known,
            elapsed,
            remaining,
            message,
        }
    }
}

/// Receives progress snapshots synchronously, on the exporting task.
///
/// An error returned by the sink aborts the export.
pub trait ProgressSink {
    fn report(&mut self, snapshot: &ProgressSnapshot) -> ExportResult<()>;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressSnapshot) -> ExportResult<()>,
{
    fn report(&mut self, snapshot: &ProgressSnapshot) -> ExportResult<()> {
        self(snapshot)
    }
}

/// Discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&mut self, _snapshot: &ProgressSnapshot) -> ExportResult<()> {
        Ok(())
    }
}

/// Forwards snapshots into a bounded channel for asynchronous consumers.
///
/// A full channel drops the snapshot instead of stalling the export; a
/// closed channel aborts it.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressSnapshot>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressSnapshot>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&mut self, snapshot: &ProgressSnapshot) -> ExportResult<()> {
        match self.tx.try_send(snapshot.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                log::debug!("Progress channel full, dropping snapshot for page {}", dropped.page);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(ExportError::Progress("progress receiver was dropped".to_string()))
            }
        }
    }
}

/// Create a channel sink paired with a stream of the snapshots it receives.
pub fn progress_channel(capacity: usize) -> (ChannelProgressSink, ReceiverStream<ProgressSnapshot>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelProgressSink::new(tx), ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_zero_total_is_flagged_not_divided() {
        let (percentage, known, remaining) =
            ProgressSnapshot::compute(0, 500, Duration::from_secs(5), false);
        assert_eq!(percentage, 0);
        assert!(!known);
        assert_eq!(remaining, None);
    }

    #[test]
    fn test_remaining_unknown_before_first_row() {
        let (percentage, known, remaining) =
            ProgressSnapshot::compute(100, 0, Duration::from_secs(1), false);
        assert_eq!(percentage, 0);
        assert!(known);
        assert_eq!(remaining, None);
    }

    #[test]
    fn test_remaining_extrapolates_average_rate() {
        let (percentage, _, remaining) =
            ProgressSnapshot::compute(4000, 1000, Duration::from_secs(2), false);
        assert_eq!(percentage, 25);
        assert_eq!(remaining, Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_percentage_saturates() {
        let (percentage, _, remaining) =
            ProgressSnapshot::compute(10, 25, Duration::from_secs(1), false);
        assert_eq!(percentage, 100);
        assert_eq!(remaining, Some(Duration::ZERO));
    }

    #[test]
    fn test_terminal_page_forced_to_complete() {
        let (percentage, _, remaining) =
            ProgressSnapshot::compute(5000, 1003, Duration::from_secs(1), true);
        assert_eq!(percentage, 100);
        assert_eq!(remaining, Some(Duration::ZERO));
    }

    #[test]
    fn test_tracker_measures_from_start() {
        let start = Instant::now();
        let tracker = ProgressTracker::starting_at(ExportFormat::Csv, 10, start);
        let snapshot = tracker.snapshot_at(1, 5, false, start + Duration::from_secs(3));
        assert_eq!(snapshot.elapsed, Duration::from_secs(3));
        assert_eq!(snapshot.percentage, 50);
        assert_eq!(snapshot.remaining, Some(Duration::from_secs(3)));
        assert!(snapshot.message.contains("5/10"));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_detects_closed_receiver() {
        let tracker = ProgressTracker::new(ExportFormat::Pdf, 2);
        let (mut sink, mut stream) = progress_channel(4);
        sink.report(&tracker.snapshot(1, 2, true)).unwrap();
        let received = stream.next().await.unwrap();
        assert_eq!(received.percentage, 100);

        drop(stream);
        let err = sink.report(&tracker.snapshot(2, 2, true)).unwrap_err();
        assert!(matches!(err, ExportError::Progress(_)));
    }

    #[test]
    fn test_closure_errors_propagate() {
        let tracker = ProgressTracker::new(ExportFormat::Csv, 1);
        let mut sink = |_: &ProgressSnapshot| -> ExportResult<()> {
            Err(ExportError::Progress("stop".into()))
        };
        assert!(sink.report(&tracker.snapshot(1, 1, true)).is_err());
    }
}
