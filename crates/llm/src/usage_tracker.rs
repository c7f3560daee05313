use chrono::{DateTime, Utc};
use common::BatchConfigBase;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::emergency::EMERGENCY_PROVIDER;
use crate::errors::ErrorClass;
use crate::types::Candidate;
use crate::usage_sink::UsageSink;

/// One physical attempt against one candidate. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Shared by every attempt of one `generate` call
    pub request_id: Uuid,
    pub candidate: Candidate,
    /// 1-based, per candidate
    pub attempt_number: u32,
    pub latency_ms: f64,
    pub success: bool,
    pub error_class: Option<ErrorClass>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

impl RequestOutcome {
    pub fn success(
        request_id: Uuid,
        candidate: Candidate,
        attempt_number: u32,
        latency_ms: f64,
        tokens_in: u32,
        tokens_out: u32,
        cost: f64,
    ) -> Self {
        Self {
            request_id,
            candidate,
            attempt_number,
            latency_ms,
            success: true,
            error_class: None,
            tokens_in,
            tokens_out,
            cost,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        request_id: Uuid,
        candidate: Candidate,
        attempt_number: u32,
        latency_ms: f64,
        error_class: ErrorClass,
    ) -> Self {
        Self {
            request_id,
            candidate,
            attempt_number,
            latency_ms,
            success: false,
            error_class: Some(error_class),
            tokens_in: 0,
            tokens_out: 0,
            cost: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_emergency(&self) -> bool {
        self.candidate.identity() == EMERGENCY_PROVIDER
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderUsage {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_cost: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub avg_latency_ms: f64,
}

/// Aggregate over the outcomes inside a time window.
///
/// `total_requests` counts recorded attempts; `unique_requests` counts
/// distinct `generate` calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_cost: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub unique_requests: u64,
    pub success_rate: f64,
    pub emergency_responses: u64,
    /// Keyed by `provider:model`
    pub per_provider: BTreeMap<String, ProviderUsage>,
}

/// Append-only outcome log with optional asynchronous persistence.
///
/// `record` never waits: the in-memory append takes a short lock and the
/// sink hand-off uses `try_send`, dropping the record for the sink (not
/// for the log) when the channel is full.
#[derive(Debug, Default)]
pub struct UsageTracker {
    log: RwLock<Vec<RequestOutcome>>,
    sender: Mutex<Option<mpsc::Sender<RequestOutcome>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that also streams outcomes to `sink` in batches.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_sink(sink: Arc<dyn UsageSink>, batch: BatchConfigBase) -> Self {
        let (tx, rx) = mpsc::channel(batch.channel_capacity.max(1));
        let handle = tokio::spawn(run_flusher(
            rx,
            sink,
            batch.batch_size.max(1),
            Duration::from_millis(batch.flush_interval_ms.max(1)),
        ));

        Self {
            log: RwLock::new(Vec::new()),
            sender: Mutex::new(Some(tx)),
            flusher: Mutex::new(Some(handle)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record(&self, outcome: RequestOutcome) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(sender) = sender {
            match sender.try_send(outcome.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(dropped, "Usage sink backlog full, outcome not persisted");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Usage sink closed, outcome kept in memory only");
                }
            }
        }

        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
    }

    /// Copy of the log in insertion order.
    pub fn outcomes(&self) -> Vec<RequestOutcome> {
        self.log.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outcomes that could not be handed to the sink.
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Summary of the last `window`, or of everything when `None`.
    pub fn summarize(&self, window: Option<Duration>) -> UsageSummary {
        self.summarize_at(Utc::now(), window)
    }

    pub fn summarize_at(&self, now: DateTime<Utc>, window: Option<Duration>) -> UsageSummary {
        let since = window.map(|w| {
            chrono::Duration::from_std(w)
                .ok()
                .and_then(|w| now.checked_sub_signed(w))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });

        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        let mut summary = UsageSummary::default();
        let mut request_ids = HashSet::new();
        let mut latency_totals: BTreeMap<String, f64> = BTreeMap::new();

        for outcome in log
            .iter()
            .filter(|o| o.timestamp <= now && since.map_or(true, |s| o.timestamp >= s))
        {
            summary.total_requests += 1;
            summary.total_cost += outcome.cost;
            request_ids.insert(outcome.request_id);
            if outcome.success {
                summary.successful_requests += 1;
            }
            if outcome.is_emergency() {
                summary.emergency_responses += 1;
            }

            let key = outcome.candidate.identity();
            *latency_totals.entry(key.clone()).or_default() += outcome.latency_ms;
            let usage = summary.per_provider.entry(key).or_default();
            usage.requests += 1;
            if outcome.success {
                usage.successes += 1;
            } else {
                usage.failures += 1;
            }
            usage.total_cost += outcome.cost;
            usage.tokens_in += u64::from(outcome.tokens_in);
            usage.tokens_out += u64::from(outcome.tokens_out);
        }

        for (key, usage) in summary.per_provider.iter_mut() {
            let total = latency_totals.get(key).copied().unwrap_or_default();
            usage.avg_latency_ms = total / usage.requests as f64;
        }

        summary.unique_requests = request_ids.len() as u64;
        if summary.total_requests > 0 {
            summary.success_rate =
                summary.successful_requests as f64 / summary.total_requests as f64;
        }
        summary
    }

    /// Close the sink channel and wait for the flusher to drain it.
    pub async fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handle = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Usage flusher terminated abnormally: {}", e);
            }
        }
    }
}

async fn run_flusher(
    mut rx: mpsc::Receiver<RequestOutcome>,
    sink: Arc<dyn UsageSink>,
    batch_size: usize,
    flush_interval: Duration,
) {
    info!(sink = sink.name(), batch_size, "Starting usage flusher");

    let mut buffer = Vec::with_capacity(batch_size);
    let mut interval = tokio::time::interval(flush_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(outcome) => {
                    buffer.push(outcome);
                    if buffer.len() >= batch_size {
                        flush(sink.as_ref(), &mut buffer).await;
                    }
                }
                None => {
                    flush(sink.as_ref(), &mut buffer).await;
                    break;
                }
            },
            _ = interval.tick() => {
                flush(sink.as_ref(), &mut buffer).await;
            }
        }
    }

    info!(sink = sink.name(), "Usage flusher stopped");
}

async fn flush(sink: &dyn UsageSink, buffer: &mut Vec<RequestOutcome>) {
    if buffer.is_empty() {
        return;
    }

    match sink.write_batch(buffer).await {
        Ok(()) => debug!(sink = sink.name(), records = buffer.len(), "Flushed usage batch"),
        Err(e) => warn!(
            sink = sink.name(),
            records = buffer.len(),
            "Failed to persist usage batch: {}",
            e
        ),
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use crate::usage_sink::SinkError;
    use async_trait::async_trait;

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<Vec<RequestOutcome>>>,
    }

    #[async_trait]
    impl UsageSink for CollectingSink {
        fn name(&self) -> &str {
            "collecting"
        }

        async fn write_batch(&self, batch: &[RequestOutcome]) -> Result<(), SinkError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    fn openai() -> Candidate {
        Candidate::new(ProviderKind::OpenAI, "gpt-4o", 1, 0.00625)
    }

    #[test]
    fn test_summary_counts_and_costs() {
        let tracker = UsageTracker::new();
        let id = Uuid::new_v4();
        tracker.record(RequestOutcome::failure(id, openai(), 1, 100.0, ErrorClass::Timeout));
        tracker.record(RequestOutcome::success(id, openai(), 2, 300.0, 100, 50, 0.02));

        let summary = tracker.summarize(None);
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.successful_requests, 1);
        assert_eq!(summary.unique_requests, 1);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((summary.total_cost - 0.02).abs() < f64::EPSILON);

        let usage = &summary.per_provider["openai:gpt-4o"];
        assert_eq!(usage.failures, 1);
        assert_eq!(usage.tokens_in, 100);
        assert!((usage.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_respects_window() {
        let tracker = UsageTracker::new();
        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);

        tracker.record(
            RequestOutcome::success(Uuid::new_v4(), openai(), 1, 10.0, 1, 1, 1.0).with_timestamp(old),
        );
        tracker.record(
            RequestOutcome::success(Uuid::new_v4(), openai(), 1, 10.0, 1, 1, 2.0).with_timestamp(now),
        );

        let last_hour = tracker.summarize_at(now, Some(Duration::from_secs(3600)));
        assert_eq!(last_hour.total_requests, 1);
        assert!((last_hour.total_cost - 2.0).abs() < f64::EPSILON);

        assert_eq!(tracker.summarize_at(now, None).total_requests, 2);
    }

    #[test]
    fn test_empty_summary() {
        let summary = UsageTracker::new().summarize(None);
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert!(summary.per_provider.is_empty());
    }

    #[tokio::test]
    async fn test_sink_receives_everything_on_shutdown() {
        let sink = Arc::new(CollectingSink::default());
        let tracker = UsageTracker::with_sink(sink.clone(), BatchConfigBase::small());

        for attempt in 1..=20 {
            tracker.record(RequestOutcome::failure(
                Uuid::new_v4(),
                openai(),
                attempt,
                1.0,
                ErrorClass::RateLimit,
            ));
        }
        tracker.shutdown().await;

        let batches = sink.batches.lock().unwrap();
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 20);
        assert!(batches.iter().all(|b| b.len() <= 8));
        assert_eq!(tracker.len(), 20);
    }

    #[tokio::test]
    async fn test_full_channel_drops_for_sink_only() {
        let sink = Arc::new(CollectingSink::default());
        let batch = BatchConfigBase {
            batch_size: 1000,
            flush_interval_ms: 60_000,
            channel_capacity: 2,
        };
        let tracker = UsageTracker::with_sink(sink, batch);

        for attempt in 1..=10 {
            tracker.record(RequestOutcome::failure(
                Uuid::new_v4(),
                openai(),
                attempt,
                1.0,
                ErrorClass::Timeout,
            ));
        }

        assert_eq!(tracker.len(), 10);
        assert!(tracker.dropped_records() > 0);
        tracker.shutdown().await;
    }
}
