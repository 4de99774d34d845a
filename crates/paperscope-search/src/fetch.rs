//! Concurrent fan-out to the configured sources.
//!
//! Each source call runs in its own task and owns its result slot; the
//! slots are joined in registration order once every task has finished or
//! the request deadline has passed. A source that fails, times out or
//! panics contributes nothing. There are no retries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use paperscope_core::SourceKind;
use paperscope_core::config::SearchConfig;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::sources::{RawRecord, SourceClient, SourceQuery};

/// Where a request is in its lifecycle; logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutState {
    Idle,
    Dispatched,
    Collecting,
    Merging,
    Done,
}

impl fmt::Display for FanoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Dispatched => "dispatched",
            Self::Collecting => "collecting",
            Self::Merging => "merging",
            Self::Done => "done",
        })
    }
}

pub(crate) fn transition(from: FanoutState, to: FanoutState) {
    debug!(%from, %to, "request state");
}

/// One source call to make.
#[derive(Clone)]
pub struct SourceJob {
    pub client: Arc<dyn SourceClient>,
    pub query: SourceQuery,
}

impl SourceJob {
    pub fn new(client: Arc<dyn SourceClient>, query: SourceQuery) -> Self {
        Self { client, query }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Ok,
    Failed(String),
    /// The source exceeded its own time budget.
    TimedOut,
    /// The request deadline passed before the source finished.
    Abandoned,
}

impl SlotStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Abandoned => f.write_str("abandoned at request deadline"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotReport {
    pub source: String,
    pub kind: SourceKind,
    pub query: String,
    pub records: usize,
    pub elapsed: Duration,
    pub status: SlotStatus,
}

pub struct SlotResult {
    pub report: SlotReport,
    pub records: Vec<RawRecord>,
}

/// Every slot, in the order the jobs were given.
pub struct FanoutOutcome {
    pub slots: Vec<SlotResult>,
}

impl FanoutOutcome {
    pub fn reports(&self) -> Vec<SlotReport> {
        self.slots.iter().map(|s| s.report.clone()).collect()
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| !s.report.status.is_ok())
            .map(|s| s.report.source.as_str())
            .collect()
    }

    pub fn total_records(&self) -> usize {
        self.slots.iter().map(|s| s.records.len()).sum()
    }
}

/// Bounded, failure-isolated fan-out.
#[derive(Debug, Clone)]
pub struct Fetcher {
    max_concurrency: usize,
    source_timeout: Duration,
    request_timeout: Duration,
}

impl Fetcher {
    pub fn new(max_concurrency: usize, source_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            source_timeout,
            request_timeout,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.max_concurrency,
            Duration::from_secs(config.source_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    /// End of a request budget that starts now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }

    pub async fn fan_out(&self, jobs: Vec<SourceJob>) -> FanoutOutcome {
        self.fan_out_until(jobs, self.deadline()).await
    }

    /// Like [`Fetcher::fan_out`], against a deadline the caller also uses
    /// for later stages of the same request.
    pub async fn fan_out_until(&self, jobs: Vec<SourceJob>, deadline: Instant) -> FanoutOutcome {
        let started = Instant::now();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));

        transition(FanoutState::Idle, FanoutState::Dispatched);
        let pending: Vec<(SlotReport, JoinHandle<SlotResult>)> = jobs
            .into_iter()
            .map(|job| {
                let placeholder = SlotReport {
                    source: job.client.name().to_string(),
                    kind: job.client.kind(),
                    query: job.query.text.clone(),
                    records: 0,
                    elapsed: Duration::ZERO,
                    status: SlotStatus::Abandoned,
                };
                let handle = tokio::spawn(run_slot(job, Arc::clone(&permits), self.source_timeout));
                (placeholder, handle)
            })
            .collect();

        transition(FanoutState::Dispatched, FanoutState::Collecting);
        let mut slots = Vec::with_capacity(pending.len());
        for (mut placeholder, mut handle) in pending {
            let slot = match timeout_at(deadline, &mut handle).await {
                Ok(Ok(slot)) => slot,
                Ok(Err(join_error)) => {
                    placeholder.status = SlotStatus::Failed(format!("task panicked: {join_error}"));
                    SlotResult {
                        report: placeholder,
                        records: Vec::new(),
                    }
                }
                Err(_) => {
                    handle.abort();
                    placeholder.elapsed = started.elapsed();
                    SlotResult {
                        report: placeholder,
                        records: Vec::new(),
                    }
                }
            };
            log_slot(&slot.report);
            slots.push(slot);
        }

        let outcome = FanoutOutcome { slots };
        info!(
            sources = outcome.slots.len(),
            failed = outcome.failed_sources().len(),
            records = outcome.total_records(),
            "fan-out complete"
        );
        outcome
    }
}

async fn run_slot(job: SourceJob, permits: Arc<Semaphore>, source_timeout: Duration) -> SlotResult {
    // Never closed, so acquisition only fails if the fetcher is gone.
    let _permit = permits.acquire_owned().await.ok();
    let started = Instant::now();

    let (records, status) = match timeout(source_timeout, job.client.query(&job.query)).await {
        Ok(Ok(records)) => (records, SlotStatus::Ok),
        Ok(Err(e)) => (Vec::new(), SlotStatus::Failed(describe(&e))),
        Err(_) => (Vec::new(), SlotStatus::TimedOut),
    };

    SlotResult {
        report: SlotReport {
            source: job.client.name().to_string(),
            kind: job.client.kind(),
            query: job.query.text,
            records: records.len(),
            elapsed: started.elapsed(),
            status,
        },
        records,
    }
}

fn describe(error: &SearchError) -> String {
    match error {
        SearchError::Storage(paperscope_core::CoreError::SchemaMismatch { .. })
        | SearchError::MalformedUpstream(..)
        | SearchError::Parse(_) => format!("malformed upstream data: {error}"),
        _ => error.to_string(),
    }
}

fn log_slot(report: &SlotReport) {
    if report.status.is_ok() {
        debug!(
            source = %report.source,
            records = report.records,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "source returned"
        );
    } else {
        warn!(
            source = %report.source,
            status = %report.status,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "source contributed no records"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use paperscope_core::PaperRecord;

    use super::*;
    use crate::error::Result;

    enum Behavior {
        Hits(usize),
        Fail,
        Sleep(Duration),
        Panic,
    }

    struct Fake {
        name: &'static str,
        behavior: Behavior,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Fake {
        fn new(name: &'static str, behavior: Behavior) -> Arc<dyn SourceClient> {
            Arc::new(Self {
                name,
                behavior,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl SourceClient for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Other
        }

        async fn query(&self, query: &SourceQuery) -> Result<Vec<RawRecord>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = match self.behavior {
                Behavior::Hits(n) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok((0..n)
                        .map(|i| {
                            let mut r = PaperRecord::new(SourceKind::Other);
                            r.title = Some(format!("{} {} {i}", self.name, query.text));
                            RawRecord::Record(r)
                        })
                        .collect())
                }
                Behavior::Fail => Err(SearchError::SourceUnavailable(self.name.to_string())),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(Vec::new())
                }
                Behavior::Panic => panic!("source exploded"),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn job(client: Arc<dyn SourceClient>) -> SourceJob {
        SourceJob::new(client, SourceQuery::new("q", 10))
    }

    #[tokio::test]
    async fn slots_keep_registration_order() {
        let fetcher = Fetcher::new(5, Duration::from_secs(2), Duration::from_secs(5));
        let outcome = fetcher
            .fan_out(vec![
                job(Fake::new("slow", Behavior::Sleep(Duration::from_millis(80)))),
                job(Fake::new("a", Behavior::Hits(2))),
                job(Fake::new("b", Behavior::Hits(1))),
            ])
            .await;

        let names: Vec<_> = outcome.slots.iter().map(|s| s.report.source.as_str()).collect();
        assert_eq!(names, vec!["slow", "a", "b"]);
        assert_eq!(outcome.total_records(), 3);
        assert!(outcome.failed_sources().is_empty());
    }

    #[tokio::test]
    async fn failures_and_panics_are_isolated() {
        let fetcher = Fetcher::new(5, Duration::from_secs(2), Duration::from_secs(5));
        let outcome = fetcher
            .fan_out(vec![
                job(Fake::new("broken", Behavior::Fail)),
                job(Fake::new("exploding", Behavior::Panic)),
                job(Fake::new("fine", Behavior::Hits(3))),
            ])
            .await;

        assert_eq!(outcome.total_records(), 3);
        assert_eq!(outcome.failed_sources(), vec!["broken", "exploding"]);
        assert!(matches!(outcome.slots[0].report.status, SlotStatus::Failed(_)));
    }

    #[tokio::test]
    async fn slow_source_hits_its_own_timeout() {
        let fetcher = Fetcher::new(5, Duration::from_millis(50), Duration::from_secs(5));
        let outcome = fetcher
            .fan_out(vec![
                job(Fake::new("sleepy", Behavior::Sleep(Duration::from_secs(10)))),
                job(Fake::new("fine", Behavior::Hits(1))),
            ])
            .await;

        assert_eq!(outcome.slots[0].report.status, SlotStatus::TimedOut);
        assert_eq!(outcome.slots[1].report.records, 1);
    }

    #[tokio::test]
    async fn request_deadline_keeps_finished_slots() {
        let fetcher = Fetcher::new(5, Duration::from_secs(30), Duration::from_millis(200));
        let started = Instant::now();
        let outcome = fetcher
            .fan_out(vec![
                job(Fake::new("stuck", Behavior::Sleep(Duration::from_secs(30)))),
                job(Fake::new("fine", Behavior::Hits(2))),
            ])
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.slots[0].report.status, SlotStatus::Abandoned);
        assert_eq!(outcome.slots[1].records.len(), 2);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs = (0..6)
            .map(|_| {
                job(Arc::new(Fake {
                    name: "shared",
                    behavior: Behavior::Hits(1),
                    in_flight: Arc::clone(&in_flight),
                    peak: Arc::clone(&peak),
                }))
            })
            .collect();

        let outcome = Fetcher::new(2, Duration::from_secs(2), Duration::from_secs(5))
            .fan_out(jobs)
            .await;
        assert_eq!(outcome.total_records(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
