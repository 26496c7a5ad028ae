//! User-delimited timing spans and the aggregator that periodically ships
//! them as a `custom` profile.

use crate::capture::{ProfileKind, Snapshot};
use crate::exporter::Exporter;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const SPAN_QUEUE_CAPACITY: usize = 1000;

/// Sending half of a profiler's span queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SpanSink {
    tx: mpsc::Sender<Span>,
}

impl SpanSink {
    /// Queues a finished span. A full queue drops the span rather than
    /// blocking the caller.
    fn submit(&self, span: Span) {
        match self.tx.try_send(span) {
            Ok(()) => {}
            Err(TrySendError::Full(span)) => {
                log::debug!("span queue full, dropping span {:?}", span.name);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Creates a bounded span queue.
pub(crate) fn queue(capacity: usize) -> (SpanSink, mpsc::Receiver<Span>) {
    let (tx, rx) = mpsc::channel(capacity);
    (SpanSink { tx }, rx)
}

#[derive(Debug)]
pub struct Span {
    name: String,
    started_at: DateTime<Utc>,
    start: Instant,
    duration: Option<Duration>,
    tags: HashMap<String, String>,
    sink: Option<SpanSink>,
}

/// Starts timing `name`. With a sink the span is queued for the sink's
/// profiler once it ends; without one it is only timed.
pub fn start_span<K, V>(
    sink: Option<&SpanSink>,
    name: impl Into<String>,
    tags: impl IntoIterator<Item = (K, V)>,
) -> Span
where
    K: Into<String>,
    V: Into<String>,
{
    Span {
        name: name.into(),
        started_at: Utc::now(),
        start: Instant::now(),
        duration: None,
        tags: tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
        sink: sink.cloned(),
    }
}

impl Span {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// `None` until the span has ended.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Stops the clock and hands the span to its profiler, if any.
    pub fn end(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.duration = Some(elapsed);
        if let Some(sink) = self.sink.take() {
            sink.submit(self);
        }
        elapsed
    }
}

/// Completed spans grouped by name.
#[derive(Debug, Default)]
pub struct SpanAggregator {
    buckets: Mutex<HashMap<String, Vec<Span>>>,
}

impl SpanAggregator {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Span>>> {
        match self.buckets.lock() {
            Ok(buckets) => buckets,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record(&self, span: Span) {
        self.lock().entry(span.name.clone()).or_default().push(span);
    }

    /// Swaps the buckets for an empty map and returns what was collected.
    pub fn take(&self) -> HashMap<String, Vec<Span>> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the queue into the buckets and flushes them every `interval`
    /// until `shutdown` fires, then flushes whatever is left once more. Each
    /// flush runs as its own task on `tasks` and gives up when `ctx` fires.
    pub(crate) async fn run(
        self: Arc<Self>,
        intake: Arc<tokio::sync::Mutex<mpsc::Receiver<Span>>>,
        interval: Duration,
        exporter: Arc<Exporter>,
        tasks: TaskTracker,
        shutdown: CancellationToken,
        ctx: CancellationToken,
    ) {
        log::info!("starting span aggregator, flushing every {:?}", interval);

        let mut intake = intake.lock().await;
        let mut flush = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(span) = intake.recv() => self.record(span),
                _ = flush.tick() => self.flush(&exporter, &tasks, &ctx),
            }
        }

        while let Ok(span) = intake.try_recv() {
            self.record(span);
        }
        self.flush(&exporter, &tasks, &ctx);

        log::info!("span aggregator stopped");
    }

    fn flush(&self, exporter: &Arc<Exporter>, tasks: &TaskTracker, ctx: &CancellationToken) {
        let spans = self.take();
        if spans.is_empty() {
            return;
        }
        let exporter = Arc::clone(exporter);
        let ctx = ctx.clone();
        tasks.spawn(async move {
            if let Err(err) = export_spans(&exporter, spans, &ctx).await {
                log::error!("Error processing spans: {:#}", err);
            }
        });
    }
}

#[derive(Debug, Serialize)]
struct SpanRecord<'a> {
    start: DateTime<Utc>,
    duration_ns: u64,
    tags: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Serialize)]
struct SpanSummary<'a> {
    count: usize,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
    spans: Vec<SpanRecord<'a>>,
}

fn duration_ns(span: &Span) -> u64 {
    span.duration
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// JSON document describing a span snapshot, keyed by span name.
pub(crate) fn encode_spans(spans: &HashMap<String, Vec<Span>>) -> serde_json::Result<Vec<u8>> {
    let summaries: BTreeMap<&str, SpanSummary<'_>> = spans
        .iter()
        .map(|(name, spans)| {
            let durations = spans.iter().map(duration_ns);
            let summary = SpanSummary {
                count: spans.len(),
                total_ns: durations.clone().fold(0u64, u64::saturating_add),
                min_ns: durations.clone().min().unwrap_or(0),
                max_ns: durations.max().unwrap_or(0),
                spans: spans
                    .iter()
                    .map(|span| SpanRecord {
                        start: span.started_at,
                        duration_ns: duration_ns(span),
                        tags: span
                            .tags
                            .iter()
                            .map(|(k, v)| (k.as_str(), v.as_str()))
                            .collect(),
                    })
                    .collect(),
            };
            (name.as_str(), summary)
        })
        .collect();
    serde_json::to_vec(&summaries)
}

async fn export_spans(
    exporter: &Exporter,
    spans: HashMap<String, Vec<Span>>,
    ctx: &CancellationToken,
) -> anyhow::Result<()> {
    let data = encode_spans(&spans).context("failed to encode spans")?;
    let snapshot = Snapshot::write(ProfileKind::Custom, ".json", &data)
        .context("failed to write span profile")?;
    let locator = exporter
        .export(ProfileKind::Custom, snapshot.path(), ctx)
        .await?;
    log::debug!("exported {} span groups to {}", spans.len(), locator);
    Ok(())
}
