use crate::capture::{Capture, ProfileKind, RuntimeCapture};
use crate::config::Config;
use crate::error::ProfilerError;
use crate::exporter::Exporter;
use crate::knobs::{KnobControl, ProcessKnobs, RuntimeKnobs};
use crate::scheduler::Collector;
use crate::spans::{self, Span, SpanAggregator, SpanSink, SPAN_QUEUE_CAPACITY};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct Running {
    shutdown: CancellationToken,
    abort: CancellationToken,
    tasks: TaskTracker,
    saved_knobs: RuntimeKnobs,
}

enum Lifecycle {
    Idle,
    Running(Running),
    Stopped,
}

/// Continuous profiler for one service.
///
/// `start` launches a collector per enabled profile kind (plus the span
/// aggregator when custom spans are on); `stop` cancels them, waits for every
/// task, including in-flight uploads, and restores the runtime knobs.
/// Cancelling the context given to `start` also abandons in-flight uploads.
/// The profiler can be started again after it stopped.
pub struct Profiler {
    config: Arc<Config>,
    exporter: Arc<Exporter>,
    capture: Arc<dyn Capture>,
    knobs: Arc<dyn KnobControl>,
    span_sink: SpanSink,
    span_intake: Arc<Mutex<mpsc::Receiver<Span>>>,
    aggregator: Arc<SpanAggregator>,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiler")
            .field("config", &self.config)
            .field("capture", &self.capture)
            .field("knobs", &self.knobs)
            .finish_non_exhaustive()
    }
}

impl Profiler {
    /// Validates `config` and builds an idle profiler using the process
    /// capture and knobs.
    pub fn new(mut config: Config) -> Result<Self, ProfilerError> {
        config.validate()?;

        let knobs: Arc<dyn KnobControl> = Arc::new(ProcessKnobs);
        let capture: Arc<dyn Capture> = Arc::new(RuntimeCapture::new(Arc::clone(&knobs)));
        let exporter = Arc::new(Exporter::from_config(&config));
        let (span_sink, span_intake) = spans::queue(SPAN_QUEUE_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            exporter,
            capture,
            knobs,
            span_sink,
            span_intake: Arc::new(Mutex::new(span_intake)),
            aggregator: Arc::new(SpanAggregator::default()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    /// Replaces the snapshot capture.
    pub fn with_capture(mut self, capture: Arc<dyn Capture>) -> Self {
        self.capture = capture;
        self
    }

    /// Replaces the runtime knob control.
    pub fn with_knobs(mut self, knobs: Arc<dyn KnobControl>) -> Self {
        self.knobs = knobs;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running(_))
    }

    /// Sink for spans meant for this profiler, `None` when custom spans are
    /// disabled.
    pub fn span_sink(&self) -> Option<&SpanSink> {
        self.config.enable_custom.then_some(&self.span_sink)
    }

    /// Starts a span tied to this profiler.
    pub fn start_span<K, V>(
        &self,
        name: impl Into<String>,
        tags: impl IntoIterator<Item = (K, V)>,
    ) -> Span
    where
        K: Into<String>,
        V: Into<String>,
    {
        spans::start_span(self.span_sink(), name, tags)
    }

    /// Starts collecting. Every task stops once `ctx` or the profiler's own
    /// shutdown signal is cancelled.
    pub async fn start(&self, ctx: &CancellationToken) -> Result<(), ProfilerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Err(ProfilerError::AlreadyRunning);
        }

        let saved_knobs = self.knobs.current();
        self.knobs.apply(self.config.runtime_knobs(saved_knobs));

        let shutdown = ctx.child_token();
        let abort = ctx.child_token();
        let tasks = TaskTracker::new();

        for kind in self.config.enabled_kinds() {
            if kind == ProfileKind::Custom {
                continue;
            }
            let collector = Collector::new(
                kind,
                self.config.sample_interval,
                self.config.profile_duration,
                Arc::clone(&self.capture),
                Arc::clone(&self.exporter),
            );
            tasks.spawn(collector.run(shutdown.clone(), abort.clone()));
        }

        if self.config.enable_custom {
            tasks.spawn(Arc::clone(&self.aggregator).run(
                Arc::clone(&self.span_intake),
                self.config.sample_interval,
                Arc::clone(&self.exporter),
                tasks.clone(),
                shutdown.clone(),
                abort.clone(),
            ));
        }

        log::info!(
            "profiler started for {:?} with {} task(s)",
            self.config.service_name,
            tasks.len()
        );

        *lifecycle = Lifecycle::Running(Running {
            shutdown,
            abort,
            tasks,
            saved_knobs,
        });
        Ok(())
    }

    /// Stops collecting and waits for every task to exit. Stopping a profiler
    /// that is not running does nothing.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let running = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(running) => running,
            other => {
                *lifecycle = other;
                return;
            }
        };

        running.shutdown.cancel();
        running.tasks.close();
        running.tasks.wait().await;

        self.knobs.apply(running.saved_knobs);
        log::info!("profiler stopped for {:?}", self.config.service_name);
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if let Lifecycle::Running(running) = self.lifecycle.get_mut() {
            log::warn!("profiler dropped while running, cancelling its tasks");
            running.shutdown.cancel();
            running.abort.cancel();
            self.knobs.apply(running.saved_knobs);
        }
    }
}
