use crate::capture::{Capture, ProfileKind};
use crate::exporter::Exporter;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodic capture-and-export loop for a single profile kind.
#[derive(Debug)]
pub(crate) struct Collector {
    kind: ProfileKind,
    interval: Duration,
    window: Option<Duration>,
    capture: Arc<dyn Capture>,
    exporter: Arc<Exporter>,
}

impl Collector {
    pub fn new(
        kind: ProfileKind,
        interval: Duration,
        profile_duration: Duration,
        capture: Arc<dyn Capture>,
        exporter: Arc<Exporter>,
    ) -> Self {
        Self {
            kind,
            interval,
            window: kind.is_duration_bounded().then_some(profile_duration),
            capture,
            exporter,
        }
    }

    /// Collects right away, then once per interval until `shutdown` fires.
    /// A failed tick is logged and the loop carries on. `shutdown` also cuts
    /// a running capture short; `ctx` abandons an in-flight export.
    pub async fn run(self, shutdown: CancellationToken, ctx: CancellationToken) {
        log::info!("starting {} collector every {:?}", self.kind, self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.collect_once(&shutdown, &ctx).await {
                        log::error!("Error collecting {} profile: {:#}", self.kind, err);
                    }
                }
            }
        }

        log::info!("{} collector stopped", self.kind);
    }

    async fn collect_once(
        &self,
        shutdown: &CancellationToken,
        ctx: &CancellationToken,
    ) -> anyhow::Result<()> {
        let snapshot = self
            .capture
            .capture(self.kind, self.window, shutdown)
            .await
            .with_context(|| format!("failed to capture {} profile", self.kind))?;

        let locator = self
            .exporter
            .export(self.kind, snapshot.path(), ctx)
            .await?;
        log::debug!("exported {} profile to {}", self.kind, locator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Snapshot;
    use crate::config::Config;
    use crate::error::DeliveryError;
    use crate::storage::Storage;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct CountingCapture {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl Capture for CountingCapture {
        async fn capture(
            &self,
            kind: ProfileKind,
            _window: Option<Duration>,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<Snapshot> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                anyhow::bail!("capture unavailable");
            }
            Ok(Snapshot::write(kind, ".pprof", b"blob")?)
        }
    }

    #[derive(Debug, Default)]
    struct RecordingStorage {
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Storage for RecordingStorage {
        async fn upload(
            &self,
            blob: &Path,
            _cancel: &CancellationToken,
        ) -> Result<String, DeliveryError> {
            assert!(blob.exists());
            self.seen.lock().unwrap().push(blob.to_path_buf());
            Ok("recorded".to_string())
        }
    }

    fn collector(capture: Arc<CountingCapture>, storage: Arc<RecordingStorage>) -> Collector {
        let exporter = Arc::new(Exporter::new(storage, None, &Config::default()));
        Collector::new(
            ProfileKind::Memory,
            Duration::from_secs(10),
            Duration::from_secs(1),
            capture,
            exporter,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_immediately_then_per_interval() {
        let capture = Arc::new(CountingCapture::default());
        let storage = Arc::new(RecordingStorage::default());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(
            collector(capture.clone(), storage.clone())
                .run(shutdown.clone(), CancellationToken::new()),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(capture.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(capture.calls.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        task.await.unwrap();

        let seen = storage.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|path| !path.exists()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_stop_loop() {
        let capture = Arc::new(CountingCapture {
            fail_first: true,
            ..CountingCapture::default()
        });
        let storage = Arc::new(RecordingStorage::default());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(
            collector(capture.clone(), storage.clone())
                .run(shutdown.clone(), CancellationToken::new()),
        );
        tokio::time::sleep(Duration::from_secs(15)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(capture.calls.load(Ordering::SeqCst), 2);
        assert_eq!(storage.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_exits() {
        let capture = Arc::new(CountingCapture::default());
        let storage = Arc::new(RecordingStorage::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        collector(capture.clone(), storage)
            .run(shutdown, CancellationToken::new())
            .await;
        assert_eq!(capture.calls.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug, Default)]
    struct HangingStorage {
        cancelled: AtomicUsize,
    }

    #[async_trait]
    impl Storage for HangingStorage {
        async fn upload(
            &self,
            _blob: &Path,
            cancel: &CancellationToken,
        ) -> Result<String, DeliveryError> {
            cancel.cancelled().await;
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::Cancelled)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ctx_abandons_hung_export() {
        let capture = Arc::new(CountingCapture::default());
        let storage = Arc::new(HangingStorage::default());
        let exporter = Arc::new(Exporter::new(storage.clone(), None, &Config::default()));
        let collector = Collector::new(
            ProfileKind::Memory,
            Duration::from_secs(10),
            Duration::from_secs(1),
            capture.clone(),
            exporter,
        );

        let ctx = CancellationToken::new();
        let shutdown = ctx.child_token();
        let task = tokio::spawn(collector.run(shutdown, ctx.clone()));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(capture.calls.load(Ordering::SeqCst), 1);

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(storage.cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_window_only_for_cpu() {
        let capture = Arc::new(CountingCapture::default());
        let exporter = Arc::new(Exporter::new(
            Arc::new(RecordingStorage::default()),
            None,
            &Config::default(),
        ));
        let cpu = Collector::new(
            ProfileKind::Cpu,
            Duration::from_secs(60),
            Duration::from_secs(10),
            capture.clone(),
            exporter.clone(),
        );
        assert_eq!(cpu.window, Some(Duration::from_secs(10)));

        let heap = Collector::new(
            ProfileKind::Memory,
            Duration::from_secs(60),
            Duration::from_secs(10),
            capture,
            exporter,
        );
        assert_eq!(heap.window, None);
    }
}
