use super::{Capture, ProfileKind, Snapshot};
use crate::knobs::{KnobControl, ProcessKnobs};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Process statistics recorded by [`RuntimeCapture`]. Fields read from
/// procfs are `None` off Linux.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub kind: String,
    pub captured_at: i64,
    pub window_ms: u64,
    pub cpu_ticks: Option<u64>,
    pub resident_pages: Option<u64>,
    pub threads: Option<u64>,
    pub mem_profile_rate: i64,
    pub mutex_fraction: i64,
    pub block_profile_rate: i64,
}

/// Default capture: samples the process through procfs and encodes the
/// result with bincode.
#[derive(Debug, Clone)]
pub struct RuntimeCapture {
    knobs: Arc<dyn KnobControl>,
}

impl Default for RuntimeCapture {
    fn default() -> Self {
        Self::new(Arc::new(ProcessKnobs))
    }
}

impl RuntimeCapture {
    pub fn new(knobs: Arc<dyn KnobControl>) -> Self {
        Self { knobs }
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<ProcessStats> {
        bincode::deserialize(data).context("failed to decode process stats")
    }

    #[cfg(target_os = "linux")]
    fn sample() -> Option<ProcSample> {
        match procfs::process::Process::myself().and_then(|process| process.stat()) {
            Ok(stat) => Some(ProcSample {
                cpu_ticks: stat.utime + stat.stime,
                resident_pages: stat.rss,
                threads: u64::try_from(stat.num_threads).unwrap_or(0),
            }),
            Err(err) => {
                log::debug!("failed to read process stats: {}", err);
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sample() -> Option<ProcSample> {
        None
    }
}

/// One read of `/proc/self/stat`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[derive(Debug, Clone, Copy)]
struct ProcSample {
    cpu_ticks: u64,
    resident_pages: u64,
    threads: u64,
}

#[async_trait]
impl Capture for RuntimeCapture {
    async fn capture(
        &self,
        kind: ProfileKind,
        window: Option<Duration>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Snapshot> {
        let started = Instant::now();
        let mut cpu_ticks = None;

        if let Some(window) = window {
            let before = Self::sample();
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = cancel.cancelled() => {
                    log::debug!("{} capture cut short after {:?}", kind, started.elapsed());
                }
            }
            cpu_ticks = before
                .zip(Self::sample())
                .map(|(before, after)| after.cpu_ticks.saturating_sub(before.cpu_ticks));
        }

        let sample = Self::sample();
        let knobs = self.knobs.current();
        let stats = ProcessStats {
            kind: kind.to_string(),
            captured_at: chrono::Utc::now().timestamp_millis(),
            window_ms: started.elapsed().as_millis() as u64,
            cpu_ticks,
            resident_pages: sample.map(|s| s.resident_pages),
            threads: sample.map(|s| s.threads),
            mem_profile_rate: knobs.mem_profile_rate,
            mutex_fraction: knobs.mutex_fraction,
            block_profile_rate: knobs.block_profile_rate,
        };

        let data = bincode::serialize(&stats).context("failed to encode process stats")?;
        Snapshot::write(kind, ".pprof", &data)
            .with_context(|| format!("failed to write {} snapshot", kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_instant_capture() {
        let capture = RuntimeCapture::default();
        let cancel = CancellationToken::new();

        let snapshot = capture
            .capture(ProfileKind::Memory, None, &cancel)
            .await
            .unwrap();
        assert_eq!(snapshot.kind(), ProfileKind::Memory);

        let stats = RuntimeCapture::decode(&std::fs::read(snapshot.path()).unwrap()).unwrap();
        assert_eq!(stats.kind, "memory");
        assert!(stats.cpu_ticks.is_none());
        if cfg!(target_os = "linux") {
            assert!(stats.threads.unwrap() >= 1);
            assert!(stats.resident_pages.unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn test_cpu_capture_stops_on_cancel() {
        let capture = RuntimeCapture::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let snapshot = capture
            .capture(ProfileKind::Cpu, Some(Duration::from_secs(30)), &cancel)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        let stats = RuntimeCapture::decode(&std::fs::read(snapshot.path()).unwrap()).unwrap();
        assert_eq!(stats.kind, "cpu");
        assert!(stats.window_ms < 5_000);
        if cfg!(target_os = "linux") {
            assert!(stats.cpu_ticks.is_some());
        }
    }
}
