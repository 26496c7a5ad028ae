mod runtime;

pub use runtime::{ProcessStats, RuntimeCapture};

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProfileKind {
    Cpu,
    Memory,
    Goroutine,
    Mutex,
    Block,
    Custom,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 6] = [
        ProfileKind::Cpu,
        ProfileKind::Memory,
        ProfileKind::Goroutine,
        ProfileKind::Mutex,
        ProfileKind::Block,
        ProfileKind::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Goroutine => "goroutine",
            Self::Mutex => "mutex",
            Self::Block => "block",
            Self::Custom => "custom",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Cpu => "CPU Profile",
            Self::Memory => "Memory/Heap Profile",
            Self::Goroutine => "Goroutine Profile",
            Self::Mutex => "Mutex Profile",
            Self::Block => "Block Profile",
            Self::Custom => "Custom Span Profile",
        }
    }

    /// Kinds captured over a window rather than at an instant.
    pub fn is_duration_bounded(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Recovers the kind from a snapshot file name such as `cpu-1a2b.pprof`.
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|kind| name.starts_with(kind.as_str()))
            .or_else(|| name.starts_with("heap").then_some(Self::Memory))
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured blob waiting to be shipped. The backing file is deleted when
/// the snapshot is dropped.
#[derive(Debug)]
pub struct Snapshot {
    kind: ProfileKind,
    path: TempPath,
}

impl Snapshot {
    /// Writes `data` to a fresh temporary file named after `kind`.
    pub fn write(kind: ProfileKind, extension: &str, data: &[u8]) -> std::io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", kind))
            .suffix(extension)
            .tempfile()?;
        std::fs::write(file.path(), data)?;
        Ok(Self {
            kind,
            path: file.into_temp_path(),
        })
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Produces snapshots of the running process.
///
/// For duration-bounded kinds the scheduler passes the capture window; the
/// capture must end early, still yielding a snapshot, once `cancel` fires.
#[async_trait]
pub trait Capture: fmt::Debug + Send + Sync {
    async fn capture(
        &self,
        kind: ProfileKind,
        window: Option<Duration>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Snapshot>;
}
