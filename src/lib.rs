//! Continuous profiling agent.
//!
//! A [`Profiler`] periodically captures snapshots of the running process
//! (CPU, memory, goroutine-equivalent thread stats, contention, blocking and
//! user spans) and ships each one to a [`Storage`] backend, followed by a
//! metadata record describing it.

pub mod capture;
pub mod config;
pub mod error;
pub mod exporter;
pub mod knobs;
pub mod metadata;
pub mod profiler;
mod scheduler;
pub mod spans;
pub mod storage;
pub mod upload;

pub use capture::{Capture, ProfileKind, RuntimeCapture, Snapshot};
pub use config::{Config, OutputMode};
pub use error::{ConfigError, DeliveryError, ExportError, ProfilerError};
pub use exporter::Exporter;
pub use knobs::{KnobControl, ProcessKnobs, RuntimeKnobs};
pub use metadata::{MetadataClient, MetadataRecord};
pub use profiler::Profiler;
pub use spans::{start_span, Span, SpanAggregator, SpanSink};
pub use storage::{FileStorage, HttpStorage, StdoutStorage, Storage};
pub use tokio_util::sync::CancellationToken;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
