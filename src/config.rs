use crate::capture::ProfileKind;
use crate::error::ConfigError;
use crate::knobs::RuntimeKnobs;
use crate::metadata::RESERVED_KEYS;
use crate::storage::{FileStorage, HttpStorage, StdoutStorage, Storage};
use crate::upload::{RetryPolicy, DEFAULT_ATTEMPTS, DEFAULT_BASE_DELAY};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PROFILE_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_MEM_PROFILE_RATE: i64 = 4096;
pub const DEFAULT_MUTEX_FRACTION: i64 = 5;
pub const DEFAULT_BLOCK_PROFILE_RATE: i64 = 100;
pub const DEFAULT_UPLOAD_RETRIES: u32 = DEFAULT_ATTEMPTS;

/// Where captured profiles go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Upload to the ingest endpoint.
    #[default]
    Network,
    /// Copy into a local directory.
    Directory(PathBuf),
    /// Print a summary to stdout, for local testing.
    Stdout,
}

impl OutputMode {
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Network)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api_key: String,
    pub ingest_url: String,
    pub service_name: String,
    pub env: String,

    pub sample_interval: Duration,
    pub profile_duration: Duration,

    pub enable_cpu: bool,
    pub enable_memory: bool,
    pub enable_goroutine: bool,
    pub enable_mutex: bool,
    pub enable_block: bool,
    pub enable_custom: bool,

    pub mem_profile_rate: i64,
    pub mutex_fraction: i64,
    pub block_profile_rate: i64,

    /// Extra key/value pairs added to every metadata record. Keys that match
    /// a built-in field (`service`, `type`, `timestamp`, `profile_url`,
    /// `profile_id`) are dropped with a warning at validation.
    pub tags: HashMap<String, String>,
    pub upload_retries: u32,
    pub output: OutputMode,
    /// Overrides the backend derived from `output`.
    pub storage: Option<Arc<dyn Storage>>,
}

impl Config {
    /// Network configuration with every default filled in and CPU plus
    /// memory profiling enabled.
    pub fn new(
        api_key: impl Into<String>,
        ingest_url: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            ingest_url: ingest_url.into(),
            service_name: service_name.into(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            profile_duration: DEFAULT_PROFILE_DURATION,
            enable_cpu: true,
            enable_memory: true,
            mem_profile_rate: DEFAULT_MEM_PROFILE_RATE,
            mutex_fraction: DEFAULT_MUTEX_FRACTION,
            block_profile_rate: DEFAULT_BLOCK_PROFILE_RATE,
            upload_retries: DEFAULT_UPLOAD_RETRIES,
            ..Self::default()
        }
    }

    /// Checks identity, fills defaults and resolves the storage backend, all
    /// in place. Running it on an already valid config changes nothing.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !self.output.is_local() {
            if self.api_key.is_empty() {
                return Err(ConfigError::MissingApiKey);
            }
            if self.ingest_url.is_empty() {
                return Err(ConfigError::MissingIngestUrl);
            }
            if self.service_name.is_empty() {
                return Err(ConfigError::MissingServiceName);
            }
        }
        if !self.ingest_url.is_empty() {
            Url::parse(&self.ingest_url)?;
        }

        if self.sample_interval.is_zero() {
            self.sample_interval = DEFAULT_SAMPLE_INTERVAL;
        }
        if self.profile_duration.is_zero() {
            self.profile_duration = DEFAULT_PROFILE_DURATION;
        }
        if self.mem_profile_rate <= 0 {
            self.mem_profile_rate = DEFAULT_MEM_PROFILE_RATE;
        }
        if self.mutex_fraction <= 0 {
            self.mutex_fraction = DEFAULT_MUTEX_FRACTION;
        }
        if self.block_profile_rate <= 0 {
            self.block_profile_rate = DEFAULT_BLOCK_PROFILE_RATE;
        }
        if self.upload_retries == 0 {
            self.upload_retries = DEFAULT_UPLOAD_RETRIES;
        }

        if !(self.enable_cpu
            || self.enable_memory
            || self.enable_goroutine
            || self.enable_mutex
            || self.enable_block
            || self.enable_custom)
        {
            self.enable_cpu = true;
            self.enable_memory = true;
        }

        for key in self.shadowed_tags() {
            log::warn!("tag {:?} clashes with a metadata field and will be dropped", key);
        }

        if self.storage.is_none() {
            self.storage = Some(self.default_storage()?);
        }
        Ok(())
    }

    /// Tag keys that can never reach a metadata record.
    pub fn shadowed_tags(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .tags
            .keys()
            .map(String::as_str)
            .filter(|key| RESERVED_KEYS.contains(key))
            .collect();
        keys.sort_unstable();
        keys
    }

    fn default_storage(&self) -> Result<Arc<dyn Storage>, ConfigError> {
        Ok(match &self.output {
            OutputMode::Network => Arc::new(
                HttpStorage::new(self.upload_url(), self.api_key.as_str(), self.env.as_str())
                    .with_retry_policy(self.retry_policy()),
            ),
            OutputMode::Directory(dir) => {
                Arc::new(FileStorage::new(dir).map_err(ConfigError::OutputDirectory)?)
            }
            OutputMode::Stdout => Arc::new(StdoutStorage::new()),
        })
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload", self.ingest_url.trim_end_matches('/'))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.upload_retries, DEFAULT_BASE_DELAY)
    }

    /// Whether metadata can be sent to the ingest endpoint.
    pub fn has_identity(&self) -> bool {
        !self.api_key.is_empty() && !self.ingest_url.is_empty()
    }

    pub fn is_enabled(&self, kind: ProfileKind) -> bool {
        match kind {
            ProfileKind::Cpu => self.enable_cpu,
            ProfileKind::Memory => self.enable_memory,
            ProfileKind::Goroutine => self.enable_goroutine,
            ProfileKind::Mutex => self.enable_mutex,
            ProfileKind::Block => self.enable_block,
            ProfileKind::Custom => self.enable_custom,
        }
    }

    pub fn enabled_kinds(&self) -> Vec<ProfileKind> {
        ProfileKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Knobs to run with: the configured rate for every enabled kind, the
    /// value from `base` for the rest.
    pub fn runtime_knobs(&self, base: RuntimeKnobs) -> RuntimeKnobs {
        RuntimeKnobs {
            mem_profile_rate: if self.enable_memory {
                self.mem_profile_rate
            } else {
                base.mem_profile_rate
            },
            mutex_fraction: if self.enable_mutex {
                self.mutex_fraction
            } else {
                base.mutex_fraction
            },
            block_profile_rate: if self.enable_block {
                self.block_profile_rate
            } else {
                base.block_profile_rate
            },
        }
    }
}
