use crate::capture::ProfileKind;
use crate::error::DeliveryError;
use crate::upload::{self, PostRequest, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const METADATA_PATH: &str = "/metadata";

pub const KEY_SERVICE: &str = "service";
pub const KEY_TYPE: &str = "type";
pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_PROFILE_URL: &str = "profile_url";
pub const KEY_PROFILE_ID: &str = "profile_id";

pub const RESERVED_KEYS: [&str; 5] = [
    KEY_SERVICE,
    KEY_TYPE,
    KEY_TIMESTAMP,
    KEY_PROFILE_URL,
    KEY_PROFILE_ID,
];

/// What a collector may answer to a blob upload instead of a bare locator.
#[derive(Debug, Deserialize)]
struct CollectorResponse {
    profile_url: String,
    #[serde(default)]
    profile_id: Option<String>,
}

/// Flat string map describing one uploaded profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord(BTreeMap<String, String>);

impl MetadataRecord {
    /// Builds the record for a blob stored at `locator`.
    ///
    /// A locator holding the collector's JSON answer contributes its
    /// `profile_url` and `profile_id`; any other locator is used verbatim
    /// and gets a fresh id.
    pub fn new(service: &str, kind: ProfileKind, locator: &str) -> Self {
        let (profile_url, profile_id) = match serde_json::from_str::<CollectorResponse>(locator) {
            Ok(response) => (response.profile_url, response.profile_id),
            Err(_) => (locator.to_string(), None),
        };
        let profile_id = profile_id.unwrap_or_else(|| ulid::Ulid::new().to_string());

        let mut fields = BTreeMap::new();
        fields.insert(KEY_SERVICE.to_string(), service.to_string());
        fields.insert(KEY_TYPE.to_string(), kind.to_string());
        fields.insert(
            KEY_TIMESTAMP.to_string(),
            chrono::Utc::now().timestamp().to_string(),
        );
        fields.insert(KEY_PROFILE_URL.to_string(), profile_url);
        fields.insert(KEY_PROFILE_ID.to_string(), profile_id);
        Self(fields)
    }

    /// Adds user tags. Tags named after one of [`RESERVED_KEYS`] are dropped
    /// and cannot replace the fields set by [`Self::new`].
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = (String, String)>) -> Self {
        for (key, value) in tags {
            if RESERVED_KEYS.contains(&key.as_str()) {
                log::debug!("ignoring tag {:?}, it shadows a metadata field", key);
                continue;
            }
            self.0.insert(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sends metadata records to `<ingest_url>/metadata`.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    ingest_url: String,
    api_key: String,
    env: String,
    policy: RetryPolicy,
    client: ureq::Agent,
}

impl MetadataClient {
    pub fn new(ingest_url: impl Into<String>, api_key: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            ingest_url: ingest_url.into(),
            api_key: api_key.into(),
            env: env.into(),
            policy: RetryPolicy::default(),
            client: ureq::AgentBuilder::new().timeout(METADATA_TIMEOUT).build(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.ingest_url.trim_end_matches('/'), METADATA_PATH)
    }

    pub async fn send(
        &self,
        record: &MetadataRecord,
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        if self.ingest_url.is_empty() || self.api_key.is_empty() {
            return Err(DeliveryError::MissingCredentials);
        }
        upload::ensure_secure(&self.ingest_url, &self.env)?;

        let url = self.endpoint();
        let body = Arc::new(serde_json::to_vec(record)?);

        upload::send_with_retry(&self.policy, cancel, |_| {
            let request = PostRequest {
                url: url.clone(),
                api_key: self.api_key.clone(),
                content_type: "application/json",
                content_encoding: None,
                body: Arc::clone(&body),
            };
            upload::post(&self.client, request)
        })
        .await
        .map(|_| ())
    }
}
