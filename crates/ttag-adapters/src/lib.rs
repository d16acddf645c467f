//! Submission sources: the KoboToolbox data API and fixture-first local files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use ttag_core::{value_as_text, RemoteRecord};
use ttag_storage::{status_error, FetchError, HttpClientConfig, HttpFetcher};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ttag-adapters";

/// Field carrying the submission's identity in the Kobo data API.
pub const REMOTE_ID_FIELD: &str = "_id";

pub const DEFAULT_KOBO_API_BASE: &str = "https://kf.kobotoolbox.org/api/v2/assets";

/// Full response body for one collection, kept verbatim for archiving.
/// A source hands back error responses too; callers check the status after
/// archiving.
#[derive(Debug, Clone)]
pub struct FetchedCollection {
    pub collection_id: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedCollection {
    pub fn error_for_status(&self) -> Result<(), SourceError> {
        match status_error(self.status, &self.url, &self.body) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading fixture {}: {source}", .path.display())]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding submissions: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait SubmissionSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pulls the whole collection in a single request. Only transport failures
    /// are errors here; an HTTP error status comes back with its body.
    async fn fetch_collection(
        &self,
        run_id: Uuid,
        collection_id: &str,
    ) -> Result<FetchedCollection, SourceError>;
}

#[derive(Debug, Deserialize)]
struct SubmissionPage {
    #[serde(default)]
    results: Option<Vec<JsonValue>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submissions {
    pub records: Vec<RemoteRecord>,
    /// Entries in `results` that were not JSON objects.
    pub malformed: usize,
}

/// Parses a data API body. A missing or null `results` array means there is
/// nothing to sync; entries that are not objects are counted and dropped.
pub fn parse_submissions(body: &[u8]) -> Result<Submissions, SourceError> {
    let page: SubmissionPage = serde_json::from_slice(body)?;
    let mut submissions = Submissions::default();
    for entry in page.results.unwrap_or_default() {
        match entry {
            JsonValue::Object(record) => submissions.records.push(record),
            other => {
                warn!(kind = json_kind(&other), "dropping non-object submission");
                submissions.malformed += 1;
            }
        }
    }
    Ok(submissions)
}

/// Identity of a submission; integer and string ids are both accepted.
pub fn remote_id(record: &RemoteRecord) -> Option<String> {
    record.get(REMOTE_ID_FIELD).and_then(value_as_text)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct KoboConfig {
    pub api_base: String,
    pub token: String,
    pub user_agent: String,
    pub timeout: Duration,
}

/// KoboToolbox v2 data API: `GET <base>/<asset>/data/?format=json`.
#[derive(Debug)]
pub struct KoboSource {
    http: HttpFetcher,
    api_base: String,
    token: String,
}

impl KoboSource {
    pub fn new(config: KoboConfig) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.timeout,
            user_agent: Some(config.user_agent),
            ..Default::default()
        })?;
        Ok(Self::with_fetcher(http, config.api_base, config.token))
    }

    pub fn with_fetcher(http: HttpFetcher, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    pub fn collection_url(&self, collection_id: &str) -> String {
        format!(
            "{}/{}/data/?format=json",
            self.api_base.trim_end_matches('/'),
            collection_id
        )
    }
}

#[async_trait]
impl SubmissionSource for KoboSource {
    fn name(&self) -> &'static str {
        "kobo"
    }

    async fn fetch_collection(
        &self,
        run_id: Uuid,
        collection_id: &str,
    ) -> Result<FetchedCollection, SourceError> {
        let url = self.collection_url(collection_id);
        let fetched_at = Utc::now();
        let response = self
            .http
            .fetch_with_token(run_id, collection_id, &url, &self.token)
            .await?;
        Ok(FetchedCollection {
            collection_id: collection_id.to_string(),
            url: response.final_url,
            fetched_at,
            status: response.status.as_u16(),
            body: response.body,
        })
    }
}

/// Reads `<root>/<collection_id>.json` instead of calling the remote API.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    root: PathBuf,
}

impl FixtureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fixture_path(&self, collection_id: &str) -> PathBuf {
        self.root.join(format!("{collection_id}.json"))
    }
}

#[async_trait]
impl SubmissionSource for FixtureSource {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_collection(
        &self,
        _run_id: Uuid,
        collection_id: &str,
    ) -> Result<FetchedCollection, SourceError> {
        let path = self.fixture_path(collection_id);
        let fetched_at = Utc::now();
        let body = tokio::fs::read(&path)
            .await
            .map_err(|source| SourceError::Fixture {
                path: path.clone(),
                source,
            })?;
        Ok(FetchedCollection {
            collection_id: collection_id.to_string(),
            url: format!("file://{}", path.display()),
            fetched_at,
            status: 200,
            body,
        })
    }
}
