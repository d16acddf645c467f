//! Pulls each collection, derives codes, and reconciles records one at a time
//! against the store. Per-record failures become sync log rows; only fetch and
//! decode failures abort a category. Every response body is archived before
//! its status or contents are looked at.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use ttag_adapters::{parse_submissions, remote_id, FetchedCollection, SourceError, SubmissionSource};
use ttag_core::{
    clean_gps, first_text, map_fields, Category, Deriver, NewRawResponse, NewSeed, NewTree,
    RemoteRecord, SyncStatus,
};
use ttag_storage::{RecordStore, ResponseArchive, ResponseBody, StoreError};
use uuid::Uuid;

use crate::config::ConflictPolicy;
use crate::run_log::RunLog;
use crate::snapshot::{manifest_entry, snapshot_file_name, write_manifest, write_snapshot, SnapshotRow};

const GPS_FIELDS: &[&str] = &["GPS", "gps"];
const GEOLOCATION_FIELD: &str = "_geolocation";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching {category} collection {collection_id}: {source}")]
    Fetch {
        category: Category,
        collection_id: String,
        #[source]
        source: SourceError,
    },
    #[error("decoding {category} collection {collection_id}: {source}")]
    Decode {
        category: Category,
        collection_id: String,
        #[source]
        source: SourceError,
    },
    #[error("archiving {category} response: {detail}")]
    Archive { category: Category, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTarget {
    pub category: Category,
    pub collection_id: String,
}

impl CollectionTarget {
    pub fn new(category: Category, collection_id: impl Into<String>) -> Self {
        Self {
            category,
            collection_id: collection_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub collection_id: String,
    pub fetched: usize,
    pub malformed: usize,
    pub skipped: usize,
    pub success: usize,
    pub duplicate: usize,
    pub updated: usize,
    pub errors: usize,
    pub raw_artifact: Option<String>,
    pub fatal_error: Option<String>,
    #[serde(skip)]
    pub rows: Vec<SnapshotRow>,
}

impl CategoryReport {
    fn new(target: &CollectionTarget) -> Self {
        Self {
            category: target.category,
            collection_id: target.collection_id.clone(),
            fetched: 0,
            malformed: 0,
            skipped: 0,
            success: 0,
            duplicate: 0,
            updated: 0,
            errors: 0,
            raw_artifact: None,
            fatal_error: None,
            rows: Vec::new(),
        }
    }

    fn failed(target: &CollectionTarget, err: &SyncError) -> Self {
        Self {
            fatal_error: Some(err.to_string()),
            ..Self::new(target)
        }
    }

    fn tally(&mut self, status: &SyncStatus) {
        match status {
            SyncStatus::Success => self.success += 1,
            SyncStatus::Duplicate => self.duplicate += 1,
            SyncStatus::Updated => self.updated += 1,
            SyncStatus::Error(_) => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: Vec<CategoryReport>,
    pub snapshot_manifest: Option<String>,
}

impl SyncRunSummary {
    /// True when no category aborted. Per-record errors do not count.
    pub fn is_success(&self) -> bool {
        self.categories.iter().all(|c| c.fatal_error.is_none())
    }

    pub fn fatal_errors(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter_map(|c| c.fatal_error.clone())
            .collect()
    }

    pub fn category(&self, category: Category) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.category == category)
    }
}

pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    source: Arc<dyn SubmissionSource>,
    deriver: Deriver,
    targets: Vec<CollectionTarget>,
    archive: ResponseArchive,
    run_log: RunLog,
    reports_dir: Option<PathBuf>,
    conflict_policy: ConflictPolicy,
    run_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        source: Arc<dyn SubmissionSource>,
        deriver: Deriver,
        targets: Vec<CollectionTarget>,
    ) -> Self {
        Self {
            store,
            source,
            deriver,
            targets,
            archive: ResponseArchive::new("./artifacts"),
            run_log: RunLog::new("./kobo_sync_log.txt"),
            reports_dir: None,
            conflict_policy: ConflictPolicy::default(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive = ResponseArchive::new(dir);
        self
    }

    pub fn with_run_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_log = RunLog::new(path);
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn deriver(&self) -> &Deriver {
        &self.deriver
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    pub fn targets(&self) -> &[CollectionTarget] {
        &self.targets
    }

    /// Runs every configured collection in order. Concurrent callers queue on
    /// the run lock.
    pub async fn run_all(&self) -> SyncRunSummary {
        let targets = self.targets.clone();
        self.run_targets(&targets).await
    }

    pub async fn run_targets(&self, targets: &[CollectionTarget]) -> SyncRunSummary {
        let _guard = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, source = self.source.name(), targets = targets.len(), "sync run started");

        let mut categories = Vec::with_capacity(targets.len());
        for target in targets {
            let report = match self.run_category(run_id, target).await {
                Ok(report) => report,
                Err(err) => {
                    error!(%run_id, category = %target.category, error = %err, "category sync aborted");
                    self.log_line(&format!("{} sync aborted: {err}", target.category))
                        .await;
                    CategoryReport::failed(target, &err)
                }
            };
            categories.push(report);
        }

        let snapshot_manifest = self.write_snapshots(run_id, &categories);
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            categories,
            snapshot_manifest,
        };
        info!(
            %run_id,
            ok = summary.is_success(),
            elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
            "sync run finished"
        );
        summary
    }

    /// Only reached from `run_targets`, under the run lock.
    async fn run_category(
        &self,
        run_id: Uuid,
        target: &CollectionTarget,
    ) -> Result<CategoryReport, SyncError> {
        let span = info_span!(
            "sync_category",
            %run_id,
            category = %target.category,
            collection_id = %target.collection_id
        );
        self.run_category_inner(run_id, target).instrument(span).await
    }

    async fn run_category_inner(
        &self,
        run_id: Uuid,
        target: &CollectionTarget,
    ) -> Result<CategoryReport, SyncError> {
        let category = target.category;
        let fetched = self
            .source
            .fetch_collection(run_id, &target.collection_id)
            .await
            .map_err(|source| SyncError::Fetch {
                category,
                collection_id: target.collection_id.clone(),
                source,
            })?;

        let mut report = CategoryReport::new(target);
        report.raw_artifact = Some(self.archive(run_id, category, &fetched).await?);
        fetched
            .error_for_status()
            .map_err(|source| SyncError::Fetch {
                category,
                collection_id: target.collection_id.clone(),
                source,
            })?;

        let submissions = parse_submissions(&fetched.body).map_err(|source| SyncError::Decode {
            category,
            collection_id: target.collection_id.clone(),
            source,
        })?;
        report.fetched = submissions.records.len();
        report.malformed = submissions.malformed;

        if submissions.records.is_empty() {
            info!("no submissions found; nothing to sync");
            self.log_line(&format!("No {category} submissions found. Sync skipped."))
                .await;
            return Ok(report);
        }

        for record in &submissions.records {
            let raw_json = serde_json::to_string(record).unwrap_or_default();
            let Some(remote_id) = remote_id(record) else {
                warn!("submission without an identifier skipped");
                report.skipped += 1;
                report.rows.push(SnapshotRow {
                    record_id: None,
                    remote_id: None,
                    status: "Skipped".to_string(),
                    raw_json,
                });
                continue;
            };

            let (record_id, status) = self.reconcile_record(category, &remote_id, record).await;
            debug!(record_id = %record_id, status = %status, "record reconciled");

            if let Err(err) = self.store.append_sync_log(&record_id, &status).await {
                error!(record_id = %record_id, error = %err, "failed to write sync log row");
            }
            self.log_line(&format!("{record_id} - {status}")).await;

            report.tally(&status);
            report.rows.push(SnapshotRow {
                record_id: Some(record_id),
                remote_id: Some(remote_id),
                status: status.to_string(),
                raw_json,
            });
        }

        info!(
            fetched = report.fetched,
            success = report.success,
            duplicate = report.duplicate,
            updated = report.updated,
            errors = report.errors,
            skipped = report.skipped,
            "category sync finished"
        );
        Ok(report)
    }

    /// Keeps the body verbatim, on disk and in the store, before any parsing.
    async fn archive(
        &self,
        run_id: Uuid,
        category: Category,
        fetched: &FetchedCollection,
    ) -> Result<String, SyncError> {
        let archive_err = |detail: String| SyncError::Archive { category, detail };
        let written = self
            .archive
            .write(&ResponseBody {
                category,
                collection_id: &fetched.collection_id,
                run_id,
                fetched_at: fetched.fetched_at,
                status: fetched.status,
                body: &fetched.body,
            })
            .await
            .map_err(|err| archive_err(format!("{err:#}")))?;
        self.store
            .archive_raw_response(NewRawResponse {
                category,
                collection_id: fetched.collection_id.clone(),
                fetched_at: fetched.fetched_at,
                status: fetched.status,
                content_hash: written.sha256.clone(),
                body: fetched.body.clone(),
            })
            .await
            .map_err(|err| archive_err(err.to_string()))?;
        debug!(
            path = %written.relative_path.display(),
            status = fetched.status,
            bytes = written.bytes,
            "raw response archived"
        );
        Ok(written.relative_path.display().to_string())
    }

    async fn reconcile_record(
        &self,
        category: Category,
        remote_id: &str,
        record: &RemoteRecord,
    ) -> (String, SyncStatus) {
        let codes = self.deriver.derive(category, remote_id, record);
        let fields = map_fields(record, category.schema());
        let record_id = codes.unique_id.clone();

        let status = match category {
            Category::Tree => {
                let raw = raw_gps(record);
                let gps = clean_gps(raw.as_deref());
                if gps.is_empty() && raw.is_some() {
                    warn!(record_id = %record_id, raw_gps = ?raw, "unparseable GPS stored as empty");
                }
                let candidate = NewTree::from_parts(Some(remote_id.to_string()), Some(gps), codes, fields);
                self.upsert_tree(candidate).await
            }
            Category::Seed => {
                let candidate = NewSeed::from_parts(Some(remote_id.to_string()), codes, fields);
                status_from_insert(self.store.insert_seed(candidate).await.map(|_| ()))
            }
        };
        (record_id, status)
    }

    async fn upsert_tree(&self, candidate: NewTree) -> SyncStatus {
        let tree_id = candidate.tree_id.clone();
        let remote_id = candidate.remote_id.clone();
        let gps = candidate.gps.clone();
        match self.store.insert_tree(candidate).await {
            Err(err) if err.is_conflict() && self.conflict_policy == ConflictPolicy::RefreshGps => {
                self.refresh_gps(&tree_id, remote_id.as_deref(), gps.as_deref())
                    .await
            }
            result => status_from_insert(result.map(|_| ())),
        }
    }

    async fn refresh_gps(&self, tree_id: &str, remote_id: Option<&str>, gps: Option<&str>) -> SyncStatus {
        let Some(gps) = gps else {
            return SyncStatus::Duplicate;
        };
        let existing = match self.store.tree(tree_id).await {
            Ok(existing) => existing,
            Err(err) => return SyncStatus::Error(err.to_string()),
        };
        let Some(existing) = existing else {
            // the collision was on the remote id of a differently keyed tree
            return SyncStatus::Duplicate;
        };
        if existing.remote_id.as_deref() != remote_id || existing.gps.as_deref() == Some(gps) {
            return SyncStatus::Duplicate;
        }
        match self.store.update_tree_gps(tree_id, gps).await {
            Ok(true) => SyncStatus::Updated,
            Ok(false) => SyncStatus::Duplicate,
            Err(err) => SyncStatus::Error(err.to_string()),
        }
    }

    async fn log_line(&self, message: &str) {
        if let Err(err) = self.run_log.append(message).await {
            warn!(path = %self.run_log.path().display(), error = %format!("{err:#}"), "run log write failed");
        }
    }

    fn write_snapshots(&self, run_id: Uuid, categories: &[CategoryReport]) -> Option<String> {
        let run_dir = self.reports_dir.as_ref()?.join(run_id.to_string());
        match write_run_snapshots(&run_dir, categories) {
            Ok(path) => Some(path.display().to_string()),
            Err(err) => {
                warn!(%run_id, error = %format!("{err:#}"), "backup snapshot failed");
                None
            }
        }
    }
}

/// One Parquet file per category that completed, plus `manifest.json`.
fn write_run_snapshots(run_dir: &Path, categories: &[CategoryReport]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(run_dir)
        .with_context(|| format!("creating {}", run_dir.display()))?;
    let mut files = Vec::new();
    for report in categories.iter().filter(|c| c.fatal_error.is_none()) {
        let path = run_dir.join(snapshot_file_name(report.category));
        write_snapshot(&path, &report.rows)?;
        files.push(manifest_entry(
            report.category.as_str(),
            run_dir,
            &path,
            report.rows.len(),
        )?);
    }
    write_manifest(run_dir, files)
}

fn status_from_insert(result: Result<(), StoreError>) -> SyncStatus {
    match result {
        Ok(()) => SyncStatus::Success,
        Err(err) if err.is_conflict() => SyncStatus::Duplicate,
        Err(err) => SyncStatus::Error(err.to_string()),
    }
}

/// The `GPS` question text, or `_geolocation` (`[lat, lon]`) when the form
/// only carries Kobo's metadata field.
fn raw_gps(record: &RemoteRecord) -> Option<String> {
    if let Some(text) = first_text(record, GPS_FIELDS) {
        return Some(text);
    }
    match record.get(GEOLOCATION_FIELD) {
        Some(JsonValue::Array(parts)) if parts.len() >= 2 => {
            match (parts[0].as_f64(), parts[1].as_f64()) {
                (Some(lat), Some(lon)) => Some(format!("{lat} {lon}")),
                _ => None,
            }
        }
        _ => None,
    }
}
