//! Sync orchestration: configuration, the reconciler, run logs, backup
//! snapshots and the optional cron scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use ttag_adapters::{FixtureSource, KoboConfig, KoboSource, SubmissionSource};
use ttag_core::Category;
use ttag_storage::{MemoryRecordStore, PgRecordStore, RecordStore};

pub mod config;
pub mod reconciler;
pub mod run_log;
pub mod snapshot;

pub use config::{ConfigError, ConflictPolicy, KoboSettings, StoreBackend, SyncConfig};
pub use reconciler::{
    CategoryReport, CollectionTarget, Reconciler, SyncError, SyncRunSummary,
};
pub use run_log::RunLog;
pub use snapshot::{SnapshotManifest, SnapshotManifestFile, SnapshotRow};

pub const CRATE_NAME: &str = "ttag-sync";

/// Opens the configured store. Postgres schemas are migrated on connect.
pub async fn connect_store(config: &SyncConfig) -> Result<Arc<dyn RecordStore>> {
    match &config.store {
        StoreBackend::Postgres(db) => {
            let store = PgRecordStore::connect(db)
                .await
                .context("connecting to record store")?;
            store.migrate().await.context("applying migrations")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory record store; nothing survives a restart");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}

pub fn build_source(config: &SyncConfig) -> Result<Arc<dyn SubmissionSource>> {
    if let Some(dir) = &config.fixtures_dir {
        info!(dir = %dir.display(), "reading submissions from fixtures");
        return Ok(Arc::new(FixtureSource::new(dir.clone())));
    }
    let source = KoboSource::new(KoboConfig {
        api_base: config.kobo.api_base.clone(),
        token: config.kobo.token.clone(),
        user_agent: config.user_agent.clone(),
        timeout: Duration::from_secs(config.http_timeout_secs),
    })
    .context("building kobo client")?;
    Ok(Arc::new(source))
}

pub fn build_reconciler(config: &SyncConfig, store: Arc<dyn RecordStore>) -> Result<Reconciler> {
    let source = build_source(config)?;
    let deriver = config.deriver()?;
    let targets = Category::ALL
        .into_iter()
        .map(|category| CollectionTarget::new(category, config.collection_id(category)))
        .collect();
    Ok(Reconciler::new(store, source, deriver, targets)
        .with_artifacts_dir(config.artifacts_dir.join("raw"))
        .with_run_log(config.sync_log_path.clone())
        .with_reports_dir(config.reports_dir.clone())
        .with_conflict_policy(config.conflict_policy))
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    reconciler: Arc<Reconciler>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in &config.sync_crons {
        let reconciler = Arc::clone(&reconciler);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let reconciler = Arc::clone(&reconciler);
            Box::pin(async move {
                let summary = reconciler.run_all().await;
                if !summary.is_success() {
                    warn!(run_id = %summary.run_id, errors = ?summary.fatal_errors(), "scheduled sync had failures");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(cron = %cron, "scheduled sync job");
    }
    Ok(Some(sched))
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env()?;
    let store = connect_store(&config).await?;
    let reconciler = build_reconciler(&config, store)?;
    Ok(reconciler.run_all().await)
}
