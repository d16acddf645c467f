//! The record store: trees, seeds, the sync audit trail and raw-response archive.
//!
//! Uniqueness of stable ids and remote ids is enforced here and nowhere else;
//! callers learn about collisions through [`StoreError::Conflict`].

use std::fmt;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;
use ttag_core::{
    Category, CoercionError, NewRawResponse, NewSeed, NewTree, RawResponse, Seed, SyncLogEntry,
    SyncStatus, Tree,
};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {key} already exists")]
    Conflict { entity: &'static str, key: String },
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error(transparent)]
    Coercion(#[from] CoercionError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub(crate) fn entity_name(category: Category) -> &'static str {
    match category {
        Category::Tree => "Tree",
        Category::Seed => "Seed",
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new tree in its own transaction. Fails with `Conflict` when
    /// the tree id or the remote id is already taken.
    async fn insert_tree(&self, tree: NewTree) -> Result<Tree, StoreError>;
    async fn insert_seed(&self, seed: NewSeed) -> Result<Seed, StoreError>;

    async fn tree(&self, tree_id: &str) -> Result<Option<Tree>, StoreError>;
    async fn seed(&self, seed_id: &str) -> Result<Option<Seed>, StoreError>;
    async fn list_trees(&self) -> Result<Vec<Tree>, StoreError>;
    async fn list_seeds(&self) -> Result<Vec<Seed>, StoreError>;

    /// Replaces only the GPS column. Returns `false` when the tree does not exist.
    async fn update_tree_gps(&self, tree_id: &str, gps: &str) -> Result<bool, StoreError>;

    /// Returns `false` when nothing was deleted. Seeds referencing the tree are untouched.
    async fn delete_tree(&self, tree_id: &str) -> Result<bool, StoreError>;
    async fn delete_seed(&self, seed_id: &str) -> Result<bool, StoreError>;

    async fn append_sync_log(
        &self,
        record_id: &str,
        status: &SyncStatus,
    ) -> Result<SyncLogEntry, StoreError>;
    /// Most recent entries first.
    async fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, StoreError>;

    async fn archive_raw_response(&self, raw: NewRawResponse) -> Result<RawResponse, StoreError>;
    async fn latest_raw_response(&self, category: Category)
        -> Result<Option<RawResponse>, StoreError>;
}

/// Connection parameters for the relational store.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("name", &self.name)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }
}
