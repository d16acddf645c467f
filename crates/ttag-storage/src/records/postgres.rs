//! PostgreSQL-backed record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use ttag_core::{
    coerce_attributes, Attributes, Category, NewRawResponse, NewSeed, NewTree, RawResponse, Seed,
    SyncLogEntry, SyncStatus, Tree,
};

use super::{entity_name, DatabaseConfig, RecordStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(config.connect_options())
            .await?;
        info!(host = %config.host, database = %config.name, "connected to record store");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps unique violations onto `Conflict`, everything else onto `Database`.
fn classify_insert_error(err: sqlx::Error, category: Category, key: &str) -> StoreError {
    let unique_violation = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation());
    if unique_violation {
        StoreError::Conflict {
            entity: entity_name(category),
            key: key.to_string(),
        }
    } else {
        StoreError::Database(err)
    }
}

const TREE_COLUMNS: &str = "tree_id, remote_id, gps, region_code, reserve_code, species_code, qr_code_url, attributes, created_at";
const SEED_COLUMNS: &str =
    "seed_id, remote_id, parent_tree_id, species_code, qr_code_url, attributes, created_at";

fn tree_from_row(row: &PgRow) -> Result<Tree, sqlx::Error> {
    let attributes: Json<Attributes> = row.try_get("attributes")?;
    Ok(Tree {
        tree_id: row.try_get("tree_id")?,
        remote_id: row.try_get("remote_id")?,
        gps: row.try_get("gps")?,
        region_code: row.try_get("region_code")?,
        reserve_code: row.try_get("reserve_code")?,
        species_code: row.try_get("species_code")?,
        qr_code_url: row.try_get("qr_code_url")?,
        created_at: row.try_get("created_at")?,
        attributes: attributes.0,
    })
}

fn seed_from_row(row: &PgRow) -> Result<Seed, sqlx::Error> {
    let attributes: Json<Attributes> = row.try_get("attributes")?;
    Ok(Seed {
        seed_id: row.try_get("seed_id")?,
        remote_id: row.try_get("remote_id")?,
        parent_tree_id: row.try_get("parent_tree_id")?,
        species_code: row.try_get("species_code")?,
        qr_code_url: row.try_get("qr_code_url")?,
        created_at: row.try_get("created_at")?,
        attributes: attributes.0,
    })
}

fn sync_log_from_row(row: &PgRow) -> Result<SyncLogEntry, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status.parse().unwrap_or(SyncStatus::Error(status));
    Ok(SyncLogEntry {
        sync_id: row.try_get("sync_id")?,
        record_id: row.try_get("record_id")?,
        timestamp: row.try_get("logged_at")?,
        status,
    })
}

fn raw_response_from_row(row: &PgRow) -> Result<RawResponse, sqlx::Error> {
    let category: String = row.try_get("category")?;
    let category = match category.as_str() {
        "seed" => Category::Seed,
        _ => Category::Tree,
    };
    Ok(RawResponse {
        id: row.try_get("id")?,
        category,
        collection_id: row.try_get("collection_id")?,
        fetched_at: row.try_get("fetched_at")?,
        status: status_from_column(row.try_get("status_code")?),
        content_hash: row.try_get("content_hash")?,
        body: row.try_get("body")?,
    })
}

fn status_from_column(code: i32) -> u16 {
    u16::try_from(code).unwrap_or_default()
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_tree(&self, tree: NewTree) -> Result<Tree, StoreError> {
        let attributes = coerce_attributes(&tree.fields)?;
        let mut tx = self.pool.begin().await?;
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO trees (tree_id, remote_id, gps, region_code, reserve_code,
                               species_code, qr_code_url, attributes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING created_at
            "#,
        )
        .bind(&tree.tree_id)
        .bind(&tree.remote_id)
        .bind(&tree.gps)
        .bind(&tree.region_code)
        .bind(&tree.reserve_code)
        .bind(&tree.species_code)
        .bind(&tree.qr_code_url)
        .bind(Json(&attributes))
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| classify_insert_error(err, Category::Tree, &tree.tree_id))?;
        tx.commit().await?;
        Ok(tree.into_tree(attributes, created_at))
    }

    async fn insert_seed(&self, seed: NewSeed) -> Result<Seed, StoreError> {
        let attributes = coerce_attributes(&seed.fields)?;
        let mut tx = self.pool.begin().await?;
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO seeds (seed_id, remote_id, parent_tree_id, species_code,
                               qr_code_url, attributes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created_at
            "#,
        )
        .bind(&seed.seed_id)
        .bind(&seed.remote_id)
        .bind(&seed.parent_tree_id)
        .bind(&seed.species_code)
        .bind(&seed.qr_code_url)
        .bind(Json(&attributes))
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| classify_insert_error(err, Category::Seed, &seed.seed_id))?;
        tx.commit().await?;
        Ok(seed.into_seed(attributes, created_at))
    }

    async fn tree(&self, tree_id: &str) -> Result<Option<Tree>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TREE_COLUMNS} FROM trees WHERE tree_id = $1"))
            .bind(tree_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(tree_from_row).transpose()?)
    }

    async fn seed(&self, seed_id: &str) -> Result<Option<Seed>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SEED_COLUMNS} FROM seeds WHERE seed_id = $1"))
            .bind(seed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(seed_from_row).transpose()?)
    }

    async fn list_trees(&self) -> Result<Vec<Tree>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TREE_COLUMNS} FROM trees ORDER BY created_at, tree_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(tree_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_seeds(&self) -> Result<Vec<Seed>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SEED_COLUMNS} FROM seeds ORDER BY created_at, seed_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(seed_from_row).collect::<Result<_, _>>()?)
    }

    async fn update_tree_gps(&self, tree_id: &str, gps: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE trees SET gps = $2 WHERE tree_id = $1")
            .bind(tree_id)
            .bind(gps)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_tree(&self, tree_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM trees WHERE tree_id = $1")
            .bind(tree_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_seed(&self, seed_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM seeds WHERE seed_id = $1")
            .bind(seed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_sync_log(
        &self,
        record_id: &str,
        status: &SyncStatus,
    ) -> Result<SyncLogEntry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sync_log (record_id, status)
            VALUES ($1, $2)
            RETURNING sync_id, record_id, logged_at, status
            "#,
        )
        .bind(record_id)
        .bind(status.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(sync_log_from_row(&row)?)
    }

    async fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sync_id, record_id, logged_at, status
              FROM sync_log
             ORDER BY sync_id DESC
             LIMIT $1
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(sync_log_from_row).collect::<Result<_, _>>()?)
    }

    async fn archive_raw_response(&self, raw: NewRawResponse) -> Result<RawResponse, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO raw_responses (category, collection_id, fetched_at, status_code,
                                       content_hash, body)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(raw.category.as_str())
        .bind(&raw.collection_id)
        .bind(raw.fetched_at)
        .bind(i32::from(raw.status))
        .bind(&raw.content_hash)
        .bind(&raw.body)
        .fetch_one(&self.pool)
        .await?;
        Ok(RawResponse {
            id,
            category: raw.category,
            collection_id: raw.collection_id,
            fetched_at: raw.fetched_at,
            status: raw.status,
            content_hash: raw.content_hash,
            body: raw.body,
        })
    }

    async fn latest_raw_response(
        &self,
        category: Category,
    ) -> Result<Option<RawResponse>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, category, collection_id, fetched_at, status_code, content_hash, body
              FROM raw_responses
             WHERE category = $1
             ORDER BY id DESC
             LIMIT 1
            "#,
        )
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(raw_response_from_row).transpose()?)
    }
}
