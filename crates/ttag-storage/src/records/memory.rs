//! In-process record store with the same uniqueness rules as PostgreSQL.
//! Used for fixture-driven local runs and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use ttag_core::{
    coerce_attributes, Category, NewRawResponse, NewSeed, NewTree, RawResponse, Seed,
    SyncLogEntry, SyncStatus, Tree,
};

use super::{entity_name, RecordStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    trees: BTreeMap<String, Tree>,
    tree_remote_ids: HashMap<String, String>,
    seeds: BTreeMap<String, Seed>,
    seed_remote_ids: HashMap<String, String>,
    sync_log: Vec<SyncLogEntry>,
    raw_responses: Vec<RawResponse>,
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(category: Category, key: &str) -> StoreError {
    StoreError::Conflict {
        entity: entity_name(category),
        key: key.to_string(),
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_tree(&self, tree: NewTree) -> Result<Tree, StoreError> {
        let attributes = coerce_attributes(&tree.fields)?;
        let mut state = self.state.lock().await;
        if state.trees.contains_key(&tree.tree_id) {
            return Err(conflict(Category::Tree, &tree.tree_id));
        }
        if let Some(remote_id) = &tree.remote_id {
            if state.tree_remote_ids.contains_key(remote_id) {
                return Err(conflict(Category::Tree, remote_id));
            }
        }

        let tree = tree.into_tree(attributes, Utc::now());
        if let Some(remote_id) = &tree.remote_id {
            state
                .tree_remote_ids
                .insert(remote_id.clone(), tree.tree_id.clone());
        }
        state.trees.insert(tree.tree_id.clone(), tree.clone());
        Ok(tree)
    }

    async fn insert_seed(&self, seed: NewSeed) -> Result<Seed, StoreError> {
        let attributes = coerce_attributes(&seed.fields)?;
        let mut state = self.state.lock().await;
        if state.seeds.contains_key(&seed.seed_id) {
            return Err(conflict(Category::Seed, &seed.seed_id));
        }
        if let Some(remote_id) = &seed.remote_id {
            if state.seed_remote_ids.contains_key(remote_id) {
                return Err(conflict(Category::Seed, remote_id));
            }
        }

        let seed = seed.into_seed(attributes, Utc::now());
        if let Some(remote_id) = &seed.remote_id {
            state
                .seed_remote_ids
                .insert(remote_id.clone(), seed.seed_id.clone());
        }
        state.seeds.insert(seed.seed_id.clone(), seed.clone());
        Ok(seed)
    }

    async fn tree(&self, tree_id: &str) -> Result<Option<Tree>, StoreError> {
        Ok(self.state.lock().await.trees.get(tree_id).cloned())
    }

    async fn seed(&self, seed_id: &str) -> Result<Option<Seed>, StoreError> {
        Ok(self.state.lock().await.seeds.get(seed_id).cloned())
    }

    async fn list_trees(&self) -> Result<Vec<Tree>, StoreError> {
        let mut trees: Vec<Tree> = self.state.lock().await.trees.values().cloned().collect();
        trees.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.tree_id.cmp(&b.tree_id)));
        Ok(trees)
    }

    async fn list_seeds(&self) -> Result<Vec<Seed>, StoreError> {
        let mut seeds: Vec<Seed> = self.state.lock().await.seeds.values().cloned().collect();
        seeds.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seed_id.cmp(&b.seed_id)));
        Ok(seeds)
    }

    async fn update_tree_gps(&self, tree_id: &str, gps: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.trees.get_mut(tree_id) {
            Some(tree) => {
                tree.gps = Some(gps.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_tree(&self, tree_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(tree) = state.trees.remove(tree_id) else {
            return Ok(false);
        };
        if let Some(remote_id) = tree.remote_id {
            state.tree_remote_ids.remove(&remote_id);
        }
        Ok(true)
    }

    async fn delete_seed(&self, seed_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(seed) = state.seeds.remove(seed_id) else {
            return Ok(false);
        };
        if let Some(remote_id) = seed.remote_id {
            state.seed_remote_ids.remove(&remote_id);
        }
        Ok(true)
    }

    async fn append_sync_log(
        &self,
        record_id: &str,
        status: &SyncStatus,
    ) -> Result<SyncLogEntry, StoreError> {
        let mut state = self.state.lock().await;
        let entry = SyncLogEntry {
            sync_id: state.sync_log.len() as i64 + 1,
            record_id: record_id.to_string(),
            timestamp: Utc::now(),
            status: status.clone(),
        };
        state.sync_log.push(entry.clone());
        Ok(entry)
    }

    async fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sync_log.iter().rev().take(limit).cloned().collect())
    }

    async fn archive_raw_response(&self, raw: NewRawResponse) -> Result<RawResponse, StoreError> {
        let mut state = self.state.lock().await;
        let archived = RawResponse {
            id: state.raw_responses.len() as i64 + 1,
            category: raw.category,
            collection_id: raw.collection_id,
            fetched_at: raw.fetched_at,
            status: raw.status,
            content_hash: raw.content_hash,
            body: raw.body,
        };
        state.raw_responses.push(archived.clone());
        Ok(archived)
    }

    async fn latest_raw_response(
        &self,
        category: Category,
    ) -> Result<Option<RawResponse>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .raw_responses
            .iter()
            .rev()
            .find(|raw| raw.category == category)
            .cloned())
    }
}
