//! In-process document store used for local runs and tests.

use super::{Document, DocumentStore, FieldFilter, FieldValue, Fields, WriteBatch};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing batches
    pub fn insert(&self, collection: &str, document_id: &str, fields: Fields) -> Result<()> {
        let mut collections = self.lock()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(document_id.to_string(), fields);
        Ok(())
    }

    pub fn documents(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.lock()?;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document { id: id.clone(), fields: fields.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make every following commit fail without applying anything
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Collections>> {
        self.collections.lock().map_err(|e| anyhow!("Failed to acquire store lock: {}", e))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        self.documents(collection)
    }

    async fn find_first(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Option<Document>> {
        Ok(self
            .documents(collection)?
            .into_iter()
            .find(|doc| filters.iter().all(|filter| filter.matches(doc))))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(anyhow!("Commit rejected by memory store"));
        }

        let now = FieldValue::timestamp(&Utc::now());
        let mut collections = self.lock()?;
        let count = batch.len();
        for write in batch.into_writes() {
            let mut fields = write.fields;
            for field in write.server_timestamps {
                fields.insert(field, now.clone());
            }
            collections.entry(write.collection).or_default().insert(write.document_id, fields);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Memory store committed {} writes", count);
        Ok(())
    }
}
