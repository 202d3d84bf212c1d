use super::schedule_types::SUBJECT_PALETTE;
use crate::store::{Document, Fields, WriteBatch};
use log::{debug, info};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectResolution {
    pub id: String,
    pub created: bool,
}

/// Maps subject names to ids for one import run.
///
/// Names are compared after trimming and lowercasing. Known subjects come from
/// a snapshot taken before the run; new ones are queued on the caller's batch
/// and remembered so later entries reuse them.
pub struct SubjectResolver {
    collection: String,
    known: HashMap<String, String>,
    existing_count: usize,
    created: usize,
}

impl SubjectResolver {
    pub fn from_snapshot(collection: &str, existing: &[Document]) -> Self {
        let mut known = HashMap::new();
        for doc in existing {
            let name = doc.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            // Later documents win when two share a normalized name
            known.insert(normalize_subject_name(name), doc.id.clone());
        }
        debug!("Loaded {} existing subjects from {}", existing.len(), collection);
        Self { collection: collection.to_string(), known, existing_count: existing.len(), created: 0 }
    }

    /// Id for `name`, queueing a new subject on `batch` the first time it is seen
    pub fn resolve(
        &mut self,
        name: &str,
        batch: &mut WriteBatch,
        new_id: impl FnOnce() -> String,
    ) -> SubjectResolution {
        let key = normalize_subject_name(name);
        if let Some(id) = self.known.get(&key) {
            return SubjectResolution { id: id.clone(), created: false };
        }

        let id = new_id();
        let color = SUBJECT_PALETTE[(self.existing_count + self.created) % SUBJECT_PALETTE.len()];
        let display_name = name.trim();

        let mut fields = Fields::new();
        fields.insert("name".to_string(), display_name.into());
        fields.insert("color".to_string(), color.into());
        batch.create(&self.collection, &id, fields);

        info!("New subject '{}' ({}) with color {}", display_name, id, color);
        self.known.insert(key, id.clone());
        self.created += 1;
        SubjectResolution { id, created: true }
    }

    pub fn created_count(&self) -> usize {
        self.created
    }
}

pub fn normalize_subject_name(name: &str) -> String {
    name.trim().to_lowercase()
}
