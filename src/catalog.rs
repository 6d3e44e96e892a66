//! Catalog Store (spec.md §4.1) — the authoritative JSON mapping from
//! `knowledge_id` to [`KnowledgeItem`].
//!
//! Single-writer, read-modify-write on the whole file. Writes are atomic:
//! serialize to a temp file in the same directory, then `rename` over the
//! real path, so a crash mid-write never leaves a truncated catalog
//! (spec.md §7, `CatalogIOError` policy: "no partial state").

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::CatalogError;
use crate::model::KnowledgeItem;

pub struct CatalogStore {
    path: PathBuf,
    items: BTreeMap<String, KnowledgeItem>,
}

impl CatalogStore {
    /// Load the catalog from `path`, creating an empty in-memory catalog if
    /// the file does not yet exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        if !path.exists() {
            info!(path = %path.display(), "catalog file does not exist, starting empty");
            return Ok(Self {
                path,
                items: BTreeMap::new(),
            });
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let items: Vec<KnowledgeItem> = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::Corrupt(e.to_string()))?;
        info!(path = %path.display(), count = items.len(), "loaded catalog");
        Ok(Self {
            path,
            items: items.into_iter().map(|i| (i.knowledge_id.clone(), i)).collect(),
        })
    }

    /// All knowledge items, in `knowledge_id` order.
    pub fn load_all(&self) -> Vec<KnowledgeItem> {
        self.items.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<KnowledgeItem, CatalogError> {
        self.items
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownId(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Read-modify-write the whole file with `item` upserted, then persist
    /// atomically.
    pub fn update(&mut self, item: KnowledgeItem) -> Result<(), CatalogError> {
        self.items.insert(item.knowledge_id.clone(), item);
        self.persist()
    }

    fn persist(&self) -> Result<(), CatalogError> {
        let items: Vec<&KnowledgeItem> = self.items.values().collect();
        let json = serde_json::to_string_pretty(&items)
            .map_err(|e| CatalogError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CatalogError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        }

        atomic_write(&self.path, json.as_bytes()).map_err(|source| {
            warn!(path = %self.path.display(), error = %source, "catalog write failed");
            CatalogError::Write {
                path: self.path.display().to_string(),
                source,
            }
        })
    }
}

/// Write `contents` to `path` via a temp file in the same directory
/// followed by a rename, so readers never observe a partial write.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FailureLearning;
    use crate::model::Action;
    use chrono::Utc;
    use std::collections::{BTreeMap as Map, BTreeSet};

    fn sample_item(id: &str) -> KnowledgeItem {
        KnowledgeItem {
            knowledge_id: id.to_string(),
            description: "desc".into(),
            ui_location: "menu".into(),
            action_sequence: vec!["click".into()],
            shortcut: None,
            prerequisites: BTreeSet::new(),
            output_state: "done".into(),
            doc_citation: "doc".into(),
            parameters: Map::new(),
            kb_learnings: Vec::new(),
            trust_score: 1.0,
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let mut store = CatalogStore::load(&path).unwrap();
        store.update(sample_item("open_files")).unwrap();

        let reloaded = CatalogStore::load(&path).unwrap();
        assert_eq!(reloaded.get("open_files").unwrap().trust_score, 1.0);
    }

    #[test]
    fn unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::load(dir.path().join("catalog.json")).unwrap();
        assert!(matches!(store.get("missing"), Err(CatalogError::UnknownId(_))));
    }

    #[test]
    fn attach_learning_decays_trust_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let mut store = CatalogStore::load(&path).unwrap();
        let mut item = sample_item("open_files");
        store.update(item.clone()).unwrap();

        item = store.get("open_files").unwrap();
        item.attach_learning(FailureLearning {
            task: "task".into(),
            step_num: 0,
            original_action: Action {
                tool_name: "Click-Tool".into(),
                tool_arguments: Map::new(),
                reasoning: "r".into(),
                kb_source: Some("open_files".into()),
            },
            original_error: "Button not found".into(),
            recovery_approach: String::new(),
            timestamp: Utc::now(),
        });
        store.update(item).unwrap();

        let reloaded = store.get("open_files").unwrap();
        assert_eq!(reloaded.trust_score, 0.95);
        assert_eq!(reloaded.kb_learnings.len(), 1);
    }
}
