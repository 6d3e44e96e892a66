//! Vector Index (spec.md §4.2) — semantic search over knowledge items, with
//! metadata that mirrors the catalog.
//!
//! Grounded on the teacher's embedded vector memory (`architehc-selfware`
//! `src/vector_store.rs`): an `EmbeddingProvider` trait with a dependency-free
//! TF-IDF fallback, and a brute-force cosine-similarity `VectorIndex`. The
//! teacher's `CodeChunk`/`VectorCollection` machinery is code-search specific
//! and has no counterpart here; what's kept is the embedding/search
//! abstraction, retargeted at [`KnowledgeItem`] metadata.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CatalogError;
use crate::model::KnowledgeItem;

pub const EMBEDDING_DIM: usize = 256;

/// Pluggable embedding backend (spec.md §1: the embedding model is an
/// external collaborator, contract-only).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Vec<f32>;
}

/// Dependency-free feature-hashing embedding (the "hashing trick"): tokens
/// are mapped into the embedding directly by hash rather than through a
/// growing vocabulary table, so two providers never disagree about which
/// dimension a word lands in regardless of what order text was indexed in —
/// unlike a vocabulary-table scheme, there's nothing to keep in sync across
/// a process restart.
pub struct TfIdfEmbeddingProvider {
    dimension: usize,
}

impl TfIdfEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    fn hash_token(token: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for TfIdfEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for TfIdfEmbeddingProvider {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0f32; self.dimension];
        if tokens.is_empty() {
            return embedding;
        }

        let mut counts: HashMap<u64, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(Self::hash_token(token)).or_default() += 1;
        }

        // Log-dampened term weight, signed by a second bit of the same hash
        // (the usual hashing-trick refinement: random signs cancel out
        // collisions instead of letting them always add constructively).
        for (hash, count) in counts {
            let idx = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign * (1.0 + (count as f32).ln());
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

/// Convenience fields strictly derivable from the catalog entry (spec.md
/// §3 invariants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeMetadata {
    pub full_knowledge: KnowledgeItem,
    pub knowledge_id: String,
    pub has_learnings: bool,
    pub learning_count: usize,
    pub trust_score: f64,
}

impl KnowledgeMetadata {
    pub fn from_item(item: &KnowledgeItem) -> Self {
        Self {
            full_knowledge: item.clone(),
            knowledge_id: item.knowledge_id.clone(),
            has_learnings: !item.kb_learnings.is_empty(),
            learning_count: item.kb_learnings.len(),
            trust_score: item.trust_score,
        }
    }
}

/// A metadata predicate usable in [`VectorIndex::query`]'s `filter`
/// argument: equality or numeric comparison on a convenience field.
#[derive(Debug, Clone)]
pub enum MetadataFilter {
    TrustScoreAtLeast(f64),
    HasLearnings(bool),
}

impl MetadataFilter {
    fn matches(&self, meta: &KnowledgeMetadata) -> bool {
        match self {
            MetadataFilter::TrustScoreAtLeast(min) => meta.trust_score >= *min,
            MetadataFilter::HasLearnings(expected) => meta.has_learnings == *expected,
        }
    }
}

struct Entry {
    embedding: Vec<f32>,
    metadata: KnowledgeMetadata,
}

/// Semantic store over knowledge items. Brute-force cosine search, which is
/// adequate at catalog scale (hundreds to low thousands of items) and keeps
/// the contract — `index`, `query`, `update_metadata` — dependency-free.
pub struct VectorIndex {
    provider: Box<dyn EmbeddingProvider>,
    entries: RwLock<HashMap<String, Entry>>,
    storage_path: Option<PathBuf>,
}

impl VectorIndex {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            entries: RwLock::new(HashMap::new()),
            storage_path: None,
        }
    }

    pub fn with_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Upsert: embed `embedding_text` and store `metadata` under `id`.
    pub async fn index(&self, id: &str, embedding_text: &str, metadata: KnowledgeMetadata) {
        let embedding = self.provider.embed(embedding_text).await;
        self.entries.write().unwrap().insert(
            id.to_string(),
            Entry { embedding, metadata },
        );
    }

    /// Nearest-neighbor search, optionally restricted by `filter`. Results
    /// are sorted by descending score with a stable ascending-id tie-break
    /// (spec.md §4.3).
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<(String, f32, KnowledgeMetadata)> {
        let query_embedding = self.provider.embed(text).await;
        let entries = self.entries.read().unwrap();

        let mut scored: Vec<(String, f32, KnowledgeMetadata)> = entries
            .iter()
            .filter(|(_, entry)| filter.map(|f| f.matches(&entry.metadata)).unwrap_or(true))
            .map(|(id, entry)| {
                (
                    id.clone(),
                    cosine_similarity(&query_embedding, &entry.embedding),
                    entry.metadata.clone(),
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }

    /// Replace an entry's metadata without re-embedding (spec.md §4.2).
    pub fn update_metadata(&self, id: &str, metadata: KnowledgeMetadata) -> Result<(), CatalogError> {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.metadata = metadata;
                Ok(())
            }
            None => Err(CatalogError::UnknownId(id.to_string())),
        }
    }

    pub fn get_metadata(&self, id: &str) -> Option<KnowledgeMetadata> {
        self.entries.read().unwrap().get(id).map(|e| e.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist embeddings + metadata to `storage_path`, if configured.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.entries.read().unwrap();
        let dump: Vec<PersistedEntry> = entries
            .iter()
            .map(|(id, e)| PersistedEntry {
                id: id.clone(),
                embedding: e.embedding.clone(),
                metadata: e.metadata.clone(),
            })
            .collect();
        let json = serde_json::to_string(&dump)?;
        std::fs::write(path.join("index.json"), json)
    }

    pub fn load(&self, path: &Path) -> std::io::Result<()> {
        let file = path.join("index.json");
        if !file.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(file)?;
        let dump: Vec<PersistedEntry> = serde_json::from_str(&raw)?;
        let mut entries = self.entries.write().unwrap();
        for e in dump {
            entries.insert(
                e.id,
                Entry {
                    embedding: e.embedding,
                    metadata: e.metadata,
                },
            );
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    id: String,
    embedding: Vec<f32>,
    metadata: KnowledgeMetadata,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn item(id: &str, desc: &str) -> KnowledgeItem {
        KnowledgeItem {
            knowledge_id: id.into(),
            description: desc.into(),
            ui_location: "menu".into(),
            action_sequence: vec!["click".into()],
            shortcut: None,
            prerequisites: BTreeSet::new(),
            output_state: "done".into(),
            doc_citation: "doc".into(),
            parameters: BTreeMap::new(),
            kb_learnings: Vec::new(),
            trust_score: 1.0,
        }
    }

    #[tokio::test]
    async fn query_prefers_closer_text_and_breaks_ties_by_id() {
        let index = VectorIndex::new(Box::new(TfIdfEmbeddingProvider::new()));
        let a = item("a_open_files", "open a file dialog and browse");
        let b = item("b_save_file", "save the current document to disk");

        index
            .index(&a.knowledge_id, &a.embedding_text(), KnowledgeMetadata::from_item(&a))
            .await;
        index
            .index(&b.knowledge_id, &b.embedding_text(), KnowledgeMetadata::from_item(&b))
            .await;

        let results = index.query("open a file dialog", 5, None).await;
        assert_eq!(results[0].0, "a_open_files");
    }

    #[test]
    fn update_metadata_is_idempotent() {
        let index = VectorIndex::new(Box::new(TfIdfEmbeddingProvider::new()));
        let it = item("open_files", "open files");
        let meta = KnowledgeMetadata::from_item(&it);

        // Insert directly via the private map through index() in an async
        // context is required for embedding; for this idempotence check we
        // only exercise update_metadata on a pre-seeded id.
        index.entries.write().unwrap().insert(
            "open_files".to_string(),
            Entry {
                embedding: vec![0.0; EMBEDDING_DIM],
                metadata: meta.clone(),
            },
        );

        index.update_metadata("open_files", meta.clone()).unwrap();
        let first = index.get_metadata("open_files").unwrap();
        index.update_metadata("open_files", meta.clone()).unwrap();
        let second = index.get_metadata("open_files").unwrap();
        assert_eq!(first.trust_score, second.trust_score);
        assert_eq!(first.learning_count, second.learning_count);
    }

    #[test]
    fn update_metadata_unknown_id_errors() {
        let index = VectorIndex::new(Box::new(TfIdfEmbeddingProvider::new()));
        let it = item("x", "x");
        let meta = KnowledgeMetadata::from_item(&it);
        assert!(index.update_metadata("missing", meta).is_err());
    }
}
