//! Knowledge Retriever (spec.md §4.3) — semantic retrieval plus the
//! catalog→index sync that keeps the vector store a pure function of the
//! catalog (spec.md §3 invariants, §8 property 1).

use std::sync::Arc;
use tracing::debug;

use crate::catalog::CatalogStore;
use crate::errors::CatalogError;
use crate::model::KnowledgeItem;
use crate::vector_index::{KnowledgeMetadata, MetadataFilter, VectorIndex};

pub struct KnowledgeRetriever {
    catalog: Arc<parking_lot::RwLock<CatalogStore>>,
    index: Arc<VectorIndex>,
}

impl KnowledgeRetriever {
    pub fn new(catalog: Arc<parking_lot::RwLock<CatalogStore>>, index: Arc<VectorIndex>) -> Self {
        Self { catalog, index }
    }

    /// Index every item currently in the catalog. Used once at startup to
    /// bring a freshly loaded vector store in sync, and by tests.
    pub async fn reindex_all(&self) {
        let items = self.catalog.read().load_all();
        for item in items {
            self.index
                .index(
                    &item.knowledge_id,
                    &item.embedding_text(),
                    KnowledgeMetadata::from_item(&item),
                )
                .await;
        }
    }

    /// Semantic search, reconstructing each item from its metadata's
    /// `full_knowledge` (spec.md §4.3).
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Vec<KnowledgeItem> {
        self.retrieve_filtered(query, top_k, None).await
    }

    pub async fn retrieve_filtered(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<KnowledgeItem> {
        let results = self.index.query(query, top_k, filter).await;
        debug!(
            query,
            returned = results.len(),
            ids = ?results.iter().map(|(id, _, _)| id.clone()).collect::<Vec<_>>(),
            "retrieve"
        );
        results
            .into_iter()
            .map(|(_, _, meta)| meta.full_knowledge)
            .collect()
    }

    /// Direct catalog lookup, bypassing semantic search.
    pub fn get_by_id(&self, id: &str) -> Result<KnowledgeItem, CatalogError> {
        self.catalog.read().get(id)
    }

    /// The only sanctioned mutator of vector metadata: reload `id` from the
    /// catalog and rewrite the index entry (spec.md §4.3). Must be called
    /// after every catalog write that touches `id`.
    pub async fn update_vector_metadata(&self, id: &str) -> Result<(), CatalogError> {
        let item = self.catalog.read().get(id)?;
        let metadata = KnowledgeMetadata::from_item(&item);
        // `update_metadata` requires an existing entry; if the item was
        // never indexed (e.g. freshly added to the catalog out of band),
        // fall back to a full `index` call so the invariant still holds.
        if self.index.get_metadata(id).is_some() {
            self.index.update_metadata(id, metadata)
        } else {
            self.index.index(id, &item.embedding_text(), metadata).await;
            Ok(())
        }
    }
}
