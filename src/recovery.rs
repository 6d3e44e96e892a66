//! Recovery Synthesizer (spec.md §4.8) — after a verified skill, asks the
//! LLM to propose a `recovery_approach` for every learning that still lacks
//! one, using the verified skill's action plan as proof a working
//! alternative exists.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::catalog::CatalogStore;
use crate::errors::CatalogError;
use crate::llm::{ChatMessage, LlmClient};
use crate::model::{Action, KnowledgeItem};
use crate::retriever::KnowledgeRetriever;

pub struct RecoverySynthesizer {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<parking_lot::RwLock<CatalogStore>>,
    retriever: Arc<KnowledgeRetriever>,
}

impl RecoverySynthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalog: Arc<parking_lot::RwLock<CatalogStore>>,
        retriever: Arc<KnowledgeRetriever>,
    ) -> Self {
        Self {
            llm,
            catalog,
            retriever,
        }
    }

    /// Process every catalog item with at least one empty-recovery learning.
    /// Non-fatal: an LLM failure for one item is logged and skipped, the
    /// next successful verification gets another chance (spec.md §4.8).
    pub async fn synthesize(&self, verified_action_plan: &[Action]) -> Result<(), CatalogError> {
        let candidates: Vec<KnowledgeItem> = self
            .catalog
            .read()
            .load_all()
            .into_iter()
            .filter(|item| item.kb_learnings.iter().any(|l| l.is_recovery_pending()))
            .collect();

        if candidates.is_empty() {
            debug!("no catalog items with pending recovery, skipping synthesis");
            return Ok(());
        }

        for item in candidates {
            self.synthesize_for_item(item, verified_action_plan).await?;
        }
        Ok(())
    }

    async fn synthesize_for_item(
        &self,
        mut item: KnowledgeItem,
        verified_action_plan: &[Action],
    ) -> Result<(), CatalogError> {
        let pending_errors: Vec<String> = item
            .kb_learnings
            .iter()
            .filter(|l| l.is_recovery_pending())
            .map(|l| l.original_error.clone())
            .collect();

        info!(
            knowledge_id = %item.knowledge_id,
            pending = pending_errors.len(),
            "synthesizing recovery approaches"
        );

        let prompt = format!(
            "Documented capability: {}\nAction sequence: {}\n\n\
             The following errors were observed and have no known recovery:\n{}\n\n\
             A verified working alternative plan exists:\n{}\n\n\
             Respond with strict JSON: {{\"recovery_approach\": \"<2-3 sentence actionable advice>\"}}.",
            item.description,
            item.action_sequence.join(" -> "),
            pending_errors
                .iter()
                .map(|e| format!("- {e}"))
                .collect::<Vec<_>>()
                .join("\n"),
            verified_action_plan
                .iter()
                .map(|a| format!("- {} ({})", a.tool_name, a.reasoning))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let messages = vec![
            ChatMessage::system(
                "You write short, actionable recovery advice for GUI-automation failures."
                    .to_string(),
            ),
            ChatMessage::user(prompt),
        ];

        let raw = match self
            .llm
            .complete_json(messages, std::time::Duration::from_secs(30))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(knowledge_id = %item.knowledge_id, error = %e, "recovery synthesis LLM call failed");
                return Ok(());
            }
        };

        #[derive(Deserialize)]
        struct Synthesis {
            recovery_approach: String,
        }
        let parsed: Synthesis = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(knowledge_id = %item.knowledge_id, error = %e, "recovery synthesis returned malformed JSON");
                return Ok(());
            }
        };
        if parsed.recovery_approach.trim().is_empty() {
            warn!(knowledge_id = %item.knowledge_id, "recovery synthesis returned empty approach");
            return Ok(());
        }

        for learning in item.kb_learnings.iter_mut() {
            if learning.is_recovery_pending() && pending_errors.contains(&learning.original_error) {
                learning.recovery_approach = parsed.recovery_approach.clone();
            }
        }

        let id = item.knowledge_id.clone();
        self.catalog.write().update(item)?;
        self.retriever.update_vector_metadata(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLlmClient;
    use crate::model::FailureLearning;
    use crate::vector_index::{TfIdfEmbeddingProvider, VectorIndex};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn item_with_pending_learning(id: &str) -> KnowledgeItem {
        KnowledgeItem {
            knowledge_id: id.into(),
            description: "Open the file dialog".into(),
            ui_location: "File menu".into(),
            action_sequence: vec!["Click File".into(), "Click Open".into()],
            shortcut: None,
            prerequisites: BTreeSet::new(),
            output_state: "dialog open".into(),
            doc_citation: "doc".into(),
            parameters: BTreeMap::new(),
            kb_learnings: vec![FailureLearning {
                task: "t".into(),
                step_num: 0,
                original_action: Action {
                    tool_name: "Click-Tool".into(),
                    tool_arguments: BTreeMap::new(),
                    reasoning: "click open".into(),
                    kb_source: Some(id.into()),
                },
                original_error: "Button 'Open' not found".into(),
                recovery_approach: String::new(),
                timestamp: Utc::now(),
            }],
            trust_score: 0.95,
        }
    }

    fn setup(responses: Vec<String>) -> (RecoverySynthesizer, Arc<parking_lot::RwLock<CatalogStore>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(parking_lot::RwLock::new(
            CatalogStore::load(dir.path().join("catalog.json")).unwrap(),
        ));
        let index = Arc::new(VectorIndex::new(Box::new(TfIdfEmbeddingProvider::new())));
        let retriever = Arc::new(KnowledgeRetriever::new(catalog.clone(), index));
        let llm = Arc::new(MockLlmClient::with_responses(responses));
        (
            RecoverySynthesizer::new(llm, catalog.clone(), retriever),
            catalog,
            dir,
        )
    }

    #[tokio::test]
    async fn fills_in_pending_recovery() {
        let response = serde_json::to_string(&json!({
            "recovery_approach": "Use the keyboard shortcut Ctrl+O instead of clicking."
        }))
        .unwrap();
        let (synth, catalog, _dir) = setup(vec![response]);
        catalog.write().update(item_with_pending_learning("open_files")).unwrap();

        synth.synthesize(&[]).await.unwrap();

        let item = catalog.read().get("open_files").unwrap();
        assert_eq!(
            item.kb_learnings[0].recovery_approach,
            "Use the keyboard shortcut Ctrl+O instead of clicking."
        );
    }

    #[tokio::test]
    async fn skips_items_with_no_pending_learning() {
        let (synth, catalog, _dir) = setup(vec![]);
        let mut item = item_with_pending_learning("open_files");
        item.kb_learnings[0].recovery_approach = "already resolved".into();
        catalog.write().update(item).unwrap();

        // No LLM responses queued; if this item were (wrongly) processed the
        // mock would return EmptyCompletion and the test would still pass
        // silently, so assert the learning is untouched instead.
        synth.synthesize(&[]).await.unwrap();
        let item = catalog.read().get("open_files").unwrap();
        assert_eq!(item.kb_learnings[0].recovery_approach, "already resolved");
    }

    #[tokio::test]
    async fn llm_failure_is_non_fatal() {
        let (synth, catalog, _dir) = setup(vec![]);
        catalog.write().update(item_with_pending_learning("open_files")).unwrap();

        synth.synthesize(&[]).await.unwrap();
        let item = catalog.read().get("open_files").unwrap();
        assert!(item.kb_learnings[0].recovery_approach.is_empty());
    }
}
