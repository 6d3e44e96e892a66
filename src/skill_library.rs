//! Skill Library (spec.md §4.7) — one JSON file per canonical operation
//! slug under the skills directory, each holding the list of every skill
//! ever verified for that operation, with fuzzy matching on the bare
//! operation name.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::catalog::atomic_write;
use crate::errors::AgentError;
use crate::model::{slugify, VerifiedSkill};
use crate::similarity::similarity;

/// Candidates below this score are never returned by [`SkillLibrary::find_similar`].
pub const SIMILARITY_FLOOR: f64 = 0.70;

pub struct SkillLibrary {
    dir: PathBuf,
    /// Keyed by operation (`task_description`); each file at
    /// `<slug>_skills.json` is the full JSON array for one key, so a second
    /// verified skill for the same operation is appended, never overwritten
    /// (spec.md §4.7 "persist and append to in-memory list").
    skills: BTreeMap<String, Vec<VerifiedSkill>>,
    next_ordinal: u64,
}

impl SkillLibrary {
    /// Load every `*_skills.json` file in `dir` into memory. A missing
    /// directory is not an error — it means no skill has been verified yet.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let dir = dir.into();
        let mut skills: BTreeMap<String, Vec<VerifiedSkill>> = BTreeMap::new();
        let mut max_ordinal = 0u64;
        let mut count = 0usize;

        if dir.exists() {
            for entry in std::fs::read_dir(&dir)
                .map_err(|e| AgentError::Other(anyhow::anyhow!("failed to read skills dir: {e}")))?
            {
                let entry = entry
                    .map_err(|e| AgentError::Other(anyhow::anyhow!("failed to read skills entry: {e}")))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    AgentError::Other(anyhow::anyhow!("failed to read skill file {}: {e}", path.display()))
                })?;
                let file_skills: Vec<VerifiedSkill> = serde_json::from_str(&raw).map_err(|e| {
                    AgentError::Other(anyhow::anyhow!("malformed skill file {}: {e}", path.display()))
                })?;
                for skill in &file_skills {
                    if let Some(ordinal) = ordinal_of(&skill.skill_id) {
                        max_ordinal = max_ordinal.max(ordinal);
                    }
                }
                count += file_skills.len();
                if let Some(first) = file_skills.first() {
                    skills.insert(first.task_description.clone(), file_skills);
                }
            }
        }

        info!(count, dir = %dir.display(), "loaded skill library");
        Ok(Self {
            dir,
            skills,
            next_ordinal: max_ordinal + 1,
        })
    }

    /// Candidates whose operation similarity to `task_operation` clears
    /// [`SIMILARITY_FLOOR`], sorted descending, top 3 (spec.md §4.7). When an
    /// operation has more than one verified skill, the most recently added
    /// one wins that operation's slot.
    pub fn find_similar(&self, task_operation: &str) -> Vec<(VerifiedSkill, f64)> {
        let mut scored: Vec<(VerifiedSkill, f64)> = self
            .skills
            .values()
            .filter_map(|skills| skills.last())
            .map(|skill| (skill.clone(), similarity(task_operation, &skill.task_description)))
            .filter(|(_, score)| *score >= SIMILARITY_FLOOR)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (skill, score) in &scored {
            debug!(skill_id = %skill.skill_id, score, "find_similar candidate");
        }
        scored.truncate(3);
        scored
    }

    /// All verified skills, optionally filtered by exact operation name
    /// (`agent skills list [--operation <OP>]`, SPEC_FULL.md §6).
    pub fn list(&self, operation: Option<&str>) -> Vec<VerifiedSkill> {
        self.skills
            .iter()
            .filter(|(op, _)| match operation {
                Some(filter) => op.as_str() == filter,
                None => true,
            })
            .flat_map(|(_, skills)| skills.iter().cloned())
            .collect()
    }

    /// Append `skill` to the list persisted for its operation and to the
    /// in-memory index. `skill_id` must already be set (see
    /// [`next_skill_id`]).
    pub fn add(&mut self, skill: VerifiedSkill) -> Result<(), AgentError> {
        let entry = self.skills.entry(skill.task_description.clone()).or_default();
        entry.push(skill.clone());
        self.persist(&skill.task_description)
    }

    /// Bump `times_used` for the skill matching `skill_id` and persist.
    pub fn increment_usage(&mut self, skill_id: &str) -> Result<(), AgentError> {
        let operation = self
            .skills
            .iter()
            .find(|(_, skills)| skills.iter().any(|s| s.skill_id == skill_id))
            .map(|(op, _)| op.clone());

        let Some(operation) = operation else {
            warn!(skill_id, "increment_usage called for unknown skill");
            return Err(AgentError::Other(anyhow::anyhow!(
                "unknown skill_id '{skill_id}'"
            )));
        };

        let skills = self.skills.get_mut(&operation).expect("operation just looked up");
        let skill = skills
            .iter_mut()
            .find(|s| s.skill_id == skill_id)
            .expect("skill_id just looked up");
        skill.metadata.times_used += 1;
        self.persist(&operation)
    }

    /// Next `skill_<ordinal>_<timestamp>` id, using the provided timestamp
    /// so callers control determinism (spec.md §9: no wall-clock in pure
    /// model code; the orchestrator stamps the real time).
    pub fn next_skill_id(&mut self, timestamp: &str) -> String {
        let id = format!("skill_{}_{timestamp}", self.next_ordinal);
        self.next_ordinal += 1;
        id
    }

    /// Rewrite the full on-disk list for `operation`.
    fn persist(&self, operation: &str) -> Result<(), AgentError> {
        let skills = self.skills.get(operation).map(Vec::as_slice).unwrap_or(&[]);
        let path = self.path_for(operation);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::Other(anyhow::anyhow!("failed to create skills dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(skills)
            .map_err(|e| AgentError::Other(anyhow::anyhow!(e)))?;
        atomic_write(&path, json.as_bytes())
            .map_err(|e| AgentError::Other(anyhow::anyhow!("failed to write skill file: {e}")))
    }

    fn path_for(&self, operation: &str) -> PathBuf {
        self.dir.join(format!("{}_skills.json", slugify(operation)))
    }
}

fn ordinal_of(skill_id: &str) -> Option<u64> {
    skill_id.strip_prefix("skill_")?.split('_').next()?.parse().ok()
}
