//! The tiered memory store: scoring, consolidation, decay, and round-trip
//! persistence.

use std::collections::{HashMap, HashSet};

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::traits::TraitProfile;

use super::{MemoryEntry, MemoryKind};

/// Minimum remaining strength for a long-term entry; anything below is
/// evicted during the decay pass.
pub const DECAY_FLOOR: f64 = 0.1;

/// Minimum relevance score for an entry to be considered during retrieval.
const SCORE_THRESHOLD: f64 = 0.1;

/// How many recent short-term entries the working set holds.
const WORKING_RECENT: usize = 5;

/// How many retrieved long-term entries the working set holds.
const WORKING_RETRIEVED: usize = 3;

/// Per-persona tiered memory.
///
/// All operations uphold the capacity invariants: after any public call,
/// `short_term.len() <= short_term_limit`, `long_term.len() <=
/// long_term_limit`, and every retained long-term entry has
/// `decay >= DECAY_FLOOR`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStore {
    pub persona_id: String,
    /// Session-scoped scratchpad.
    pub context: HashMap<String, Value>,
    pub short_term: Vec<MemoryEntry>,
    pub long_term: Vec<MemoryEntry>,
    /// Rebuilt per-think; never persisted.
    #[serde(skip)]
    pub working: Vec<MemoryEntry>,
    pub short_term_limit: usize,
    pub long_term_limit: usize,
    pub decay_rate: f64,
}

/// Summary counters for observability surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub short_term_count: usize,
    pub long_term_count: usize,
    pub working_count: usize,
    pub total: usize,
    pub context_keys: usize,
}

impl MemoryStore {
    pub fn new(persona_id: impl Into<String>) -> Self {
        Self::with_limits(persona_id, 50, 200, 0.95)
    }

    pub fn with_limits(
        persona_id: impl Into<String>,
        short_term_limit: usize,
        long_term_limit: usize,
        decay_rate: f64,
    ) -> Self {
        Self {
            persona_id: persona_id.into(),
            context: HashMap::new(),
            short_term: Vec::new(),
            long_term: Vec::new(),
            working: Vec::new(),
            short_term_limit,
            long_term_limit,
            decay_rate,
        }
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Record a new memory. Triggers consolidation once the short-term
    /// buffer reaches its capacity.
    pub fn add(
        &mut self,
        content: impl Into<String>,
        kind: MemoryKind,
        weight: f64,
        tags: Vec<String>,
        context: HashMap<String, Value>,
    ) -> String {
        let entry = MemoryEntry::new(content, kind, weight, tags, context);
        let id = entry.id.clone();
        self.short_term.push(entry);
        if self.short_term.len() >= self.short_term_limit {
            self.consolidate();
        }
        id
    }

    /// Update one key of the session context.
    pub fn update_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn get_context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn clear_context(&mut self) {
        self.context.clear();
    }

    // -----------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------

    /// Return up to `limit` entries relevant to `prompt`, best first.
    /// Candidates come from every tier, deduplicated by id; only entries
    /// scoring above the relevance threshold are returned.
    pub fn retrieve(&self, prompt: &str, limit: usize) -> Vec<MemoryEntry> {
        let candidates = self
            .working
            .iter()
            .chain(self.short_term.iter())
            .chain(self.long_term.iter());
        self.rank(candidates, prompt, limit)
    }

    /// Relevance search restricted to long-term memory.
    pub fn retrieve_long_term(&self, prompt: &str, limit: usize) -> Vec<MemoryEntry> {
        self.rank(self.long_term.iter(), prompt, limit)
    }

    fn rank<'a>(
        &self,
        candidates: impl Iterator<Item = &'a MemoryEntry>,
        prompt: &str,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        let prompt_lower = prompt.to_lowercase();
        let words: Vec<&str> = prompt_lower.split_whitespace().collect();

        let mut seen = HashSet::new();
        let mut scored: Vec<(f64, &MemoryEntry)> = Vec::new();
        for entry in candidates {
            if !seen.insert(entry.id.as_str()) {
                continue;
            }
            let score = relevance_score(entry, &prompt_lower, &words);
            if score > SCORE_THRESHOLD {
                scored.push((score, entry));
            }
        }

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
        });
        scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Rebuild the working set for a think: the most recent short-term
    /// entries plus the top long-term matches for the prompt, deduplicated
    /// by id.
    pub fn rebuild_working(&mut self, prompt: &str) {
        let mut working: Vec<MemoryEntry> = self
            .short_term
            .iter()
            .rev()
            .take(WORKING_RECENT)
            .rev()
            .cloned()
            .collect();

        let ids: HashSet<String> = working.iter().map(|e| e.id.clone()).collect();
        for entry in self.retrieve_long_term(prompt, WORKING_RETRIEVED) {
            if !ids.contains(&entry.id) {
                working.push(entry);
            }
        }
        self.working = working;
    }

    // -----------------------------------------------------------------
    // Consolidation & decay
    // -----------------------------------------------------------------

    /// Move the less important half of short-term memory into long-term
    /// storage, merging similar entries on the way, then run the decay
    /// pass and enforce the long-term capacity bound.
    pub fn consolidate(&mut self) {
        if self.short_term.len() < self.short_term_limit / 2 {
            return;
        }

        // Most important first; ties broken by recency.
        self.short_term.sort_by(|a, b| {
            b.importance()
                .total_cmp(&a.importance())
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });

        let midpoint = self.short_term.len() / 2;
        let demoted = self.short_term.split_off(midpoint);

        let merged = merge_similar(demoted);
        self.long_term.extend(merged);

        self.decay_pass();

        if self.long_term.len() > self.long_term_limit {
            self.long_term
                .sort_by(|a, b| b.importance().total_cmp(&a.importance()));
            self.long_term.truncate(self.long_term_limit);
        }
    }

    /// Erode long-term entries by age and drop any that fall below the
    /// decay floor.
    fn decay_pass(&mut self) {
        let now = Utc::now();
        let decay_rate = self.decay_rate;
        for entry in &mut self.long_term {
            let days = (now - entry.timestamp).num_seconds() as f64 / 86_400.0;
            let age_factor = if days > 0.0 { 1.0 / (1.0 + 0.1 * days) } else { 1.0 };
            entry.decay *= decay_rate * age_factor;
        }
        self.long_term.retain(|e| e.decay >= DECAY_FLOOR);
    }

    // -----------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------

    /// Seed a fresh memory with the persona's core identity: expertise,
    /// speaking habits, emotional triggers, and strong trait patterns.
    pub fn seed_from_traits(&mut self, traits: &TraitProfile) {
        for area in &traits.expertise_areas {
            self.add(
                format!("I have expertise in {area}"),
                MemoryKind::Knowledge,
                0.9,
                vec!["expertise".into(), area.clone()],
                HashMap::from([("kind".into(), json!("expertise"))]),
            );
        }
        for phrase in &traits.speaking_patterns.common_phrases {
            self.add(
                format!("I often express ideas like: {phrase}"),
                MemoryKind::Personal,
                0.8,
                vec!["communication".into(), "speaking_pattern".into()],
                HashMap::from([("kind".into(), json!("speaking_pattern"))]),
            );
        }
        for energizer in &traits.emotional_triggers.energizers {
            self.add(
                format!("I get energized by {energizer}"),
                MemoryKind::Emotional,
                0.7,
                vec!["emotional".into(), "energizer".into()],
                HashMap::from([("valence".into(), json!("positive"))]),
            );
        }
        for frustration in &traits.emotional_triggers.frustrations {
            self.add(
                format!("I get frustrated by {frustration}"),
                MemoryKind::Emotional,
                0.7,
                vec!["emotional".into(), "frustration".into()],
                HashMap::from([("valence".into(), json!("negative"))]),
            );
        }

        let creativity = traits.get_scale("core_dimensions", "creativity");
        if creativity >= 8 {
            self.add(
                "I naturally think creatively and look for innovative solutions",
                MemoryKind::Pattern,
                0.9,
                vec!["creativity".into(), "core_trait".into()],
                HashMap::from([("trait".into(), json!("creativity"))]),
            );
        }
        let analytical = traits.get_scale("core_dimensions", "analytical");
        if analytical >= 8 {
            self.add(
                "I approach problems systematically and rely on logical analysis",
                MemoryKind::Pattern,
                0.9,
                vec!["analytical".into(), "core_trait".into()],
                HashMap::from([("trait".into(), json!("analytical"))]),
            );
        }
        let risk = traits.get_scale("core_dimensions", "risk_tolerance");
        if risk >= 8 {
            self.add(
                "I'm comfortable with uncertainty and willing to take calculated risks",
                MemoryKind::Pattern,
                0.8,
                vec!["risk".into(), "core_trait".into()],
                HashMap::from([("trait".into(), json!("risk_tolerance"))]),
            );
        } else if risk <= 3 {
            self.add(
                "I prefer careful, well-planned approaches and avoid unnecessary risks",
                MemoryKind::Pattern,
                0.8,
                vec!["caution".into(), "core_trait".into()],
                HashMap::from([("trait".into(), json!("risk_tolerance"))]),
            );
        }
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Serialize the full store for persistence.
    pub fn export(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Replace this store's state from an exported blob. A malformed blob
    /// leaves the store unchanged.
    pub fn import(&mut self, data: &[u8]) -> Result<()> {
        let imported: MemoryStore = serde_json::from_slice(data)
            .map_err(|e| Error::MemoryCorrupt(e.to_string()))?;
        *self = imported;
        Ok(())
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            short_term_count: self.short_term.len(),
            long_term_count: self.long_term.len(),
            working_count: self.working.len(),
            total: self.short_term.len() + self.long_term.len(),
            context_keys: self.context.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Relevance of `entry` to a prompt, already lowercased and tokenized.
///
/// Word hits in the content score 0.5 each, tag matches 0.3, context-map
/// matches 0.2; the sum is then scaled by the entry's remaining strength,
/// weight, recency, and kind bonus.
fn relevance_score(entry: &MemoryEntry, prompt_lower: &str, words: &[&str]) -> f64 {
    let content_lower = entry.content.to_lowercase();

    let mut score = 0.0;
    for word in words {
        if content_lower.contains(word) {
            score += 0.5;
        }
    }

    for tag in &entry.tags {
        let tag_lower = tag.to_lowercase();
        for word in words {
            if tag_lower.contains(word) || word.contains(tag_lower.as_str()) {
                score += 0.3;
            }
        }
    }

    for (key, value) in &entry.context {
        let key_lower = key.to_lowercase();
        let value_lower = stringify(value).to_lowercase();
        if prompt_lower.contains(&key_lower) || prompt_lower.contains(&value_lower) {
            score += 0.2;
        }
    }

    score *= entry.decay * entry.weight;

    let age = Utc::now() - entry.timestamp;
    if age < ChronoDuration::hours(1) {
        score *= 1.2;
    } else if age < ChronoDuration::hours(24) {
        score *= 1.1;
    }

    score * entry.kind.score_bonus()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Similarity & merging
// ---------------------------------------------------------------------------

/// Group mutually similar entries and merge each group into a single
/// consolidated entry; dissimilar entries pass through untouched.
fn merge_similar(entries: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
    let mut merged = Vec::new();
    let mut used = vec![false; entries.len()];

    for i in 0..entries.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut group = vec![entries[i].clone()];
        for j in (i + 1)..entries.len() {
            if !used[j] && similar(&entries[i], &entries[j]) {
                used[j] = true;
                group.push(entries[j].clone());
            }
        }
        if group.len() > 1 {
            merged.push(merge_group(group));
        } else {
            merged.push(group.pop().expect("group has one entry"));
        }
    }

    merged
}

/// Two entries can merge when they share a kind, landed within an hour of
/// each other, and overlap in tags (Jaccard > 0.3) or in significant
/// content words (Jaccard > 0.2 over words longer than 3 characters).
fn similar(a: &MemoryEntry, b: &MemoryEntry) -> bool {
    if a.kind != b.kind {
        return false;
    }
    if (a.timestamp - b.timestamp).abs() > ChronoDuration::hours(1) {
        return false;
    }

    if !a.tags.is_empty() && !b.tags.is_empty() {
        let set_a: HashSet<&str> = a.tags.iter().map(String::as_str).collect();
        let set_b: HashSet<&str> = b.tags.iter().map(String::as_str).collect();
        if jaccard(&set_a, &set_b) > 0.3 {
            return true;
        }
    }

    let words_a = significant_words(&a.content);
    let words_b = significant_words(&b.content);
    if words_a.is_empty() || words_b.is_empty() {
        return false;
    }
    let set_a: HashSet<&str> = words_a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = words_b.iter().map(String::as_str).collect();
    jaccard(&set_a, &set_b) > 0.2
}

fn significant_words(content: &str) -> Vec<String> {
    content
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Merge a group of similar entries: keep the most recent timestamp and
/// context, average the weights and decays, union the tags, and join the
/// contents behind a consolidation marker.
fn merge_group(mut group: Vec<MemoryEntry>) -> MemoryEntry {
    group.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let base = group[0].clone();

    let contents: Vec<&str> = group.iter().map(|e| e.content.as_str()).collect();
    let mut tags: Vec<String> = Vec::new();
    for entry in &group {
        for tag in &entry.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
    let n = group.len() as f64;
    let weight = group.iter().map(|e| e.weight).sum::<f64>() / n;
    let decay = group.iter().map(|e| e.decay).sum::<f64>() / n;

    MemoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        content: format!("Consolidated: {}", contents.join(" | ")),
        timestamp: base.timestamp,
        tags,
        weight,
        decay,
        kind: base.kind,
        context: base.context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &str, kind: MemoryKind, weight: f64, tags: &[&str]) -> MemoryEntry {
        MemoryEntry::new(
            content,
            kind,
            weight,
            tags.iter().map(|s| s.to_string()).collect(),
            HashMap::new(),
        )
    }

    #[test]
    fn test_retrieve_ranks_by_relevance() {
        let mut store = MemoryStore::new("p1");
        store.add(
            "pricing strategy for the new product launch",
            MemoryKind::Knowledge,
            0.9,
            vec!["pricing".into()],
            HashMap::new(),
        );
        store.add(
            "notes about the office party",
            MemoryKind::Interaction,
            0.9,
            vec![],
            HashMap::new(),
        );

        let results = store.retrieve("what pricing should we use", 5);
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("pricing"));
    }

    #[test]
    fn test_retrieve_threshold_filters_irrelevant() {
        let mut store = MemoryStore::new("p1");
        store.add(
            "completely unrelated topic",
            MemoryKind::Knowledge,
            0.9,
            vec![],
            HashMap::new(),
        );
        assert!(store.retrieve("quarterly budget numbers", 5).is_empty());
    }

    #[test]
    fn test_score_monotonic_in_decay() {
        let mut low = entry("market analysis report", MemoryKind::Knowledge, 0.8, &[]);
        let mut high = low.clone();
        low.decay = 0.3;
        high.decay = 0.9;

        let prompt = "market analysis".to_lowercase();
        let words: Vec<&str> = prompt.split_whitespace().collect();
        let score_low = relevance_score(&low, &prompt, &words);
        let score_high = relevance_score(&high, &prompt, &words);
        assert!(score_high >= score_low);
    }

    #[test]
    fn test_emotional_entries_score_higher() {
        let neutral = entry("the launch deadline slipped", MemoryKind::Interaction, 0.8, &[]);
        let mut emotional = neutral.clone();
        emotional.kind = MemoryKind::Emotional;

        let prompt = "launch deadline".to_lowercase();
        let words: Vec<&str> = prompt.split_whitespace().collect();
        assert!(
            relevance_score(&emotional, &prompt, &words)
                > relevance_score(&neutral, &prompt, &words)
        );
    }

    #[test]
    fn test_consolidation_halves_short_term() {
        let mut store = MemoryStore::with_limits("p1", 50, 200, 0.95);
        for i in 0..60 {
            store.add(
                format!("observation {i} about the launch plan timeline"),
                MemoryKind::Interaction,
                0.8,
                vec!["launch".into(), "plan".into()],
                HashMap::new(),
            );
            assert!(store.short_term.len() <= store.short_term_limit);
            assert!(store.long_term.len() <= store.long_term_limit);
        }

        // Consolidation fired at 50: half kept, half demoted (post-merge).
        assert_eq!(store.short_term.len(), 25 + 10);
        assert!(store.long_term.len() <= 25);
        assert!(!store.long_term.is_empty());
        for entry in &store.long_term {
            assert!(entry.decay >= DECAY_FLOOR);
        }
    }

    #[test]
    fn test_no_entry_lost_without_merge_or_eviction() {
        let mut store = MemoryStore::with_limits("p1", 10, 200, 0.95);
        for i in 0..10 {
            store.add(
                // Distinct contents and tags so nothing merges.
                format!("unique{i} subject{i} matter{i}"),
                MemoryKind::Interaction,
                0.8,
                vec![format!("tag{i}"), format!("other{i}")],
                HashMap::new(),
            );
        }
        assert_eq!(store.short_term.len(), 5);
        assert_eq!(store.long_term.len(), 5);
    }

    #[test]
    fn test_similarity_requires_same_kind() {
        let a = entry("launch plan details for spring", MemoryKind::Interaction, 0.8, &["launch"]);
        let mut b = a.clone();
        b.id = "other".into();
        b.kind = MemoryKind::Knowledge;
        assert!(!similar(&a, &b));
    }

    #[test]
    fn test_similarity_by_tags_or_content() {
        let a = entry("alpha beta gamma delta", MemoryKind::Interaction, 0.8, &["launch", "plan"]);
        let mut by_tags = entry("totally different words here", MemoryKind::Interaction, 0.8, &["launch", "plan"]);
        by_tags.id = "t".into();
        assert!(similar(&a, &by_tags));

        let mut by_content = entry("alpha beta gamma delta epsilon", MemoryKind::Interaction, 0.8, &[]);
        by_content.id = "c".into();
        assert!(similar(&a, &by_content));
    }

    #[test]
    fn test_merge_group_combines_fields() {
        let mut a = entry("first note", MemoryKind::Interaction, 0.6, &["x"]);
        let mut b = entry("second note", MemoryKind::Interaction, 1.0, &["y"]);
        a.decay = 0.8;
        b.decay = 0.4;

        let merged = merge_group(vec![a, b]);
        assert!(merged.content.starts_with("Consolidated: "));
        assert!(merged.content.contains("first note"));
        assert!(merged.content.contains("second note"));
        assert_eq!(merged.tags.len(), 2);
        assert!((merged.weight - 0.8).abs() < 1e-9);
        assert!((merged.decay - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_working_rebuild_dedups() {
        let mut store = MemoryStore::new("p1");
        for i in 0..8 {
            store.add(
                format!("short term note {i}"),
                MemoryKind::Interaction,
                0.5,
                vec![],
                HashMap::new(),
            );
        }
        store.long_term.push(entry(
            "long term insight about budget planning",
            MemoryKind::Knowledge,
            0.9,
            &["budget"],
        ));

        store.rebuild_working("budget planning");
        assert!(store.working.len() <= WORKING_RECENT + WORKING_RETRIEVED);

        let mut ids: Vec<&str> = store.working.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), store.working.len());
        assert!(store
            .working
            .iter()
            .any(|e| e.content.contains("long term insight")));
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut store = MemoryStore::new("p1");
        for i in 0..12 {
            store.add(
                format!("note {i} about strategy"),
                MemoryKind::Knowledge,
                0.7,
                vec!["strategy".into()],
                HashMap::new(),
            );
        }
        store.update_context("last_topic", json!("strategy"));

        let blob = store.export().unwrap();
        let mut restored = MemoryStore::new("p1");
        restored.import(&blob).unwrap();

        let mut original_ids: Vec<String> = store
            .retrieve("strategy", 10)
            .into_iter()
            .map(|e| e.id)
            .collect();
        let mut restored_ids: Vec<String> = restored
            .retrieve("strategy", 10)
            .into_iter()
            .map(|e| e.id)
            .collect();
        original_ids.sort();
        restored_ids.sort();
        assert_eq!(original_ids, restored_ids);
        assert_eq!(restored.get_context("last_topic"), Some(&json!("strategy")));
    }

    #[test]
    fn test_import_malformed_leaves_store_unchanged() {
        let mut store = MemoryStore::new("p1");
        store.add("keep me", MemoryKind::Knowledge, 0.9, vec![], HashMap::new());

        let err = store.import(b"{not json").unwrap_err();
        assert!(matches!(err, Error::MemoryCorrupt(_)));
        assert_eq!(store.short_term.len(), 1);
        assert_eq!(store.short_term[0].content, "keep me");
    }

    #[test]
    fn test_seed_from_traits() {
        use crate::traits::{merge as merge_traits, BaseSchema, TraitOverlay};

        let base = BaseSchema::builtin();
        let overlay = TraitOverlay::from_json(
            r#"{
                "core_dimensions": {"creativity": 9, "analytical": 8, "risk_tolerance": 2},
                "expertise_areas": ["venture capital", "product"],
                "speaking_patterns": {"common_phrases": ["let's zoom out"]},
                "emotional_triggers": {"energizers": ["bold ideas"], "frustrations": ["vague plans"]}
            }"#,
        )
        .unwrap();
        let profile = merge_traits(&base, &overlay).unwrap();

        let mut store = MemoryStore::new("p1");
        store.seed_from_traits(&profile);

        // 2 expertise + 1 phrase + 2 triggers + creativity + analytical + caution patterns
        assert_eq!(store.short_term.len(), 8);
        assert!(store
            .short_term
            .iter()
            .any(|e| e.content.contains("venture capital")));
        assert!(store
            .short_term
            .iter()
            .any(|e| e.content.contains("well-planned")));
    }

    #[test]
    fn test_stats() {
        let mut store = MemoryStore::new("p1");
        store.add("a note", MemoryKind::Knowledge, 0.5, vec![], HashMap::new());
        store.update_context("k", json!(1));
        let stats = store.stats();
        assert_eq!(stats.short_term_count, 1);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.context_keys, 1);
    }
}
