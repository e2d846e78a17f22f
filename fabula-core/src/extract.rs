//! Entity and theme extraction from installment text.
//!
//! A deliberately cheap pass: capitalized word runs become entity
//! candidates, filtered through a stopword list and a minimum occurrence
//! count. Keyword themes come from frequent long words. No model call is
//! involved, so extraction can run on every discovery sweep.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::model::{
    canonical_name, Entity, EntityKind, MentionEdge, Narrative, NarrativeId, NarrativeStatus,
    OverrideAction, Sentiment,
};
use crate::store::{NarrativeStore, StoreError};

/// Words that start sentences and capitalize themselves without naming
/// anything.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "but", "or", "he", "she", "it", "they", "we", "you", "i", "his",
    "her", "its", "their", "our", "your", "my", "this", "that", "these", "those", "then", "now",
    "here", "there", "when", "where", "what", "who", "why", "how", "not", "no", "yes", "so",
    "as", "at", "by", "for", "from", "in", "into", "of", "on", "to", "with", "chapter", "once",
    "suddenly", "meanwhile", "later", "after", "before", "finally", "still", "yet", "even",
    "nobody", "someone", "everyone", "anyone", "nothing", "something", "everything",
];

/// Organization-sounding final words, used to classify multi-word names.
const ORG_SUFFIXES: &[&str] = &[
    "institute",
    "corporation",
    "corp",
    "guild",
    "collective",
    "union",
    "syndicate",
    "bureau",
    "ministry",
    "agency",
    "company",
];

/// What one extraction sweep touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionReport {
    pub narratives_scanned: usize,
    pub entities_upserted: usize,
    pub themes_upserted: usize,
}

/// Scans narrative text and maintains entity, mention, and theme records.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    /// Names seen fewer times than this within a narrative are noise.
    min_occurrences: u64,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self { min_occurrences: 2 }
    }
}

impl EntityExtractor {
    pub fn new(min_occurrences: u64) -> Self {
        Self { min_occurrences }
    }

    /// Extract from every non-killed narrative in the store.
    pub async fn run<S: NarrativeStore>(&self, store: &S) -> Result<ExtractionReport, StoreError> {
        let mut narratives = store.list_by_status(NarrativeStatus::Active).await?;
        narratives.extend(store.list_by_status(NarrativeStatus::Completed).await?);

        let mut report = ExtractionReport::default();
        for narrative in &narratives {
            report.narratives_scanned += 1;
            let detail = store.fetch_detail(narrative.id).await?;
            let bodies: Vec<(u32, &str)> = detail
                .installments
                .iter()
                .map(|i| (i.order, i.body.as_str()))
                .collect();
            report.entities_upserted +=
                self.extract_entities(store, narrative, &bodies).await?;
            report.themes_upserted += self.extract_themes(store, narrative, &bodies).await?;
        }
        debug!(
            narratives = report.narratives_scanned,
            entities = report.entities_upserted,
            themes = report.themes_upserted,
            "extraction sweep finished"
        );
        Ok(report)
    }

    async fn extract_entities<S: NarrativeStore>(
        &self,
        store: &S,
        narrative: &Narrative,
        bodies: &[(u32, &str)],
    ) -> Result<usize, StoreError> {
        let mut occurrences: HashMap<String, NameStats> = HashMap::new();
        for (order, body) in bodies {
            for run in capitalized_runs(body) {
                let stats = occurrences.entry(run).or_insert(NameStats {
                    count: 0,
                    first_order: *order,
                    last_order: *order,
                });
                stats.count += 1;
                stats.first_order = stats.first_order.min(*order);
                stats.last_order = stats.last_order.max(*order);
            }
        }
        occurrences.retain(|_, stats| stats.count >= self.min_occurrences);

        let rules = OverrideRules::load(store, narrative.id).await?;
        let candidates = apply_overrides(occurrences, &rules);

        // Each sweep recounts the full text, so the narrative's mention
        // snapshot is replaced wholesale rather than merged.
        let mut edges = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let kind = classify(&candidate.display_name);
            let importance = (0.3 + candidate.count as f64 / 5.0).min(1.0);
            let mut entity = Entity::new(candidate.display_name.clone(), kind);
            for alias in &candidate.aliases {
                entity = entity.with_alias(alias.clone());
            }
            store.upsert_entity(entity).await?;
            edges.push(MentionEdge {
                narrative_id: narrative.id,
                entity_name: canonical_name(&candidate.display_name),
                count: candidate.count,
                first_order: candidate.first_order,
                last_order: candidate.last_order,
                importance,
                sentiment: Sentiment::Neutral,
            });
        }
        let upserted = edges.len();
        store.replace_mentions(narrative.id, edges).await?;
        Ok(upserted)
    }

    async fn extract_themes<S: NarrativeStore>(
        &self,
        store: &S,
        narrative: &Narrative,
        bodies: &[(u32, &str)],
    ) -> Result<usize, StoreError> {
        let mut upserted = 0;
        for theme in &narrative.premise_themes {
            store
                .upsert_theme(narrative.id, theme, Some("premise"))
                .await?;
            upserted += 1;
        }
        for keyword in keyword_themes(bodies) {
            store
                .upsert_theme(narrative.id, &keyword, Some("keyword"))
                .await?;
            upserted += 1;
        }
        Ok(upserted)
    }
}

struct NameStats {
    count: u64,
    first_order: u32,
    last_order: u32,
}

/// Stored curation rules folded into lookup form.
#[derive(Debug, Default)]
struct OverrideRules {
    suppress: HashSet<String>,
    merges: HashMap<String, String>,
}

impl OverrideRules {
    async fn load<S: NarrativeStore>(store: &S, id: NarrativeId) -> Result<Self, StoreError> {
        let mut rules = Self::default();
        for rule in store.list_overrides(id).await? {
            match rule.action {
                OverrideAction::Suppress => {
                    rules.suppress.insert(rule.name);
                }
                OverrideAction::Merge { target } => {
                    rules.merges.insert(rule.name, target);
                }
            }
        }
        Ok(rules)
    }
}

/// A name that survived filtering and overrides, ready to persist.
struct NameCandidate {
    display_name: String,
    count: u64,
    first_order: u32,
    last_order: u32,
    aliases: BTreeSet<String>,
}

/// Apply suppress/merge rules: suppressed names drop out, merged names
/// fold their counts into the target and carry both spellings as aliases.
fn apply_overrides(
    occurrences: HashMap<String, NameStats>,
    rules: &OverrideRules,
) -> Vec<NameCandidate> {
    let mut aggregated: BTreeMap<String, NameCandidate> = BTreeMap::new();
    for (name, stats) in occurrences {
        if rules.suppress.contains(&name) {
            continue;
        }
        let target = rules.merges.get(&name).cloned().unwrap_or_else(|| name.clone());
        let mut aliases = BTreeSet::new();
        if target != name {
            aliases.insert(name);
            aliases.insert(target.clone());
        }
        match aggregated.entry(canonical_name(&target)) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.count += stats.count;
                existing.first_order = existing.first_order.min(stats.first_order);
                existing.last_order = existing.last_order.max(stats.last_order);
                existing.aliases.extend(aliases);
            }
            Entry::Vacant(slot) => {
                slot.insert(NameCandidate {
                    display_name: target,
                    count: stats.count,
                    first_order: stats.first_order,
                    last_order: stats.last_order,
                    aliases,
                });
            }
        }
    }
    aggregated.into_values().collect()
}

fn classify(name: &str) -> EntityKind {
    let last = name
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .to_lowercase();
    if name.contains(' ') && ORG_SUFFIXES.contains(&last.as_str()) {
        EntityKind::Organization
    } else {
        EntityKind::Character
    }
}

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

/// A word that looks like part of a proper name: initial uppercase letter
/// followed by lowercase letters.
fn is_name_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => chars.all(|c| c.is_lowercase()),
        _ => false,
    }
}

/// Runs of consecutive name-shaped words. Punctuation breaks a run, a
/// single space does not. Runs made entirely of stopwords are dropped.
fn capitalized_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut word = String::new();
    for c in text.chars().chain(std::iter::once('\n')) {
        if c.is_alphanumeric() || c == '\'' {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            let w = std::mem::take(&mut word);
            let w = w.trim_matches('\'');
            let w = w.strip_suffix("'s").unwrap_or(w);
            if is_name_word(w) {
                current.push(w.to_string());
            } else {
                flush_run(&mut current, &mut runs);
            }
        }
        if c != ' ' {
            flush_run(&mut current, &mut runs);
        }
    }
    flush_run(&mut current, &mut runs);
    runs
}

fn flush_run(current: &mut Vec<String>, runs: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    if !current.iter().all(|w| is_stopword(w)) {
        // Trim leading stopwords like "The" off longer runs.
        let start = current.iter().take_while(|w| is_stopword(w)).count();
        runs.push(current[start..].join(" "));
    }
    current.clear();
}

/// Frequent long lowercase words become keyword themes, top five.
fn keyword_themes(bodies: &[(u32, &str)]) -> Vec<String> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for (_, body) in bodies {
        for word in body.split(|c: char| !c.is_alphabetic()) {
            if word.len() >= 5 && word.chars().all(|c| c.is_lowercase()) {
                *counts.entry(word.to_string()).or_default() += 1;
            }
        }
    }
    let mut frequent: Vec<(String, u32)> =
        counts.into_iter().filter(|(_, c)| *c > 1).collect();
    frequent.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    frequent.into_iter().take(5).map(|(w, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ChaosRange, ChaosRanges, ChaosVector};
    use crate::model::{EntityOverride, Installment, InstallmentId, StyleProfile};
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[test]
    fn test_capitalized_runs_join_consecutive_names() {
        let runs = capitalized_runs("Tom met Doctor Voss near the Harbor Bureau office.");
        assert!(runs.contains(&"Tom".to_string()));
        assert!(runs.contains(&"Doctor Voss".to_string()));
        assert!(runs.contains(&"Harbor Bureau".to_string()));
    }

    #[test]
    fn test_punctuation_breaks_runs() {
        let runs = capitalized_runs("He blamed Voss. Tom agreed, Voss objected.");
        assert_eq!(
            runs,
            vec!["Voss".to_string(), "Tom".to_string(), "Voss".to_string()]
        );
    }

    #[test]
    fn test_possessive_suffix_stripped() {
        let runs = capitalized_runs("Nobody touched Tom's ledger.");
        assert_eq!(runs, vec!["Tom".to_string()]);
    }

    #[test]
    fn test_stopword_only_runs_dropped() {
        let runs = capitalized_runs("The end. She left. Meanwhile nothing happened.");
        assert!(runs.is_empty());
    }

    #[test]
    fn test_leading_stopword_trimmed_from_run() {
        let runs = capitalized_runs("They visited The Gloaming Institute yesterday.");
        assert!(runs.contains(&"Gloaming Institute".to_string()));
    }

    #[test]
    fn test_all_caps_words_ignored() {
        let runs = capitalized_runs("WARNING the reactor hummed. Tom frowned.");
        assert_eq!(runs, vec!["Tom".to_string()]);
    }

    #[test]
    fn test_classify_org_suffix() {
        assert_eq!(classify("Gloaming Institute"), EntityKind::Organization);
        assert_eq!(classify("Doctor Voss"), EntityKind::Character);
        assert_eq!(classify("Tom"), EntityKind::Character);
    }

    #[test]
    fn test_keyword_themes_require_repetition() {
        let bodies = vec![
            (1, "the lighthouse hummed while paperwork accumulated"),
            (2, "more paperwork arrived at the lighthouse"),
        ];
        let themes = keyword_themes(&bodies);
        assert!(themes.contains(&"lighthouse".to_string()));
        assert!(themes.contains(&"paperwork".to_string()));
        assert!(!themes.contains(&"hummed".to_string()));
    }

    fn seeded_narrative() -> Narrative {
        Narrative {
            id: NarrativeId::new(),
            title: "Test".to_string(),
            premise: "Tom and the archive.".to_string(),
            premise_themes: vec!["bureaucracy".to_string()],
            style: StyleProfile::default(),
            status: NarrativeStatus::Active,
            chaos_initial: ChaosVector::default(),
            chaos_ranges: ChaosRanges::uniform(ChaosRange::new(0.0, 0.1)),
            installment_count: 0,
            total_tokens: 0,
            cover_image_url: None,
            created_at: Utc::now(),
            last_installment_at: None,
            completed_at: None,
            completion_reason: None,
        }
    }

    async fn append_body(store: &MemoryStore, id: NarrativeId, order: u32, body: &str) {
        store
            .append_installment(
                id,
                Installment {
                    id: InstallmentId::new(),
                    narrative_id: id,
                    order,
                    body: body.to_string(),
                    chaos: ChaosVector::default(),
                    intensity: BTreeMap::new(),
                    tokens_used: None,
                    latency_ms: None,
                    model: None,
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_records_entities_and_themes() {
        let store = MemoryStore::new();
        let n = seeded_narrative();
        let id = n.id;
        store.create_narrative(n).await.unwrap();
        let bodies = [
            "Tom argued with Doctor Voss. Tom lost.",
            "Doctor Voss smiled. Tom filed a complaint about paperwork. The paperwork vanished.",
        ];
        for (idx, body) in bodies.iter().enumerate() {
            append_body(&store, id, idx as u32 + 1, body).await;
        }

        let report = EntityExtractor::default().run(&store).await.unwrap();
        assert_eq!(report.narratives_scanned, 1);

        let tom = store.get_entity("tom").await.unwrap().unwrap();
        assert_eq!(tom.kind, EntityKind::Character);
        assert!(tom.mention_count >= 3);

        let voss = store.get_entity("doctor voss").await.unwrap().unwrap();
        assert_eq!(voss.mention_count, 2);

        let mentions = store.list_mentions(id).await.unwrap();
        let tom_mention = mentions.iter().find(|m| m.entity_name == "tom").unwrap();
        assert_eq!(tom_mention.first_order, 1);
        assert_eq!(tom_mention.last_order, 2);

        let themes = store.list_themes(id).await.unwrap();
        assert!(themes.contains(&"bureaucracy".to_string()));
        assert!(themes.contains(&"paperwork".to_string()));
    }

    #[tokio::test]
    async fn test_second_sweep_over_unchanged_text_is_a_no_op() {
        let store = MemoryStore::new();
        let n = seeded_narrative();
        let id = n.id;
        store.create_narrative(n).await.unwrap();
        append_body(&store, id, 1, "Tom paced. Tom paused. Tom paced again.").await;

        let extractor = EntityExtractor::default();
        extractor.run(&store).await.unwrap();
        let first = store.list_mentions(id).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].count, 3);
        assert_eq!(
            store.get_entity("tom").await.unwrap().unwrap().mention_count,
            3
        );

        extractor.run(&store).await.unwrap();
        let second = store.list_mentions(id).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(
            store.get_entity("tom").await.unwrap().unwrap().mention_count,
            3
        );
    }

    #[tokio::test]
    async fn test_merge_override_combines_counts_and_aliases() {
        let store = MemoryStore::new();
        let n = seeded_narrative();
        let id = n.id;
        store.create_narrative(n).await.unwrap();
        append_body(
            &store,
            id,
            1,
            "Captain Voss saluted. Captain Voss waited. Voss blinked. Voss left.",
        )
        .await;
        store
            .put_override(EntityOverride {
                narrative_id: None,
                name: "Voss".to_string(),
                action: OverrideAction::Merge {
                    target: "Captain Voss".to_string(),
                },
            })
            .await
            .unwrap();

        EntityExtractor::default().run(&store).await.unwrap();

        assert!(store.get_entity("voss").await.unwrap().is_none());
        let merged = store.get_entity("captain voss").await.unwrap().unwrap();
        assert_eq!(merged.mention_count, 4);
        assert!(merged.aliases.contains(&"Voss".to_string()));
        assert!(merged.aliases.contains(&"Captain Voss".to_string()));

        let mentions = store.list_mentions(id).await.unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].entity_name, "captain voss");
        assert_eq!(mentions[0].count, 4);
    }

    #[tokio::test]
    async fn test_suppress_override_drops_entity() {
        let store = MemoryStore::new();
        let n = seeded_narrative();
        let id = n.id;
        store.create_narrative(n).await.unwrap();
        append_body(&store, id, 1, "Tom ignored Specter. Tom feared Specter.").await;
        store
            .put_override(EntityOverride {
                narrative_id: Some(id),
                name: "Specter".to_string(),
                action: OverrideAction::Suppress,
            })
            .await
            .unwrap();

        EntityExtractor::default().run(&store).await.unwrap();

        assert!(store.get_entity("specter").await.unwrap().is_none());
        let mentions = store.list_mentions(id).await.unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].entity_name, "tom");
    }
}
