//! Relationship discovery across narratives.
//!
//! A sweep over every narrative pair: shared entities and themes become
//! weighted connection edges, entities co-mentioned by enough narratives
//! become relatedness edges, and entity importance is rescored from
//! mention volume and narrative spread.
//!
//! Edges are upserted by pair, so a re-run with unchanged inputs is a
//! no-op. Pairs that fall below the sharing threshold are skipped, not
//! deleted: an edge written by an earlier sweep stays in place until the
//! pair qualifies again with fresh numbers.
//!
//! [`DiscoveryEngine::clusters`] groups the graph into connected
//! components on demand; clusters are derived views, never persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::model::{ConnectionEdge, NarrativeId, NarrativeStatus, RelatednessEdge};
use crate::store::{NarrativeStore, StoreError};

const ENTITY_SHARE_WEIGHT: f64 = 0.6;
const THEME_SHARE_WEIGHT: f64 = 0.4;

/// What one discovery sweep produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub narratives_considered: usize,
    pub connections_upserted: usize,
    pub pairs_skipped: usize,
    pub relatedness_upserted: usize,
    pub entities_rescored: usize,
    pub elapsed_ms: u128,
}

/// A connected component of the connection graph. Every non-killed
/// narrative lands in exactly one cluster; unconnected ones form
/// singletons.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeCluster {
    /// Member ids, ascending.
    pub narratives: Vec<NarrativeId>,
    /// Mean connection weight over all member pairs; 0 for singletons.
    pub cohesion: f64,
    /// Per member: summed weight of its edges, over the other members.
    pub member_weights: BTreeMap<NarrativeId, f64>,
    /// Up to five entity names by total mention count inside the cluster.
    pub top_entities: Vec<String>,
    /// Up to five theme names by member narrative count.
    pub top_themes: Vec<String>,
}

/// Pairwise discovery engine.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    min_shared_items: u32,
    min_coappearances: u32,
}

impl DiscoveryEngine {
    pub fn new(min_shared_items: u32, min_coappearances: u32) -> Self {
        Self {
            min_shared_items,
            min_coappearances,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.min_shared_items, config.min_coappearances)
    }

    /// Run a full sweep: connections, relatedness, importance.
    pub async fn run<S: NarrativeStore>(&self, store: &S) -> Result<DiscoveryReport, StoreError> {
        let started = Instant::now();
        let mut report = DiscoveryReport::default();

        let mut narratives = store.list_by_status(NarrativeStatus::Active).await?;
        narratives.extend(store.list_by_status(NarrativeStatus::Completed).await?);
        narratives.sort_by_key(|n| n.id);
        report.narratives_considered = narratives.len();

        // Mention and theme sets per narrative, canonical names throughout.
        let mut entity_sets: BTreeMap<NarrativeId, BTreeSet<String>> = BTreeMap::new();
        let mut theme_sets: BTreeMap<NarrativeId, BTreeSet<String>> = BTreeMap::new();
        let mut mention_totals: BTreeMap<String, (u64, u32)> = BTreeMap::new();
        for narrative in &narratives {
            let mentions = store.list_mentions(narrative.id).await?;
            let mut names = BTreeSet::new();
            for mention in mentions {
                let entry = mention_totals.entry(mention.entity_name.clone()).or_insert((0, 0));
                entry.0 += mention.count;
                entry.1 += 1;
                names.insert(mention.entity_name);
            }
            entity_sets.insert(narrative.id, names);
            let themes = store.list_themes(narrative.id).await?;
            theme_sets.insert(narrative.id, themes.into_iter().collect());
        }

        // Narrative-to-narrative connections.
        for (i, a) in narratives.iter().enumerate() {
            for b in &narratives[i + 1..] {
                let shared_entities: Vec<String> = entity_sets[&a.id]
                    .intersection(&entity_sets[&b.id])
                    .cloned()
                    .collect();
                let shared_themes: Vec<String> = theme_sets[&a.id]
                    .intersection(&theme_sets[&b.id])
                    .cloned()
                    .collect();
                let shared = shared_entities.len() + shared_themes.len();
                if (shared as u32) < self.min_shared_items {
                    report.pairs_skipped += 1;
                    continue;
                }
                let weight = (shared_entities.len() as f64 * ENTITY_SHARE_WEIGHT
                    + shared_themes.len() as f64 * THEME_SHARE_WEIGHT)
                    / 10.0;
                debug!(source = %a.id, target = %b.id, weight, "connection found");
                store
                    .upsert_connection(ConnectionEdge::new(
                        a.id,
                        b.id,
                        weight,
                        shared_entities,
                        shared_themes,
                        Utc::now(),
                    ))
                    .await?;
                report.connections_upserted += 1;
            }
        }

        // Entity-to-entity relatedness from co-mention.
        let mut co_mentions: BTreeMap<(String, String), BTreeSet<NarrativeId>> = BTreeMap::new();
        for (narrative_id, names) in &entity_sets {
            let names: Vec<&String> = names.iter().collect();
            for (i, a) in names.iter().enumerate() {
                for b in &names[i + 1..] {
                    co_mentions
                        .entry(((*a).clone(), (*b).clone()))
                        .or_default()
                        .insert(*narrative_id);
                }
            }
        }
        for ((a, b), ids) in co_mentions {
            let co = ids.len() as u32;
            if co < self.min_coappearances {
                continue;
            }
            let strength = co as f64 / 10.0;
            store
                .upsert_relatedness(RelatednessEdge::new(
                    a,
                    b,
                    co,
                    ids.into_iter().collect(),
                    strength,
                ))
                .await?;
            report.relatedness_upserted += 1;
        }

        // Importance rescoring from total mentions and narrative spread.
        for (name, (total, distinct)) in mention_totals {
            let importance =
                (0.3 + total as f64 / 20.0 + 0.05 * distinct as f64).min(1.0);
            match store.set_entity_importance(&name, importance).await {
                Ok(()) => report.entities_rescored += 1,
                // Mentions can reference entities pruned from the registry.
                Err(StoreError::UnknownEntity(_)) => {}
                Err(other) => return Err(other),
            }
        }

        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            narratives = report.narratives_considered,
            connections = report.connections_upserted,
            skipped = report.pairs_skipped,
            relatedness = report.relatedness_upserted,
            elapsed_ms = report.elapsed_ms,
            "discovery sweep finished"
        );
        Ok(report)
    }

    /// Group narratives into connected components of the connection graph,
    /// largest first.
    pub async fn clusters<S: NarrativeStore>(
        &self,
        store: &S,
    ) -> Result<Vec<NarrativeCluster>, StoreError> {
        let mut narratives = store.list_by_status(NarrativeStatus::Active).await?;
        narratives.extend(store.list_by_status(NarrativeStatus::Completed).await?);

        let mut adjacency: BTreeMap<NarrativeId, BTreeMap<NarrativeId, f64>> =
            narratives.iter().map(|n| (n.id, BTreeMap::new())).collect();
        for edge in store.connection_graph(0.0).await? {
            if !adjacency.contains_key(&edge.source) || !adjacency.contains_key(&edge.target) {
                continue;
            }
            if let Some(neighbours) = adjacency.get_mut(&edge.source) {
                neighbours.insert(edge.target, edge.weight);
            }
            if let Some(neighbours) = adjacency.get_mut(&edge.target) {
                neighbours.insert(edge.source, edge.weight);
            }
        }

        let mut clusters = Vec::new();
        let mut seen: BTreeSet<NarrativeId> = BTreeSet::new();
        for start in adjacency.keys().copied().collect::<Vec<_>>() {
            if seen.contains(&start) {
                continue;
            }
            let mut component: BTreeSet<NarrativeId> = BTreeSet::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if !seen.insert(node) {
                    continue;
                }
                component.insert(node);
                stack.extend(adjacency[&node].keys().filter(|n| !seen.contains(n)).copied());
            }
            clusters.push(self.build_cluster(store, component, &adjacency).await?);
        }
        clusters.sort_by(|a, b| {
            b.narratives
                .len()
                .cmp(&a.narratives.len())
                .then(a.narratives.cmp(&b.narratives))
        });
        Ok(clusters)
    }

    async fn build_cluster<S: NarrativeStore>(
        &self,
        store: &S,
        component: BTreeSet<NarrativeId>,
        adjacency: &BTreeMap<NarrativeId, BTreeMap<NarrativeId, f64>>,
    ) -> Result<NarrativeCluster, StoreError> {
        let members: Vec<NarrativeId> = component.into_iter().collect();

        let cohesion = if members.len() <= 1 {
            0.0
        } else {
            let mut total = 0.0;
            let mut pairs = 0u32;
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    total += adjacency[a].get(b).copied().unwrap_or(0.0);
                    pairs += 1;
                }
            }
            total / pairs as f64
        };

        let denominator = members.len().saturating_sub(1).max(1) as f64;
        let member_weights: BTreeMap<NarrativeId, f64> = members
            .iter()
            .map(|id| (*id, adjacency[id].values().sum::<f64>() / denominator))
            .collect();

        let mut entity_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut theme_counts: BTreeMap<String, u32> = BTreeMap::new();
        for id in &members {
            for mention in store.list_mentions(*id).await? {
                *entity_counts.entry(mention.entity_name).or_default() += mention.count;
            }
            for theme in store.list_themes(*id).await? {
                *theme_counts.entry(theme).or_default() += 1;
            }
        }

        Ok(NarrativeCluster {
            narratives: members,
            cohesion,
            member_weights,
            top_entities: top_by_count(entity_counts),
            top_themes: top_by_count(theme_counts),
        })
    }
}

/// Top five keys by descending count, name-ascending on ties.
fn top_by_count<C: Ord + Copy>(counts: BTreeMap<String, C>) -> Vec<String> {
    let mut ranked: Vec<(String, C)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(5).map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ChaosRange, ChaosRanges, ChaosVector};
    use crate::model::{
        canonical_name, Entity, EntityKind, MentionEdge, Narrative, Sentiment, StyleProfile,
    };
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn narrative(seq: u128) -> Narrative {
        Narrative {
            id: NarrativeId(Uuid::from_u128(seq)),
            title: format!("Narrative {seq}"),
            premise: "A premise.".to_string(),
            premise_themes: vec![],
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

    async fn mention(store: &MemoryStore, id: NarrativeId, name: &str, count: u64) {
        store
            .upsert_entity(Entity::new(name, EntityKind::Character).with_mentions(count))
            .await
            .unwrap();
        store
            .upsert_mention(MentionEdge {
                narrative_id: id,
                entity_name: canonical_name(name),
                count,
                first_order: 1,
                last_order: 1,
                importance: 0.3,
                sentiment: Sentiment::Neutral,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_weight_formula() {
        let store = MemoryStore::new();
        let a = narrative(1);
        let b = narrative(2);
        let (a_id, b_id) = (a.id, b.id);
        store.create_narrative(a).await.unwrap();
        store.create_narrative(b).await.unwrap();

        // Four shared entities and two shared themes: (4 * 0.6 + 2 * 0.4) / 10.
        for name in ["Tom", "Voss", "Archive", "Lighthouse"] {
            mention(&store, a_id, name, 2).await;
            mention(&store, b_id, name, 2).await;
        }
        for theme in ["bureaucracy", "decay"] {
            store.upsert_theme(a_id, theme, None).await.unwrap();
            store.upsert_theme(b_id, theme, None).await.unwrap();
        }

        let report = DiscoveryEngine::new(2, 2).run(&store).await.unwrap();
        assert_eq!(report.connections_upserted, 1);

        let edges = store.connection_graph(0.0).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 0.32).abs() < 1e-9);
        assert_eq!(edges[0].source, a_id);
        assert_eq!(edges[0].target, b_id);
        assert_eq!(edges[0].shared_entities.len(), 4);
        assert_eq!(edges[0].shared_themes.len(), 2);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = MemoryStore::new();
        let a = narrative(1);
        let b = narrative(2);
        let (a_id, b_id) = (a.id, b.id);
        store.create_narrative(a).await.unwrap();
        store.create_narrative(b).await.unwrap();
        for name in ["Tom", "Voss"] {
            mention(&store, a_id, name, 1).await;
            mention(&store, b_id, name, 1).await;
        }

        let engine = DiscoveryEngine::new(2, 2);
        engine.run(&store).await.unwrap();
        let first = store.connection_graph(0.0).await.unwrap();
        engine.run(&store).await.unwrap();
        let second = store.connection_graph(0.0).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].weight, second[0].weight);
        assert_eq!(first[0].shared_entities, second[0].shared_entities);
    }

    #[tokio::test]
    async fn test_below_threshold_pairs_skipped_but_old_edges_kept() {
        let store = MemoryStore::new();
        let a = narrative(1);
        let b = narrative(2);
        let (a_id, b_id) = (a.id, b.id);
        store.create_narrative(a).await.unwrap();
        store.create_narrative(b).await.unwrap();
        for name in ["Tom", "Voss"] {
            mention(&store, a_id, name, 1).await;
            mention(&store, b_id, name, 1).await;
        }

        // Qualifies at threshold 2.
        DiscoveryEngine::new(2, 2).run(&store).await.unwrap();
        assert_eq!(store.connection_graph(0.0).await.unwrap().len(), 1);

        // Higher threshold: the pair is skipped, the stale edge survives.
        let report = DiscoveryEngine::new(5, 2).run(&store).await.unwrap();
        assert_eq!(report.connections_upserted, 0);
        assert_eq!(report.pairs_skipped, 1);
        assert_eq!(store.connection_graph(0.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relatedness_needs_enough_coappearances() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for seq in 1..=3 {
            let n = narrative(seq);
            ids.push(n.id);
            store.create_narrative(n).await.unwrap();
        }

        // Tom and Voss co-appear in all three narratives; Tom and Archive
        // only in one.
        for id in &ids {
            mention(&store, *id, "Tom", 1).await;
            mention(&store, *id, "Voss", 1).await;
        }
        mention(&store, ids[0], "Archive", 1).await;

        DiscoveryEngine::new(20, 2).run(&store).await.unwrap();
        let edges = store.list_relatedness().await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source, "tom");
        assert_eq!(edges[0].target, "voss");
        assert_eq!(edges[0].co_occurrences, 3);
        assert!((edges[0].strength - 0.3).abs() < 1e-9);
        assert_eq!(edges[0].narratives.len(), 3);
    }

    #[tokio::test]
    async fn test_clusters_group_connected_narratives() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for seq in 1..=3 {
            let n = narrative(seq);
            ids.push(n.id);
            store.create_narrative(n).await.unwrap();
        }
        // First two narratives share two entities and a theme; the third
        // shares nothing.
        for id in &ids[..2] {
            mention(&store, *id, "Tom", 1).await;
            mention(&store, *id, "Voss", 1).await;
            store.upsert_theme(*id, "bureaucracy", None).await.unwrap();
        }
        mention(&store, ids[2], "Archive", 1).await;

        let engine = DiscoveryEngine::new(2, 2);
        engine.run(&store).await.unwrap();
        let clusters = engine.clusters(&store).await.unwrap();

        assert_eq!(clusters.len(), 2);
        let pair = &clusters[0];
        assert_eq!(pair.narratives, vec![ids[0], ids[1]]);
        // (2 entities * 0.6 + 1 theme * 0.4) / 10 on the single edge.
        assert!((pair.cohesion - 0.16).abs() < 1e-9);
        assert!((pair.member_weights[&ids[0]] - 0.16).abs() < 1e-9);
        assert_eq!(pair.top_entities, vec!["tom".to_string(), "voss".to_string()]);
        assert_eq!(pair.top_themes, vec!["bureaucracy".to_string()]);

        let singleton = &clusters[1];
        assert_eq!(singleton.narratives, vec![ids[2]]);
        assert_eq!(singleton.cohesion, 0.0);
        assert_eq!(singleton.top_entities, vec!["archive".to_string()]);
        assert!(singleton.top_themes.is_empty());
    }

    #[tokio::test]
    async fn test_importance_rescored_from_spread() {
        let store = MemoryStore::new();
        let a = narrative(1);
        let b = narrative(2);
        let (a_id, b_id) = (a.id, b.id);
        store.create_narrative(a).await.unwrap();
        store.create_narrative(b).await.unwrap();
        mention(&store, a_id, "Tom", 6).await;
        mention(&store, b_id, "Tom", 4).await;

        let report = DiscoveryEngine::new(2, 2).run(&store).await.unwrap();
        assert_eq!(report.entities_rescored, 1);

        let tom = store.get_entity("tom").await.unwrap().unwrap();
        // 0.3 + 10 / 20 + 0.05 * 2 narratives.
        assert!((tom.importance - 0.9).abs() < 1e-9);
    }
}
