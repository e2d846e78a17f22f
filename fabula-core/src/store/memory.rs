//! In-memory store backed by hash maps behind a single lock.
//!
//! The default backend for tests and single-process deployments. All
//! invariants the trait documents (contiguous orders, terminal
//! immutability, one evaluation per order) are enforced here.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::model::{
    canonical_pair, CompletionReason, ConnectionEdge, Entity, EntityOverride, Evaluation,
    Installment, MentionEdge, Narrative, NarrativeId, NarrativeStatus, RelatednessEdge,
    Sentiment, Theme,
};
use crate::store::{NarrativeDetail, NarrativeStore, StoreError};

#[derive(Debug, Clone)]
struct NarrativeRecord {
    narrative: Narrative,
    installments: Vec<Installment>,
    evaluations: Vec<Evaluation>,
    themes: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    narratives: HashMap<NarrativeId, NarrativeRecord>,
    entities: HashMap<String, Entity>,
    mentions: HashMap<(NarrativeId, String), MentionEdge>,
    themes: HashMap<String, Theme>,
    overrides: HashMap<(Option<NarrativeId>, String), EntityOverride>,
    connections: BTreeMap<(NarrativeId, NarrativeId), ConnectionEdge>,
    relatedness: BTreeMap<(String, String), RelatednessEdge>,
}

/// In-memory [`NarrativeStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift a narrative's last installment timestamp into the past.
    /// Test utility for exercising interval gating without waiting.
    pub async fn backdate_last_installment(&self, id: NarrativeId, seconds: i64) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.narratives.get_mut(&id) {
            if let Some(at) = record.narrative.last_installment_at {
                record.narrative.last_installment_at = Some(at - Duration::seconds(seconds));
            }
        }
    }
}

fn record_mut<'a>(
    inner: &'a mut Inner,
    id: NarrativeId,
) -> Result<&'a mut NarrativeRecord, StoreError> {
    inner.narratives.get_mut(&id).ok_or(StoreError::NotFound(id))
}

fn require_active(record: &NarrativeRecord) -> Result<(), StoreError> {
    if record.narrative.status.is_terminal() {
        return Err(StoreError::Terminal {
            narrative_id: record.narrative.id,
            status: record.narrative.status,
        });
    }
    Ok(())
}

#[async_trait]
impl NarrativeStore for MemoryStore {
    async fn create_narrative(&self, narrative: Narrative) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.narratives.insert(
            narrative.id,
            NarrativeRecord {
                narrative,
                installments: Vec::new(),
                evaluations: Vec::new(),
                themes: BTreeSet::new(),
            },
        );
        Ok(())
    }

    async fn get_narrative(&self, id: NarrativeId) -> Result<Narrative, StoreError> {
        let inner = self.inner.read().await;
        inner
            .narratives
            .get(&id)
            .map(|r| r.narrative.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_by_status(
        &self,
        status: NarrativeStatus,
    ) -> Result<Vec<Narrative>, StoreError> {
        let inner = self.inner.read().await;
        let mut narratives: Vec<Narrative> = inner
            .narratives
            .values()
            .filter(|r| r.narrative.status == status)
            .map(|r| r.narrative.clone())
            .collect();
        narratives.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(narratives)
    }

    async fn recent_installments(
        &self,
        id: NarrativeId,
        limit: u32,
    ) -> Result<Vec<Installment>, StoreError> {
        let inner = self.inner.read().await;
        let record = inner.narratives.get(&id).ok_or(StoreError::NotFound(id))?;
        let installments = &record.installments;
        let start = installments.len().saturating_sub(limit as usize);
        Ok(installments[start..].to_vec())
    }

    async fn append_installment(
        &self,
        id: NarrativeId,
        installment: Installment,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = record_mut(&mut inner, id)?;
        require_active(record)?;
        let expected = record.narrative.installment_count + 1;
        if installment.order != expected {
            return Err(StoreError::OrderGap {
                narrative_id: id,
                expected,
                got: installment.order,
            });
        }
        record.narrative.installment_count = installment.order;
        record.narrative.total_tokens += installment.tokens_used.unwrap_or(0) as u64;
        record.narrative.last_installment_at = Some(installment.created_at);
        record.installments.push(installment);
        Ok(())
    }

    async fn append_evaluation(
        &self,
        id: NarrativeId,
        evaluation: Evaluation,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = record_mut(&mut inner, id)?;
        require_active(record)?;
        if record
            .evaluations
            .iter()
            .any(|e| e.installment_order == evaluation.installment_order)
        {
            return Err(StoreError::DuplicateEvaluation {
                narrative_id: id,
                order: evaluation.installment_order,
            });
        }
        record.evaluations.push(evaluation);
        Ok(())
    }

    async fn has_evaluation(&self, id: NarrativeId, order: u32) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        let record = inner.narratives.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(record
            .evaluations
            .iter()
            .any(|e| e.installment_order == order))
    }

    async fn list_evaluations(&self, id: NarrativeId) -> Result<Vec<Evaluation>, StoreError> {
        let inner = self.inner.read().await;
        let record = inner.narratives.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut evaluations = record.evaluations.clone();
        evaluations.sort_by_key(|e| e.installment_order);
        Ok(evaluations)
    }

    async fn mark_terminal(
        &self,
        id: NarrativeId,
        status: NarrativeStatus,
        reason: CompletionReason,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = record_mut(&mut inner, id)?;
        require_active(record)?;
        record.narrative.status = status;
        record.narrative.completed_at = Some(at);
        record.narrative.completion_reason = Some(reason);
        Ok(())
    }

    async fn set_cover_image(&self, id: NarrativeId, url: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = record_mut(&mut inner, id)?;
        record.narrative.cover_image_url = Some(url.to_string());
        Ok(())
    }

    async fn fetch_detail(&self, id: NarrativeId) -> Result<NarrativeDetail, StoreError> {
        let inner = self.inner.read().await;
        let record = inner.narratives.get(&id).ok_or(StoreError::NotFound(id))?;
        let mentions = inner
            .mentions
            .values()
            .filter(|m| m.narrative_id == id)
            .cloned()
            .collect();
        Ok(NarrativeDetail {
            narrative: record.narrative.clone(),
            installments: record.installments.clone(),
            evaluations: record.evaluations.clone(),
            mentions,
            themes: record.themes.iter().cloned().collect(),
        })
    }

    async fn delete_narrative(&self, id: NarrativeId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.narratives.remove(&id).ok_or(StoreError::NotFound(id))?;
        for theme in &record.themes {
            let emptied = match inner.themes.get_mut(theme) {
                Some(entry) => {
                    entry.narrative_count = entry.narrative_count.saturating_sub(1);
                    entry.narrative_count == 0
                }
                None => false,
            };
            if emptied {
                inner.themes.remove(theme);
            }
        }
        inner.mentions.retain(|(narrative_id, _), _| *narrative_id != id);
        inner.overrides.retain(|(scope, _), _| *scope != Some(id));
        inner
            .connections
            .retain(|(source, target), _| *source != id && *target != id);
        inner.relatedness.retain(|_, edge| {
            edge.narratives.retain(|n| *n != id);
            let co = edge.narratives.len() as u32;
            if co == 0 {
                return false;
            }
            edge.co_occurrences = co;
            edge.strength = co as f64 / 10.0;
            true
        });
        Ok(())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.entities.entry(entity.name.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.mention_count += entity.mention_count;
                existing.importance = existing.importance.max(entity.importance);
                for alias in entity.aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entity);
            }
        }
        Ok(())
    }

    async fn get_entity(&self, canonical: &str) -> Result<Option<Entity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.entities.get(canonical).cloned())
    }

    async fn list_entities(&self) -> Result<Vec<Entity>, StoreError> {
        let inner = self.inner.read().await;
        let mut entities: Vec<Entity> = inner.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entities)
    }

    async fn set_entity_importance(
        &self,
        canonical: &str,
        importance: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entity = inner
            .entities
            .get_mut(canonical)
            .ok_or_else(|| StoreError::UnknownEntity(canonical.to_string()))?;
        entity.importance = importance;
        Ok(())
    }

    async fn upsert_mention(&self, mention: MentionEdge) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (mention.narrative_id, mention.entity_name.clone());
        match inner.mentions.entry(key) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.count += mention.count;
                existing.first_order = existing.first_order.min(mention.first_order);
                existing.last_order = existing.last_order.max(mention.last_order);
                existing.importance = (existing.importance + mention.importance) / 2.0;
                if existing.sentiment == Sentiment::Neutral {
                    existing.sentiment = mention.sentiment;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(mention);
            }
        }
        Ok(())
    }

    async fn replace_mentions(
        &self,
        id: NarrativeId,
        mentions: Vec<MentionEdge>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.narratives.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let mut touched: BTreeSet<String> = inner
            .mentions
            .keys()
            .filter(|(narrative_id, _)| *narrative_id == id)
            .map(|(_, name)| name.clone())
            .collect();
        inner.mentions.retain(|(narrative_id, _), _| *narrative_id != id);
        for mention in mentions {
            touched.insert(mention.entity_name.clone());
            inner
                .mentions
                .insert((id, mention.entity_name.clone()), mention);
        }
        for name in touched {
            let total: u64 = inner
                .mentions
                .values()
                .filter(|m| m.entity_name == name)
                .map(|m| m.count)
                .sum();
            if let Some(entity) = inner.entities.get_mut(&name) {
                entity.mention_count = total;
            }
        }
        Ok(())
    }

    async fn list_mentions(&self, id: NarrativeId) -> Result<Vec<MentionEdge>, StoreError> {
        let inner = self.inner.read().await;
        let mut mentions: Vec<MentionEdge> = inner
            .mentions
            .values()
            .filter(|m| m.narrative_id == id)
            .cloned()
            .collect();
        mentions.sort_by(|a, b| a.entity_name.cmp(&b.entity_name));
        Ok(mentions)
    }

    async fn upsert_theme(
        &self,
        id: NarrativeId,
        name: &str,
        category: Option<&str>,
    ) -> Result<(), StoreError> {
        let canonical = name.trim().to_lowercase();
        let mut inner = self.inner.write().await;
        let record = record_mut(&mut inner, id)?;
        let newly_attached = record.themes.insert(canonical.clone());
        match inner.themes.entry(canonical) {
            Entry::Occupied(mut slot) => {
                let theme = slot.get_mut();
                if newly_attached {
                    theme.narrative_count += 1;
                }
                if theme.category.is_none() {
                    theme.category = category.map(str::to_string);
                }
            }
            Entry::Vacant(slot) => {
                let name = slot.key().clone();
                slot.insert(Theme {
                    name,
                    category: category.map(str::to_string),
                    narrative_count: 1,
                });
            }
        }
        Ok(())
    }

    async fn list_themes(&self, id: NarrativeId) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let record = inner.narratives.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(record.themes.iter().cloned().collect())
    }

    async fn list_all_themes(&self) -> Result<Vec<Theme>, StoreError> {
        let inner = self.inner.read().await;
        let mut themes: Vec<Theme> = inner.themes.values().cloned().collect();
        themes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(themes)
    }

    async fn put_override(&self, rule: EntityOverride) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .overrides
            .insert((rule.narrative_id, rule.name.clone()), rule);
        Ok(())
    }

    async fn list_overrides(&self, id: NarrativeId) -> Result<Vec<EntityOverride>, StoreError> {
        let inner = self.inner.read().await;
        let mut rules: Vec<EntityOverride> = inner
            .overrides
            .values()
            .filter(|r| r.narrative_id.is_none() || r.narrative_id == Some(id))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }

    async fn upsert_connection(&self, edge: ConnectionEdge) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = canonical_pair(edge.source, edge.target);
        inner.connections.insert(key, edge);
        Ok(())
    }

    async fn connection_graph(
        &self,
        min_weight: f64,
    ) -> Result<Vec<ConnectionEdge>, StoreError> {
        let inner = self.inner.read().await;
        let mut edges: Vec<ConnectionEdge> = inner
            .connections
            .values()
            .filter(|e| e.weight >= min_weight)
            .cloned()
            .collect();
        edges.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        Ok(edges)
    }

    async fn upsert_relatedness(&self, edge: RelatednessEdge) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (edge.source.clone(), edge.target.clone());
        inner.relatedness.insert(key, edge);
        Ok(())
    }

    async fn list_relatedness(&self) -> Result<Vec<RelatednessEdge>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.relatedness.values().cloned().collect())
    }
}
