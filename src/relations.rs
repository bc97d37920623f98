//! Implicit relation discovery: vector-similarity candidates verified by a model.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RelationsConfig;
use crate::enrich::synthesizer::extract_json_object;
use crate::enrich::RelationCostTracker;
use crate::error::{GenesisError, Result};
use crate::graph::queries::{self, EnrichedTable};
use crate::graph::vector::{query_similar, TABLE_INDEX};
use crate::graph::{GraphDb, GraphLoader};
use crate::llm::TextGenerator;
use crate::models::ImplicitRelation;

/// Thresholds for one discovery pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationPolicy {
    pub top_k: usize,
    pub min_similarity: f32,
    pub min_llm_confidence: f64,
}

impl From<&RelationsConfig> for RelationPolicy {
    fn from(config: &RelationsConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_similarity: config.min_similarity,
            min_llm_confidence: config.min_llm_confidence,
        }
    }
}

impl RelationPolicy {
    /// Same bounds as `[relations]` in the config file.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(GenesisError::InvalidInput("top_k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(GenesisError::InvalidInput(format!(
                "min_similarity must be between 0.0 and 1.0, got {}",
                self.min_similarity
            )));
        }
        if !(0.0..=1.0).contains(&self.min_llm_confidence) {
            return Err(GenesisError::InvalidInput(format!(
                "min_llm_confidence must be between 0.0 and 1.0, got {}",
                self.min_llm_confidence
            )));
        }
        Ok(())
    }
}

/// A directed pair to verify: `source` is the table whose embedding was queried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePair {
    pub source: String,
    pub target: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelationStats {
    pub tables_considered: usize,
    pub candidates: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
}

enum Verdict {
    Accepted,
    Rejected,
    Failed,
}

/// Finds table pairs that belong together without an explicit foreign key.
pub struct ImplicitRelationFinder {
    graph: GraphDb,
    loader: GraphLoader,
    generator: Arc<dyn TextGenerator>,
    temperature: f32,
    tracker: Arc<RelationCostTracker>,
    max_concurrency: usize,
}

impl ImplicitRelationFinder {
    pub fn new(
        graph: GraphDb,
        generator: Arc<dyn TextGenerator>,
        temperature: f32,
        tracker: Arc<RelationCostTracker>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            loader: GraphLoader::new(graph.clone()),
            graph,
            generator,
            temperature,
            tracker,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn tracker(&self) -> &Arc<RelationCostTracker> {
        &self.tracker
    }

    /// Candidate pairs for every enriched table.
    ///
    /// The index is asked for `top_k + 1` neighbours so that dropping the
    /// table itself still leaves `top_k`; FK-joined pairs and pairs under
    /// `min_similarity` are then removed.
    pub async fn candidates(&self, policy: &RelationPolicy) -> Result<Vec<CandidatePair>> {
        let tables = queries::enriched_tables(&self.graph).await?;
        self.candidates_for(&tables, policy).await
    }

    async fn candidates_for(&self, tables: &[EnrichedTable], policy: &RelationPolicy) -> Result<Vec<CandidatePair>> {
        let mut pairs = Vec::new();
        for table in tables {
            let neighbours = query_similar(&self.graph, TABLE_INDEX, policy.top_k + 1, &table.embedding).await?;
            let nearest = neighbours
                .into_iter()
                .filter(|n| n.name != table.name)
                .take(policy.top_k);

            for neighbour in nearest {
                if neighbour.score < policy.min_similarity {
                    continue;
                }
                if queries::fk_joined(&self.graph, &table.name, &neighbour.name).await? {
                    log::debug!("Skipping {} -> {}: already joined by a foreign key", table.name, neighbour.name);
                    continue;
                }
                pairs.push(CandidatePair {
                    source: table.name.clone(),
                    target: neighbour.name,
                    similarity: neighbour.score,
                });
            }
        }
        Ok(pairs)
    }

    /// Generate, verify and persist implicit relations.
    ///
    /// Graph failures abort the pass; a failed or unparseable verification only
    /// skips its pair. Usage is tracked for every call that got a response.
    pub async fn find_and_create_relations(&self, policy: &RelationPolicy) -> Result<RelationStats> {
        policy.validate()?;
        let tables = queries::enriched_tables(&self.graph).await?;
        log::info!("Searching implicit relations among {} enriched tables", tables.len());

        let candidates = self.candidates_for(&tables, policy).await?;
        log::info!("{} candidate pairs passed similarity and FK filters", candidates.len());

        let by_name: HashMap<&str, &EnrichedTable> = tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let verdicts: Vec<Verdict> = stream::iter(candidates.iter())
            .map(|pair| self.verify(pair, &by_name, policy))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut stats = RelationStats {
            tables_considered: tables.len(),
            candidates: candidates.len(),
            ..RelationStats::default()
        };
        for verdict in verdicts {
            match verdict {
                Verdict::Accepted => stats.accepted += 1,
                Verdict::Rejected => stats.rejected += 1,
                Verdict::Failed => stats.failed += 1,
            }
        }

        log::info!(
            "Relation discovery finished: {} accepted, {} rejected, {} failed",
            stats.accepted,
            stats.rejected,
            stats.failed
        );
        Ok(stats)
    }

    async fn verify(
        &self,
        pair: &CandidatePair,
        by_name: &HashMap<&str, &EnrichedTable>,
        policy: &RelationPolicy,
    ) -> Verdict {
        let (Some(source), Some(target)) = (by_name.get(pair.source.as_str()), by_name.get(pair.target.as_str())) else {
            log::debug!("Skipping {} -> {}: candidate is not enriched", pair.source, pair.target);
            return Verdict::Failed;
        };

        let prompt = build_verification_prompt(source, target, pair.similarity);
        let completion = match self.generator.generate(&prompt, true, self.temperature).await {
            Ok(completion) => completion,
            Err(e) => {
                log::warn!("Verification call failed for {} -> {}: {}", pair.source, pair.target, e);
                return Verdict::Failed;
            }
        };
        self.tracker.track_completion(&prompt, &completion);

        let judgment = extract_json_object(&completion.text)
            .ok_or_else(|| "no JSON object in response".to_string())
            .and_then(|value| ImplicitRelation::from_json(value).map_err(|e| e.to_string()));
        let relation = match judgment {
            Ok(relation) => relation,
            Err(e) => {
                log::warn!("Unusable verdict for {} -> {}: {}", pair.source, pair.target, e);
                return Verdict::Failed;
            }
        };

        if !relation.is_accepted(policy.min_llm_confidence) {
            log::debug!(
                "Rejected {} -> {} (exists: {}, confidence: {:.2})",
                pair.source,
                pair.target,
                relation.relationship_exists,
                relation.confidence_score
            );
            return Verdict::Rejected;
        }

        match self.loader.create_implicit_relation(&pair.source, &pair.target, &relation).await {
            Ok(()) => {
                log::info!(
                    "Implicit relation {} -[{}]-> {} (confidence {:.2})",
                    pair.source,
                    relation.effective_type(),
                    pair.target,
                    relation.confidence_score
                );
                Verdict::Accepted
            }
            Err(e) => {
                log::error!("Failed to write relation {} -> {}: {}", pair.source, pair.target, e);
                Verdict::Failed
            }
        }
    }
}

fn describe(table: &EnrichedTable) -> String {
    format!(
        "- Name: {}\n- Stereotype: {}\n- Description: {}\n- Columns: {}",
        table.name,
        table.stereotype.as_deref().unwrap_or("Unknown"),
        table.core_description,
        table.columns.join(", ")
    )
}

fn build_verification_prompt(source: &EnrichedTable, target: &EnrichedTable, similarity: f32) -> String {
    format!(
        r#"You are a data architect reviewing two database tables that have no foreign key between them.
Their descriptions are semantically similar (cosine similarity {similarity:.3}).
Decide whether the SOURCE table has a meaningful business relationship to the TARGET table.

### SOURCE
{source}

### TARGET
{target}

Return exactly one JSON object:
{{
  "relationship_exists": true or false,
  "confidence_score": a number between 0.0 and 1.0,
  "relationship_type": "A short UPPER_SNAKE_CASE verb phrase such as REFERENCES or DESCRIBES, or null",
  "justification": "One or two sentences of evidence."
}}
"#,
        similarity = similarity,
        source = describe(source),
        target = describe(target),
    )
}
