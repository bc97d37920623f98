//! End-to-end run: scaffold, selection, cost gate, enrichment, finalization.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::analyzers::{Analyzer, AnalyzerRegistry, Dossier, NodeContext};
use crate::config::Config;
use crate::enrich::{
    CostEstimator, DescriptionSynthesizer, DossierCache, EmbeddingGenerator, EnrichmentCostReport, Pricing,
    RelationCostReport, RelationCostTracker, TokenCounter,
};
use crate::error::{GenesisError, Result};
use crate::graph::{queries, Entity, GraphDb, GraphLoader};
use crate::llm::{EmbeddingProvider, OpenAiChat, OpenAiEmbedder, TextGenerator};
use crate::relations::{ImplicitRelationFinder, RelationPolicy, RelationStats};
use crate::schema::{DatabaseSchema, SchemaExtractor};
use crate::source::SourceDb;

/// The single go/no-go decision taken before any paid generation call.
#[async_trait]
pub trait CostApproval: Send + Sync {
    async fn approve(&self, report: &EnrichmentCostReport) -> Result<bool>;
}

/// Approves every estimate.
pub struct AutoApprove;

#[async_trait]
impl CostApproval for AutoApprove {
    async fn approve(&self, report: &EnrichmentCostReport) -> Result<bool> {
        log::info!("Auto-confirm enabled; proceeding with estimated cost ${:.2}", report.total_cost_usd);
        Ok(true)
    }
}

/// Prints the estimate and asks on the terminal; only "yes" proceeds.
pub struct StdinApproval;

#[async_trait]
impl CostApproval for StdinApproval {
    async fn approve(&self, report: &EnrichmentCostReport) -> Result<bool> {
        let report = report.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut stdout = std::io::stdout();
            writeln!(stdout, "\n{}", report)?;
            write!(stdout, "\n> Do you want to proceed with enrichment? (yes/no): ")?;
            stdout.flush()?;

            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer)?;
            Ok(answer.trim().eq_ignore_ascii_case("yes"))
        })
        .await
        .map_err(|e| GenesisError::Task(e.to_string()))?
    }
}

/// Per-run switches (CLI flags override config where both exist).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub sample_size: Option<usize>,
    pub clean_db: bool,
    pub force_rerun: bool,
    pub skip_relations: bool,
}

/// What happened to each target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityOutcome {
    Enriched,
    NoEvidence,
    SynthesisFailed,
    EmbeddingFailed,
    WriteFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentTally {
    pub enriched: usize,
    pub no_evidence: usize,
    pub synthesis_failed: usize,
    pub embedding_failed: usize,
    pub write_failed: usize,
}

impl EnrichmentTally {
    fn record(&mut self, outcome: EntityOutcome) {
        match outcome {
            EntityOutcome::Enriched => self.enriched += 1,
            EntityOutcome::NoEvidence => self.no_evidence += 1,
            EntityOutcome::SynthesisFailed => self.synthesis_failed += 1,
            EntityOutcome::EmbeddingFailed => self.embedding_failed += 1,
            EntityOutcome::WriteFailed => self.write_failed += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub tables_extracted: usize,
    pub columns_extracted: usize,
    pub skipped_tables: Vec<String>,
    pub drifted_tables: Vec<String>,
    pub total_entities: usize,
    pub targets: usize,
    pub cost_estimate: Option<EnrichmentCostReport>,
    pub enrichment: EnrichmentTally,
    pub relations: Option<RelationStats>,
    pub relation_cost: Option<RelationCostReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Stopped at the cost gate; only the scaffold was written.
    Declined,
}

/// Every Table followed by its Columns, in extraction order.
pub fn all_entities(schema: &DatabaseSchema) -> Vec<Entity> {
    let mut entities = Vec::with_capacity(schema.tables.len() + schema.column_count());
    for table in &schema.tables {
        entities.push(Entity::table(table.table_name.as_str()));
        for column in &table.columns {
            entities.push(Entity::column(&table.table_name, &column.name));
        }
    }
    entities
}

/// All entities minus the already-enriched ones, unless forced.
pub fn select_targets(all: Vec<Entity>, enriched: &HashSet<Entity>, force_rerun: bool) -> Vec<Entity> {
    if force_rerun {
        return all;
    }
    all.into_iter().filter(|e| !enriched.contains(e)).collect()
}

/// Seeded subset of `targets`, in their original order.
pub fn sample_entities(targets: Vec<Entity>, sample_size: usize, seed: u64) -> Vec<Entity> {
    if sample_size >= targets.len() {
        return targets;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, targets.len(), sample_size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| targets[i].clone()).collect()
}

/// Drives the whole pipeline; the only component that sequences the others.
pub struct Orchestrator {
    source: SourceDb,
    graph: GraphDb,
    loader: GraphLoader,
    schema_name: String,
    registry: AnalyzerRegistry,
    synthesizer: DescriptionSynthesizer,
    embeddings: EmbeddingGenerator,
    estimator: CostEstimator,
    relation_finder: ImplicitRelationFinder,
    relation_policy: RelationPolicy,
    approval: Arc<dyn CostApproval>,
    cache: DossierCache,
    default_sample_size: Option<usize>,
    sample_seed: u64,
    max_concurrency: usize,
    dimensions: usize,
}

impl Orchestrator {
    /// Wire the pipeline from explicit capabilities.
    pub fn new(
        config: &Config,
        source: SourceDb,
        graph: GraphDb,
        synthesis: Arc<dyn TextGenerator>,
        verification: Arc<dyn TextGenerator>,
        embedder: Arc<dyn EmbeddingProvider>,
        approval: Arc<dyn CostApproval>,
    ) -> Self {
        let counter = Arc::new(TokenCounter::new());
        let estimator = CostEstimator::new(
            synthesis.model(),
            Pricing::from_model(&config.synthesis),
            counter.clone(),
        );
        let tracker = Arc::new(RelationCostTracker::new(
            verification.model(),
            Pricing::from_model(&config.relation),
            counter,
        ));
        let relation_finder = ImplicitRelationFinder::new(
            graph.clone(),
            verification,
            config.relation.temperature,
            tracker,
            config.enrichment.max_concurrency,
        );

        Self {
            loader: GraphLoader::new(graph.clone()),
            registry: AnalyzerRegistry::with_stock(&config.profiler),
            synthesizer: DescriptionSynthesizer::new(synthesis, config.synthesis.temperature),
            embeddings: EmbeddingGenerator::new(embedder, config.embeddings.dimensions),
            estimator,
            relation_finder,
            relation_policy: RelationPolicy::from(&config.relations),
            approval,
            cache: DossierCache::new(config.enrichment.dossier_cache_capacity),
            default_sample_size: config.enrichment.sample_size,
            sample_seed: config.enrichment.sample_seed,
            max_concurrency: config.enrichment.max_concurrency.max(1),
            dimensions: config.embeddings.dimensions,
            schema_name: config.source.schema_name.clone(),
            source,
            graph,
        }
    }

    /// Open both stores and build the OpenAI-compatible clients from `config`.
    pub async fn from_config(config: &Config, approval: Arc<dyn CostApproval>) -> Result<Self> {
        let source = SourceDb::new(config.source_path());
        source.ping().await?;
        let graph = GraphDb::open(config.graph_path(), &config.graph.migrations_dir).await?;

        let synthesis: Arc<dyn TextGenerator> = Arc::new(OpenAiChat::from_config(&config.synthesis)?);
        let verification: Arc<dyn TextGenerator> = Arc::new(OpenAiChat::from_config(&config.relation)?);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedder::from_config(&config.embeddings)?);

        Ok(Self::new(config, source, graph, synthesis, verification, embedder, approval))
    }

    /// Replace the stock analyzers.
    pub fn with_analyzers(mut self, registry: AnalyzerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add a custom analyzer after the stock ones.
    pub fn register_analyzer(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.registry.register(analyzer);
    }

    pub fn relation_finder(&self) -> &ImplicitRelationFinder {
        &self.relation_finder
    }

    /// Run every phase. A fatal error is logged here and returned.
    pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        log::info!("--- Running full genesis workflow ---");
        match self.run_phases(options).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                log::error!("A critical error stopped the genesis run: {}", e);
                Err(e)
            }
        }
    }

    async fn run_phases(&self, options: &RunOptions) -> Result<RunOutcome> {
        let mut summary = RunSummary::default();
        self.cache.clear();
        self.relation_finder.tracker().reset();

        log::info!("[PHASE 1/3] Extracting schema and loading the structural scaffold");
        let schema = Arc::new(SchemaExtractor::new(self.source.clone()).extract(&self.schema_name).await?);
        let load = self.loader.load_schema(&schema, options.clean_db).await?;
        summary.tables_extracted = schema.tables.len();
        summary.columns_extracted = schema.column_count();
        summary.skipped_tables = schema.skipped_tables.iter().map(|s| s.table_name.clone()).collect();
        summary.drifted_tables = load.drifted_tables;

        log::info!("[PHASE 2/3] Selecting entities to enrich");
        let targets = self.select(&schema, options).await?;
        summary.total_entities = schema.tables.len() + schema.column_count();
        summary.targets = targets.len();

        if targets.is_empty() {
            log::info!("All target entities are already enriched; skipping enrichment");
        } else {
            let report = self.estimate(&schema, &targets).await;
            if !self.approval.approve(&report).await? {
                log::warn!("Run stopped at the cost gate; no enrichment was performed");
                return Ok(RunOutcome::Declined);
            }
            summary.cost_estimate = Some(report);
            summary.enrichment = self.enrich(&schema, targets).await;
            log::info!(
                "Enrichment complete: {} enriched, {} without evidence, {} synthesis failures, {} embedding failures, {} write failures",
                summary.enrichment.enriched,
                summary.enrichment.no_evidence,
                summary.enrichment.synthesis_failed,
                summary.enrichment.embedding_failed,
                summary.enrichment.write_failed
            );
        }

        log::info!("[PHASE 3/3] Finalizing the knowledge graph");
        self.loader.create_vector_indexes(self.dimensions).await?;
        if options.skip_relations {
            log::info!("Relation discovery skipped");
        } else {
            let stats = self
                .relation_finder
                .find_and_create_relations(&self.relation_policy)
                .await?;
            let cost = self.relation_finder.tracker().report();
            log::info!("\n{}", cost);
            summary.relations = Some(stats);
            summary.relation_cost = Some(cost);
        }

        log::info!("--- Genesis run finished ---");
        Ok(RunOutcome::Completed(summary))
    }

    async fn select(&self, schema: &DatabaseSchema, options: &RunOptions) -> Result<Vec<Entity>> {
        let all = all_entities(schema);
        let total = all.len();
        // A wiped graph has nothing enriched; treat it as a forced rerun
        let force = options.force_rerun || options.clean_db;

        let targets = if force {
            log::warn!("Force rerun: all {} entities are targeted", total);
            select_targets(all, &HashSet::new(), true)
        } else {
            let enriched = queries::enriched_entities(&self.graph).await?;
            select_targets(all, &enriched, false)
        };
        log::info!("{} of {} entities need enrichment", targets.len(), total);

        match options.sample_size.or(self.default_sample_size) {
            Some(size) if size < targets.len() => {
                let sampled = sample_entities(targets, size, self.sample_seed);
                log::info!("Sampling {} entities (seed {})", sampled.len(), self.sample_seed);
                Ok(sampled)
            }
            _ => Ok(targets),
        }
    }

    fn context(&self, schema: &Arc<DatabaseSchema>, entity: Entity) -> NodeContext {
        NodeContext {
            entity,
            schema: schema.clone(),
            source: self.source.clone(),
            graph: self.graph.clone(),
        }
    }

    async fn dossier(&self, schema: &Arc<DatabaseSchema>, entity: &Entity) -> Dossier {
        if let Some(dossier) = self.cache.get(entity) {
            return dossier;
        }
        let dossier = self.registry.collect_dossier(&self.context(schema, entity.clone())).await;
        self.cache.put(entity.clone(), dossier.clone());
        dossier
    }

    async fn estimate(&self, schema: &Arc<DatabaseSchema>, targets: &[Entity]) -> EnrichmentCostReport {
        log::info!("Collecting evidence for {} entities to estimate cost", targets.len());
        let dossiers: Vec<Dossier> = stream::iter(targets.iter())
            .map(|entity| self.dossier(schema, entity))
            .buffered(self.max_concurrency)
            .collect()
            .await;
        self.estimator.estimate(targets.iter().zip(dossiers.iter()))
    }

    async fn enrich(&self, schema: &Arc<DatabaseSchema>, targets: Vec<Entity>) -> EnrichmentTally {
        let total = targets.len();
        let outcomes: Vec<EntityOutcome> = stream::iter(targets.into_iter().enumerate())
            .map(|(i, entity)| async move {
                log::info!("Processing entity {}/{}: {}", i + 1, total, entity);
                self.enrich_entity(schema, &entity).await
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut tally = EnrichmentTally::default();
        for outcome in outcomes {
            tally.record(outcome);
        }
        tally
    }

    /// Evidence, synthesis, embedding, write; each step gates the next.
    async fn enrich_entity(&self, schema: &Arc<DatabaseSchema>, entity: &Entity) -> EntityOutcome {
        let dossier = self.dossier(schema, entity).await;
        if dossier.is_empty() {
            log::info!("No evidence for {}; skipping", entity);
            return EntityOutcome::NoEvidence;
        }

        let Some(description) = self.synthesizer.synthesize(entity, &dossier).await else {
            log::warn!("Synthesis failed for {}; skipping", entity);
            return EntityOutcome::SynthesisFailed;
        };

        let Some(embedding) = self.embeddings.generate(&description.core_description).await else {
            log::warn!("Embedding failed for {}; skipping", entity);
            return EntityOutcome::EmbeddingFailed;
        };

        match self.loader.update_node_enrichment(entity, &description, &embedding).await {
            Ok(()) => {
                log::debug!("Enriched {}", entity);
                EntityOutcome::Enriched
            }
            Err(e) => {
                log::error!("Failed to save enrichment for {}: {}", entity, e);
                EntityOutcome::WriteFailed
            }
        }
    }
}
