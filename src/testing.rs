//! Fixtures shared by unit tests: small SQLite sources, a migrated graph,
//! and scripted model capabilities.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::analyzers::{AnalyzerRegistry, NodeContext};
use crate::config::Config;
use crate::error::{GenesisError, Result};
use crate::graph::vector::encode_embedding;
use crate::graph::{Entity, GraphDb, GraphLoader, NodeLabel};
use crate::llm::{Completion, EmbeddingProvider, TextGenerator, TokenUsage};
use crate::orchestrator::{CostApproval, Orchestrator};
use crate::schema::{DatabaseSchema, SchemaExtractor};
use crate::source::SourceDb;

/// A valid description response.
pub const VALID_DESCRIPTION: &str = r#"{"core_description": "Holds shop data.", "inferred_logic": null, "stereotype": "Master", "confidence": 0.9}"#;

const SHOP_DDL: &str = r#"
CREATE TABLE customer (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT
);
CREATE INDEX idx_customer_name ON customer(name);

CREATE TABLE product (
    id INTEGER PRIMARY KEY,
    sku TEXT NOT NULL,
    price REAL
);
INSERT INTO product (sku, price) VALUES ('SKU-1', 9.5), ('SKU-2', 12.0), ('SKU-3', 3.25);

CREATE TABLE "order" (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL REFERENCES customer(id) ON DELETE CASCADE,
    parent_order_id INTEGER REFERENCES "order"(id),
    placed_at TEXT
);

CREATE TABLE order_product (
    order_id INTEGER NOT NULL REFERENCES "order"(id),
    product_id INTEGER NOT NULL REFERENCES product,
    PRIMARY KEY (order_id, product_id)
);
"#;

const PROFILE_DDL: &str = r#"
CREATE TABLE ticket (
    id INTEGER PRIMARY KEY,
    status TEXT NOT NULL,
    code TEXT NOT NULL,
    note TEXT
);
WITH RECURSIVE seq(i) AS (SELECT 0 UNION ALL SELECT i + 1 FROM seq WHERE i < 999)
INSERT INTO ticket (status, code, note)
SELECT
    CASE i % 4 WHEN 0 THEN 'open' WHEN 1 THEN 'closed' WHEN 2 THEN 'pending' ELSE 'archived' END,
    'C' || (i % 500),
    NULL
FROM seq;
"#;

fn migrations_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

fn write_source(dir: &Path, ddl: &str) -> SourceDb {
    let path = dir.join("source.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(ddl).unwrap();
    SourceDb::new(path)
}

/// Customer / order / product source with a junction and a self-reference.
pub fn shop_source() -> (SourceDb, TempDir) {
    let temp = TempDir::new().unwrap();
    let source = write_source(temp.path(), SHOP_DDL);
    (source, temp)
}

/// One 1000-row `ticket` table for profiling.
pub fn profile_source() -> (SourceDb, TempDir) {
    let temp = TempDir::new().unwrap();
    let source = write_source(temp.path(), PROFILE_DDL);
    (source, temp)
}

/// Empty, migrated graph store.
pub async fn test_graph() -> (GraphDb, TempDir) {
    let temp = TempDir::new().unwrap();
    let graph = GraphDb::open(temp.path().join("graph.db"), migrations_dir())
        .await
        .unwrap();
    (graph, temp)
}

pub async fn shop_schema() -> DatabaseSchema {
    let (source, _temp) = shop_source();
    SchemaExtractor::new(source).extract("main").await.unwrap()
}

async fn context_for(ddl: &str, entity: Entity) -> (NodeContext, TempDir) {
    let temp = TempDir::new().unwrap();
    let source = write_source(temp.path(), ddl);
    let graph = GraphDb::open(temp.path().join("graph.db"), migrations_dir())
        .await
        .unwrap();
    let schema = SchemaExtractor::new(source.clone()).extract("main").await.unwrap();
    GraphLoader::new(graph.clone())
        .load_schema(&schema, false)
        .await
        .unwrap();

    let context = NodeContext {
        entity,
        schema: Arc::new(schema),
        source,
        graph,
    };
    (context, temp)
}

/// Context over the shop source with its scaffold already loaded.
pub async fn shop_context(entity: Entity) -> (NodeContext, TempDir) {
    context_for(SHOP_DDL, entity).await
}

pub async fn profile_context(entity: Entity) -> (NodeContext, TempDir) {
    context_for(PROFILE_DDL, entity).await
}

/// Mark a node enriched with `vector`, creating the node if needed.
pub async fn set_embedding(graph: &GraphDb, label: NodeLabel, name: &str, vector: &[f32]) {
    let name = name.to_string();
    let blob = encode_embedding(vector);
    graph
        .with_connection(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO nodes (label, name) VALUES (?1, ?2)",
                params![label.as_str(), name],
            )?;
            conn.execute(
                "UPDATE nodes SET embedding = ?3, is_enriched = 1, \
                 core_description = COALESCE(core_description, 'Test node ' || ?2) \
                 WHERE label = ?1 AND name = ?2",
                params![label.as_str(), name, blob],
            )?;
            Ok(())
        })
        .await
        .unwrap();
}

pub fn unit_vector(dims: usize, idx: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dims];
    vector[idx] = 1.0;
    vector
}

/// One recorded generation request.
#[derive(Debug, Clone)]
pub struct GeneratorCall {
    pub prompt: String,
    pub json_mode: bool,
    pub temperature: f32,
}

/// Replays queued responses, then the fallback (if any), then errors.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<GeneratorCall>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: &str) -> Self {
        Self::new(Vec::new()).then_always(text)
    }

    pub fn then_always(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<GeneratorCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, json_mode: bool, temperature: f32) -> Result<Completion> {
        self.calls.lock().unwrap().push(GeneratorCall {
            prompt: prompt.to_string(),
            json_mode,
            temperature,
        });

        let next = self.responses.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(message)) => return Err(GenesisError::Generation(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| GenesisError::Generation("script exhausted".to_string()))?,
        };

        let usage = TokenUsage {
            prompt_tokens: (prompt.len() / 4) as u64,
            completion_tokens: (text.len() / 4) as u64,
        };
        Ok(Completion {
            text,
            usage: Some(usage),
        })
    }
}

enum FailMode {
    Never,
    Always,
    /// Fail inputs containing the marker
    Containing(String),
}

/// Deterministic embeddings derived from the input bytes.
pub struct FakeEmbedder {
    dimensions: usize,
    fail: FailMode,
    inputs: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    fn with_mode(dimensions: usize, fail: FailMode) -> Self {
        Self {
            dimensions,
            fail,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn new(dimensions: usize) -> Self {
        Self::with_mode(dimensions, FailMode::Never)
    }

    pub fn failing(dimensions: usize) -> Self {
        Self::with_mode(dimensions, FailMode::Always)
    }

    pub fn failing_for(dimensions: usize, marker: &str) -> Self {
        Self::with_mode(dimensions, FailMode::Containing(marker.to_string()))
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inputs.lock().unwrap().push(text.to_string());
        let fails = match &self.fail {
            FailMode::Never => false,
            FailMode::Always => true,
            FailMode::Containing(marker) => text.contains(marker.as_str()),
        };
        if fails {
            return Err(GenesisError::Embedding("embedding refused".to_string()));
        }

        let mut vector = vec![0.0; self.dimensions];
        vector[0] = 1.0;
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimensions] += f32::from(byte) / 255.0;
        }
        Ok(vector)
    }
}

/// Orchestrator over the shop source with scripted capabilities.
pub struct PipelineFixture {
    pub orchestrator: Orchestrator,
    pub graph: GraphDb,
    pub synthesis: Arc<ScriptedGenerator>,
    pub verification: Arc<ScriptedGenerator>,
    pub embedder: Arc<FakeEmbedder>,
    _temp: TempDir,
}

pub struct PipelineBuilder {
    synthesis: ScriptedGenerator,
    verification: ScriptedGenerator,
    embedder: FakeEmbedder,
    max_concurrency: usize,
    empty_registry: bool,
}

impl PipelineFixture {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            synthesis: ScriptedGenerator::always(VALID_DESCRIPTION),
            verification: ScriptedGenerator::new(Vec::new()),
            embedder: FakeEmbedder::new(8),
            max_concurrency: 4,
            empty_registry: false,
        }
    }
}

impl PipelineBuilder {
    pub fn synthesis(mut self, generator: ScriptedGenerator) -> Self {
        self.synthesis = generator;
        self
    }

    pub fn verification(mut self, generator: ScriptedGenerator) -> Self {
        self.verification = generator;
        self
    }

    pub fn embedder(mut self, embedder: FakeEmbedder) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn empty_registry(mut self) -> Self {
        self.empty_registry = true;
        self
    }

    pub async fn build(self, approval: Arc<dyn CostApproval>) -> PipelineFixture {
        let temp = TempDir::new().unwrap();
        let source = write_source(temp.path(), SHOP_DDL);
        let graph = GraphDb::open(temp.path().join("graph.db"), migrations_dir())
            .await
            .unwrap();
        let config = pipeline_config(self.embedder.dimensions, self.max_concurrency);

        let synthesis = Arc::new(self.synthesis);
        let verification = Arc::new(self.verification);
        let embedder = Arc::new(self.embedder);
        let mut orchestrator = Orchestrator::new(
            &config,
            source,
            graph.clone(),
            synthesis.clone(),
            verification.clone(),
            embedder.clone(),
            approval,
        );
        if self.empty_registry {
            orchestrator = orchestrator.with_analyzers(AnalyzerRegistry::new());
        }

        PipelineFixture {
            orchestrator,
            graph,
            synthesis,
            verification,
            embedder,
            _temp: temp,
        }
    }
}

pub async fn pipeline_fixture(approval: Arc<dyn CostApproval>) -> PipelineFixture {
    PipelineFixture::builder().build(approval).await
}

fn pipeline_config(dimensions: usize, max_concurrency: usize) -> Config {
    let text = format!(
        r#"
[source]
db_path = "source.db"

[graph]
db_path = "graph.db"

[synthesis]
model = "synth-test"
api_key_env = "GENESIS_TEST_KEY"
price_input_usd_per_mtok = 0.15
price_output_usd_per_mtok = 0.60

[relation]
model = "judge-test"
api_key_env = "GENESIS_TEST_KEY"
temperature = 0.0
price_input_usd_per_mtok = 2.5
price_output_usd_per_mtok = 10.0

[embeddings]
model = "embed-test"
api_key_env = "GENESIS_TEST_KEY"
dimensions = {dimensions}

[enrichment]
max_concurrency = {max_concurrency}
"#
    );
    Config::parse(&text).unwrap()
}
