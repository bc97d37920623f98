//! Evidence collection: independent analyzers that each contribute at most one
//! chunk of evidence about a Table or Column.

mod data_profiler;
mod graph_context;
mod naming;
mod schema_detail;

pub use data_profiler::DataProfiler;
pub use graph_context::GraphContextAnalyzer;
pub use naming::NamingConventionAnalyzer;
pub use schema_detail::SchemaDetailAnalyzer;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ProfilerConfig;
use crate::graph::{Entity, GraphDb};
use crate::schema::DatabaseSchema;
use crate::source::SourceDb;

/// Everything an analyzer may consult about one entity.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub entity: Entity,
    pub schema: Arc<DatabaseSchema>,
    pub source: SourceDb,
    pub graph: GraphDb,
}

/// One analyzer's findings about one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceChunk {
    pub analyzer_name: String,
    pub content: String,
}

impl EvidenceChunk {
    pub fn new(analyzer_name: &str, lines: Vec<String>) -> Self {
        Self {
            analyzer_name: analyzer_name.to_string(),
            content: lines.join("\n"),
        }
    }
}

/// The non-empty chunks collected for one entity, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dossier {
    pub chunks: Vec<EvidenceChunk>,
}

impl Dossier {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Render the dossier as prompt text, one titled section per chunk.
    pub fn render(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| format!("# --- {} ---\n{}", chunk.analyzer_name, chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A source of evidence.
///
/// Implementations return `None` when they have nothing to say or when their
/// own lookups fail; a failing analyzer never aborts the dossier.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, context: &NodeContext) -> Option<EvidenceChunk>;
}

/// Ordered collection of analyzers.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four stock analyzers, cheapest first.
    pub fn with_stock(profiler: &ProfilerConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SchemaDetailAnalyzer));
        registry.register(Arc::new(NamingConventionAnalyzer::new()));
        registry.register(Arc::new(GraphContextAnalyzer));
        registry.register(Arc::new(DataProfiler::new(profiler.clone())));
        registry
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        log::debug!("Registered analyzer '{}'", analyzer.name());
        self.analyzers.push(analyzer);
    }

    pub fn names(&self) -> Vec<&str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Run every analyzer against `context` and keep the non-empty chunks.
    pub async fn collect_dossier(&self, context: &NodeContext) -> Dossier {
        let mut dossier = Dossier::default();
        for analyzer in &self.analyzers {
            match analyzer.analyze(context).await {
                Some(chunk) if !chunk.content.trim().is_empty() => dossier.chunks.push(chunk),
                _ => log::trace!("{} produced no evidence for {}", analyzer.name(), context.entity),
            }
        }
        dossier
    }
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerRegistry")
            .field("analyzers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shop_context;

    struct Fixed(&'static str, Option<&'static str>);

    #[async_trait]
    impl Analyzer for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn analyze(&self, _context: &NodeContext) -> Option<EvidenceChunk> {
            self.1.map(|c| EvidenceChunk::new(self.0, vec![c.to_string()]))
        }
    }

    #[tokio::test]
    async fn test_custom_analyzers_keep_registration_order() {
        let (context, _temp) = shop_context(Entity::table("customer")).await;
        let mut registry = AnalyzerRegistry::new();
        registry.register(Arc::new(Fixed("Second", Some("b"))));
        registry.register(Arc::new(Fixed("Silent", None)));
        registry.register(Arc::new(Fixed("Blank", Some("   "))));
        registry.register(Arc::new(Fixed("First", Some("a"))));

        let dossier = registry.collect_dossier(&context).await;
        let names: Vec<_> = dossier.chunks.iter().map(|c| c.analyzer_name.as_str()).collect();
        assert_eq!(names, vec!["Second", "First"]);
        assert_eq!(dossier.render(), "# --- Second ---\nb\n\n# --- First ---\na");
    }

    #[tokio::test]
    async fn test_empty_registry_gives_empty_dossier() {
        let (context, _temp) = shop_context(Entity::table("customer")).await;
        let dossier = AnalyzerRegistry::new().collect_dossier(&context).await;
        assert!(dossier.is_empty());
        assert_eq!(dossier.render(), "");
    }

    #[tokio::test]
    async fn test_stock_registry_covers_table() {
        let (context, _temp) = shop_context(Entity::table("order")).await;
        let registry = AnalyzerRegistry::with_stock(&ProfilerConfig::default());
        assert_eq!(
            registry.names(),
            vec!["SchemaDetail", "NamingConventions", "KnowledgeGraphContext", "DataProfile"]
        );

        let dossier = registry.collect_dossier(&context).await;
        let names: Vec<_> = dossier.chunks.iter().map(|c| c.analyzer_name.as_str()).collect();
        // `order` has no naming tags and the profiler only looks at columns
        assert_eq!(names, vec!["SchemaDetail", "KnowledgeGraphContext"]);
    }
}
