//! Description synthesis, embeddings, cost accounting and the dossier cache.

pub mod cost;
mod dossier_cache;
mod embedding;
pub mod synthesizer;

pub use cost::{
    CostEstimator, EnrichmentCostReport, Pricing, RelationCostReport, RelationCostTracker, TokenCounter,
};
pub use dossier_cache::DossierCache;
pub use embedding::EmbeddingGenerator;
pub use synthesizer::DescriptionSynthesizer;
