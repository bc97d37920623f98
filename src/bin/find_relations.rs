use anyhow::{Context, Result};
use clap::Parser;
use schema_genesis::enrich::{Pricing, RelationCostTracker, TokenCounter};
use schema_genesis::graph::GraphDb;
use schema_genesis::llm::OpenAiChat;
use schema_genesis::relations::{ImplicitRelationFinder, RelationPolicy};
use schema_genesis::Config;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "find-relations")]
#[command(about = "Discover implicit relations between already-enriched tables")]
struct Args {
    /// Neighbours considered per table
    #[arg(long)]
    top_k: Option<usize>,

    /// Minimum cosine similarity for a candidate pair
    #[arg(long)]
    min_similarity: Option<f32>,

    /// Minimum verifier confidence to accept a relation
    #[arg(long)]
    min_confidence: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;

    let defaults = RelationPolicy::from(&config.relations);
    let policy = RelationPolicy {
        top_k: args.top_k.unwrap_or(defaults.top_k),
        min_similarity: args.min_similarity.unwrap_or(defaults.min_similarity),
        min_llm_confidence: args.min_confidence.unwrap_or(defaults.min_llm_confidence),
    };
    policy
        .validate()
        .context("invalid --top-k, --min-similarity or --min-confidence")?;

    let graph = GraphDb::open(config.graph_path(), &config.graph.migrations_dir).await?;
    let verifier = Arc::new(OpenAiChat::from_config(&config.relation)?);
    let tracker = Arc::new(RelationCostTracker::new(
        &config.relation.model,
        Pricing::from_model(&config.relation),
        Arc::new(TokenCounter::new()),
    ));
    let finder = ImplicitRelationFinder::new(
        graph,
        verifier,
        config.relation.temperature,
        tracker.clone(),
        config.enrichment.max_concurrency,
    );

    log::info!(
        "Relation policy: top_k={}, min_similarity={:.2}, min_confidence={:.2}",
        policy.top_k,
        policy.min_similarity,
        policy.min_llm_confidence
    );
    let stats = finder.find_and_create_relations(&policy).await?;

    println!("\n=== Implicit Relations ===\n");
    println!("Tables considered: {}", stats.tables_considered);
    println!("Candidate pairs:   {}", stats.candidates);
    println!("Accepted:          {}", stats.accepted);
    println!("Rejected:          {}", stats.rejected);
    println!("Failed:            {}", stats.failed);
    println!("\n{}", tracker.report());

    Ok(())
}
