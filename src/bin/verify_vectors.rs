use anyhow::Result;
use schema_genesis::graph::vector::{list_vector_indexes, query_similar, COLUMN_INDEX, TABLE_INDEX};
use schema_genesis::graph::{queries, GraphDb, NodeLabel};
use schema_genesis::Config;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let config = Config::load()?;
    let graph = GraphDb::open(config.graph_path(), &config.graph.migrations_dir).await?;

    println!("\n=== Vector Index Check ===\n");

    let indexes = list_vector_indexes(&graph).await?;
    let mut healthy = true;
    for expected in [TABLE_INDEX, COLUMN_INDEX] {
        match indexes.iter().find(|spec| spec.name == expected) {
            Some(spec) => println!(
                "[ok]      {} ({} on {}, {} dims, {})",
                spec.name, spec.property, spec.label, spec.dimensions, spec.similarity
            ),
            None => {
                println!("[missing] {}", expected);
                healthy = false;
            }
        }
    }

    println!("\nCoverage:");
    for coverage in queries::label_coverage(&graph).await? {
        println!(
            "  {:<7} {:>6} nodes, {:>6} enriched, {:>6} with embedding",
            coverage.label, coverage.total, coverage.enriched, coverage.with_embedding
        );
    }

    for (label, index) in [(NodeLabel::Table, TABLE_INDEX), (NodeLabel::Column, COLUMN_INDEX)] {
        if !indexes.iter().any(|spec| spec.name == index) {
            continue;
        }
        let Some((name, embedding)) = queries::sample_embedding(&graph, label).await? else {
            println!("\nNo embedded {} nodes to check", label);
            continue;
        };
        let hits = query_similar(&graph, index, 1, &embedding).await?;
        match hits.first() {
            Some(hit) if hit.name == name => {
                println!("\n[ok]      {} '{}' is its own nearest neighbour (score {:.4})", label, name, hit.score)
            }
            Some(hit) => {
                println!("\n[warn]    {} '{}' nearest neighbour is '{}' (score {:.4})", label, name, hit.name, hit.score);
                healthy = false;
            }
            None => {
                println!("\n[fail]    {} index returned nothing for '{}'", label, name);
                healthy = false;
            }
        }
    }

    if !healthy {
        anyhow::bail!("vector index verification failed");
    }
    println!("\nAll vector checks passed.");
    Ok(())
}
