use anyhow::Result;
use clap::Parser;
use schema_genesis::graph::{queries, GraphDb, GraphLoader};
use schema_genesis::schema::SchemaExtractor;
use schema_genesis::source::SourceDb;
use schema_genesis::Config;

#[derive(Parser, Debug)]
#[command(name = "scaffold")]
#[command(about = "Extract the source schema and load the structural graph, without enrichment")]
struct Args {
    /// Wipe every node and edge before loading (irreversible)
    #[arg(long)]
    clean_db: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;

    let source = SourceDb::new(config.source_path());
    source.ping().await?;
    let graph = GraphDb::open(config.graph_path(), &config.graph.migrations_dir).await?;

    let schema = SchemaExtractor::new(source).extract(&config.source.schema_name).await?;
    let stats = GraphLoader::new(graph.clone()).load_schema(&schema, args.clean_db).await?;
    let counts = queries::graph_counts(&graph).await?;

    println!("\n=== Structural Scaffold ===\n");
    println!("Tables merged:        {}", stats.tables);
    println!("Columns merged:       {}", stats.columns);
    println!("FK edges merged:      {}", stats.fk_edges);
    println!("FK edges unresolved:  {}", stats.unresolved_fk_edges);
    if !stats.drifted_tables.is_empty() {
        println!("Structure changed:    {}", stats.drifted_tables.join(", "));
    }
    for skipped in &schema.skipped_tables {
        println!("Skipped {}: {}", skipped.table_name, skipped.error);
    }
    println!("\nGraph now holds {} nodes and {} edges", counts.nodes, counts.edges);

    Ok(())
}
