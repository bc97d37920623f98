use anyhow::Result;
use clap::Parser;
use schema_genesis::orchestrator::{AutoApprove, CostApproval, StdinApproval};
use schema_genesis::{Config, Orchestrator, RunOptions, RunOutcome};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "genesis")]
#[command(about = "Turn a relational schema into a semantically enriched knowledge graph")]
struct Args {
    /// Enrich a random subset of this many entities
    #[arg(long)]
    sample_size: Option<usize>,

    /// Wipe the graph before loading (implies --force-rerun)
    #[arg(long)]
    clean_db: bool,

    /// Re-enrich entities that are already enriched
    #[arg(long)]
    force_rerun: bool,

    /// Skip the interactive cost confirmation
    #[arg(short, long)]
    yes: bool,

    /// Stop after enrichment and vector indexes
    #[arg(long)]
    skip_relations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    let config = Config::load()?;
    log::info!("Source database: {}", config.source_path().display());
    log::info!("Graph database: {}", config.graph_path().display());

    let approval: Arc<dyn CostApproval> = if args.yes || config.enrichment.auto_confirm_enabled() {
        Arc::new(AutoApprove)
    } else {
        Arc::new(StdinApproval)
    };

    let orchestrator = Orchestrator::from_config(&config, approval).await?;
    let options = RunOptions {
        sample_size: args.sample_size,
        clean_db: args.clean_db,
        force_rerun: args.force_rerun,
        skip_relations: args.skip_relations,
    };

    match orchestrator.run(&options).await? {
        RunOutcome::Declined => {
            println!("Enrichment cancelled. The structural scaffold was kept.");
        }
        RunOutcome::Completed(summary) => {
            println!("\n=== Genesis Summary ===\n");
            println!("Tables extracted:   {}", summary.tables_extracted);
            println!("Columns extracted:  {}", summary.columns_extracted);
            if !summary.skipped_tables.is_empty() {
                println!("Tables skipped:     {}", summary.skipped_tables.join(", "));
            }
            if !summary.drifted_tables.is_empty() {
                println!("Structure changed:  {}", summary.drifted_tables.join(", "));
            }
            println!("Entities targeted:  {} of {}", summary.targets, summary.total_entities);
            println!("Enriched:           {}", summary.enrichment.enriched);
            println!("No evidence:        {}", summary.enrichment.no_evidence);
            println!(
                "Failed:             {} synthesis, {} embedding, {} write",
                summary.enrichment.synthesis_failed,
                summary.enrichment.embedding_failed,
                summary.enrichment.write_failed
            );
            if let Some(relations) = &summary.relations {
                println!(
                    "Implicit relations: {} accepted, {} rejected, {} failed ({} candidates)",
                    relations.accepted, relations.rejected, relations.failed, relations.candidates
                );
            }
            if let Some(cost) = &summary.relation_cost {
                println!("\n{}", cost);
            }
        }
    }

    Ok(())
}
