use anyhow::{Context, Result};
use clap::Parser;
use schema_genesis::schema::SchemaExtractor;
use schema_genesis::source::SourceDb;
use schema_genesis::Config;

#[derive(Parser, Debug)]
#[command(name = "extract")]
#[command(about = "Extract the source schema and print it as JSON")]
struct Args {
    /// Schema to read (defaults to source.schema_name)
    #[arg(long)]
    schema: Option<String>,

    /// Single-line JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;
    let schema_name = args.schema.unwrap_or_else(|| config.source.schema_name.clone());

    let source = SourceDb::new(config.source_path());
    source.ping().await.context("Source database is not readable")?;

    let schema = SchemaExtractor::new(source).extract(&schema_name).await?;
    log::info!(
        "Extracted {} tables and {} columns ({} skipped)",
        schema.tables.len(),
        schema.column_count(),
        schema.skipped_tables.len()
    );

    let json = if args.compact {
        serde_json::to_string(&schema)?
    } else {
        serde_json::to_string_pretty(&schema)?
    };
    println!("{}", json);

    Ok(())
}
