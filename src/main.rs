use anyhow::Result;
use codebase_index::config::{load_env_files, IndexerConfig};
use codebase_index::Indexer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    load_env_files();

    // Logs go to stderr; stdout carries only the run summary
    let env_filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let mut config = IndexerConfig::from_env()?;
    if let Some(root) = std::env::args_os().nth(1) {
        config = config.with_root(root);
    }
    let output_dir = config.output_dir();

    let output = Indexer::new(config).run().await?;

    println!(
        "Indexed {} units ({} edges, {} dangling) into {}",
        output.units.len(),
        output.graph.edge_count(),
        output.report.stats.dangling_edge_count,
        output_dir.display()
    );
    println!(
        "Orphans: {}, dead ends: {}, hubs: {}, cycles: {}",
        output.report.stats.orphan_count,
        output.report.stats.dead_end_count,
        output.report.stats.hub_count,
        output.report.stats.cycle_count
    );
    for failure in &output.failures {
        println!("Extractor {} failed: {}", failure.extractor, failure.message);
    }

    Ok(())
}
