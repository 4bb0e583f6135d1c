//! PDF Workbench - Entry point
//!
//! An MCP server for merging, compressing, rotating and watermarking PDFs.

use pdf_workbench::{run_server_with_config, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_workbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        resource_dirs = ?config.resource_dirs,
        output_dir = ?config.output_dir,
        "Starting PDF Workbench"
    );

    run_server_with_config(config).await
}
