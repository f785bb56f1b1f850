use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use aksfleet_mcp::cli::Args;
use aksfleet_mcp::config::ClusterRegistry;
use aksfleet_mcp::domain::ThresholdBundle;
use aksfleet_mcp::tools::ToolContext;

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder
        .parse_filters(level)
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                r#"{{"ts":"{}","level":"{}","target":"{}","message":"{}"}}"#,
                chrono::Utc::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args().to_string().replace('"', "'")
            )
        })
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let registry = ClusterRegistry::load_from_yaml(&args.cluster_map)
        .with_context(|| format!("loading cluster map from {}", args.cluster_map))?;
    info!("loaded {} cluster(s) from {}", registry.len(), args.cluster_map);

    let thresholds = ThresholdBundle::from_env();
    let ctx = ToolContext::new(registry, thresholds);

    info!("aksfleet-mcp ready, serving MCP requests on stdio");
    aksfleet_mcp::mcp::serve(ctx).await
}
