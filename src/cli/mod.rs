use clap::Parser;

/// MCP stdio server for fleet-wide AKS diagnostics.
#[derive(Parser, Debug)]
#[command(author, version, about = "AKS fleet diagnostics MCP server", long_about = None)]
pub struct Args {
    /// Path to the cluster map YAML describing the fleet.
    #[arg(long = "cluster-map", value_name = "PATH", default_value = "./clusters.yaml")]
    pub cluster_map: String,

    /// Log level for the structured stderr logger.
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,
}
