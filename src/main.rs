// observability-mcp CLI - serve cloud observability tools over MCP
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use observability_mcp::mcp::config::{ConfigOverrides, MCPConfig, TransportKind};
use observability_mcp::mcp::init_mcp_server;
use observability_mcp::init_logging_with_level;

#[derive(Parser)]
#[command(name = "observability-mcp")]
#[command(version, about = "MCP server for cloud log, metric and trace operations")]
#[command(
    long_about = "Exposes log search, metric queries, trace analysis and natural language \
                  to query translation as Model Context Protocol tools.\n\n\
                  Settings are layered: command-line flag > --env-file > process \
                  environment > --config file > defaults."
)]
struct Cli {
    /// Enable verbose logging (DEBUG level)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Environment file read without modifying the process environment
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,

    /// Transport to serve the protocol on
    #[arg(short, long, value_enum)]
    transport: Option<TransportKind>,

    /// Bind address for network transports
    #[arg(long)]
    host: Option<String>,

    /// Port for network transports
    #[arg(short, long)]
    port: Option<u16>,

    /// Access key id
    #[arg(long)]
    access_key_id: Option<String>,

    /// Access key secret
    #[arg(long)]
    access_key_secret: Option<String>,

    /// Session token for temporary credentials
    #[arg(long)]
    security_token: Option<String>,

    /// Default region for tools that take a region_id
    #[arg(short, long)]
    region: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_file: self.config.clone(),
            env_file: self.env_file.clone(),
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            access_key_id: self.access_key_id.clone(),
            access_key_secret: self.access_key_secret.clone(),
            security_token: self.security_token.clone(),
            region: self.region.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MCPConfig::load(&cli.overrides()).context("Failed to load configuration")?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_logging_with_level(level, cli.quiet)?;

    tracing::info!(
        "Loaded config - transport: {:?}, host: {}, port: {}, region: {}",
        config.transport,
        config.server.host,
        config.server.port,
        config
            .upstream
            .default_region
            .as_deref()
            .unwrap_or("<per call>")
    );

    let server = init_mcp_server(config)?;
    server.serve().await
}
