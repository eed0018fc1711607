//! WolfSync - Peer-to-peer File Replication Engine
//!
//! Runs one node of a WolfSync cluster and offers a few commands for
//! inspecting configuration and placement.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfsync::api::HttpServer;
use wolfsync::config::SyncConfig;
use wolfsync::error::{Error, Result};
use wolfsync::node::{shutdown_channel, NodeContext};
use wolfsync::placement::Placement;
use wolfsync::sync::{AntiEntropy, Reconciler};
use wolfsync::transfer::TransferServer;

/// WolfSync - Peer-to-peer File Replication Engine
#[derive(Parser)]
#[command(name = "wolfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfSync node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfsync.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Show which nodes are responsible for a file
    Locate {
        /// File name to place
        filename: String,
    },

    /// Query a running node's status over HTTP
    Status {
        /// Node API address to query
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = cli.log_level.as_deref();

    match cli.command {
        Commands::Start => {
            let config = match SyncConfig::from_file(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    init_logging(level.unwrap_or("info"), "pretty");
                    tracing::error!("Failed to load configuration from {:?}: {}", cli.config, e);
                    tracing::error!("Please check that the config file exists and is valid TOML");
                    return Err(e);
                }
            };
            init_logging(level.unwrap_or(&config.logging.level), &config.logging.format);
            run_start(config).await
        }
        Commands::Init { output, node_id } => {
            init_logging(level.unwrap_or("info"), "pretty");
            run_init(output, node_id)
        }
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Locate { filename } => run_locate(cli.config, filename),
        Commands::Status { address } => run_status(&address)
            .await
            .map_err(|e| Error::Network(format!("{:#}", e))),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the WolfSync node
async fn run_start(config: SyncConfig) -> Result<()> {
    tracing::info!("Starting WolfSync node...");
    tracing::info!("Loaded configuration for node: {}", config.node.id);

    let anti_entropy = config.sync.anti_entropy;
    let ctx = match NodeContext::new(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("Failed to initialize node: {}", e);
            return Err(e);
        }
    };
    tracing::info!(
        "Cluster of {} nodes, replication factor {}, data in {}",
        ctx.placement.members().len(),
        ctx.placement.replication_factor(),
        ctx.store.root().display()
    );

    let server = match TransferServer::bind(Arc::clone(&ctx)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", ctx.config.node.bind_address, e);
            return Err(e);
        }
    };

    let (shutdown_tx, shutdown) = shutdown_channel();
    let mut handles = Vec::new();

    let signal = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = server.run(signal).await {
            tracing::error!("Transfer server error: {}", e);
        }
    }));

    let reconciler = Reconciler::new(Arc::clone(&ctx));
    let signal = shutdown.clone();
    handles.push(tokio::spawn(async move { reconciler.run(signal).await }));

    if anti_entropy {
        let gossip = AntiEntropy::new(Arc::clone(&ctx));
        let signal = shutdown.clone();
        handles.push(tokio::spawn(async move { gossip.run(signal).await }));
    } else {
        tracing::info!("Anti-entropy disabled");
    }

    let http_server = HttpServer::new(Arc::clone(&ctx));
    let signal = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_server.start(signal).await {
            tracing::error!("HTTP server error: {}", e);
        }
    }));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Task ended abnormally: {}", e);
        }
    }

    tracing::info!("WolfSync shutdown complete");
    Ok(())
}

/// Check node status
async fn run_status(address: &str) -> anyhow::Result<()> {
    let url = format!("http://{}/status", address);

    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?;
    let status: serde_json::Value = response
        .json()
        .await
        .context("invalid status response")?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfSync Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "0.0.0.0:5000"
data_dir = "/var/lib/wolfsync/{node_id}"

[cluster]
replication_factor = 4
# shared | cluster | local-node
placement_salt = "shared"
# placement_salt_value = "my-cluster"

[cluster.nodes]
{node_id} = "127.0.0.1:5000"
# node2 = "node2.example.com:5000"

[sync]
scheduler_interval_secs = 10
file_send_interval_secs = 40
anti_entropy = true
handoff = true
chunk_size = 16384
connect_timeout_ms = 5000
io_timeout_ms = 30000

[server]
max_connections = 64

[cache]
capacity = 10000
max_age_secs = 3600

[api]
enabled = true
bind_address = "0.0.0.0:8080"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nAdd every cluster member under [cluster.nodes].");
    println!("Then start with: wolfsync --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    let result = SyncConfig::from_file(&config_path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Members: {}", config.cluster.nodes.len());
            println!("  Replication Factor: {}", config.cluster.replication_factor);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = SyncConfig::from_file(&config_path)?;

    println!("WolfSync Node Information");
    println!("=========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Bind Address:     {}", config.node.bind_address);
    println!("Data Directory:   {}", config.data_dir().display());
    println!();
    println!("Cluster Configuration:");
    for (id, address) in &config.cluster.nodes {
        println!("  {:<16}{}", id, address);
    }
    println!("  Replication:    {}", config.cluster.replication_factor);
    println!("  Placement Salt: {:?}", config.cluster.placement_salt);
    println!();
    println!("Sync Configuration:");
    println!("  Reconcile:      every {} s", config.sync.scheduler_interval_secs);
    println!("  Anti-entropy:   {} (every {} s)", config.sync.anti_entropy, config.sync.file_send_interval_secs);
    println!("  Hand-off:       {}", config.sync.handoff);
    println!("  Chunk Size:     {} bytes", config.sync.chunk_size);

    Ok(())
}

/// Print the responsible nodes for a filename
fn run_locate(config_path: PathBuf, filename: String) -> Result<()> {
    let config = SyncConfig::from_file(&config_path)?;
    wolfsync::store::validate_filename(&filename)?;
    let placement = Placement::from_config(&config)?;

    for (i, node_id) in placement.responsible(&filename).iter().enumerate() {
        let role = if i == 0 { "primary" } else { "replica" };
        let address = config.node_address(node_id)?;
        println!("{:<8} {:<16} {}", role, node_id, address);
    }

    Ok(())
}
