//! WolfSync Configuration
//!
//! This module provides configuration structures for the WolfSync
//! file replication engine. The configuration is loaded once at startup
//! and shared read-only by every component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster membership and placement
    pub cluster: ClusterConfig,

    /// Reconciliation and transfer settings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Inbound transfer server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Checksum cache bounds
    #[serde(default)]
    pub cache: CacheConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier, must be a key of `cluster.nodes`
    pub id: String,

    /// Address to bind for file transfers
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory holding the replicated files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// How the placement key is salted before hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementSalt {
    /// Hash the filename alone; every node agrees on the responsible set
    #[default]
    Shared,
    /// Hash `filename-<placement_salt_value>`; the value is cluster-wide
    Cluster,
    /// Hash `filename-<own node id>`; nodes disagree on ownership (legacy)
    LocalNode,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Static membership: node id -> "host:port"
    pub nodes: BTreeMap<String, String>,

    /// Number of nodes that should hold each file
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Placement salting mode
    #[serde(default)]
    pub placement_salt: PlacementSalt,

    /// Salt value used when `placement_salt = "cluster"`
    #[serde(default)]
    pub placement_salt_value: Option<String>,
}

/// Reconciliation and transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Seconds between reconciliation cycles
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,

    /// Seconds between anti-entropy pushes
    #[serde(default = "default_file_send_interval_secs")]
    pub file_send_interval_secs: u64,

    /// Enable the anti-entropy pusher
    #[serde(default = "default_true")]
    pub anti_entropy: bool,

    /// Remove copies held outside a file's responsible set once pushed there
    #[serde(default = "default_true")]
    pub handoff: bool,

    /// Transfer chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single read or write on a connection, in milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

/// Inbound transfer server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum number of connections handled concurrently
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Checksum cache bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached digests
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entries older than this are recomputed (0 = no age limit)
    #[serde(default = "default_cache_max_age_secs")]
    pub max_age_secs: u64,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("sync_dir")
}

fn default_replication_factor() -> usize {
    4
}

fn default_scheduler_interval_secs() -> u64 {
    10
}

fn default_file_send_interval_secs() -> u64 {
    40
}

fn default_chunk_size() -> usize {
    16384
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_io_timeout_ms() -> u64 {
    30000
}

fn default_max_connections() -> usize {
    64
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_max_age_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            scheduler_interval_secs: default_scheduler_interval_secs(),
            file_send_interval_secs: default_file_send_interval_secs(),
            anti_entropy: true,
            handoff: true,
            chunk_size: default_chunk_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            max_age_secs: default_cache_max_age_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SyncConfig {
    /// Build a configuration for `node_id` with defaults everywhere else
    pub fn new(
        node_id: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        nodes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            node: NodeConfig {
                id: node_id.into(),
                bind_address: default_bind_address(),
                data_dir: data_dir.into(),
            },
            cluster: ClusterConfig {
                nodes,
                replication_factor: default_replication_factor(),
                placement_salt: PlacementSalt::default(),
                placement_salt_value: None,
            },
            sync: SyncSettings::default(),
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.cluster.nodes.is_empty() {
            return Err(crate::Error::Config("cluster.nodes cannot be empty".into()));
        }

        if !self.cluster.nodes.contains_key(&self.node.id) {
            return Err(crate::Error::Config(format!(
                "node.id {:?} is not a member of cluster.nodes",
                self.node.id
            )));
        }

        if let Some((id, _)) = self.cluster.nodes.iter().find(|(_, addr)| addr.is_empty()) {
            return Err(crate::Error::Config(format!("cluster.nodes.{} has no address", id)));
        }

        if self.cluster.replication_factor == 0 {
            return Err(crate::Error::Config(
                "cluster.replication_factor must be at least 1".into(),
            ));
        }

        if self.cluster.placement_salt == PlacementSalt::Cluster
            && self.cluster.placement_salt_value.as_deref().unwrap_or("").is_empty()
        {
            return Err(crate::Error::Config(
                "cluster.placement_salt_value is required when placement_salt = \"cluster\"".into(),
            ));
        }

        if self.sync.scheduler_interval_secs == 0 {
            return Err(crate::Error::Config(
                "sync.scheduler_interval_secs must be positive".into(),
            ));
        }

        if self.sync.file_send_interval_secs == 0 {
            return Err(crate::Error::Config(
                "sync.file_send_interval_secs must be positive".into(),
            ));
        }

        if self.sync.chunk_size == 0 {
            return Err(crate::Error::Config("sync.chunk_size must be positive".into()));
        }

        if self.server.max_connections == 0 {
            return Err(crate::Error::Config("server.max_connections must be positive".into()));
        }

        if self.cache.capacity == 0 {
            return Err(crate::Error::Config("cache.capacity must be positive".into()));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get the staging directory path for in-flight downloads
    pub fn staging_dir(&self) -> PathBuf {
        self.node.data_dir.join(".staging")
    }

    /// Address of a cluster member
    pub fn node_address(&self, node_id: &str) -> crate::Result<&str> {
        self.cluster
            .nodes
            .get(node_id)
            .map(String::as_str)
            .ok_or_else(|| crate::Error::UnknownNode(node_id.to_string()))
    }

    /// Get reconciliation interval as Duration
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.sync.scheduler_interval_secs)
    }

    /// Get anti-entropy interval as Duration
    pub fn file_send_interval(&self) -> Duration {
        Duration::from_secs(self.sync.file_send_interval_secs)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.connect_timeout_ms)
    }

    /// Get per-operation I/O timeout as Duration
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.io_timeout_ms)
    }

    /// Get cache entry age limit, if any
    pub fn cache_max_age(&self) -> Option<Duration> {
        match self.cache.max_age_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
