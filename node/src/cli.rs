//! Command line, environment and config-file handling.

use anyhow::{Context, Result};
use canvas_core::NodeConfig;
use canvas_env::NodeId;
use clap::Parser;
use std::path::PathBuf;

/// Shared canvas node
#[derive(Parser, Debug)]
#[command(name = "canvas-node")]
#[command(about = "Run one slice of the shared canvas over zenoh", long_about = None)]
pub struct Args {
    /// JSON file holding a node configuration; flags below override it
    #[arg(short, long, env = "CANVAS_CONFIG")]
    pub config: Option<PathBuf>,

    /// This node's id (lowest live id leads)
    #[arg(short = 'i', long, env = "CANVAS_NODE_ID")]
    pub node_id: Option<u32>,

    /// Slice width in columns
    #[arg(long, env = "CANVAS_SLICE_WIDTH")]
    pub slice_width: Option<u32>,

    /// Slice height in rows
    #[arg(long, env = "CANVAS_SLICE_HEIGHT")]
    pub slice_height: Option<u32>,

    /// Prefix of the heartbeat and shared-state topics
    #[arg(long, env = "CANVAS_TOPIC_PREFIX")]
    pub topic_prefix: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long, env = "CANVAS_HEARTBEAT_MS")]
    pub heartbeat_ms: Option<u64>,

    /// Membership timeout in milliseconds
    #[arg(long, env = "CANVAS_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Simulation tick interval in milliseconds
    #[arg(long, env = "CANVAS_TICK_MS")]
    pub tick_ms: Option<u64>,

    /// Zenoh configuration file (json5)
    #[arg(long, env = "CANVAS_ZENOH_CONFIG")]
    pub zenoh_config: Option<PathBuf>,

    /// Zenoh endpoints to connect to, e.g. tcp/192.168.1.10:7447
    #[arg(short = 'e', long = "connect", env = "CANVAS_CONNECT", value_delimiter = ',')]
    pub connect: Vec<String>,

    /// Full-screen dashboard instead of the plain terminal grid
    #[arg(long)]
    pub dashboard: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Builds the node configuration: defaults, then the file, then flags.
pub fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_json::from_str::<NodeConfig>(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => NodeConfig::default(),
    };

    if let Some(id) = args.node_id {
        config.node_id = NodeId(id);
    }
    if let Some(width) = args.slice_width {
        config.slice_width = width;
    }
    if let Some(height) = args.slice_height {
        config.slice_height = height;
    }
    if let Some(prefix) = &args.topic_prefix {
        config.topic_prefix = prefix.clone();
    }
    if let Some(ms) = args.heartbeat_ms {
        config.heartbeat_interval_ms = ms;
    }
    if let Some(ms) = args.timeout_ms {
        config.membership_timeout_ms = ms;
    }
    if let Some(ms) = args.tick_ms {
        config.tick_interval_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

/// Builds the zenoh session configuration.
pub fn zenoh_config(args: &Args) -> Result<zenoh::Config> {
    let mut config = match &args.zenoh_config {
        Some(path) => zenoh::Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("invalid zenoh config {}: {}", path.display(), e))?,
        None => zenoh::Config::default(),
    };

    if !args.connect.is_empty() {
        let endpoints = serde_json::to_string(&args.connect)?;
        config
            .insert_json5("connect/endpoints", &endpoints)
            .map_err(|e| anyhow::anyhow!("invalid zenoh endpoints {}: {}", endpoints, e))?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["canvas-node"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&["--node-id", "4", "--slice-width", "10", "--topic-prefix", "wall"]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.node_id, NodeId(4));
        assert_eq!(config.slice_width, 10);
        assert_eq!(config.slice_height, 16);
        assert_eq!(config.heartbeat_topic(), "wall/heartbeat");
    }

    #[test]
    fn test_file_then_flags() {
        let path = std::env::temp_dir().join(format!("canvas-node-test-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"node_id": 2, "slice_height": 12, "tick_interval_ms": 50}"#).unwrap();

        let args = parse(&["--config", path.to_str().unwrap(), "--node-id", "7"]);
        let config = load_config(&args).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.node_id, NodeId(7));
        assert_eq!(config.slice_height, 12);
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.membership_timeout_ms, 3500);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = parse(&["--heartbeat-ms", "2000", "--timeout-ms", "3000"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_connect_endpoints_split() {
        let args = parse(&["--connect", "tcp/10.0.0.1:7447,tcp/10.0.0.2:7447"]);
        assert_eq!(args.connect.len(), 2);
        assert!(zenoh_config(&args).is_ok());
    }
}
