//! Runtime cluster-topology configuration (SPEC_FULL.md's "Ambient
//! stack" / "Configuration" section).
//!
//! The teacher bakes its target parameters into the kernel image at
//! build time via a `serde`/`toml` build-script (see
//! `maestro-os-maestro/kernel/build/config.rs`, another repo in this
//! retrieval pack, for that pattern). This crate has no build-time
//! target to configure — node id and peer addresses are properties of
//! a running cluster — so the same dependency pair is used at runtime
//! instead: a small TOML file loaded with `toml::from_str`, falling
//! back to built-in constants (§6 "Address space layout") when none is
//! given.

use serde::Deserialize;
use std::path::Path;

/// One cluster peer this node can migrate processes to or from.
#[derive(Clone, Debug, Deserialize)]
pub struct Peer {
    pub id: u8,
    pub addr: String,
}

/// Cluster topology and per-deployment size overrides.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// This node's id (1..=8, per §6 "source/dest MAC last byte = node
    /// id (1…N, N ≤ 8)").
    #[serde(default = "default_node_id")]
    pub node_id: u8,
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// Process-table capacity; defaults chosen to comfortably cover
    /// the end-to-end scenarios in §8 without wasting memory in tests.
    #[serde(default = "default_process_capacity")]
    pub process_capacity: usize,
    /// Frame-arena size, in pages.
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,
}

fn default_node_id() -> u8 {
    1
}

fn default_process_capacity() -> usize {
    64
}

fn default_frame_count() -> usize {
    4096
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: default_node_id(),
            peers: Vec::new(),
            process_capacity: default_process_capacity(),
            frame_count: default_frame_count(),
        }
    }
}

/// Errors loading or parsing a config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "reading config: {e}"),
            ConfigError::Parse(e) => write!(f, "parsing config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads a TOML config from `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }

    /// Loads from `path` if it exists, otherwise the built-in default
    /// (§6 address-space-layout constants apply regardless — only the
    /// cluster topology and table sizes come from this file).
    pub fn load_or_default(path: &Path) -> Config {
        if path.exists() {
            match Config::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => log::warn!("ignoring malformed config at {}: {e}", path.display()),
            }
        }
        Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_topology() {
        let toml = r#"
            node_id = 2

            [[peers]]
            id = 1
            addr = "10.0.0.1:9000"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.node_id, 2);
        assert_eq!(cfg.peers.len(), 1);
        assert_eq!(cfg.process_capacity, default_process_capacity());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/path/rendezvous.toml"));
        assert_eq!(cfg.node_id, 1);
        assert_eq!(cfg.frame_count, default_frame_count());
    }
}
