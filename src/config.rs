use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ProxyError, Result};

/// One side of a node: which protocol to use, and the path to that
/// protocol's own config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EndConfig {
    pub protocol: String,
    pub config: String,
}

/// Top-level node configuration, loaded from the file named by
/// `--config-file` (default `server_config.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub listener: EndConfig,
    pub caller: EndConfig,
    pub port: u16,
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("reading {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| ProxyError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Reads and parses a protocol-specific config file, wrapping any failure
/// in `ProxyError::Config`.
pub fn load_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| ProxyError::Config(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| ProxyError::Config(format!("parsing {}: {e}", path.display())))
}
