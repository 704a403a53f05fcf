//! Wrapper profile configuration.
//!
//! Profiles live in a YAML file:
//!
//! ```yaml
//! wrappers:
//!   github:
//!     command: npx
//!     args: ["-y", "@modelcontextprotocol/server-github"]
//!     env:
//!       GITHUB_TOKEN: "{{keyring:github:token}}"
//!     alias: GitHub MCP
//! ```
//!
//! The default search order is `./.ithena-wrappers.yaml`, then
//! `<config_dir>/ithena-cli/wrappers.yaml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Directory under the user config dir that holds all ithena-cli state.
pub const CONFIG_DIR_NAME: &str = "ithena-cli";

/// Config file searched in the working directory first.
pub const LOCAL_CONFIG_FILE: &str = ".ithena-wrappers.yaml";

/// Config file name under the user config directory.
pub const USER_CONFIG_FILE: &str = "wrappers.yaml";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A single named wrapper profile. Immutable per invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WrapperProfile {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Values may contain placeholders (`{{env:VAR}}`, `{{keyring:svc:acc}}`,
    /// `{{file:path}}`); they are resolved just before spawn.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Top-level shape of the wrapper configuration file.
#[derive(Debug, Default, Deserialize)]
pub struct WrapperConfig {
    /// A missing or null `wrappers` key is treated as an empty map.
    #[serde(default)]
    pub wrappers: HashMap<String, WrapperProfile>,
}

impl WrapperConfig {
    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Option<&WrapperProfile> {
        self.wrappers.get(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("wrapper config file not found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read wrapper config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse wrapper config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration file search paths, in priority order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(CONFIG_DIR_NAME).join(USER_CONFIG_FILE));
    }
    paths
}

/// Find the first existing config file.
///
/// An explicit path (from `--wrapper-config-file`) wins and must exist;
/// otherwise the default search paths are probed in order.
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::NotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_config_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }
    Err(ConfigError::NotFound { searched: paths })
}

/// Read and parse a wrapper configuration file.
pub fn load_wrapper_config(path: &Path) -> Result<WrapperConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
