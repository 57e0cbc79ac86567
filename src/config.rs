//! Dev server configuration
//!
//! Every field is optional when deserialized; missing keys take the
//! defaults below (HMR on, CORS on, base `/`).
//!
//! # Example
//! ```text
//! {
//!   "port": 3000,
//!   "base": "/app/",
//!   "hmr": { "path": "/__hmr", "overlay": false },
//!   "headers": { "X-Preview": "1" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration consumed by [`DevServer`](crate::dev_server::DevServer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerConfig {
    pub port: u16,
    pub host: String,
    /// Public base path; stripped from request paths before routing
    pub base: String,
    pub hmr: HmrOptions,
    /// Append CORS headers to every response
    pub cors: bool,
    /// Extra headers appended to every response
    pub headers: BTreeMap<String, String>,
    /// Open the preview when the server starts; see `DevServer::open_requested`
    pub open: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port: 5173,
            host: "localhost".to_string(),
            base: "/".to_string(),
            hmr: HmrOptions::default(),
            cors: true,
            headers: BTreeMap::new(),
            open: false,
        }
    }
}

impl DevServerConfig {
    /// Parse a JSON config document
    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json_str(&source)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !self.base.starts_with('/') {
            return Err(Error::Config(format!(
                "base must start with '/', got '{}'",
                self.base
            )));
        }
        if let Some(hmr) = self.hmr.resolved() {
            if !hmr.path.starts_with('/') {
                return Err(Error::Config(format!(
                    "hmr.path must start with '/', got '{}'",
                    hmr.path
                )));
            }
        }
        Ok(())
    }

    /// Base path normalized to start and end with `/`
    pub fn normalized_base(&self) -> String {
        let trimmed = self.base.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        }
    }

    /// Resolved HMR settings, `None` when HMR is disabled
    pub fn hmr_config(&self) -> Option<HmrConfig> {
        self.hmr.resolved()
    }
}

/// HMR setting: either a plain on/off switch or a detailed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HmrOptions {
    Enabled(bool),
    Custom(HmrConfig),
}

impl Default for HmrOptions {
    fn default() -> Self {
        HmrOptions::Enabled(true)
    }
}

impl HmrOptions {
    /// Resolve to concrete settings, `None` when disabled
    pub fn resolved(&self) -> Option<HmrConfig> {
        match self {
            HmrOptions::Enabled(true) => Some(HmrConfig::default()),
            HmrOptions::Enabled(false) => None,
            HmrOptions::Custom(config) => Some(config.clone()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, HmrOptions::Enabled(false))
    }
}

/// Detailed HMR transport and overlay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HmrConfig {
    /// `ws`, `wss`, or `message` (postMessage to the embedding window)
    pub protocol: String,
    /// Transport host; the page's own host when absent
    pub host: Option<String>,
    /// Transport port; the page's own port when absent
    pub port: Option<u16>,
    pub path: String,
    /// Milliseconds a client waits for the transport before giving up an attempt
    pub timeout: u64,
    /// Show the error overlay in the preview
    pub overlay: bool,
}

impl Default for HmrConfig {
    fn default() -> Self {
        Self {
            protocol: "ws".to_string(),
            host: None,
            port: None,
            path: "/__hmr".to_string(),
            timeout: 30_000,
            overlay: true,
        }
    }
}
