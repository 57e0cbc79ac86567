//! Wire messages exchanged between the HMR server and the preview client

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Server → client payload, serialized as `{"type": "...", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrPayload {
    Connected,
    Update {
        updates: Vec<ModuleUpdate>,
    },
    FullReload {
        /// File whose change forced the reload, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Prune {
        paths: Vec<String>,
    },
    Error {
        error: ErrorPayload,
    },
    Custom {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

impl HmrPayload {
    pub fn full_reload() -> Self {
        HmrPayload::FullReload { path: None }
    }

    /// Value of the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            HmrPayload::Connected => "connected",
            HmrPayload::Update { .. } => "update",
            HmrPayload::FullReload { .. } => "full-reload",
            HmrPayload::Prune { .. } => "prune",
            HmrPayload::Error { .. } => "error",
            HmrPayload::Custom { .. } => "custom",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

/// How the client applies one update entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateType {
    ScriptUpdate,
    StylesheetUpdate,
}

/// One entry of an `update` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUpdate {
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    /// URL of the module whose change reached the boundary
    pub path: String,
    /// URL of the boundary module that absorbs the update
    pub accepted_path: String,
    pub timestamp: u64,
}

/// Error details rendered by the client overlay
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        match err {
            Error::Transform { id, plugin, message, location, frame, stack } => {
                let id = (!id.is_empty()).then(|| id.clone());
                ErrorPayload {
                    message: message.clone(),
                    stack: stack.clone(),
                    file: id.clone(),
                    id,
                    plugin: plugin.clone(),
                    line: location.map(|l| l.line),
                    column: location.map(|l| l.column),
                    frame: frame.clone(),
                }
            }
            other => ErrorPayload::new(other.to_string()),
        }
    }
}

impl Error {
    /// Error details for an HMR `error` payload
    pub fn to_hmr_payload(&self) -> ErrorPayload {
        ErrorPayload::from(self)
    }
}

/// Client → server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Connected,
    /// The module at `path` cannot take the update itself; propagate to its importers
    Invalidate {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Custom {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}
