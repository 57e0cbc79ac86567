//! Error types for the Quickdev development server

use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source location inside a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Format a code frame around `location`.
///
/// The error line is prefixed with `>` and followed by a caret line pointing
/// at the column; up to two lines of context are shown on each side. The
/// error overlay highlights lines carrying either marker.
pub fn format_code_frame(source: &str, location: &SourceLocation) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let line_idx = (location.line.saturating_sub(1)) as usize;

    if line_idx >= lines.len() {
        return String::new();
    }

    let first = line_idx.saturating_sub(2);
    let last = (line_idx + 2).min(lines.len() - 1);
    let width = format!("{}", last + 1).len();

    let mut result = String::new();
    for (idx, text) in lines.iter().enumerate().take(last + 1).skip(first) {
        let marker = if idx == line_idx { '>' } else { ' ' };
        result.push_str(&format!("{} {:>width$} | {}\n", marker, idx + 1, text, width = width));

        if idx == line_idx {
            let pointer_offset = (location.column.saturating_sub(1)) as usize;
            result.push_str(&format!(
                "  {:>width$} | {}^\n",
                "",
                " ".repeat(pointer_offset),
                width = width
            ));
        }
    }

    result
}

/// Main error type for Quickdev
#[derive(Error, Debug)]
pub enum Error {
    /// A plugin or the transform pipeline rejected a module
    #[error("TransformError: {}{message}", .plugin.as_ref().map(|p| format!("[plugin:{}] ", p)).unwrap_or_default())]
    Transform {
        /// Module id being transformed
        id: String,
        /// Plugin that raised the error, when known
        plugin: Option<String>,
        message: String,
        location: Option<SourceLocation>,
        /// Rendered code frame (see [`format_code_frame`])
        frame: Option<String>,
        stack: Option<String>,
    },

    /// No content backs the requested URL
    #[error("ResolutionError: no content for {0}")]
    Resolution(String),

    /// A transform for a URL was started while another for the same URL was in flight
    #[error("TransformError: transform of {0} re-entered while already in flight")]
    ReentrantTransform(String),

    /// Invalid configuration
    #[error("ConfigError: {0}")]
    Config(String),

    /// JSON (de)serialization failure
    #[error("SerializationError: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// IO error
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// HMR transport or protocol failure
    #[error("HmrError: {0}")]
    Hmr(String),
}

impl Error {
    /// Create a transform error for module `id`
    pub fn transform(id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transform {
            id: id.into(),
            plugin: None,
            message: message.into(),
            location: None,
            frame: None,
            stack: None,
        }
    }

    /// Create a transform error with a code frame rendered from `source`
    pub fn transform_with_frame(
        id: impl Into<String>,
        message: impl Into<String>,
        location: SourceLocation,
        source: &str,
    ) -> Self {
        let frame = format_code_frame(source, &location);
        Error::Transform {
            id: id.into(),
            plugin: None,
            message: message.into(),
            location: Some(location),
            frame: if frame.is_empty() { None } else { Some(frame) },
            stack: None,
        }
    }

    /// Attribute a transform error to `plugin`, unless it already names one
    pub fn with_plugin(self, name: &str) -> Self {
        match self {
            Error::Transform { id, plugin, message, location, frame, stack } => Error::Transform {
                id,
                plugin: plugin.or_else(|| Some(name.to_string())),
                message,
                location,
                frame,
                stack,
            },
            other => Error::Transform {
                id: String::new(),
                plugin: Some(name.to_string()),
                message: other.to_string(),
                location: None,
                frame: None,
                stack: None,
            },
        }
    }

    /// Attach a stack trace to a transform error
    pub fn with_stack(self, trace: impl Into<String>) -> Self {
        match self {
            Error::Transform { id, plugin, message, location, frame, .. } => Error::Transform {
                id,
                plugin,
                message,
                location,
                frame,
                stack: Some(trace.into()),
            },
            other => other,
        }
    }

    /// Fill in the module id of a transform error raised without one
    pub(crate) fn for_module(self, module_id: &str) -> Self {
        match self {
            Error::Transform { id, plugin, message, location, frame, stack } if id.is_empty() => {
                Error::Transform {
                    id: module_id.to_string(),
                    plugin,
                    message,
                    location,
                    frame,
                    stack,
                }
            }
            other => other,
        }
    }

    /// True for errors raised while transforming a module
    pub fn is_transform_error(&self) -> bool {
        matches!(self, Error::Transform { .. } | Error::ReentrantTransform(_))
    }
}

/// Result type alias for Quickdev
pub type Result<T> = std::result::Result<T, Error>;
