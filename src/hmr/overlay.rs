//! Error overlay render model

use serde::Serialize;

use crate::hmr::payload::ErrorPayload;

/// Stack lines kept after filtering
pub const MAX_STACK_LINES: usize = 10;

/// One line of the code frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameLine {
    pub text: String,
    /// Error line or caret marker line
    pub highlighted: bool,
}

/// What the client shows for an `error` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorOverlay {
    pub message: String,
    pub plugin: Option<String>,
    /// `file:line:column`, as much of it as is known
    pub location: Option<String>,
    pub frame: Vec<FrameLine>,
    pub stack: Vec<String>,
}

impl ErrorOverlay {
    pub fn from_payload(error: &ErrorPayload) -> Self {
        let location = error.file.as_ref().map(|file| match (error.line, error.column) {
            (Some(line), Some(column)) => format!("{}:{}:{}", file, line, column),
            (Some(line), None) => format!("{}:{}", file, line),
            _ => file.clone(),
        });

        let frame = error
            .frame
            .as_deref()
            .map(|frame| {
                frame
                    .lines()
                    .map(|text| FrameLine {
                        highlighted: is_marker_line(text),
                        text: text.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let stack = error
            .stack
            .as_deref()
            .map(|stack| {
                stack
                    .lines()
                    .filter(|line| !line.contains("node_modules"))
                    .filter(|line| !line.trim().is_empty())
                    .take(MAX_STACK_LINES)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            message: error.message.clone(),
            plugin: error.plugin.clone(),
            location,
            frame,
            stack,
        }
    }

    /// Self-contained HTML for the overlay element
    pub fn render_html(&self) -> String {
        let mut html = String::from(r#"<div id="quickdev-error-overlay" role="alert">"#);
        html.push_str(r#"<button class="close" aria-label="Dismiss">&times;</button>"#);

        if let Some(plugin) = &self.plugin {
            html.push_str(&format!(r#"<div class="plugin">[plugin:{}]</div>"#, escape_html(plugin)));
        }
        html.push_str(&format!(r#"<pre class="message">{}</pre>"#, escape_html(&self.message)));
        if let Some(location) = &self.location {
            html.push_str(&format!(r#"<div class="file">{}</div>"#, escape_html(location)));
        }

        if !self.frame.is_empty() {
            html.push_str(r#"<pre class="frame">"#);
            for line in &self.frame {
                if line.highlighted {
                    html.push_str(&format!(r#"<span class="highlight">{}</span>"#, escape_html(&line.text)));
                } else {
                    html.push_str(&escape_html(&line.text));
                }
                html.push('\n');
            }
            html.push_str("</pre>");
        }

        if !self.stack.is_empty() {
            html.push_str(&format!(r#"<pre class="stack">{}</pre>"#, escape_html(&self.stack.join("\n"))));
        }

        html.push_str("</div>");
        html
    }
}

fn is_marker_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('>')
        || (trimmed.contains('^') && trimmed.chars().all(|c| matches!(c, ' ' | '|' | '^' | '~')))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
