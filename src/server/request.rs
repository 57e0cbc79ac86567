//! Virtual request and response values

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap as HashMap;

use crate::error::Error;

/// HTTP method of a virtual request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    /// Matches every method when used in a route
    Any,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Any => "*",
        }
    }

    pub(crate) fn matches(&self, other: &Method) -> bool {
        *self == Method::Any || *other == Method::Any || self == other
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            "*" => Ok(Self::Any),
            other => Err(Error::Config(format!("unknown HTTP method '{}'", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request issued by the preview against the virtual server
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualRequest {
    pub method: Method,
    /// Raw URL as issued, including query
    pub url: String,
    /// URL without query or hash
    pub pathname: String,
    pub query: HashMap<String, String>,
    /// Header names are stored lowercased
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl VirtualRequest {
    pub fn new(method: Method, url: &str) -> Self {
        let (pathname, query) = Self::parse_url(url);
        Self {
            method,
            url: url.to_string(),
            pathname,
            query,
            headers: HashMap::default(),
            body: None,
        }
    }

    /// Shorthand for a GET request
    pub fn get(url: &str) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// True when the query carries `key`, with or without a value
    pub fn has_query(&self, key: &str) -> bool {
        self.query.contains_key(key)
    }

    /// Split a URL into pathname and query parameters
    pub fn parse_url(url: &str) -> (String, HashMap<String, String>) {
        let mut query = HashMap::default();

        let without_hash = url.split('#').next().unwrap_or(url);
        let (path, query_str) = match without_hash.find('?') {
            Some(idx) => (&without_hash[..idx], Some(&without_hash[idx + 1..])),
            None => (without_hash, None),
        };

        if let Some(qs) = query_str {
            for pair in qs.split('&') {
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = match pair.find('=') {
                    Some(idx) => (&pair[..idx], &pair[idx + 1..]),
                    None => (pair, ""),
                };
                query.insert(key.to_string(), value.to_string());
            }
        }

        let pathname = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        (pathname, query)
    }
}

/// Response returned by the virtual server
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names are stored lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl VirtualResponse {
    /// Create a new response with the given status code
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: HashMap::default(),
            body: String::new(),
        }
    }

    /// 200 with a body and content type
    pub fn ok(body: impl Into<String>, content_type: &str) -> Self {
        Self::new(200)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body)
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self::ok(body, "application/json; charset=utf-8")
    }

    pub fn not_found(pathname: &str) -> Self {
        Self::text(404, format!("Not Found: {}", pathname))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::text(500, message)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Standard reason phrase for the statuses the server produces
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}
