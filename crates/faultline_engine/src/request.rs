//! Protocol-level requests and responses.

use faultline_codec::Value;
use std::fmt;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Remove.
    Delete,
}

impl Method {
    /// Returns the method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether repeating the request leaves the server as one request would.
    ///
    /// Only idempotent requests are retried after a transient failure.
    pub fn is_idempotent(self) -> bool {
        matches!(self, Method::Get | Method::Put | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request built by a resource client.
///
/// Paths are relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method.
    pub method: Method,
    /// Path, starting with `/`.
    pub path: String,
    /// Query parameters in order.
    pub query: Vec<(String, String)>,
    /// Headers.
    pub headers: Vec<(String, String)>,
    /// Body, sent as JSON.
    pub body: Option<Value>,
}

impl Request {
    /// Creates a request with no parameters, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (i, (name, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// Metadata of a response, passed to the mapping operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Status code.
    pub status: u16,
    /// URL or path the response came from.
    pub url: String,
    /// Response headers.
    pub headers: Vec<(String, String)>,
}

impl ResponseMeta {
    /// Creates metadata for a status and URL.
    pub fn new(status: u16, url: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Returns the value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status, URL and headers.
    pub meta: ResponseMeta,
    /// Decoded body; `Null` for empty bodies.
    pub body: Value,
}

impl Response {
    /// Creates a response.
    pub fn new(meta: ResponseMeta, body: Value) -> Self {
        Self { meta, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_display_includes_query() {
        let request = Request::get("/posts")
            .with_query("author", "7")
            .with_query("limit", "10");
        assert_eq!(request.to_string(), "GET /posts?author=7&limit=10");
        assert_eq!(Request::new(Method::Delete, "/posts/1").to_string(), "DELETE /posts/1");
    }

    #[test]
    fn creates_and_partial_updates_are_not_idempotent() {
        assert!(Method::Get.is_idempotent());
        assert!(Method::Put.is_idempotent());
        assert!(Method::Delete.is_idempotent());
        assert!(!Method::Post.is_idempotent());
        assert!(!Method::Patch.is_idempotent());
    }

    #[test]
    fn response_meta() {
        let mut meta = ResponseMeta::new(204, "/posts/1");
        meta.headers.push(("Content-Type".into(), "application/json".into()));
        assert!(meta.is_success());
        assert_eq!(meta.header("content-type"), Some("application/json"));
        assert!(!ResponseMeta::new(404, "/x").is_success());
    }
}
