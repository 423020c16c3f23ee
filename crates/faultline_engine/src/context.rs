//! Execution context passed through every client call.

/// Caller-supplied context for one access.
///
/// The engine never interprets the context; it hands it to the resource
/// client, which may add headers or make policy decisions from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    /// Free-form label, used in logs.
    pub label: Option<String>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
