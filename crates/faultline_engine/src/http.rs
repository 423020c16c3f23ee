//! HTTP transport backed by `reqwest`.
//!
//! Request bodies are sent as JSON and response bodies are decoded from JSON
//! into [`Value`]s. Transient failures (connection errors, timeouts, 5xx and
//! 429 responses) of idempotent requests are retried with exponential backoff
//! according to the configured [`RetryConfig`](crate::RetryConfig). `POST`
//! and `PATCH` are sent once; their failures go back to the caller.

use crate::config::HttpConfig;
use crate::error::{FaultError, FaultResult};
use crate::request::{Method, Request, Response, ResponseMeta};
use crate::transport::Transport;
use async_trait::async_trait;
use faultline_codec::{parse_json, to_json, Value};
use tracing::{debug, warn};

/// HTTP-based transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: HttpConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport from a validated configuration.
    pub fn new(config: HttpConfig) -> FaultResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| FaultError::configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url_for(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    async fn send_once(&self, request: &Request) -> FaultResult<Response> {
        let url = self.url_for(&request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in self.config.headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(&to_json(body));
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response.text().await.map_err(classify)?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else if (200..300).contains(&status) {
            parse_json(&text)?
        } else {
            // Error bodies are informational only; keep them if they parse.
            parse_json(&text).unwrap_or(Value::Null)
        };

        Ok(Response::new(
            ResponseMeta {
                status,
                url,
                headers,
            },
            body,
        ))
    }
}

fn classify(error: reqwest::Error) -> FaultError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        FaultError::transport_retryable(error.to_string())
    } else {
        FaultError::transport_fatal(error.to_string())
    }
}

fn retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> FaultResult<Response> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let delay = retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
            let last = attempt >= retry.max_attempts || !request.method.is_idempotent();

            match self.send_once(&request).await {
                Ok(response) if retryable_status(response.meta.status) && !last => {
                    warn!(%request, status = response.meta.status, attempt, "retrying request");
                }
                Ok(response) => {
                    debug!(%request, status = response.meta.status, "request complete");
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && !last => {
                    warn!(%request, error = %e, attempt, "retrying request");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
