//! Transport abstraction and an in-memory mock.

use crate::error::{FaultError, FaultResult};
use crate::request::{Method, Request, Response, ResponseMeta};
use async_trait::async_trait;
use faultline_codec::Value;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sends requests built by a resource client.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, mock for testing, etc.). Bodies arrive already
/// decoded into [`Value`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns the decoded response.
    ///
    /// Non-success statuses are returned as responses, not errors.
    async fn send(&self, request: Request) -> FaultResult<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request) -> FaultResult<Response> {
        (**self).send(request).await
    }
}

/// A canned reply.
#[derive(Debug, Clone)]
enum MockReply {
    Respond { status: u16, body: Value },
    Fail(FaultError),
}

/// A mock transport for testing.
///
/// Replies are registered per `(method, path)`. Each route serves its
/// replies in order and keeps repeating the last one. Unrouted requests get
/// a 404 with a `null` body. Every request is logged.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    routes: Mutex<HashMap<(Method, String), VecDeque<MockReply>>>,
    log: Mutex<Vec<Request>>,
    latency: Mutex<Option<Duration>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            routes: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
        }
    }

    /// Queues a 200 reply.
    pub fn respond(&self, method: Method, path: impl Into<String>, body: Value) {
        self.respond_with_status(method, path, 200, body);
    }

    /// Queues a reply with a status.
    pub fn respond_with_status(
        &self,
        method: Method,
        path: impl Into<String>,
        status: u16,
        body: Value,
    ) {
        self.push(method, path.into(), MockReply::Respond { status, body });
    }

    /// Queues a transport failure.
    pub fn fail(&self, method: Method, path: impl Into<String>, error: FaultError) {
        self.push(method, path.into(), MockReply::Fail(error));
    }

    /// Delays every reply.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Sets the connected state. A disconnected mock fails every request.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Checks if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Number of requests received for one route.
    pub fn requests_to(&self, method: Method, path: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn push(&self, method: Method, path: String, reply: MockReply) {
        self.routes
            .lock()
            .entry((method, path))
            .or_default()
            .push_back(reply);
    }

    fn next_reply(&self, method: Method, path: &str) -> Option<MockReply> {
        let mut routes = self.routes.lock();
        let queue = routes.get_mut(&(method, path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> FaultResult<Response> {
        self.log.lock().push(request.clone());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.is_connected() {
            return Err(FaultError::transport_retryable("not connected"));
        }

        let meta = |status| ResponseMeta::new(status, request.path.clone());
        match self.next_reply(request.method, &request.path) {
            Some(MockReply::Respond { status, body }) => Ok(Response::new(meta(status), body)),
            Some(MockReply::Fail(error)) => Err(error),
            None => Ok(Response::new(meta(404), Value::Null)),
        }
    }
}
