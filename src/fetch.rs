//! Timeout-guarded fetch combinator shared by every adapter.
//!
//! The network sits behind [`Transport`] so the same race/deadline logic runs
//! against `reqwest` in production and against [`MockTransport`] in tests.
//! [`DeadlineFetcher`] never lets a transport failure or a timeout escape as a
//! panic or an unhandled error: callers get `Option<RawResponse>` (or a typed
//! failure via [`DeadlineFetcher::try_fetch`]).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SourceError;

pub const DEFAULT_USER_AGENT: &str = "situation-aggregator/0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Per-request options. Header names are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post_json(body: Value) -> Self {
        Self {
            method: Method::Post,
            headers: Vec::new(),
            body: Some(RequestBody::Json(body)),
        }
    }

    pub fn post_form(pairs: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Post,
            headers: Vec::new(),
            body: Some(RequestBody::Form(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Fully buffered provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 401/403 become `Auth`, any other non-2xx becomes `Http(status)`.
    pub fn error_for_status(self) -> Result<Self, SourceError> {
        match self.status {
            200..=299 => Ok(self),
            401 | 403 => Err(SourceError::Auth(format!("provider returned {}", self.status))),
            s => Err(SourceError::Http(s)),
        }
    }

    /// Reject HTML (captcha/maintenance pages) before serde sees it.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SourceError> {
        if let Some(ct) = &self.content_type {
            if ct.to_ascii_lowercase().contains("text/html") {
                return Err(SourceError::Parse(format!("expected JSON, got {ct}")));
            }
        }
        let trimmed = self.body.trim();
        if trimmed.is_empty() {
            return Err(SourceError::Parse("empty body".to_string()));
        }
        serde_json::from_str(trimmed).map_err(SourceError::from)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// One network round trip. Implementations must not apply their own retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<RawResponse, TransportError> {
        let mut req = match options.method {
            Method::Get => self.client.get(endpoint),
            Method::Post => self.client.post(endpoint),
        };
        for (k, v) in &options.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req = match &options.body {
            Some(RequestBody::Json(v)) => req.json(v),
            Some(RequestBody::Form(pairs)) => req.form(pairs),
            None => req,
        };

        let resp = req.send().await.map_err(|e| TransportError(e.to_string()))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError(format!("reading body: {e}")))?;
        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Why a guarded fetch produced no response.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchFailure {
    Timeout(Duration),
    Transport(String),
}

impl From<FetchFailure> for SourceError {
    fn from(f: FetchFailure) -> Self {
        match f {
            FetchFailure::Timeout(d) => SourceError::Timeout(d.as_millis() as u64),
            FetchFailure::Transport(m) => SourceError::Network(m),
        }
    }
}

/// The single fetch primitive: a network call raced against a deadline.
#[derive(Clone)]
pub struct DeadlineFetcher {
    transport: Arc<dyn Transport>,
    user_agent: String,
}

impl DeadlineFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    fn with_default_headers(&self, mut options: RequestOptions) -> RequestOptions {
        if !options.has_header("user-agent") {
            options
                .headers
                .push(("User-Agent".to_string(), self.user_agent.clone()));
        }
        if !options.has_header("accept") {
            options
                .headers
                .push(("Accept".to_string(), "application/json".to_string()));
        }
        options
    }

    /// Contract form: `Some(response)` or `None`, never an error.
    pub async fn fetch_with_deadline(
        &self,
        endpoint: &str,
        options: RequestOptions,
        timeout: Duration,
    ) -> Option<RawResponse> {
        self.try_fetch(endpoint, options, timeout).await.ok()
    }

    /// Same race, but keeps the reason a response is missing.
    ///
    /// The call runs on its own task; if the timer wins, the task is left to
    /// finish on its own and its result is dropped.
    pub async fn try_fetch(
        &self,
        endpoint: &str,
        options: RequestOptions,
        timeout: Duration,
    ) -> Result<RawResponse, FetchFailure> {
        let options = self.with_default_headers(options);
        let transport = Arc::clone(&self.transport);
        let url = endpoint.to_string();
        let started = Instant::now();

        let call = tokio::spawn(async move { transport.execute(&url, &options).await });

        let res = tokio::select! {
            joined = call => match joined {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(e)) => Err(FetchFailure::Transport(e.0)),
                Err(e) => Err(FetchFailure::Transport(format!("request task failed: {e}"))),
            },
            _ = tokio::time::sleep(timeout) => Err(FetchFailure::Timeout(timeout)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &res {
            Ok(resp) => debug!(
                target: "fetch",
                endpoint = %redact(endpoint),
                status = resp.status,
                elapsed_ms,
                "fetched"
            ),
            Err(FetchFailure::Timeout(_)) => warn!(
                target: "fetch",
                endpoint = %redact(endpoint),
                timeout_ms = timeout.as_millis() as u64,
                "deadline exceeded, call abandoned"
            ),
            Err(FetchFailure::Transport(e)) => warn!(
                target: "fetch",
                endpoint = %redact(endpoint),
                error = %e,
                elapsed_ms,
                "transport error"
            ),
        }
        res
    }

    /// Generic JSON fetch: deadline, status mapping and schema validation in one.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
        timeout: Duration,
    ) -> Result<T, SourceError> {
        let resp = self.try_fetch(endpoint, options, timeout).await?;
        resp.error_for_status()?.json::<T>()
    }

    /// Like `fetch_json` but returns the body as text (RSS/XML providers).
    pub async fn fetch_text(
        &self,
        endpoint: &str,
        options: RequestOptions,
        timeout: Duration,
    ) -> Result<String, SourceError> {
        let resp = self.try_fetch(endpoint, options, timeout).await?;
        Ok(resp.error_for_status()?.body)
    }
}

/// Strip the query string so API keys never reach the logs.
pub fn redact(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

// ------------------------------------------------------------
// Response cache (optional decorator)
// ------------------------------------------------------------

/// Per-endpoint freshness window for successful GETs. Purely a load shield
/// for third parties; nothing in the core depends on it being present.
pub struct CachingTransport {
    inner: Arc<dyn Transport>,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, RawResponse)>>,
}

impl CachingTransport {
    pub fn new(inner: Arc<dyn Transport>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, key: &str) -> Option<RawResponse> {
        let mut g = self.entries.lock().expect("cache mutex poisoned");
        match g.get(key) {
            Some((at, resp)) if at.elapsed() < self.ttl => Some(resp.clone()),
            Some(_) => {
                g.remove(key);
                None
            }
            None => None,
        }
    }

    /// Entries currently held, stale ones included until the next insert.
    pub fn cached_entries(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }
}

#[async_trait]
impl Transport for CachingTransport {
    async fn execute(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<RawResponse, TransportError> {
        if options.method != Method::Get {
            return self.inner.execute(endpoint, options).await;
        }
        if let Some(hit) = self.lookup(endpoint) {
            debug!(target: "fetch", endpoint = %redact(endpoint), "cache hit");
            return Ok(hit);
        }
        let resp = self.inner.execute(endpoint, options).await?;
        if resp.is_success() {
            let mut g = self.entries.lock().expect("cache mutex poisoned");
            // Date-stamped URLs are never asked for again; sweep on insert.
            g.retain(|_, (at, _)| at.elapsed() < self.ttl);
            g.insert(endpoint.to_string(), (Instant::now(), resp.clone()));
        }
        Ok(resp)
    }
}

// ------------------------------------------------------------
// Test helper
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16, String),
    Delay(Duration, Box<MockReply>),
    Fail(String),
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        MockReply::Status(200, body.into())
    }

    pub fn json(v: Value) -> Self {
        MockReply::Status(200, v.to_string())
    }

    pub fn delayed(self, by: Duration) -> Self {
        MockReply::Delay(by, Box::new(self))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub options: RequestOptions,
}

/// Scripted transport: replies are matched by the longest endpoint prefix.
/// Each route is a queue; the last reply is sticky.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<(String, VecDeque<MockReply>)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, prefix: &str, reply: MockReply) -> Self {
        {
            let mut routes = self.routes.lock().expect("mock routes poisoned");
            match routes.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, q)) => q.push_back(reply),
                None => routes.push((prefix.to_string(), VecDeque::from([reply]))),
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock calls poisoned").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .expect("mock calls poisoned")
            .iter()
            .filter(|c| c.endpoint.starts_with(prefix))
            .count()
    }

    fn next_reply(&self, endpoint: &str) -> Option<MockReply> {
        let mut routes = self.routes.lock().expect("mock routes poisoned");
        let (_, queue) = routes
            .iter_mut()
            .filter(|(p, _)| endpoint.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<RawResponse, TransportError> {
        self.calls
            .lock()
            .expect("mock calls poisoned")
            .push(RecordedCall {
                endpoint: endpoint.to_string(),
                options: options.clone(),
            });

        let mut reply = self
            .next_reply(endpoint)
            .ok_or_else(|| TransportError(format!("no mock route for {endpoint}")))?;
        loop {
            match reply {
                MockReply::Delay(d, next) => {
                    tokio::time::sleep(d).await;
                    reply = *next;
                }
                MockReply::Status(status, body) => {
                    return Ok(RawResponse {
                        status,
                        content_type: Some("application/json".to_string()),
                        body,
                    })
                }
                MockReply::Fail(msg) => return Err(TransportError(msg)),
            }
        }
    }
}
