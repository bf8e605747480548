//! Data models for scheduled network work
//!
//! A [`NetworkOperation`] is owned by the scheduler from enqueue until it
//! resolves; callers only ever see its id and the terminal result.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Admission and ordering class of a network operation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    /// Essential operations survive load shedding
    pub fn is_essential(self) -> bool {
        self >= Priority::High
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a cached response may satisfy an operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    #[default]
    Bypass,
    UseIfFresh,
}

impl CachePolicy {
    pub fn from_flag(use_cache: bool) -> Self {
        if use_cache {
            CachePolicy::UseIfFresh
        } else {
            CachePolicy::Bypass
        }
    }

    pub fn uses_cache(self) -> bool {
        matches!(self, CachePolicy::UseIfFresh)
    }
}

/// HTTP method of a request descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Target endpoint description of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    pub fn new<S: Into<String>>(method: HttpMethod, url: S) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get<S: Into<String>>(url: S) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post_json<S: Into<String>, T: Serialize>(
        url: S,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(body)?;
        Ok(Self::new(HttpMethod::Post, url)
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Cache key: method, canonical URL (lower-cased scheme and host, sorted
    /// query pairs, no fragment) and the body when present. Header order and
    /// header names' case do not change the key.
    pub fn normalized_key(&self) -> String {
        let url = match Url::parse(&self.url) {
            Ok(mut parsed) => {
                let mut pairs: Vec<(String, String)> = parsed
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                pairs.sort();
                parsed.set_fragment(None);
                if pairs.is_empty() {
                    parsed.set_query(None);
                } else {
                    parsed.query_pairs_mut().clear().extend_pairs(pairs);
                }
                parsed.to_string()
            }
            Err(_) => self.url.trim().to_string(),
        };

        let mut key = format!("{} {}", self.method.as_str(), url);
        if let Some(body) = &self.body {
            key.push(' ');
            key.push_str(&String::from_utf8_lossy(body));
        }
        key
    }
}

/// Lifecycle status of an operation inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting in the priority queue
    Queued,
    /// Refused admission while resources are under pressure
    Deferred,
    /// An attempt is executing
    InFlight,
    /// Completed successfully
    Succeeded,
    /// Retry budget exhausted or non-retryable failure
    Failed,
    /// Cancelled by load shedding or explicitly
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Deferred => "deferred",
            OperationStatus::InFlight => "in_flight",
            OperationStatus::Succeeded => "succeeded",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Succeeded | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

/// A unit of scheduled network work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkOperation {
    pub id: Uuid,
    pub descriptor: RequestDescriptor,
    pub priority: Priority,
    /// Remaining additional attempts after the first one
    pub retry_budget: u32,
    /// Applied to every attempt separately
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub cache_policy: CachePolicy,
    pub created_at: DateTime<Utc>,
}

impl NetworkOperation {
    pub fn new(descriptor: RequestDescriptor, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor,
            priority,
            retry_budget: 3,
            timeout: Duration::from_secs(30),
            cache_policy: CachePolicy::Bypass,
            created_at: Utc::now(),
        }
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Total attempts the operation may make
    pub fn max_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }
}

/// Response produced by a transport or served from cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePayload {
    pub status: u16,
    pub body: Bytes,
    /// True when served from the response cache without network access
    pub from_cache: bool,
}

impl ResponsePayload {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            from_cache: false,
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
