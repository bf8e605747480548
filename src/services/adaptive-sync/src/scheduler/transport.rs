//! Network transport seam used by the scheduler

use crate::error::{AdaptiveSyncError, AdaptiveSyncResult};
use crate::models::{RequestDescriptor, ResponsePayload};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

/// Performs a single network attempt. Retries, timeouts and caching are the
/// scheduler's concern; an implementation only maps one request to one
/// response or error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> AdaptiveSyncResult<ResponsePayload>;
}

/// HTTP transport backed by reqwest
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> AdaptiveSyncResult<Self> {
        // No client-level timeout: the scheduler applies one per attempt.
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                AdaptiveSyncError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &RequestDescriptor) -> AdaptiveSyncResult<ResponsePayload> {
        let mut builder = self
            .client
            .request(request.method.into(), request.url.as_str());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            debug!(
                url = %request.url,
                status = status.as_u16(),
                bytes = body.len(),
                "Request succeeded"
            );
            Ok(ResponsePayload::new(status.as_u16(), body))
        } else {
            let message = response.text().await.unwrap_or_default();
            warn!(url = %request.url, status = status.as_u16(), "Request failed");
            Err(AdaptiveSyncError::transport(
                request.url.clone(),
                status.as_u16(),
                message,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_success_returns_body_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/routines"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1,2,3]"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new("adaptive-sync-test").unwrap();
        let response = transport
            .execute(&RequestDescriptor::get(format!("{}/routines", server.uri())))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"[1,2,3]");
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn test_headers_and_body_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/state"))
            .and(header("x-device", "phone"))
            .and(body_string("{\"a\":1}"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new("adaptive-sync-test").unwrap();
        let request = RequestDescriptor::new(HttpMethod::Post, format!("{}/state", server.uri()))
            .with_header("X-Device", "phone")
            .with_body(b"{\"a\":1}".to_vec());

        let response = transport.execute(&request).await.unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_error_status_maps_to_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new("adaptive-sync-test").unwrap();
        let error = transport
            .execute(&RequestDescriptor::get(server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            AdaptiveSyncError::Transport {
                status_code: 503,
                ..
            }
        ));
        assert!(error.is_retryable());
    }
}
