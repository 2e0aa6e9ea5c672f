//! HTTP push-stream transport
//!
//! POSTs the turn request as JSON and frames the chunked response body.
//! Both newline-delimited JSON and server-sent-event bodies are accepted.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use url::Url;

use super::{frame_records, ChunkTransport, RecordStream};
use crate::error::{Result, TurnstreamError};
use crate::stream::request::TurnRequest;

/// Push-stream transport over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport posting to `base_url` joined with `stream_path`.
    ///
    /// `connect_timeout` bounds connection setup only; an open stream may
    /// stay silent indefinitely unless the session idle timeout is set.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use std::time::Duration;
    /// use turnstream::stream::transport::http::HttpTransport;
    ///
    /// let base = url::Url::parse("http://localhost:3001/api/agentos").unwrap();
    /// let transport = HttpTransport::new(&base, "/chat/stream", &HashMap::new(), Duration::from_secs(5));
    /// assert_eq!(
    ///     transport.unwrap().endpoint().as_str(),
    ///     "http://localhost:3001/api/agentos/chat/stream"
    /// );
    /// ```
    pub fn new(
        base_url: &Url,
        stream_path: &str,
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let endpoint = join_endpoint(base_url, stream_path)?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/x-ndjson, text/event-stream"),
        );
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TurnstreamError::Config(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TurnstreamError::Config(format!("Invalid value for header {}: {}", name, e))
            })?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(default_headers)
            .user_agent(concat!("turnstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TurnstreamError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!("Initialized HTTP transport: endpoint={}", endpoint);

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ChunkTransport for HttpTransport {
    async fn open(&self, request: &TurnRequest) -> Result<RecordStream> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to open stream for session {}: {}", request.session_id, e);
                TurnstreamError::Transport(format!("Failed to open stream: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                "Engine returned {} for session {}: {}",
                status,
                request.session_id,
                error_text
            );
            return Err(TurnstreamError::Transport(format!(
                "Engine returned {}: {}",
                status,
                error_text.trim()
            ))
            .into());
        }

        Ok(frame_records(response.bytes_stream()))
    }
}

/// Append `path` to the base URL's path, keeping any base path prefix.
fn join_endpoint(base_url: &Url, path: &str) -> Result<Url> {
    if base_url.cannot_be_a_base() {
        return Err(TurnstreamError::Config(format!("Engine URL {} cannot be a base", base_url)).into());
    }
    let mut endpoint = base_url.clone();
    let joined = format!(
        "{}/{}",
        base_url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    endpoint.set_path(&joined);
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::request::ChatMessage;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> TurnRequest {
        TurnRequest {
            session_id: "s1".to_string(),
            persona_id: Some("p1".to_string()),
            agency_request: None,
            messages: vec![ChatMessage::user("Hi")],
            workflow_request: None,
        }
    }

    #[test]
    fn test_join_endpoint_keeps_base_path() {
        let base = Url::parse("http://host/api/agentos/").unwrap();
        assert_eq!(
            join_endpoint(&base, "chat/stream").unwrap().as_str(),
            "http://host/api/agentos/chat/stream"
        );
        let root = Url::parse("http://host").unwrap();
        assert_eq!(
            join_endpoint(&root, "/chat/stream").unwrap().as_str(),
            "http://host/chat/stream"
        );
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let base = Url::parse("http://host").unwrap();
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        let err = HttpTransport::new(&base, "/s", &headers, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TurnstreamError>(),
            Some(TurnstreamError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_open_frames_ndjson_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/stream"))
            .and(body_partial_json(serde_json::json!({"sessionId": "s1"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"type\":\"TEXT_DELTA\",\"streamId\":\"t\",\"textDelta\":\"a\"}\n{\"type\":\"FINAL_MARKER\"}\n"
                    .as_bytes()
                    .to_vec(),
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let transport =
            HttpTransport::new(&base, "/chat/stream", &HashMap::new(), Duration::from_secs(5)).unwrap();
        let records: Vec<_> = transport.open(&request()).await.unwrap().collect().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_open_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let transport =
            HttpTransport::new(&base, "/chat/stream", &HashMap::new(), Duration::from_secs(5)).unwrap();
        let err = match transport.open(&request()).await {
            Ok(_) => panic!("expected transport error"),
            Err(e) => e,
        };
        let typed = err.downcast_ref::<TurnstreamError>().expect("typed error");
        assert!(matches!(typed, TurnstreamError::Transport(msg) if msg.contains("overloaded")));
    }
}
