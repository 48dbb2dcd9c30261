//! CTT HTTP client
//!
//! One call to [`CttClient::lookup`] is exactly one HTTP request. Retrying and
//! rate limiting are the job of [`crate::enrichment::client::RateLimitedClient`];
//! this client only classifies what came back:
//!
//! - 200 + non-empty array → `Ok(Location)`
//! - 200 + empty array → [`EnrichmentError::NoMatches`]
//! - 400 / 404 → [`EnrichmentError::ClientRejected`]
//! - any other status → [`EnrichmentError::UnexpectedStatus`]
//! - timeout / connection failure → [`EnrichmentError::Network`]
//! - undecodable body → [`EnrichmentError::Parse`]

use std::time::Duration;

use reqwest::StatusCode;

use super::{adapter, dto};
use crate::enrichment::domain::{CanonicalCode, EnrichmentError, Location};

/// Production endpoint. The API key is the first path segment after this.
pub const DEFAULT_BASE_URL: &str = "https://www.cttcodigopostal.pt/api/v1";

/// CTT Código Postal API client
pub struct CttClient {
    api_key: String,
    http_client: reqwest::Client,
    base_url: String,
}

impl CttClient {
    /// Create a new client with the given API key and per-request timeout
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, EnrichmentError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeout)
    }

    /// Create a client against a different base URL (mirrors, tests)
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EnrichmentError> {
        let http_client = reqwest::Client::builder()
            .gzip(true)
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| EnrichmentError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// URL for a code: `{base}/{key}/{PPPP}-{SSS}`
    fn lookup_url(&self, code: &CanonicalCode) -> String {
        format!(
            "{}/{}/{}-{}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            code.prefix(),
            code.suffix()
        )
    }

    /// Look up a postal code and return its municipality and district
    pub async fn lookup(&self, code: &CanonicalCode) -> Result<Location, EnrichmentError> {
        let response = self.send_lookup_request(code).await?;
        adapter::to_location(response)
    }

    /// Send the HTTP request and parse the response
    async fn send_lookup_request(
        &self,
        code: &CanonicalCode,
    ) -> Result<dto::LookupResponse, EnrichmentError> {
        let response = self
            .http_client
            .get(self.lookup_url(code))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnrichmentError::Network(format!("timed out: {e}"))
                } else {
                    EnrichmentError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            return Err(EnrichmentError::ClientRejected {
                status: status.as_u16(),
            });
        }

        if status != StatusCode::OK {
            return Err(EnrichmentError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        response
            .json::<dto::LookupResponse>()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::normalize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn client_for(server: &MockServer) -> CttClient {
        CttClient::with_base_url("test-key", format!("{}/api/v1/", server.uri()), TIMEOUT).unwrap()
    }

    #[test]
    fn test_lookup_url() {
        let client = CttClient::new("abc123", TIMEOUT).unwrap();
        let code = normalize("4000100").unwrap();
        assert_eq!(
            client.lookup_url(&code),
            "https://www.cttcodigopostal.pt/api/v1/abc123/4000-100"
        );
    }

    #[test]
    fn test_api_key_is_encoded() {
        let client = CttClient::with_base_url("a/b c", "http://localhost", TIMEOUT).unwrap();
        let code = normalize("1000-001").unwrap();
        assert_eq!(client.lookup_url(&code), "http://localhost/a%2Fb%20c/1000-001");
    }

    #[tokio::test]
    async fn test_lookup_resolves_first_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/test-key/4000-100"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"concelho":"Porto","distrito":"Porto"},{"concelho":"Other","distrito":"Other"}]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let location = client.lookup(&normalize("4000,100").unwrap()).await.unwrap();
        assert_eq!(location.municipality, "Porto");
        assert_eq!(location.district, "Porto");
    }

    #[tokio::test]
    async fn test_not_found_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.lookup(&normalize("1000-001").unwrap()).await;
        assert!(matches!(result, Err(EnrichmentError::ClientRejected { status: 404 })));
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.lookup(&normalize("1000-001").unwrap()).await;
        assert!(matches!(result, Err(EnrichmentError::ClientRejected { status: 400 })));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.lookup(&normalize("1000-001").unwrap()).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::UnexpectedStatus { status: 503 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_array_is_no_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.lookup(&normalize("1000-001").unwrap()).await;
        assert!(matches!(result, Err(EnrichmentError::NoMatches)));
    }

    #[tokio::test]
    async fn test_garbage_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.lookup(&normalize("1000-001").unwrap()).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Parse(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            CttClient::with_base_url("k", server.uri(), Duration::from_millis(50)).unwrap();
        let err = client.lookup(&normalize("1000-001").unwrap()).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Network(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Nothing listens on port 9 in the test environment
        let client = CttClient::with_base_url("k", "http://127.0.0.1:9", TIMEOUT).unwrap();
        let err = client.lookup(&normalize("1000-001").unwrap()).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Network(_)));
    }
}
