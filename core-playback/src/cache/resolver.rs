//! Remote Metadata Resolver
//!
//! Probes a media URL for its redirect-followed location and a revalidation
//! token without downloading the body.

use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use core_runtime::logging::redact_if_sensitive;
use tracing::{debug, instrument};

const ETAG_HEADER: &str = "ETag";
const GENERATION_HEADER: &str = "x-goog-generation";

/// Result of a metadata probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    /// Final URL after redirects.
    pub resolved_url: String,
    /// Entity tag, else the storage generation id.
    pub token: Option<String>,
}

pub struct RemoteMetadataResolver {
    http_client: Arc<dyn HttpClient>,
    timeout: Option<Duration>,
}

impl RemoteMetadataResolver {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `HEAD` first, then a one-byte ranged `GET`. Returns `None` when neither
    /// probe produced a successful response; callers treat that as "freshness
    /// cannot be verified".
    #[instrument(skip(self, url), fields(url = %redact_if_sensitive("url", url)))]
    pub async fn resolve(&self, url: &str) -> Option<ResolvedResource> {
        if let Some(response) = self.probe(HttpRequest::head(url)).await {
            return Some(Self::describe(url, &response));
        }

        let ranged = HttpRequest::get(url)
            .header("Range", "bytes=0-0")
            .header("Accept-Encoding", "identity");
        if let Some(response) = self.probe(ranged).await {
            return Some(Self::describe(url, &response));
        }

        debug!("Metadata probe failed");
        None
    }

    async fn probe(&self, mut request: HttpRequest) -> Option<HttpResponse> {
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let method = request.method;

        match self.http_client.execute(request).await {
            Ok(response) if response.is_success() => Some(response),
            Ok(response) => {
                debug!(?method, status = response.status, "Probe rejected");
                None
            }
            Err(e) => {
                debug!(?method, error = %e, "Probe transport failure");
                None
            }
        }
    }

    fn describe(requested_url: &str, response: &HttpResponse) -> ResolvedResource {
        let token = response
            .header(ETAG_HEADER)
            .or_else(|| response.header(GENERATION_HEADER))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        ResolvedResource {
            resolved_url: response
                .final_url
                .clone()
                .unwrap_or_else(|| requested_url.to_string()),
            token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpMethod;
    use mockall::mock;
    use mockall::predicate::function;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    const URL: &str = "https://storage.googleapis.com/bucket/ch1.mp3";

    #[tokio::test]
    async fn test_head_etag_and_redirect() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .with(function(|r: &HttpRequest| r.method == HttpMethod::Head))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(200)
                    .with_header("etag", "\"abc\"")
                    .with_header("x-goog-generation", "17")
                    .with_final_url("https://cdn.example.com/ch1.mp3"))
            });

        let resolved = RemoteMetadataResolver::new(Arc::new(http))
            .resolve(URL)
            .await
            .unwrap();
        assert_eq!(resolved.token.as_deref(), Some("\"abc\""));
        assert_eq!(resolved.resolved_url, "https://cdn.example.com/ch1.mp3");
    }

    #[tokio::test]
    async fn test_falls_back_to_ranged_get() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .with(function(|r: &HttpRequest| r.method == HttpMethod::Head))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(405)));
        http.expect_execute()
            .with(function(|r: &HttpRequest| {
                r.method == HttpMethod::Get
                    && r.headers.get("Range").map(String::as_str) == Some("bytes=0-0")
                    && r.headers.get("Accept-Encoding").map(String::as_str) == Some("identity")
            }))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(206).with_header("x-goog-generation", "42")));

        let resolved = RemoteMetadataResolver::new(Arc::new(http))
            .resolve(URL)
            .await
            .unwrap();
        assert_eq!(resolved.token.as_deref(), Some("42"));
        assert_eq!(resolved.resolved_url, URL);
    }

    #[tokio::test]
    async fn test_transport_failure_yields_none() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(2)
            .returning(|_| Err(BridgeError::Network("offline".into())));

        assert!(RemoteMetadataResolver::new(Arc::new(http))
            .resolve(URL)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_token_headers() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200)));

        let resolved = RemoteMetadataResolver::new(Arc::new(http))
            .resolve(URL)
            .await
            .unwrap();
        assert!(resolved.token.is_none());
    }
}
