//! Backend catalog client
//!
//! Read-only access to the book/chapter endpoints:
//!
//! - `GET /books`
//! - `GET /books/{book_id}/chapters`
//! - `GET /books/{book_id}/chapters/{chapter_id}`
//!
//! Requests are attempted once. Callers decide whether to fall back to a
//! cached snapshot.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{LibraryError, Result};
use crate::models::{Book, BookId, ChapterDetail, ChapterId, ChapterSummary};

/// Catalog operations used by the service and the download orchestrator.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_books(&self) -> Result<Vec<Book>>;

    async fn list_chapters(&self, book_id: &BookId) -> Result<Vec<ChapterSummary>>;

    async fn chapter_detail(&self, book_id: &BookId, chapter_id: &ChapterId)
        -> Result<ChapterDetail>;
}

/// [`CatalogApi`] backed by the injected [`HttpClient`].
pub struct HttpCatalogClient {
    http_client: Arc<dyn HttpClient>,
    base_url: Url,
}

impl HttpCatalogClient {
    /// # Errors
    ///
    /// [`LibraryError::InvalidUrl`] if `base_url` is not an absolute URL that
    /// can carry path segments.
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LibraryError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(LibraryError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LibraryError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(url = %url, "Catalog request");
        let response = self
            .http_client
            .execute(HttpRequest::get(url.as_str()).header("Accept", "application/json"))
            .await?;

        if !response.is_success() {
            warn!(url = %url, status = response.status, "Catalog request failed");
            return Err(LibraryError::Http {
                status: response.status,
            });
        }

        serde_json::from_slice(&response.body)
            .map_err(|e| LibraryError::DecodingFailed(format!("{}: {}", url.path(), e)))
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    #[instrument(skip(self))]
    async fn list_books(&self) -> Result<Vec<Book>> {
        let url = self.endpoint(&["books"])?;
        self.get_json(url).await
    }

    #[instrument(skip(self), fields(book_id = %book_id))]
    async fn list_chapters(&self, book_id: &BookId) -> Result<Vec<ChapterSummary>> {
        let url = self.endpoint(&["books", book_id.as_str(), "chapters"])?;
        self.get_json(url).await
    }

    #[instrument(skip(self), fields(book_id = %book_id, chapter_id = %chapter_id))]
    async fn chapter_detail(
        &self,
        book_id: &BookId,
        chapter_id: &ChapterId,
    ) -> Result<ChapterDetail> {
        let url = self.endpoint(&["books", book_id.as_str(), "chapters", chapter_id.as_str()])?;
        self.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use mockall::mock;
    use mockall::predicate::function;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let client = Arc::new(MockHttpClient::new());
        assert!(matches!(
            HttpCatalogClient::new(client.clone(), "not a url"),
            Err(LibraryError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpCatalogClient::new(client, "mailto:someone@example.com"),
            Err(LibraryError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_list_books() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .with(function(|req: &HttpRequest| {
                req.url == "https://api.example.com/v1/books"
            }))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(200).with_body(
                    r#"[{"id":"b1","title":"First","cover_url":null},{"id":"b2","title":"Second"}]"#,
                ))
            });

        let catalog = HttpCatalogClient::new(Arc::new(http), "https://api.example.com/v1/").unwrap();
        let books = catalog.list_books().await.unwrap();

        assert_eq!(books.len(), 2);
        assert_eq!(books[1].id, BookId::from("b2"));
        assert_eq!(books[1].cover_url, None);
    }

    #[tokio::test]
    async fn test_chapter_detail_encodes_ids() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .with(function(|req: &HttpRequest| {
                req.url == "https://api.example.com/books/my%20book/chapters/ch%2F1"
            }))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(200).with_body(
                    r#"{"id":"ch/1","title":"One","audio_url":"gs://b/a.mp3","subtitles_url":"gs://b/a.srt"}"#,
                ))
            });

        let catalog = HttpCatalogClient::new(Arc::new(http), "https://api.example.com").unwrap();
        let detail = catalog
            .chapter_detail(&BookId::from("my book"), &ChapterId::from("ch/1"))
            .await
            .unwrap();

        assert_eq!(detail.subtitles_url.as_deref(), Some("gs://b/a.srt"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(404)));

        let catalog = HttpCatalogClient::new(Arc::new(http), "https://api.example.com").unwrap();
        let result = catalog.list_chapters(&BookId::from("missing")).await;

        assert!(matches!(result, Err(LibraryError::Http { status: 404 })));
    }

    #[tokio::test]
    async fn test_decoding_failure() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200).with_body("<html>oops</html>")));

        let catalog = HttpCatalogClient::new(Arc::new(http), "https://api.example.com").unwrap();
        let result = catalog.list_chapters(&BookId::from("b1")).await;

        assert!(matches!(result, Err(LibraryError::DecodingFailed(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_bridge_error() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Network("offline".to_string())));

        let catalog = HttpCatalogClient::new(Arc::new(http), "https://api.example.com").unwrap();
        let result = catalog.list_books().await;

        assert!(matches!(result, Err(LibraryError::Bridge(_))));
    }
}
