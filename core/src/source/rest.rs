/// Notice REST API client: `GET /api/notices?page=N&size=M`
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::feed::{FeedPage, NoticeDto, NoticePayload, PageEnvelope};
use crate::source::PagedFetchSource;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION};
use http::Request;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub(crate) type HttpClient = Client<HttpConnector, Empty<Bytes>>;

pub(crate) fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Longest error body kept in `FeedError::Http`
const MAX_ERROR_BODY: usize = 512;

/// Paged notice source over plain HTTP
#[derive(Clone)]
pub struct NoticeApiClient {
    base: String,
    auth_token: Option<String>,
    request_timeout: Duration,
    client: HttpClient,
}

impl NoticeApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            base: config.api_base.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            request_timeout: config.request_timeout,
            client: http_client(),
        }
    }

    /// Client for `base` with default timeout and no token
    pub fn with_base(base: impl Into<String>) -> Self {
        let config = Config {
            api_base: base.into(),
            ..Default::default()
        };
        Self::new(&config)
    }

    pub fn page_url(&self, page_index: u32, page_size: u32) -> String {
        format!(
            "{}/api/notices?page={}&size={}",
            self.base, page_index, page_size
        )
    }

    async fn get(&self, url: &str) -> Result<Bytes> {
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e| FeedError::Config(format!("invalid URL {}: {}", url, e)))?;

        let mut builder = Request::get(uri).header(ACCEPT, "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| FeedError::Fetch(format!("building request: {}", e)))?;

        let response = timeout(self.request_timeout, self.client.request(req))
            .await
            .map_err(|_| {
                FeedError::Timeout(format!("{} after {:?}", url, self.request_timeout))
            })?
            .map_err(|e| FeedError::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        let body = timeout(self.request_timeout, response.into_body().collect())
            .await
            .map_err(|_| FeedError::Timeout(format!("reading {}", url)))?
            .map_err(|e| FeedError::Fetch(format!("reading {}: {}", url, e)))?
            .to_bytes();

        if !status.is_success() {
            let text: String = String::from_utf8_lossy(&body)
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            return Err(FeedError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(body)
    }
}

impl PagedFetchSource<NoticePayload> for NoticeApiClient {
    async fn fetch_page(&self, page_index: u32, page_size: u32) -> Result<FeedPage<NoticePayload>> {
        let url = self.page_url(page_index, page_size);
        debug!("GET {}", url);
        let body = self.get(&url).await?;
        let envelope: PageEnvelope<NoticeDto> = serde_json::from_slice(&body)
            .map_err(|e| FeedError::Fetch(format!("decoding page {}: {}", page_index, e)))?;
        Ok(envelope.into_page(page_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url() {
        let client = NoticeApiClient::with_base("http://localhost:5454/");
        assert_eq!(
            client.page_url(2, 10),
            "http://localhost:5454/api/notices?page=2&size=10"
        );
    }
}
