use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;

use crate::models::{CoreError, CoreErrorKind};

/// Desktop browser identity sent with every request and browser session.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const MAX_REDIRECTS: usize = 10;

pub type FetchResult<T> = Result<T, CoreError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain HTTP GET seam. Non-success statuses are returned as pages, not
/// errors; only transport problems fail.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Option<Duration>) -> FetchResult<FetchedPage>;
}

#[derive(Clone, Debug)]
pub struct ReqwestPageFetcher {
    client: reqwest::Client,
}

impl ReqwestPageFetcher {
    pub fn new() -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("failed to build http client: {error}"),
                )
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for ReqwestPageFetcher {
    async fn fetch(&self, url: &str, timeout: Option<Duration>) -> FetchResult<FetchedPage> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|error| request_error(url, error))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|error| request_error(url, error))?;

        tracing::debug!(url, status, bytes = body.len(), "fetched page");
        Ok(FetchedPage {
            url: final_url,
            status,
            body,
        })
    }
}

fn request_error(url: &str, error: reqwest::Error) -> CoreError {
    let kind = if error.is_timeout() {
        CoreErrorKind::Timeout
    } else {
        CoreErrorKind::FetchFailure
    };
    CoreError::new(kind, format!("GET {url} failed: {error}"))
}
