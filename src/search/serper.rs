use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::paged::{PagedSearch, retrieve_paged};
use super::{PAGE_SIZE, RetrievalParams, RetrievalResult, SearchBackend, SearchError};
use crate::config::ApiKey;
use crate::fetch::PageFetcher;
use crate::retry::RetryPolicy;

const API_BASE: &str = "https://google.serper.dev";

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: u32,
    /// One-based.
    page: u32,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    organic: Option<Vec<OrganicResult>>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    link: Option<String>,
}

/// Google results through Serper: one JSON `POST /search` per page.
#[derive(Debug, Clone)]
pub struct SerperBackend {
    http: Client,
    api_key: ApiKey,
    base_url: String,
    fetcher: PageFetcher,
    retry: RetryPolicy,
}

impl SerperBackend {
    pub fn new(http: Client, api_key: ApiKey, fetcher: PageFetcher) -> Self {
        Self {
            http,
            api_key,
            base_url: API_BASE.to_string(),
            fetcher,
            retry: RetryPolicy::exponential(),
        }
    }

    #[cfg(test)]
    fn with_base_url(http: Client, base_url: &str, fetcher: PageFetcher) -> Self {
        Self {
            http,
            api_key: ApiKey::new("test-key").expect("non-blank key"),
            base_url: base_url.to_string(),
            fetcher,
            retry: RetryPolicy::immediate(3),
        }
    }
}

impl PagedSearch for SerperBackend {
    const NAME: &'static str = "serper";

    async fn search_page(&self, query: &str, page: u32) -> Result<Vec<String>, SearchError> {
        let request = SerperRequest {
            q: query,
            num: PAGE_SIZE,
            page: page + 1,
        };
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", self.api_key.expose())
            .header("User-Agent", crate::USER_AGENT)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Serper rate limited");
            return Err(SearchError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<SerperResponse>(&text)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(SearchError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: SerperResponse = response.json().await?;
        Ok(body
            .organic
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r.link)
            .collect())
    }
}

impl SearchBackend for SerperBackend {
    async fn retrieve(&self, query: &str, params: &RetrievalParams) -> RetrievalResult {
        retrieve_paged(self, &self.fetcher, &self.retry, query, params).await
    }
}
