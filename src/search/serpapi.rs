use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::paged::{PagedSearch, retrieve_paged};
use super::{PAGE_SIZE, RetrievalParams, RetrievalResult, SearchBackend, SearchError};
use crate::config::ApiKey;
use crate::fetch::PageFetcher;
use crate::retry::RetryPolicy;

const API_BASE: &str = "https://serpapi.com";
/// SerpApi reports an exhausted result set as an error string.
const NO_RESULTS_MARKER: &str = "hasn't returned any results";

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    organic_results: Option<Vec<OrganicResult>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    link: Option<String>,
}

/// Google results through SerpApi: paged `GET /search.json`.
#[derive(Debug, Clone)]
pub struct SerpApiBackend {
    http: Client,
    api_key: ApiKey,
    base_url: String,
    fetcher: PageFetcher,
    retry: RetryPolicy,
}

impl SerpApiBackend {
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

impl PagedSearch for SerpApiBackend {
    const NAME: &'static str = "serpapi";

    async fn search_page(&self, query: &str, page: u32) -> Result<Vec<String>, SearchError> {
        let num = PAGE_SIZE.to_string();
        let start = page.saturating_mul(PAGE_SIZE).to_string();
        let response = self
            .http
            .get(format!("{}/search.json", self.base_url))
            .header("User-Agent", crate::USER_AGENT)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("api_key", self.api_key.expose()),
                ("num", num.as_str()),
                ("start", start.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("SerpApi rate limited");
            return Err(SearchError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<SerpApiResponse>(&text)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(SearchError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: SerpApiResponse = response.json().await?;
        if let Some(error) = body.error {
            if error.contains(NO_RESULTS_MARKER) {
                return Ok(Vec::new());
            }
            return Err(SearchError::Api {
                code: status.as_u16(),
                message: error,
            });
        }

        Ok(body
            .organic_results
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r.link)
            .collect())
    }
}

impl SearchBackend for SerpApiBackend {
    async fn retrieve(&self, query: &str, params: &RetrievalParams) -> RetrievalResult {
        retrieve_paged(self, &self.fetcher, &self.retry, query, params).await
    }
}
