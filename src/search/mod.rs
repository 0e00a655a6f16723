//! Retrieval backends: two keyed search APIs and scraped organic results, all
//! behind one `SearchBackend` contract that never fails and always terminates.

pub mod organic;
mod paged;
pub mod serpapi;
pub mod serper;

use std::collections::HashSet;

use tracing::debug;

use crate::fetch::PageFetcher;
use crate::llm::ChatClient;

pub use organic::{OrganicBackend, QueryRewriter};
pub use serpapi::SerpApiBackend;
pub use serper::SerperBackend;

/// Results requested per page from the keyed APIs.
pub(crate) const PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalParams {
    /// Result pages a keyed backend may consume per query.
    pub page_budget: u32,
    /// Successfully fetched, non-skipped links to collect.
    pub link_budget: usize,
    /// Domains excluded from fetching (substring match against the host).
    pub skip_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalResult {
    /// Extracted page text, one page per line block.
    pub context: String,
    pub used_links: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search API rate limit exceeded")]
    RateLimited,

    #[error("search API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("search returned no results")]
    NoResults,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

pub trait SearchBackend {
    async fn retrieve(&self, query: &str, params: &RetrievalParams) -> RetrievalResult;
}

/// Runtime-selected backend.
pub enum Backend<C> {
    SerpApi(SerpApiBackend),
    Serper(SerperBackend),
    Organic(OrganicBackend<C>),
}

impl<C: ChatClient> SearchBackend for Backend<C> {
    async fn retrieve(&self, query: &str, params: &RetrievalParams) -> RetrievalResult {
        match self {
            Backend::SerpApi(b) => b.retrieve(query, params).await,
            Backend::Serper(b) => b.retrieve(query, params).await,
            Backend::Organic(b) => b.retrieve(query, params).await,
        }
    }
}

pub(crate) fn is_retriable(e: &SearchError) -> bool {
    match e {
        SearchError::RateLimited | SearchError::NoResults | SearchError::Network(_) => true,
        SearchError::Api { code, .. } => (500..=599).contains(code),
    }
}

/// True when the URL's host contains any skip entry, or the URL has no host.
pub(crate) fn is_skipped(link: &str, skip_domains: &[String]) -> bool {
    let Some(host) = url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return true;
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);
    skip_domains
        .iter()
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| !d.is_empty() && host.contains(&d))
}

/// Accumulates fetched pages for one retrieval call under the link budget.
pub(crate) struct Harvest<'a> {
    fetcher: &'a PageFetcher,
    params: &'a RetrievalParams,
    seen: HashSet<String>,
    result: RetrievalResult,
}

impl<'a> Harvest<'a> {
    pub(crate) fn new(fetcher: &'a PageFetcher, params: &'a RetrievalParams) -> Self {
        Self {
            fetcher,
            params,
            seen: HashSet::new(),
            result: RetrievalResult::default(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.result.used_links.len() >= self.params.link_budget
    }

    /// Fetches candidates in order until the budget is met. Skipped and failed
    /// links are dropped without counting; duplicates are ignored.
    pub(crate) async fn offer(&mut self, candidates: Vec<String>) {
        for link in candidates {
            if self.is_full() {
                break;
            }
            if !self.seen.insert(link.clone()) {
                continue;
            }
            if is_skipped(&link, &self.params.skip_domains) {
                debug!(%link, "skipping link");
                continue;
            }
            match self.fetcher.fetch_text(&link).await {
                Ok(text) => {
                    if !text.is_empty() {
                        self.result.context.push_str(&text);
                        self.result.context.push('\n');
                    }
                    self.result.used_links.push(link);
                }
                Err(e) => debug!(%link, error = %e, "fetch failed, skipping link"),
            }
        }
    }

    pub(crate) fn finish(self) -> RetrievalResult {
        self.result
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Mounts an HTML page at `route` whose body text is `text`.
    pub(crate) async fn mount_page(server: &MockServer, route: &str, text: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body><p>{text}</p></body></html>")),
            )
            .mount(server)
            .await;
    }

    pub(crate) async fn mount_status(server: &MockServer, route: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    /// Same server reached through a different host name, so skip rules can
    /// tell the two apart.
    pub(crate) fn localhost_uri(server: &MockServer) -> String {
        format!("http://localhost:{}", server.address().port())
    }
}
