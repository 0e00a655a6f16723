use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use super::{Harvest, RetrievalParams, RetrievalResult, SearchBackend, SearchError, is_retriable};
use crate::fetch::PageFetcher;
use crate::llm::{ChatClient, ChatMessage};
use crate::retry::{RetryPolicy, with_retry};

const SEARCH_BASE: &str = "https://www.google.com";
const SEARCH_ATTEMPTS: u32 = 3;
const SEARCH_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Candidates requested per link of budget, to absorb skips and failed fetches.
const OVERSAMPLE: usize = 2;
/// Asset domains serving the result page itself; any subdomain matches.
const ENGINE_ASSET_DOMAINS: [&str; 2] = ["googleusercontent.com", "gstatic.com"];

const REWRITE_PROMPT: &str = "Given an instruction, respond only with a search query that a search engine can use to find its answer. Do not add any explanation.";

/// Turns a natural-language question into a search-engine query via the LLM.
#[derive(Debug, Clone)]
pub struct QueryRewriter<C> {
    client: C,
    model: String,
}

impl<C: ChatClient> QueryRewriter<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Falls back to the original query when the model fails or answers blank.
    async fn rewrite(&self, query: &str) -> String {
        let messages = [ChatMessage::system(REWRITE_PROMPT), ChatMessage::user(query)];
        match self.client.complete(&messages, &self.model, None).await {
            Ok(reply) => {
                let rewritten = reply.trim().trim_matches('"').trim();
                if rewritten.is_empty() {
                    warn!("query rewrite returned blank, using original query");
                    query.to_string()
                } else {
                    debug!(original = query, rewritten, "query rewritten");
                    rewritten.to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, "query rewrite failed, using original query");
                query.to_string()
            }
        }
    }
}

/// Scrapes an unpaged search-engine result page, optionally after rewriting
/// the question into a search query.
#[derive(Debug, Clone)]
pub struct OrganicBackend<C> {
    http: Client,
    base_url: String,
    lang: String,
    fetcher: PageFetcher,
    rewriter: Option<QueryRewriter<C>>,
    retry: RetryPolicy,
}

impl<C: ChatClient> OrganicBackend<C> {
    pub fn new(
        http: Client,
        lang: impl Into<String>,
        fetcher: PageFetcher,
        rewriter: Option<QueryRewriter<C>>,
    ) -> Self {
        Self {
            http,
            base_url: SEARCH_BASE.to_string(),
            lang: lang.into(),
            fetcher,
            rewriter,
            retry: RetryPolicy::fixed(SEARCH_ATTEMPTS, SEARCH_RETRY_DELAY),
        }
    }

    #[cfg(test)]
    fn with_base_url(
        http: Client,
        base_url: &str,
        fetcher: PageFetcher,
        rewriter: Option<QueryRewriter<C>>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            lang: "en".to_string(),
            fetcher,
            rewriter,
            retry: RetryPolicy::immediate(SEARCH_ATTEMPTS),
        }
    }

    async fn prepare_query(&self, query: &str) -> String {
        match &self.rewriter {
            Some(rewriter) => rewriter.rewrite(query).await,
            None => query.to_string(),
        }
    }

    async fn search_once(&self, query: &str, num: usize) -> Result<Vec<String>, SearchError> {
        let num = num.to_string();
        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .header("User-Agent", crate::USER_AGENT)
            .query(&[
                ("q", query),
                ("num", num.as_str()),
                ("hl", self.lang.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("organic search rate limited");
            return Err(SearchError::RateLimited);
        }
        if !status.is_success() {
            return Err(SearchError::Api {
                code: status.as_u16(),
                message: format!("HTTP {status}"),
            });
        }

        let html = response.text().await?;
        let links = parse_result_links(&html);
        if links.is_empty() {
            return Err(SearchError::NoResults);
        }
        Ok(links)
    }
}

impl<C: ChatClient> SearchBackend for OrganicBackend<C> {
    async fn retrieve(&self, query: &str, params: &RetrievalParams) -> RetrievalResult {
        if params.link_budget == 0 {
            return RetrievalResult::default();
        }
        let search_query = self.prepare_query(query).await;
        let num = params.link_budget.saturating_mul(OVERSAMPLE);

        let candidates = match with_retry(&self.retry, "organic search", is_retriable, || {
            self.search_once(&search_query, num)
        })
        .await
        {
            Ok(mut links) => {
                links.truncate(num);
                links
            }
            Err(e) => {
                warn!(query = %search_query, error = %e, "organic search gave up");
                return RetrievalResult::default();
            }
        };
        info!(query = %search_query, candidates = candidates.len(), "organic search");

        let mut harvest = Harvest::new(&self.fetcher, params);
        harvest.offer(candidates).await;
        harvest.finish()
    }
}

/// Result links in page order. Redirect wrappers (`/url?q=...`) are unwrapped;
/// relative and engine-internal links are dropped.
fn parse_result_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(resolve_href)
        .filter(|link| !is_engine_link(link))
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

fn resolve_href(href: &str) -> Option<String> {
    if href.starts_with("/url?") {
        let wrapped = url::Url::parse(&format!("https://redirect.invalid{href}")).ok()?;
        let target = wrapped
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned())?;
        return is_http(&target).then_some(target);
    }
    is_http(href).then(|| href.to_string())
}

fn is_http(link: &str) -> bool {
    url::Url::parse(link).is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
}

/// True for the engine's own front-end hosts (`google.<tld>`, `www.google.<tld>`)
/// and its asset domains. Other Google subdomains are real results.
fn is_engine_link(link: &str) -> bool {
    let Some(host) = url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    let front = host.strip_prefix("www.").unwrap_or(&host);
    if front.starts_with("google.") {
        return true;
    }
    ENGINE_ASSET_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}
