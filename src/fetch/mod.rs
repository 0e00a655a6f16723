pub mod extractor;

use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use extractor::{extract_article, extract_body_text};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

const MAX_RESPONSE_BYTES: usize = 10_000_000;
/// Per-page fetch timeout. Applies to page downloads only, not to LLM calls.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL: must be HTTP(S)")]
    InvalidScheme,

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch failed: status {0}")]
    Status(u16),

    #[error("response too large (>{} bytes)", MAX_RESPONSE_BYTES)]
    TooLarge,
}

/// How page text is pulled out of downloaded HTML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractMode {
    /// All visible text under `<body>`, whitespace-joined.
    #[default]
    Body,
    /// Readability main-article extraction rendered as Markdown, falling back
    /// to body text when the page does not look like an article.
    Readability,
}

/// Downloads a page and returns its extracted text.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    http: Client,
    mode: ExtractMode,
}

impl PageFetcher {
    pub fn new(http: Client, mode: ExtractMode) -> Self {
        Self { http, mode }
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        validate_url(url)?;
        let (final_url, html) = download(&self.http, url).await?;

        let text = match self.mode {
            ExtractMode::Body => extract_body_text(&html),
            ExtractMode::Readability => extract_article(&html, Some(&final_url)),
        };

        debug!(url = %final_url, bytes = html.len(), chars = text.len(), "page fetched");
        Ok(text)
    }
}

async fn download(client: &Client, url: &str) -> Result<(String, String), FetchError> {
    let response = client
        .get(url)
        .header("User-Agent", crate::USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let final_url = response.url().to_string();
    let encoding = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(charset_from_content_type)
        .unwrap_or(UTF_8);

    if let Some(len) = response.content_length()
        && len as usize > MAX_RESPONSE_BYTES
    {
        return Err(FetchError::TooLarge);
    }

    let mut body = Vec::new();
    let mut stream = response;
    while let Some(chunk) = stream.chunk().await? {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_RESPONSE_BYTES {
            return Err(FetchError::TooLarge);
        }
    }
    let (html, _, _) = encoding.decode(&body);
    Ok((final_url, html.into_owned()))
}

fn charset_from_content_type(value: &str) -> Option<&'static Encoding> {
    value.split(';').find_map(|param| {
        let (key, label) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(label.trim().trim_matches('"').as_bytes())
    })
}

fn validate_url(raw: &str) -> Result<(), FetchError> {
    let parsed = url::Url::parse(raw)?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(FetchError::InvalidScheme),
    }
}
