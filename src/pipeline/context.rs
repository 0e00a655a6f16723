use tracing::debug;

use crate::config::MAX_CONTEXT_CHARS;
use crate::search::{RetrievalParams, RetrievalResult, SearchBackend};

/// Runs retrieval for one question with the run's uniform parameters and
/// caps the context handed to the responder.
pub struct ContextBuilder<'a, B> {
    backend: &'a B,
    params: &'a RetrievalParams,
}

impl<'a, B: SearchBackend> ContextBuilder<'a, B> {
    pub fn new(backend: &'a B, params: &'a RetrievalParams) -> Self {
        Self { backend, params }
    }

    pub async fn build(&self, query: &str) -> RetrievalResult {
        let mut result = self.backend.retrieve(query, self.params).await;
        let chars = result.context.chars().count();
        if chars > MAX_CONTEXT_CHARS {
            debug!(chars, limit = MAX_CONTEXT_CHARS, "truncating context");
            truncate_chars(&mut result.context, MAX_CONTEXT_CHARS);
        }
        result
    }
}

/// Cuts `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &mut String, max: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max) {
        text.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(String);

    impl SearchBackend for FixedBackend {
        async fn retrieve(&self, _query: &str, _params: &RetrievalParams) -> RetrievalResult {
            RetrievalResult {
                context: self.0.clone(),
                used_links: vec!["https://example.com".to_string()],
            }
        }
    }

    fn params() -> RetrievalParams {
        RetrievalParams {
            page_budget: 1,
            link_budget: 1,
            skip_domains: Vec::new(),
        }
    }

    #[tokio::test]
    async fn oversized_context_is_cut_to_limit() {
        let backend = FixedBackend("x".repeat(MAX_CONTEXT_CHARS + 500));
        let params = params();

        let result = ContextBuilder::new(&backend, &params).build("q").await;

        assert_eq!(result.context.chars().count(), MAX_CONTEXT_CHARS);
        assert_eq!(result.used_links.len(), 1);
    }

    #[tokio::test]
    async fn short_context_is_untouched() {
        let backend = FixedBackend("short".to_string());
        let params = params();

        let result = ContextBuilder::new(&backend, &params).build("q").await;

        assert_eq!(result.context, "short");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let mut text = "héllo wörld".to_string();
        truncate_chars(&mut text, 4);
        assert_eq!(text, "héll");

        let mut short = "ab".to_string();
        truncate_chars(&mut short, 5);
        assert_eq!(short, "ab");
    }
}
