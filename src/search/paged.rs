use tracing::{debug, warn};

use super::{Harvest, RetrievalParams, RetrievalResult, SearchError, is_retriable};
use crate::fetch::PageFetcher;
use crate::retry::{RetryPolicy, with_retry};

/// One page of candidate links from a keyed search API.
pub(super) trait PagedSearch {
    const NAME: &'static str;

    /// `page` is zero-based.
    async fn search_page(&self, query: &str, page: u32) -> Result<Vec<String>, SearchError>;
}

/// Walks result pages until the link budget is met, the page budget is spent,
/// or the API runs dry. A page that keeps failing after retries ends the walk;
/// links gathered from earlier pages are kept.
pub(super) async fn retrieve_paged<P: PagedSearch>(
    api: &P,
    fetcher: &PageFetcher,
    retry: &RetryPolicy,
    query: &str,
    params: &RetrievalParams,
) -> RetrievalResult {
    let mut harvest = Harvest::new(fetcher, params);

    for page in 0..params.page_budget {
        if harvest.is_full() {
            break;
        }
        let candidates = match with_retry(retry, P::NAME, is_retriable, || {
            api.search_page(query, page)
        })
        .await
        {
            Ok(links) => links,
            Err(e) => {
                warn!(backend = P::NAME, page, error = %e, "search failed after retries");
                break;
            }
        };
        if candidates.is_empty() {
            debug!(backend = P::NAME, page, "no further results");
            break;
        }
        debug!(backend = P::NAME, page, candidates = candidates.len(), "search page");
        harvest.offer(candidates).await;
    }

    harvest.finish()
}
