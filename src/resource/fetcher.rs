//! Resource Fetcher
//!
//! Walks server-paginated listings. [`paginate`] yields items lazily so a caller can fold
//! or stop early; [`collect_all`] materializes the complete sequence or nothing.

use super::Page;
use crate::error::{ApiError, PageError, RunError};
use futures::stream::{self, Stream, TryStreamExt};
use std::future::Future;

/// Walk state: the token for the next request, or `None` once the server stopped
/// handing out continuation tokens.
struct Cursor<F> {
    fetch: F,
    next: Option<Option<String>>,
    page: usize,
}

/// Lazily walk a paginated listing
///
/// `fetch` is called with `None` for the first page and with the server's continuation
/// token afterwards. The walk ends on the first page without a token (an empty token
/// string counts as none). There is no page limit. The first failing page ends the
/// stream with a [`PageError`].
pub fn paginate<'a, T, F, Fut>(fetch: F) -> impl Stream<Item = Result<T, PageError>> + 'a
where
    T: 'a,
    F: FnMut(Option<String>) -> Fut + 'a,
    Fut: Future<Output = Result<Page<T>, ApiError>> + 'a,
{
    let cursor = Cursor {
        fetch,
        next: Some(None),
        page: 0,
    };

    stream::try_unfold(cursor, |mut cursor| async move {
        let Some(token) = cursor.next.take() else {
            return Ok::<_, PageError>(None);
        };
        cursor.page += 1;

        let page = match (cursor.fetch)(token).await {
            Ok(page) => page,
            Err(source) => {
                return Err(PageError {
                    page: cursor.page,
                    source,
                })
            }
        };

        tracing::trace!(page = cursor.page, items = page.items.len(), "Fetched page");

        cursor.next = page.next_token.filter(|t| !t.is_empty()).map(Some);
        Ok(Some((page.items, cursor)))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok::<T, PageError>)))
    .try_flatten()
}

/// Fetch all items of a listing (auto-paginate)
///
/// A failure on any page discards what was already collected; the caller never sees a
/// truncated sequence.
pub async fn collect_all<T, F, Fut>(listing: &str, fetch: F) -> Result<Vec<T>, RunError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let items: Vec<T> = paginate(fetch)
        .try_collect()
        .await
        .map_err(|source| RunError::PartialPage {
            listing: listing.to_string(),
            source,
        })?;

    tracing::debug!(listing, count = items.len(), "Listing complete");
    Ok(items)
}
