//! Shared types and paging infrastructure for the Google API client.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_stream::Stream;

type NextPage<'a, F, T> =
    Pin<Box<dyn Future<Output = eyre::Result<(F, (VecDeque<T>, Option<String>))>> + 'a + Send>>;

/// A stream over every item of a paginated Google list endpoint.
///
/// `fetcher` is called with `None` for the first page and with the previous page's
/// `nextPageToken` for every page after that. Items are yielded in the order the service
/// returned them. An error ends the stream.
pub struct PagedStream<'a, T, F> {
    buffered: VecDeque<T>,
    next_page: Option<NextPage<'a, F, T>>,
}

impl<'a, T, F> PagedStream<'a, T, F> {
    pub fn new<Fut>(fetcher: F) -> Self
    where
        F: Fn(Option<String>) -> Fut,
        F: Send + 'a,
        Fut: Future<Output = eyre::Result<(VecDeque<T>, Option<String>)>> + Send + 'a,
    {
        let first_page = async move {
            let page = fetcher(None).await?;
            Ok((fetcher, page))
        };
        Self {
            buffered: VecDeque::new(),
            next_page: Some(Box::pin(first_page)),
        }
    }
}

impl<T: Unpin, F> Unpin for PagedStream<'_, T, F> {}

impl<'a, T: Unpin, F, Fut> Stream for PagedStream<'a, T, F>
where
    F: Fn(Option<String>) -> Fut,
    F: Send + 'a,
    Fut: Future<Output = eyre::Result<(VecDeque<T>, Option<String>)>> + Send + 'a,
{
    type Item = eyre::Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            let Some(pending) = self.next_page.as_mut() else {
                return Poll::Ready(None);
            };

            match pending.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => {
                    self.next_page = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Ok((fetcher, (items, token)))) => {
                    self.buffered.extend(items);
                    // the following page is only requested once this one has been drained
                    self.next_page = token.map(|token| {
                        Box::pin(async move {
                            let page = fetcher(Some(token)).await?;
                            Ok((fetcher, page))
                        }) as NextPage<'a, F, T>
                    });
                }
            }
        }
    }
}

/// Paging details for lists of resources.
///
/// See: <https://developers.google.com/youtube/v3/docs/pageInfo>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(rename = "totalResults")]
    pub total_results: u32,
    #[serde(rename = "resultsPerPage")]
    pub results_per_page: u32,
}

/// A list response page that came back without its `items` array.
#[derive(Debug, thiserror::Error)]
#[error("{resource} response has no items")]
pub struct MissingItems {
    pub resource: &'static str,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn follows_page_tokens_in_order() {
        let requested = Mutex::new(Vec::new());
        let pages = PagedStream::new(|token: Option<String>| {
            requested.lock().unwrap().push(token.clone());
            async move {
                Ok(match token.as_deref() {
                    None => (VecDeque::from([1, 2]), Some("p2".to_string())),
                    Some("p2") => (VecDeque::new(), Some("p3".to_string())),
                    Some("p3") => (VecDeque::from([3]), None),
                    Some(other) => eyre::bail!("unexpected page token {other}"),
                })
            }
        });

        let items: Vec<u32> = pages.collect::<eyre::Result<_>>().await.unwrap();
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(
            *requested.lock().unwrap(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
    }

    #[tokio::test]
    async fn error_ends_the_stream() {
        let pages = PagedStream::new(|token: Option<String>| async move {
            match token {
                None => Ok((VecDeque::from(["a"]), Some("next".to_string()))),
                Some(_) => Err(eyre::eyre!("quota exceeded")),
            }
        });
        let mut pages = std::pin::pin!(pages);

        assert_eq!(pages.next().await.unwrap().unwrap(), "a");
        assert!(pages.next().await.unwrap().is_err());
        assert!(pages.next().await.is_none());
    }
}
