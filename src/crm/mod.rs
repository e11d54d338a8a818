//! CRM client (v4-style JSON API, bearer token).
//!
//! One module per resource; each owns its private wire types and exposes a
//! `fetch_*` returning normalized rows. List endpoints share the envelope
//! `{ _embedded: { <resource>: [...] }, _links: { next: { href } } }`; an
//! HTTP 204 stands for an empty page and ends pagination.

pub mod calls;
pub mod catalog;
pub mod leads;

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::config::CrmConfig;
use crate::http::{send_with_retry, RetryPolicy};

/// Pagination links on every list envelope. Only presence of `next` matters.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Links {
    #[serde(default)]
    pub(crate) next: Option<serde_json::Value>,
}

/// Records per page on list endpoints.
pub const PAGE_LIMIT: u32 = 250;

/// Hard stop for runaway pagination (50k records at the page limit).
const MAX_PAGES: u32 = 200;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("CRM token rejected")]
    AuthExpired,
    #[error("CRM API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl CrmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::AuthExpired => false,
            Self::Api { status, .. } => matches!(status, 408 | 429) || *status >= 500,
        }
    }
}

pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    retry: RetryPolicy,
    pub pipeline_id: Option<i64>,
}

impl CrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            retry: RetryPolicy::default(),
            pipeline_id: config.pipeline_id,
        })
    }

    /// GET a JSON document. `Ok(None)` means the endpoint answered 204.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Option<T>, CrmError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = send_with_retry(
            self.http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(query),
            &self.retry,
        )
        .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CrmError::AuthExpired);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CrmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Some(resp.json::<T>().await?))
    }
}

/// One page of a list endpoint after envelope unwrapping.
pub struct PageOf<T> {
    pub items: Vec<T>,
    pub has_next: bool,
}

impl<T> PageOf<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            has_next: false,
        }
    }
}

/// Accumulate every page in source order. Page N+1 is requested only after
/// page N arrived; the first failed page fails the whole fetch.
pub async fn paginate<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>, CrmError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PageOf<T>, CrmError>>,
{
    let mut all = Vec::new();
    let mut page = 1u32;
    loop {
        let batch = fetch_page(page).await?;
        let fetched = batch.items.len();
        all.extend(batch.items);

        if !batch.has_next || fetched == 0 {
            return Ok(all);
        }
        page += 1;
        if page > MAX_PAGES {
            log::warn!("pagination stopped at {} pages, keeping partial set", MAX_PAGES);
            return Ok(all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paginate_accumulates_all_pages_in_order() {
        let fetch = |page: u32| {
            let items: Vec<(u32, u32)> = match page {
                1 => (0..250).map(|i| (1, i)).collect(),
                2 => (0..250).map(|i| (2, i)).collect(),
                3 => (0..10).map(|i| (3, i)).collect(),
                _ => panic!("page {} requested past the end", page),
            };
            let has_next = page < 3;
            async move { Ok(PageOf { items, has_next }) }
        };

        let rows = paginate(fetch).await.unwrap();
        assert_eq!(rows.len(), 510);
        assert_eq!(rows[0], (1, 0));
        assert_eq!(rows[249], (1, 249));
        assert_eq!(rows[250], (2, 0));
        assert_eq!(rows[509], (3, 9));

        let mut seen = std::collections::HashSet::new();
        assert!(rows.iter().all(|row| seen.insert(*row)), "duplicate rows");
    }

    #[tokio::test]
    async fn paginate_single_page_stops() {
        let rows = paginate(|_page| async move { Ok(PageOf::last(vec![1, 2, 3])) })
            .await
            .unwrap();
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn paginate_propagates_page_error() {
        let fetch = |page: u32| async move {
            if page == 1 {
                Ok(PageOf {
                    items: vec![1],
                    has_next: true,
                })
            } else {
                Err(CrmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                })
            }
        };
        let err = paginate(fetch).await.unwrap_err();
        assert!(matches!(err, CrmError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn paginate_treats_empty_page_as_end() {
        // A server that keeps advertising a next link but returns nothing
        // must not loop forever.
        let fetch = |page: u32| {
            let items: Vec<i32> = if page == 1 { vec![7] } else { Vec::new() };
            async move {
                Ok(PageOf {
                    items,
                    has_next: true,
                })
            }
        };
        let rows = paginate(fetch).await.unwrap();
        assert_eq!(rows, vec![7]);
    }

    #[test]
    fn api_error_retryability() {
        let rate_limited = CrmError::Api {
            status: 429,
            message: String::new(),
        };
        assert!(rate_limited.is_retryable());

        let server = CrmError::Api {
            status: 502,
            message: String::new(),
        };
        assert!(server.is_retryable());

        let bad_request = CrmError::Api {
            status: 400,
            message: String::new(),
        };
        assert!(!bad_request.is_retryable());
        assert!(!CrmError::AuthExpired.is_retryable());
    }
}
