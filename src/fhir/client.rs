/// FHIR REST client for paged patient searches
///
/// Follows `Bundle.link[relation=next]` until the server stops advertising one.
/// A `next` link back to a page already fetched ends the search with an error.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::Url;

use crate::error::FetchError;
use crate::fhir::bundle::Bundle;
use crate::record::Record;
use crate::source::{RecordQuery, RecordSource, RecordStream};

pub const FHIR_JSON: &str = "application/fhir+json";

#[derive(Clone)]
pub struct FhirConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub page_size: u32,
    pub timeout: Duration,
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            bearer_token: None,
            page_size: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for FhirConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirConfig")
            .field("base_url", &self.base_url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct FhirClient {
    http: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
    page_size: u32,
}

impl FhirClient {
    /// Build a client for the configured FHIR base URL
    pub fn new(config: FhirConfig) -> Result<Self, FetchError> {
        let base_url = parse_base_url(&config.base_url)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("fhirlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Transport {
                url: config.base_url.clone(),
                source,
            })?;

        tracing::info!("FHIR client configured for {}", base_url);

        Ok(Self {
            http,
            base_url,
            bearer_token: config.bearer_token,
            page_size: config.page_size,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the first search page for a query
    pub fn search_url(&self, query: &RecordQuery) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(&query.resource_type)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", query.resource_type, e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            if query.require_links {
                pairs.append_pair("link:missing", "false");
            }
            if !query.elements.is_empty() {
                pairs.append_pair("_elements", &query.elements.join(","));
            }
            let page_size = query.page_size.unwrap_or(self.page_size);
            if page_size > 0 {
                pairs.append_pair("_count", &page_size.to_string());
            }
        }

        Ok(url)
    }

    /// Fetch and decode a single bundle page
    pub async fn fetch_page(&self, url: &Url) -> Result<Bundle, FetchError> {
        let mut request = self.http.get(url.clone()).header(ACCEPT, FHIR_JSON);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Resolve a `next` link, which servers may send relative to the base
    fn resolve_next(&self, next: &str) -> Result<Url, FetchError> {
        Url::parse(next)
            .or_else(|_| self.base_url.join(next))
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", next, e)))
    }

    /// Fetch the page under the cursor and advance it to the following page
    async fn next_page(
        &self,
        mut cursor: PageCursor,
    ) -> Result<Option<(Vec<Record>, PageCursor)>, FetchError> {
        let Some(url) = cursor.next.take() else {
            return Ok(None);
        };

        if !cursor.fetched.insert(url.clone()) {
            tracing::warn!("Search paging returned to {}, aborting", url);
            return Err(FetchError::PagingLoop {
                url: url.to_string(),
            });
        }

        let bundle = self.fetch_page(&url).await?;
        cursor.next = match bundle.next_link() {
            Some(link) => Some(self.resolve_next(link)?),
            None => None,
        };

        let records = bundle.into_records();
        tracing::debug!("Fetched {} records from {}", records.len(), url);

        Ok(Some((records, cursor)))
    }
}

impl RecordSource for FhirClient {
    fn search<'a>(&'a self, query: &'a RecordQuery) -> RecordStream<'a> {
        let first = match self.search_url(query) {
            Ok(url) => url,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        stream::try_unfold(PageCursor::start(first), move |cursor| self.next_page(cursor))
            .map_ok(|records| stream::iter(records.into_iter().map(Ok::<Record, FetchError>)))
            .try_flatten()
            .boxed()
    }
}

/// Paging position within one search
struct PageCursor {
    next: Option<Url>,
    fetched: HashSet<Url>,
}

impl PageCursor {
    fn start(first: Url) -> Self {
        Self {
            next: Some(first),
            fetched: HashSet::new(),
        }
    }
}

/// Base URLs are joined against, so they need a trailing slash
fn parse_base_url(raw: &str) -> Result<Url, FetchError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };

    Url::parse(&normalized).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))
}
