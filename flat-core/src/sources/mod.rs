//! Source fetchers: download a site's search page and turn its listing cards
//! into [`Listing`] records.
//!
//! The parsers are plain CSS-selector heuristics over server-rendered HTML.
//! Pages that only render client-side simply yield no cards.

pub mod domovita;
pub mod kufar;
pub mod price;
pub mod realt;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::listing::{Listing, Source, SourceQuery};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> Source;
    async fn fetch(&self) -> Result<Vec<Listing>, FetchError>;
}

/// HTTP client shared by all fetchers. `timeout` bounds every request; an
/// expired request surfaces as [`FetchError::Network`].
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
}

pub struct HtmlFetcher {
    query: SourceQuery,
    client: Client,
}

impl HtmlFetcher {
    pub fn new(query: SourceQuery, client: Client) -> Self {
        Self { query, client }
    }

    pub fn url(&self) -> &str {
        &self.query.url
    }
}

#[async_trait]
impl SourceFetcher for HtmlFetcher {
    fn source(&self) -> Source {
        self.query.source
    }

    async fn fetch(&self) -> Result<Vec<Listing>, FetchError> {
        let response = self.client.get(&self.query.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.query.url.clone(),
            });
        }
        let body = response.text().await?;
        let listings = parse_page(self.query.source, &body)?;
        debug!(source = %self.query.source, count = listings.len(), "parsed listing page");
        Ok(listings)
    }
}

pub fn parse_page(source: Source, html: &str) -> Result<Vec<Listing>, FetchError> {
    match source {
        Source::Kufar => kufar::parse_html(html),
        Source::Domovita => domovita::parse_html(html),
        Source::Realt => realt::parse_html(html),
    }
}

/// Where a site keeps the pieces of a listing card.
pub(crate) struct SiteLayout {
    pub source: Source,
    /// Tried in order; the first selector matching anything wins.
    pub anchors: &'static [&'static str],
    pub price: &'static str,
    pub location: &'static str,
    pub dedup_hrefs: bool,
    pub normalize_price: bool,
    pub extract_id: fn(&str) -> String,
}

pub(crate) fn parse_cards(html: &str, layout: &SiteLayout) -> Result<Vec<Listing>, FetchError> {
    let document = Html::parse_document(html);
    let base = Url::parse(layout.source.base_url())?;
    let price_sel = selector(layout.price)?;
    let location_sel = selector(layout.location)?;
    let time_sel = selector("time[datetime]")?;

    let mut anchors = Vec::new();
    for css in layout.anchors {
        let sel = selector(css)?;
        anchors = document.select(&sel).collect::<Vec<_>>();
        if !anchors.is_empty() {
            break;
        }
    }

    let mut seen_hrefs = HashSet::new();
    let mut out = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.is_empty() {
            continue;
        }
        if layout.dedup_hrefs && !seen_hrefs.insert(href.to_string()) {
            continue;
        }
        let url = base.join(href)?.to_string();
        let mut listing = Listing::new(layout.source, (layout.extract_id)(&url), url);
        listing.title = element_text(anchor);

        if let Some(parent) = anchor.parent().and_then(ElementRef::wrap) {
            let raw_price = first_text(parent, &price_sel);
            listing.price = if layout.normalize_price {
                raw_price.and_then(|p| price::normalize_price(&p))
            } else {
                raw_price
            };
            listing.location = first_text(parent, &location_sel);
            listing.created_at = parent
                .select(&time_sel)
                .find_map(|el| el.value().attr("datetime").and_then(parse_listing_date));
        }
        out.push(listing);
    }
    Ok(out)
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("selector {css}: {e}")))
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = el
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).find_map(element_text)
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_listing_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Last non-empty path segment, without query string.
pub(crate) fn last_path_segment(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').find(|p| !p.is_empty()).unwrap_or(path)
}
