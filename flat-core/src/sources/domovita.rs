use crate::error::FetchError;
use crate::listing::{Listing, Source};

use super::{parse_cards, SiteLayout};

const LAYOUT: SiteLayout = SiteLayout {
    source: Source::Domovita,
    anchors: &["a[href*='/rent/']"],
    price: "[class*='price'], [data-qa='price']",
    location: "[class*='address'], [data-qa='address']",
    dedup_hrefs: true,
    normalize_price: true,
    extract_id,
};

// Links look like /minsk/flats/rent/{slug}-{id}.
fn extract_id(url: &str) -> String {
    let tail = url.rsplit('-').next().unwrap_or(url);
    tail.trim_matches('/').to_string()
}

pub fn parse_html(html: &str) -> Result<Vec<Listing>, FetchError> {
    parse_cards(html, &LAYOUT)
}
