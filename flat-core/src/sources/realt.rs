use crate::error::FetchError;
use crate::listing::{Listing, Source};

use super::{last_path_segment, parse_cards, SiteLayout};

const LAYOUT: SiteLayout = SiteLayout {
    source: Source::Realt,
    anchors: &["a[href*='/rent/flat-for-long/']", "a.card-btn"],
    price: "[class*='price'], [data-price]",
    location: "[class*='address'], [data-address]",
    dedup_hrefs: true,
    normalize_price: true,
    extract_id,
};

// The numeric object id is the last path segment; keep the segment when it has no digits.
fn extract_id(url: &str) -> String {
    let last = last_path_segment(url);
    let digits: String = last.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        last.to_string()
    } else {
        digits
    }
}

pub fn parse_html(html: &str) -> Result<Vec<Listing>, FetchError> {
    parse_cards(html, &LAYOUT)
}
