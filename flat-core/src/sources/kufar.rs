use crate::error::FetchError;
use crate::listing::{Listing, Source};

use super::{last_path_segment, parse_cards, SiteLayout};

const LAYOUT: SiteLayout = SiteLayout {
    source: Source::Kufar,
    anchors: &["a[data-name='adLink'], a.SerpItem_link__", "a[href*='/item/']"],
    price: "[data-name='price']",
    location: "[data-name='location']",
    dedup_hrefs: false,
    normalize_price: false,
    extract_id,
};

// Item links end in /item/{id}.
fn extract_id(url: &str) -> String {
    last_path_segment(url).to_string()
}

pub fn parse_html(html: &str) -> Result<Vec<Listing>, FetchError> {
    parse_cards(html, &LAYOUT)
}
