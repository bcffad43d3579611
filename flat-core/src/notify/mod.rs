pub mod commands;
pub mod telegram;

use std::time::Duration;

use async_trait::async_trait;

use crate::listing::Listing;

/// Where cycle results go. Delivery problems stay inside the sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn broadcast(&self, listings: &[Listing]);
    async fn notify_no_updates(&self, empty_cycles: u64);
}

pub fn format_listing_message(listing: &Listing) -> String {
    let mut lines = vec![format!("Source: {}", listing.source)];
    if let Some(title) = &listing.title {
        lines.push(format!("Title: {title}"));
    }
    if let Some(price) = &listing.price {
        lines.push(format!("Price: {price}"));
    }
    if let Some(location) = &listing.location {
        lines.push(format!("Location: {location}"));
    }
    lines.push(format!("URL: {}", listing.url));
    lines.join("\n")
}

pub fn format_no_updates_message(empty_cycles: u64, interval: Duration) -> String {
    format!(
        "No new listings in the last {empty_cycles} cycles ({} s each).",
        interval.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Source;

    #[test]
    fn skips_missing_fields() {
        let listing = Listing::new(Source::Realt, "1", "https://realt.by/rent/flat-for-long/object/1/")
            .with_price("300 $");
        assert_eq!(
            format_listing_message(&listing),
            "Source: realt\nPrice: 300 $\nURL: https://realt.by/rent/flat-for-long/object/1/"
        );
    }

    #[test]
    fn lists_every_known_field_in_order() {
        let listing = Listing::new(Source::Kufar, "9", "https://re.kufar.by/vi/9")
            .with_title("2-room flat")
            .with_price("450 $")
            .with_location("Minsk, Uruchye");
        assert_eq!(
            format_listing_message(&listing),
            "Source: kufar\nTitle: 2-room flat\nPrice: 450 $\nLocation: Minsk, Uruchye\nURL: https://re.kufar.by/vi/9"
        );
    }

    #[test]
    fn heartbeat_names_count_and_interval() {
        assert_eq!(
            format_no_updates_message(10, Duration::from_secs(60)),
            "No new listings in the last 10 cycles (60 s each)."
        );
    }
}
