use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing site a record was scraped from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Kufar,
    Domovita,
    Realt,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Kufar, Source::Domovita, Source::Realt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Kufar => "kufar",
            Source::Domovita => "domovita",
            Source::Realt => "realt",
        }
    }

    /// Origin used to absolutize relative links found on the site.
    pub fn base_url(&self) -> &'static str {
        match self {
            Source::Kufar => "https://re.kufar.by",
            Source::Domovita => "https://domovita.by",
            Source::Realt => "https://realt.by",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kufar" => Ok(Source::Kufar),
            "domovita" => Ok(Source::Domovita),
            "realt" => Ok(Source::Realt),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Listing {
    pub source: Source,
    /// Unique only within `source`.
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub price: Option<String>,
    pub location: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn new(source: Source, id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source,
            id: id.into(),
            url: url.into(),
            title: None,
            price: None,
            location: None,
            created_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// A configured query: which site to scrape and with which search URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceQuery {
    pub source: Source,
    pub url: String,
}
