pub mod browser;
pub mod chromium;
pub mod email;
pub mod factory;
pub mod fetch;
pub mod fields;
pub mod static_html;

pub use browser::{BrowserAutomationStrategy, BrowserSession, BrowserSettings};
pub use chromium::ChromiumSession;
pub use email::ContactEmailFinder;
pub use factory::{ScraperFactory, StrategyFactory};
pub use fetch::{BROWSER_USER_AGENT, FetchResult, FetchedPage, PageFetcher, ReqwestPageFetcher};
pub use fields::{Field, clean_text, extract_email, resolve_field};
pub use static_html::{StaticHtmlSettings, StaticHtmlStrategy};

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use async_trait::async_trait;

use crate::models::{BusinessRecord, CoreError, CoreErrorKind};
use crate::orchestration::TaskCancellationToken;

pub type ExtractionResult<T> = Result<T, CoreError>;

/// A pluggable way of turning a (keyword, location) search into listings.
#[async_trait]
pub trait ExtractionStrategy: Send {
    /// Returns at most the configured number of records, in source order.
    /// Fails only when the search as a whole cannot be performed.
    async fn scrape(
        &mut self,
        keyword: &str,
        location: &str,
        cancel: &TaskCancellationToken,
    ) -> ExtractionResult<Vec<BusinessRecord>>;

    /// Releases sessions and connections. Safe to call more than once.
    async fn close(&mut self) -> ExtractionResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StrategyKind {
    GoogleMaps,
    Yelp,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 2] = [StrategyKind::GoogleMaps, StrategyKind::Yelp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleMaps => "google_maps",
            Self::Yelp => "yelp",
        }
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| {
                let available = Self::ALL.map(StrategyKind::as_str).join(", ");
                CoreError::new(
                    CoreErrorKind::UnsupportedStrategy,
                    format!("unknown strategy '{value}'; available: {available}"),
                )
            })
    }
}
