use std::time::Duration;

use async_trait::async_trait;

use crate::config::ScraperConfig;
use crate::extraction::email::ContactEmailFinder;
use crate::extraction::fields::{Field, clean_text};
use crate::extraction::{ExtractionResult, ExtractionStrategy};
use crate::models::BusinessRecord;
use crate::orchestration::TaskCancellationToken;

pub const RESULTS_REGION_SELECTOR: &str = r#"[role="main"]"#;
pub const RESULT_ITEM_SELECTOR: &str = "[data-result-index]";

/// Pause after the results region appears, before listings are counted.
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// How a field is read from the active listing's detail panel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Probe {
    Text(&'static str),
    Attribute(&'static str, &'static str),
}

const NAME_PROBES: &[Probe] = &[
    Probe::Text(r#"h1[data-attrid="title"]"#),
    Probe::Text(r#"[data-section-id="overview"] h1"#),
];
const ADDRESS_PROBES: &[Probe] = &[Probe::Text(r#"[data-item-id="address"]"#)];
const PHONE_PROBES: &[Probe] = &[Probe::Text(r#"[data-item-id="phone:tel:"]"#)];
const WEBSITE_PROBES: &[Probe] = &[Probe::Attribute(r#"[data-item-id="authority"]"#, "href")];
const RATING_PROBES: &[Probe] = &[Probe::Text(r#"[data-value="Formatted rating"]"#)];
const CATEGORY_PROBES: &[Probe] = &[Probe::Text(
    r#"[data-section-id="overview"] button[jsaction*="category"]"#,
)];

/// The handful of page operations the maps strategy needs from a browser.
/// Selector misses surface as `Ok(None)` from `text` and `attribute`.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> ExtractionResult<()>;

    /// Fails with `Timeout` when `selector` does not appear within `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> ExtractionResult<()>;

    async fn count(&self, selector: &str) -> ExtractionResult<usize>;

    /// Clicks the `index`th element matching `selector`.
    async fn activate(&self, selector: &str, index: usize) -> ExtractionResult<()>;

    async fn text(&self, selector: &str) -> ExtractionResult<Option<String>>;

    async fn attribute(&self, selector: &str, name: &str) -> ExtractionResult<Option<String>>;

    async fn close(&mut self) -> ExtractionResult<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct BrowserSettings {
    pub search_url: String,
    pub max_results: usize,
    pub scraping_delay: Duration,
    pub results_wait_timeout: Duration,
    pub settle_delay: Duration,
}

impl BrowserSettings {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            search_url: config.maps_search_url.clone(),
            max_results: config.max_results_per_task,
            scraping_delay: config.scraping_delay,
            results_wait_timeout: config.results_wait_timeout,
            settle_delay: SETTLE_DELAY,
        }
    }
}

pub struct BrowserAutomationStrategy<S> {
    session: S,
    settings: BrowserSettings,
    emails: Option<ContactEmailFinder>,
    closed: bool,
}

impl<S: BrowserSession> BrowserAutomationStrategy<S> {
    pub fn new(session: S, settings: BrowserSettings, emails: Option<ContactEmailFinder>) -> Self {
        Self {
            session,
            settings,
            emails,
            closed: false,
        }
    }

    async fn scrape_listing(
        &self,
        index: usize,
        cancel: &TaskCancellationToken,
    ) -> ExtractionResult<BusinessRecord> {
        self.session.activate(RESULT_ITEM_SELECTOR, index).await?;
        cancel.sleep(self.settings.scraping_delay).await?;

        let mut record = BusinessRecord {
            name: self.resolve(Field::Name, NAME_PROBES).await,
            address: self.resolve(Field::Address, ADDRESS_PROBES).await,
            phone: self.resolve(Field::Phone, PHONE_PROBES).await,
            website: self.resolve(Field::Website, WEBSITE_PROBES).await,
            rating: self.resolve(Field::Rating, RATING_PROBES).await,
            category: self.resolve(Field::Category, CATEGORY_PROBES).await,
            ..BusinessRecord::default()
        };

        if let Some(emails) = &self.emails
            && !record.website.is_empty()
        {
            record.email = emails.find_email(&record.website, cancel).await;
        }
        Ok(record)
    }

    /// Tries each probe in order; errors count as misses.
    async fn resolve(&self, field: Field, probes: &[Probe]) -> String {
        for probe in probes {
            let found = match *probe {
                Probe::Text(selector) => self.session.text(selector).await,
                Probe::Attribute(selector, name) => self.session.attribute(selector, name).await,
            };
            match found {
                Ok(Some(raw)) => {
                    let value = clean_text(&raw);
                    if !value.is_empty() {
                        return value;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!(field = field.as_str(), error = %error.message, "field probe failed");
                }
            }
        }
        field.default_value().to_string()
    }
}

#[async_trait]
impl<S: BrowserSession> ExtractionStrategy for BrowserAutomationStrategy<S> {
    async fn scrape(
        &mut self,
        keyword: &str,
        location: &str,
        cancel: &TaskCancellationToken,
    ) -> ExtractionResult<Vec<BusinessRecord>> {
        cancel.ensure_active()?;
        let url = maps_search_url(&self.settings.search_url, keyword, location);
        tracing::info!(%url, keyword, location, "scraping maps search");

        cancel.run_until_cancelled(self.session.navigate(&url)).await??;
        cancel
            .run_until_cancelled(
                self.session
                    .wait_for(RESULTS_REGION_SELECTOR, self.settings.results_wait_timeout),
            )
            .await??;
        cancel.sleep(self.settings.settle_delay).await?;

        let available = self.session.count(RESULT_ITEM_SELECTOR).await?;
        let limit = available.min(self.settings.max_results);
        let mut records = Vec::with_capacity(limit);

        for index in 0..limit {
            cancel.ensure_active()?;
            match self.scrape_listing(index, cancel).await {
                Ok(record) => {
                    tracing::info!(index, name = %record.name, "scraped listing");
                    records.push(record);
                }
                Err(error) if error.is_cancelled() => return Err(error),
                Err(error) => {
                    tracing::warn!(index, error = %error.message, "skipping listing");
                }
            }
        }

        tracing::info!(count = records.len(), "scraped maps listings");
        Ok(records)
    }

    async fn close(&mut self) -> ExtractionResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.session.close().await
    }
}

/// `{base}{keyword in location}` with the query percent-encoded and spaces as `+`.
pub fn maps_search_url(base: &str, keyword: &str, location: &str) -> String {
    let query = format!("{} in {}", keyword.trim(), location.trim());
    let encoded = urlencoding::encode(&query).replace("%20", "+");
    format!("{base}{encoded}")
}

#[cfg(test)]
mod tests {
    use super::maps_search_url;

    #[test]
    fn maps_url_encodes_query() {
        assert_eq!(
            maps_search_url("https://www.google.com/maps/search/", "pizza & pasta", "New York"),
            "https://www.google.com/maps/search/pizza+%26+pasta+in+New+York"
        );
    }
}
