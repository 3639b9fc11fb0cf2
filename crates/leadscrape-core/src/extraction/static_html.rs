use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::ScraperConfig;
use crate::extraction::fetch::PageFetcher;
use crate::extraction::fields::{Field, clean_text, resolve_field};
use crate::extraction::{ExtractionResult, ExtractionStrategy};
use crate::models::{BusinessRecord, CoreError, CoreErrorKind};
use crate::orchestration::TaskCancellationToken;

const LISTING_SELECTOR: &str = r#"div[data-testid="serp-ia-card"]"#;

static RATING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.?\d*)\s*star").expect("rating pattern is a valid regex")
});

type CardRule = for<'a> fn(ElementRef<'a>) -> Option<String>;

const NAME_RULES: [CardRule; 2] = [business_name_link, heading_link];
const ADDRESS_RULES: [CardRule; 2] = [numbered_paragraph, address_element];
const RATING_RULES: [CardRule; 2] = [star_image_label, star_label_anywhere];
const CATEGORY_RULES: [CardRule; 1] = [category_spans];

#[derive(Clone, Debug, PartialEq)]
pub struct StaticHtmlSettings {
    pub search_url: String,
    pub max_results: usize,
    pub request_timeout: Option<Duration>,
}

impl StaticHtmlSettings {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            search_url: config.static_search_url.clone(),
            max_results: config.max_results_per_task,
            request_timeout: Some(config.website_timeout),
        }
    }
}

/// Single GET against a directory search page, then per-card field rules.
pub struct StaticHtmlStrategy {
    fetcher: Arc<dyn PageFetcher>,
    settings: StaticHtmlSettings,
}

impl StaticHtmlStrategy {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: StaticHtmlSettings) -> Self {
        Self { fetcher, settings }
    }
}

#[async_trait]
impl ExtractionStrategy for StaticHtmlStrategy {
    async fn scrape(
        &mut self,
        keyword: &str,
        location: &str,
        cancel: &TaskCancellationToken,
    ) -> ExtractionResult<Vec<BusinessRecord>> {
        cancel.ensure_active()?;
        let url = search_url(&self.settings.search_url, keyword, location)?;
        tracing::info!(%url, keyword, location, "scraping directory search page");

        let fetched = cancel
            .run_until_cancelled(
                self.fetcher
                    .fetch(url.as_str(), self.settings.request_timeout),
            )
            .await?;
        let page = match fetched {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(%url, error = %error.message, "directory search request failed");
                return Ok(Vec::new());
            }
        };
        if !page.is_success() {
            tracing::error!(%url, status = page.status, "directory search returned a non-success status");
            return Ok(Vec::new());
        }

        let records = parse_listings(&page.body, self.settings.max_results, cancel)?;
        tracing::info!(count = records.len(), "scraped directory listings");
        Ok(records)
    }
}

fn search_url(base: &str, keyword: &str, location: &str) -> ExtractionResult<Url> {
    Url::parse_with_params(base, &[("find_desc", keyword), ("find_loc", location)]).map_err(
        |error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid directory search url '{base}': {error}"),
            )
        },
    )
}

/// Extracts up to `max_results` listing cards from a search results document.
/// Cards that yield nothing are logged and skipped.
pub fn parse_listings(
    body: &str,
    max_results: usize,
    cancel: &TaskCancellationToken,
) -> ExtractionResult<Vec<BusinessRecord>> {
    let document = Html::parse_document(body);
    let listing = Selector::parse(LISTING_SELECTOR).map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("invalid listing selector: {error:?}"),
        )
    })?;

    let mut records = Vec::new();
    for (index, card) in document.select(&listing).take(max_results).enumerate() {
        cancel.ensure_active()?;
        match extract_listing(card) {
            Ok(record) => {
                tracing::debug!(index, name = %record.name, "extracted listing");
                records.push(record);
            }
            Err(error) => {
                tracing::warn!(index, error = %error.message, "skipping listing");
            }
        }
    }
    Ok(records)
}

fn extract_listing(card: ElementRef<'_>) -> ExtractionResult<BusinessRecord> {
    if card.text().all(|text| text.trim().is_empty()) {
        return Err(CoreError::new(
            CoreErrorKind::ExtractionFailure,
            "listing card has no text content",
        ));
    }

    Ok(BusinessRecord {
        name: apply(Field::Name, card, &NAME_RULES),
        address: apply(Field::Address, card, &ADDRESS_RULES),
        rating: apply(Field::Rating, card, &RATING_RULES),
        category: apply(Field::Category, card, &CATEGORY_RULES),
        ..BusinessRecord::default()
    })
}

fn apply(field: Field, card: ElementRef<'_>, rules: &[CardRule]) -> String {
    resolve_field(field, rules.iter().map(|rule| rule(card)))
}

fn select_all<'a>(card: ElementRef<'a>, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(selector) => card.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn first_text(card: ElementRef<'_>, selector: &str) -> Option<String> {
    select_all(card, selector)
        .into_iter()
        .next()
        .map(|element| element.text().collect())
}

fn business_name_link(card: ElementRef<'_>) -> Option<String> {
    first_text(card, r#"a[data-analytics-label="biz-name"]"#)
}

fn heading_link(card: ElementRef<'_>) -> Option<String> {
    first_text(card, "h3 a")
}

fn numbered_paragraph(card: ElementRef<'_>) -> Option<String> {
    select_all(card, "p")
        .into_iter()
        .map(|paragraph| paragraph.text().collect::<String>())
        .find(|text| text.chars().any(|ch| ch.is_ascii_digit()))
}

fn address_element(card: ElementRef<'_>) -> Option<String> {
    first_text(card, "address")
}

fn star_image_label(card: ElementRef<'_>) -> Option<String> {
    rating_from_labels(select_all(card, r#"div[role="img"][aria-label]"#))
}

fn star_label_anywhere(card: ElementRef<'_>) -> Option<String> {
    rating_from_labels(select_all(card, r#"[aria-label*="star"]"#))
}

fn rating_from_labels(elements: Vec<ElementRef<'_>>) -> Option<String> {
    elements.into_iter().find_map(|element| {
        let label = element.value().attr("aria-label")?;
        RATING_PATTERN
            .captures(label)
            .and_then(|captures| captures.get(1))
            .map(|rating| rating.as_str().to_string())
    })
}

fn category_spans(card: ElementRef<'_>) -> Option<String> {
    let categories: Vec<String> = select_all(card, r#"span[class*="category"]"#)
        .into_iter()
        .map(|span| clean_text(&span.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect();
    (!categories.is_empty()).then(|| categories.join(", "))
}
