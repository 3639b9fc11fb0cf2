use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leadscrape_core::extraction::browser::{RESULT_ITEM_SELECTOR, RESULTS_REGION_SELECTOR};
use leadscrape_core::extraction::{
    BrowserAutomationStrategy, BrowserSession, BrowserSettings, ContactEmailFinder,
    ExtractionResult, ExtractionStrategy, FetchedPage, PageFetcher,
};
use leadscrape_core::models::{BusinessRecord, CoreError, CoreErrorKind};
use leadscrape_core::orchestration::TaskCancellationToken;

const NAME_PRIMARY: &str = r#"h1[data-attrid="title"]"#;
const NAME_SECONDARY: &str = r#"[data-section-id="overview"] h1"#;
const ADDRESS: &str = r#"[data-item-id="address"]"#;
const PHONE: &str = r#"[data-item-id="phone:tel:"]"#;
const WEBSITE: &str = r#"[data-item-id="authority"]"#;
const RATING: &str = r#"[data-value="Formatted rating"]"#;
const CATEGORY: &str = r#"[data-section-id="overview"] button[jsaction*="category"]"#;

#[derive(Clone, Default)]
struct Listing {
    texts: HashMap<&'static str, &'static str>,
    hrefs: HashMap<&'static str, &'static str>,
    broken: bool,
}

impl Listing {
    fn named(name: &'static str) -> Self {
        Self::default().text(NAME_PRIMARY, name)
    }

    fn text(mut self, selector: &'static str, value: &'static str) -> Self {
        self.texts.insert(selector, value);
        self
    }

    fn href(mut self, selector: &'static str, value: &'static str) -> Self {
        self.hrefs.insert(selector, value);
        self
    }

    fn broken() -> Self {
        Self {
            broken: true,
            ..Self::named("Broken")
        }
    }
}

#[derive(Clone, Default)]
struct SessionLog {
    navigations: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

struct FixtureSession {
    listings: Vec<Listing>,
    region_ready: bool,
    active: Mutex<Option<usize>>,
    cancel_on_activate: Option<(usize, TaskCancellationToken)>,
    log: SessionLog,
}

impl FixtureSession {
    fn new(listings: Vec<Listing>, log: SessionLog) -> Self {
        Self {
            listings,
            region_ready: true,
            active: Mutex::new(None),
            cancel_on_activate: None,
            log,
        }
    }

    fn active_listing(&self) -> Option<Listing> {
        let index = (*self.active.lock().unwrap())?;
        self.listings.get(index).cloned()
    }
}

#[async_trait]
impl BrowserSession for FixtureSession {
    async fn navigate(&self, url: &str) -> ExtractionResult<()> {
        self.log.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> ExtractionResult<()> {
        assert_eq!(selector, RESULTS_REGION_SELECTOR);
        if self.region_ready {
            Ok(())
        } else {
            Err(CoreError::new(
                CoreErrorKind::Timeout,
                format!("timed out after {timeout:?}"),
            ))
        }
    }

    async fn count(&self, selector: &str) -> ExtractionResult<usize> {
        assert_eq!(selector, RESULT_ITEM_SELECTOR);
        Ok(self.listings.len())
    }

    async fn activate(&self, _selector: &str, index: usize) -> ExtractionResult<()> {
        if let Some((trigger, token)) = &self.cancel_on_activate
            && *trigger == index
        {
            token.cancel();
        }
        if self.listings[index].broken {
            return Err(CoreError::new(
                CoreErrorKind::BrowserFailure,
                "element is not clickable",
            ));
        }
        *self.active.lock().unwrap() = Some(index);
        Ok(())
    }

    async fn text(&self, selector: &str) -> ExtractionResult<Option<String>> {
        Ok(self
            .active_listing()
            .and_then(|listing| listing.texts.get(selector).map(|value| value.to_string())))
    }

    async fn attribute(&self, selector: &str, name: &str) -> ExtractionResult<Option<String>> {
        assert_eq!(name, "href");
        Ok(self
            .active_listing()
            .and_then(|listing| listing.hrefs.get(selector).map(|value| value.to_string())))
    }

    async fn close(&mut self) -> ExtractionResult<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SiteFetcher {
    pages: HashMap<String, String>,
}

#[async_trait]
impl PageFetcher for SiteFetcher {
    async fn fetch(&self, url: &str, _timeout: Option<Duration>) -> ExtractionResult<FetchedPage> {
        self.pages
            .get(url)
            .map(|body| FetchedPage {
                url: url.to_string(),
                status: 200,
                body: body.clone(),
            })
            .ok_or_else(|| CoreError::new(CoreErrorKind::FetchFailure, "no route"))
    }
}

fn settings(max_results: usize) -> BrowserSettings {
    BrowserSettings {
        search_url: "https://maps.test/search/".to_string(),
        max_results,
        scraping_delay: Duration::ZERO,
        results_wait_timeout: Duration::from_millis(50),
        settle_delay: Duration::ZERO,
    }
}

async fn scrape(
    session: FixtureSession,
    max_results: usize,
    emails: Option<ContactEmailFinder>,
) -> ExtractionResult<Vec<BusinessRecord>> {
    let mut strategy = BrowserAutomationStrategy::new(session, settings(max_results), emails);
    strategy
        .scrape("pizza", "New York", &TaskCancellationToken::new())
        .await
}

#[tokio::test]
async fn fields_use_fallbacks_and_defaults() {
    let log = SessionLog::default();
    let listings = vec![
        Listing::default()
            .text(NAME_SECONDARY, "  Cafe \n Uno ")
            .text(ADDRESS, "1 Main St")
            .text(PHONE, "(555) 010-0000")
            .text(RATING, "4.6")
            .text(CATEGORY, "Pizza restaurant")
            .href(WEBSITE, "cafe.example"),
        Listing::default().text(NAME_PRIMARY, "   "),
    ];
    let fetcher = Arc::new(SiteFetcher {
        pages: HashMap::from([(
            "https://cafe.example".to_string(),
            "<p>Write to hello@cafe.example</p>".to_string(),
        )]),
    });
    let emails = ContactEmailFinder::new(fetcher, Duration::from_secs(1), Duration::from_secs(1));

    let records = scrape(FixtureSession::new(listings, log.clone()), 10, Some(emails))
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    let first = &records[0];
    assert_eq!(first.name, "Cafe Uno");
    assert_eq!(first.address, "1 Main St");
    assert_eq!(first.phone, "(555) 010-0000");
    assert_eq!(first.website, "cafe.example");
    assert_eq!(first.email, "hello@cafe.example");
    assert_eq!(first.rating, "4.6");
    assert_eq!(first.category, "Pizza restaurant");

    let second = &records[1];
    assert_eq!(second.name, "Unknown");
    assert_eq!(second.website, "");
    assert_eq!(second.email, "");

    assert_eq!(
        log.navigations.lock().unwrap().as_slice(),
        ["https://maps.test/search/pizza+in+New+York".to_string()]
    );
}

#[tokio::test]
async fn results_are_capped_in_source_order() {
    let listings = ["A", "B", "C", "D", "E"].map(Listing::named).to_vec();
    let records = scrape(FixtureSession::new(listings, SessionLog::default()), 2, None)
        .await
        .unwrap();

    let names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[tokio::test]
async fn failing_listing_is_skipped() {
    let listings = vec![Listing::named("A"), Listing::broken(), Listing::named("C")];
    let records = scrape(FixtureSession::new(listings, SessionLog::default()), 10, None)
        .await
        .unwrap();

    let names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
    assert_eq!(names, vec!["A", "C"]);
}

#[tokio::test]
async fn missing_results_region_fails_the_scrape() {
    let mut session = FixtureSession::new(vec![Listing::named("A")], SessionLog::default());
    session.region_ready = false;

    let error = scrape(session, 10, None).await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Timeout);
}

#[tokio::test]
async fn cancellation_stops_the_listing_loop() {
    let token = TaskCancellationToken::new();
    let mut session = FixtureSession::new(
        vec![Listing::named("A"), Listing::named("B"), Listing::named("C")],
        SessionLog::default(),
    );
    session.cancel_on_activate = Some((1, token.clone()));
    let mut strategy = BrowserAutomationStrategy::new(session, settings(10), None);

    let error = strategy.scrape("pizza", "Boston", &token).await.unwrap_err();
    assert!(error.is_cancelled());
}

#[tokio::test]
async fn close_releases_the_session_once() {
    let log = SessionLog::default();
    let mut strategy =
        BrowserAutomationStrategy::new(FixtureSession::new(Vec::new(), log.clone()), settings(10), None);

    assert!(
        strategy
            .scrape("pizza", "Boston", &TaskCancellationToken::new())
            .await
            .unwrap()
            .is_empty()
    );
    strategy.close().await.unwrap();
    strategy.close().await.unwrap();
    assert_eq!(log.closes.load(Ordering::SeqCst), 1);
}
