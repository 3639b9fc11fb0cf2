use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ScraperConfig;
use crate::extraction::browser::{BrowserAutomationStrategy, BrowserSettings};
use crate::extraction::chromium::ChromiumSession;
use crate::extraction::email::ContactEmailFinder;
use crate::extraction::fetch::{PageFetcher, ReqwestPageFetcher};
use crate::extraction::static_html::{StaticHtmlSettings, StaticHtmlStrategy};
use crate::extraction::{ExtractionResult, ExtractionStrategy, StrategyKind};

const STRATEGY_NAMES: [&str; 2] = ["google_maps", "yelp"];

/// Builds a fresh strategy for each job.
#[async_trait]
pub trait StrategyFactory: Send + Sync {
    /// Fails with `UnsupportedStrategy` for names outside `available_strategies`.
    async fn create(&self, name: &str) -> ExtractionResult<Box<dyn ExtractionStrategy>>;

    fn available_strategies(&self) -> &'static [&'static str];
}

pub struct ScraperFactory {
    config: ScraperConfig,
    fetcher: Arc<dyn PageFetcher>,
}

impl ScraperFactory {
    pub fn new(config: ScraperConfig) -> ExtractionResult<Self> {
        let fetcher = Arc::new(ReqwestPageFetcher::new()?);
        Ok(Self::with_fetcher(config, fetcher))
    }

    pub fn with_fetcher(config: ScraperConfig, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { config, fetcher }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }
}

#[async_trait]
impl StrategyFactory for ScraperFactory {
    async fn create(&self, name: &str) -> ExtractionResult<Box<dyn ExtractionStrategy>> {
        match name.parse::<StrategyKind>()? {
            StrategyKind::Yelp => Ok(Box::new(StaticHtmlStrategy::new(
                self.fetcher.clone(),
                StaticHtmlSettings::from_config(&self.config),
            ))),
            StrategyKind::GoogleMaps => {
                let session = ChromiumSession::launch(self.config.headless).await?;
                let emails = ContactEmailFinder::from_config(self.fetcher.clone(), &self.config);
                Ok(Box::new(BrowserAutomationStrategy::new(
                    session,
                    BrowserSettings::from_config(&self.config),
                    Some(emails),
                )))
            }
        }
    }

    fn available_strategies(&self) -> &'static [&'static str] {
        &STRATEGY_NAMES
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ScraperFactory, StrategyFactory};
    use crate::config::ScraperConfig;
    use crate::extraction::ReqwestPageFetcher;
    use crate::extraction::StrategyKind;
    use crate::models::CoreErrorKind;

    fn factory() -> ScraperFactory {
        ScraperFactory::with_fetcher(
            ScraperConfig::default(),
            Arc::new(ReqwestPageFetcher::new().unwrap()),
        )
    }

    #[test]
    fn advertised_names_match_strategy_kinds() {
        let names: Vec<&str> = StrategyKind::ALL.iter().map(|kind| kind.as_str()).collect();
        assert_eq!(factory().available_strategies(), names.as_slice());
    }

    #[tokio::test]
    async fn unknown_strategy_is_rejected() {
        let error = match factory().create("bing").await {
            Ok(_) => panic!("bing should not be a strategy"),
            Err(error) => error,
        };
        assert_eq!(error.kind, CoreErrorKind::UnsupportedStrategy);
    }

    #[tokio::test]
    async fn static_strategy_needs_no_browser() {
        assert!(factory().create("yelp").await.is_ok());
    }
}
