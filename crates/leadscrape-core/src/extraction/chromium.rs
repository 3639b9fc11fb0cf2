use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::extraction::ExtractionResult;
use crate::extraction::browser::BrowserSession;
use crate::extraction::fetch::BROWSER_USER_AGENT;
use crate::models::{CoreError, CoreErrorKind};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A Chromium instance driven over CDP with a single working page.
pub struct ChromiumSession {
    // Only touched through `&mut self`; the mutex keeps the session `Sync`.
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumSession {
    pub async fn launch(headless: bool) -> ExtractionResult<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={BROWSER_USER_AGENT}"))
            .window_size(1920, 1080);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|message| browser_error(format!("invalid browser config: {message}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|error| browser_error(format!("failed to launch browser: {error}")))?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(error) => {
                handler.abort();
                return Err(browser_error(format!("failed to open page: {error}")));
            }
        };

        tracing::info!(headless, "browser session started");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
        })
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&self, url: &str) -> ExtractionResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|error| browser_error(format!("navigation to {url} failed: {error}")))?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> ExtractionResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.find_element(selector).await {
                Ok(_) => return Ok(()),
                Err(_) if Instant::now() < deadline => tokio::time::sleep(POLL_INTERVAL).await,
                Err(error) => {
                    return Err(CoreError::new(
                        CoreErrorKind::Timeout,
                        format!("timed out after {timeout:?} waiting for '{selector}': {error}"),
                    ));
                }
            }
        }
    }

    async fn count(&self, selector: &str) -> ExtractionResult<usize> {
        self.page
            .find_elements(selector)
            .await
            .map(|elements| elements.len())
            .map_err(|error| browser_error(format!("query '{selector}' failed: {error}")))
    }

    async fn activate(&self, selector: &str, index: usize) -> ExtractionResult<()> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|error| browser_error(format!("query '{selector}' failed: {error}")))?;
        let element = elements.get(index).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::ExtractionFailure,
                format!("result {index} is no longer on the page"),
            )
        })?;
        element
            .click()
            .await
            .map_err(|error| browser_error(format!("click on result {index} failed: {error}")))?;
        Ok(())
    }

    async fn text(&self, selector: &str) -> ExtractionResult<Option<String>> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        element
            .inner_text()
            .await
            .map_err(|error| browser_error(format!("reading text of '{selector}' failed: {error}")))
    }

    async fn attribute(&self, selector: &str, name: &str) -> ExtractionResult<Option<String>> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        element.attribute(name).await.map_err(|error| {
            browser_error(format!("reading {name} of '{selector}' failed: {error}"))
        })
    }

    async fn close(&mut self) -> ExtractionResult<()> {
        let slot = self.browser.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(mut browser) = slot.take() else {
            return Ok(());
        };
        let closed = browser.close().await;
        if let Err(error) = browser.wait().await {
            tracing::warn!(error = %error, "browser process did not exit cleanly");
        }
        self.handler.abort();
        closed.map_err(|error| browser_error(format!("failed to close browser: {error}")))?;
        tracing::info!("browser session closed");
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        let slot = self.browser.get_mut().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::warn!("browser session dropped without close");
        }
        self.handler.abort();
    }
}

fn browser_error(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::BrowserFailure, message)
}
