use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::config::ScraperConfig;
use crate::extraction::fetch::PageFetcher;
use crate::extraction::fields::extract_email;
use crate::orchestration::TaskCancellationToken;

const MAX_CONTACT_LINKS: usize = 3;

static CONTACT_LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)contact|about").expect("contact link pattern is a valid regex")
});

/// Best-effort crawl of a business website for a contact email.
/// Every failure degrades to an empty string.
#[derive(Clone)]
pub struct ContactEmailFinder {
    fetcher: Arc<dyn PageFetcher>,
    website_timeout: Duration,
    contact_page_timeout: Duration,
}

impl ContactEmailFinder {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        website_timeout: Duration,
        contact_page_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            website_timeout,
            contact_page_timeout,
        }
    }

    pub fn from_config(fetcher: Arc<dyn PageFetcher>, config: &ScraperConfig) -> Self {
        Self::new(fetcher, config.website_timeout, config.contact_page_timeout)
    }

    pub async fn find_email(&self, website: &str, cancel: &TaskCancellationToken) -> String {
        let website = normalize_website(website);
        if cancel.is_cancelled() {
            return String::new();
        }

        let page = match self.fetcher.fetch(&website, Some(self.website_timeout)).await {
            Ok(page) if page.is_success() => page,
            Ok(page) => {
                tracing::debug!(%website, status = page.status, "website returned a non-success status");
                return String::new();
            }
            Err(error) => {
                tracing::warn!(%website, error = %error.message, "could not fetch website for email");
                return String::new();
            }
        };

        for link in contact_links(&page.body, &website) {
            if cancel.is_cancelled() {
                return String::new();
            }
            match self
                .fetcher
                .fetch(&link, Some(self.contact_page_timeout))
                .await
            {
                Ok(contact) if contact.is_success() => {
                    let email = extract_email(&contact.body);
                    if !email.is_empty() {
                        tracing::debug!(%link, "found email on contact page");
                        return email;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::debug!(%link, error = %error.message, "contact page fetch failed");
                }
            }
        }

        extract_email(&page.body)
    }
}

fn normalize_website(website: &str) -> String {
    let website = website.trim();
    if website.starts_with("http://") || website.starts_with("https://") {
        website.to_string()
    } else {
        format!("https://{website}")
    }
}

/// Absolute URLs of the first few links whose text or href looks like a
/// contact or about page.
fn contact_links(body: &str, base: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(body);
    document
        .select(&anchors)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let text: String = anchor.text().collect();
            let matches =
                CONTACT_LINK_PATTERN.is_match(href) || CONTACT_LINK_PATTERN.is_match(&text);
            matches.then(|| base.join(href).ok()).flatten()
        })
        .take(MAX_CONTACT_LINKS)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{contact_links, normalize_website};

    #[test]
    fn bare_domains_get_an_https_scheme() {
        assert_eq!(normalize_website("example.com"), "https://example.com");
        assert_eq!(normalize_website("http://example.com"), "http://example.com");
    }

    #[test]
    fn contact_links_match_text_or_href_and_stop_at_three() {
        let body = r#"
            <a href="/menu">Menu</a>
            <a href="/Contact-Us">Reach us</a>
            <a href="/team">About the team</a>
            <a href="https://other.example/about">Elsewhere</a>
            <a href="/contact-2">Contact</a>
        "#;

        let links = contact_links(body, "https://shop.example/home/");
        assert_eq!(
            links,
            vec![
                "https://shop.example/Contact-Us".to_string(),
                "https://shop.example/team".to_string(),
                "https://other.example/about".to_string(),
            ]
        );
    }
}
