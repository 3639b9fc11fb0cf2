use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind};

pub const DEFAULT_STATIC_SEARCH_URL: &str = "https://www.yelp.com/search";
pub const DEFAULT_MAPS_SEARCH_URL: &str = "https://www.google.com/maps/search/";

const SCRAPING_DELAY_VAR: &str = "SCRAPING_DELAY";
const MAX_RESULTS_VAR: &str = "MAX_RESULTS_PER_TASK";
const HEADLESS_VAR: &str = "BROWSER_HEADLESS";
const MAX_CONCURRENT_VAR: &str = "MAX_CONCURRENT_TASKS";
const DB_PATH_VAR: &str = "LEADSCRAPE_DB_PATH";

#[derive(Clone, Debug, PartialEq)]
pub struct ScraperConfig {
    /// Pause after activating each browser listing.
    pub scraping_delay: Duration,
    pub max_results_per_task: usize,
    pub headless: bool,
    /// `None` admits every accepted job immediately.
    pub max_concurrent_tasks: Option<usize>,
    pub database_path: PathBuf,
    pub static_search_url: String,
    pub maps_search_url: String,
    pub results_wait_timeout: Duration,
    pub website_timeout: Duration,
    pub contact_page_timeout: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            scraping_delay: Duration::from_secs(2),
            max_results_per_task: 50,
            headless: true,
            max_concurrent_tasks: None,
            database_path: PathBuf::from("leadscrape.sqlite3"),
            static_search_url: DEFAULT_STATIC_SEARCH_URL.to_string(),
            maps_search_url: DEFAULT_MAPS_SEARCH_URL.to_string(),
            results_wait_timeout: Duration::from_secs(10),
            website_timeout: Duration::from_secs(10),
            contact_page_timeout: Duration::from_secs(5),
        }
    }
}

impl ScraperConfig {
    /// Reads the process environment, falling back to a `.env` file found in
    /// the working directory or one of its parents. A missing file is fine; a
    /// malformed one is `InvalidInput`.
    pub fn from_env() -> Result<Self, CoreError> {
        let file = read_env_file(dotenvy::dotenv_iter())?;
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Builds a config from an arbitrary variable source; unset or blank values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let mut config = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(raw) = value(SCRAPING_DELAY_VAR) {
            config.scraping_delay = parse_delay(SCRAPING_DELAY_VAR, &raw)?;
        }
        if let Some(raw) = value(MAX_RESULTS_VAR) {
            config.max_results_per_task = raw
                .parse::<usize>()
                .map_err(|_| invalid_value(MAX_RESULTS_VAR, &raw, "a non-negative integer"))?;
        }
        if let Some(raw) = value(HEADLESS_VAR) {
            config.headless = parse_flag(HEADLESS_VAR, &raw)?;
        }
        if let Some(raw) = value(MAX_CONCURRENT_VAR) {
            let limit = raw
                .parse::<usize>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or_else(|| invalid_value(MAX_CONCURRENT_VAR, &raw, "a positive integer"))?;
            config.max_concurrent_tasks = Some(limit);
        }
        if let Some(raw) = value(DB_PATH_VAR) {
            config.database_path = PathBuf::from(raw);
        }

        Ok(config)
    }
}

fn read_env_file(
    source: dotenvy::Result<dotenvy::Iter<File>>,
) -> Result<HashMap<String, String>, CoreError> {
    let entries = match source {
        Ok(entries) => entries,
        Err(error) if error.not_found() => return Ok(HashMap::new()),
        Err(error) => return Err(env_file_error(error)),
    };
    let values = entries
        .collect::<dotenvy::Result<HashMap<_, _>>>()
        .map_err(env_file_error)?;
    tracing::debug!(count = values.len(), "loaded .env file");
    Ok(values)
}

fn env_file_error(error: dotenvy::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("could not read .env file: {error}"),
    )
}

fn parse_delay(key: &str, raw: &str) -> Result<Duration, CoreError> {
    let seconds = raw
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .ok_or_else(|| invalid_value(key, raw, "a non-negative number of seconds"))?;
    Ok(Duration::from_secs_f64(seconds))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, CoreError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid_value(key, raw, "a boolean")),
    }
}

fn invalid_value(key: &str, raw: &str, expected: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("{key} must be {expected}, got '{raw}'"),
    )
}
