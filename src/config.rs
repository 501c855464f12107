//! Runtime settings resolved from `TRIALFINDER_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::TrialFinderError;

const CTGOV_BASE: &str = "https://clinicaltrials.gov/api/v2";
const CTGOV_BASE_ENV: &str = "TRIALFINDER_CTGOV_BASE";
const ZIP_TABLE_ENV: &str = "TRIALFINDER_ZIP_TABLE";
const PROFILES_ENV: &str = "TRIALFINDER_PROFILES";
const CACHE_TTL_ENV: &str = "TRIALFINDER_CACHE_TTL_SECS";
const PAGE_SIZE_ENV: &str = "TRIALFINDER_PAGE_SIZE";
const RETRIES_ENV: &str = "TRIALFINDER_REGISTRY_RETRIES";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct Settings {
    pub ctgov_base: String,
    pub zip_table: Option<PathBuf>,
    pub profiles: Option<PathBuf>,
    /// Zero disables result caching.
    pub cache_ttl: Duration,
    pub page_size: usize,
    pub registry_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ctgov_base: CTGOV_BASE.to_string(),
            zip_table: None,
            profiles: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            page_size: DEFAULT_PAGE_SIZE,
            registry_retries: 0,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`TrialFinderError::Config`] when a numeric variable does not parse
    /// or the page size is outside `1..=100`.
    pub fn from_env() -> Result<Self, TrialFinderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, TrialFinderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut settings = Self::default();
        if let Some(base) = get(CTGOV_BASE_ENV) {
            settings.ctgov_base = base;
        }
        settings.zip_table = get(ZIP_TABLE_ENV).map(PathBuf::from);
        settings.profiles = get(PROFILES_ENV).map(PathBuf::from);
        if let Some(raw) = get(CACHE_TTL_ENV) {
            settings.cache_ttl = Duration::from_secs(parse_number(CACHE_TTL_ENV, &raw)?);
        }
        if let Some(raw) = get(PAGE_SIZE_ENV) {
            let size: usize = parse_number(PAGE_SIZE_ENV, &raw)?;
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(TrialFinderError::Config(format!(
                    "{PAGE_SIZE_ENV} must be between 1 and {MAX_PAGE_SIZE}"
                )));
            }
            settings.page_size = size;
        }
        if let Some(raw) = get(RETRIES_ENV) {
            settings.registry_retries = parse_number(RETRIES_ENV, &raw)?;
        }
        Ok(settings)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, TrialFinderError> {
    raw.parse::<T>().map_err(|_| {
        TrialFinderError::Config(format!("{key} must be a non-negative integer, got '{raw}'"))
    })
}
