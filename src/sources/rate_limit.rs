use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Ten requests per second against the configured registry base.
const REGISTRY_MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Spacing for any other origin the client is pointed at.
const OTHER_ORIGIN_MIN_INTERVAL: Duration = Duration::from_millis(50);

const REGISTRY_KEY: &str = "registry";

/// Spaces outbound requests so bursts of searches against one registry base
/// stay inside its request budget.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    registry_prefix: String,
    registry_interval: Duration,
    other_interval: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub(crate) fn for_registry(base: &str) -> Self {
        Self {
            registry_prefix: base.trim().trim_end_matches('/').to_string(),
            registry_interval: REGISTRY_MIN_INTERVAL,
            other_interval: OTHER_ORIGIN_MIN_INTERVAL,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    fn key_and_interval(&self, url: &Url) -> (String, Duration) {
        if !self.registry_prefix.is_empty() && url.as_str().starts_with(&self.registry_prefix) {
            return (REGISTRY_KEY.to_string(), self.registry_interval);
        }
        let origin = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or("unknown-host")
        );
        (origin, self.other_interval)
    }

    pub(crate) async fn wait_for_url(&self, url: &Url) {
        let (key, min_interval) = self.key_and_interval(url);
        loop {
            let now = Instant::now();
            let mut map = self.last_seen.lock().await;
            match map.get(&key).map(|last| *last + min_interval) {
                Some(target) if target > now => {
                    drop(map);
                    sleep_until(target).await;
                }
                _ => {
                    map.insert(key, now);
                    return;
                }
            }
        }
    }
}

/// Returns the limiter shared by every client built for `base`, so a CLI
/// search and a server handler hitting the same registry share one budget.
pub(crate) fn shared_for_registry(base: &str) -> Arc<RateLimiter> {
    static LIMITERS: OnceLock<std::sync::Mutex<HashMap<String, Arc<RateLimiter>>>> =
        OnceLock::new();
    let mut limiters = LIMITERS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    limiters
        .entry(base.trim().trim_end_matches('/').to_string())
        .or_insert_with(|| Arc::new(RateLimiter::for_registry(base)))
        .clone()
}

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub(crate) fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.limiter.wait_for_url(req.url()).await;
        next.run(req, extensions).await
    }
}
