use crate::config::ScraperConfig;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use rand::RngExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

// ── Rate limiter ──────────────────────────────────────────────────────────────

/// Enforces a minimum spacing between request starts per host key.
///
/// One timestamp per key, no queueing: the pipeline is a single sequential
/// worker, so whoever calls `wait_for_slot` next is the only caller.
pub struct RateLimiter {
    min_interval: Duration,
    jitter_ms: u64,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, jitter_ms: u64) -> Self {
        Self {
            min_interval,
            jitter_ms,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep until at least `min_interval` (plus jitter) has elapsed since
    /// the previous request to `host_key`. Never errors; a dropped wait is
    /// not a failure condition.
    pub async fn wait_for_slot(&self, host_key: &str) {
        let mut last = self.last_request.lock().await;

        if let Some(prev) = last.get(host_key) {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let jitter = if self.jitter_ms > 0 {
                    rand::rng().random_range(0..=self.jitter_ms)
                } else {
                    0
                };
                let wait = self.min_interval - elapsed + Duration::from_millis(jitter);
                debug!("Rate limit: {:?} until next slot for {}", wait, host_key);
                sleep(wait).await;
            }
        }

        last.insert(host_key.to_string(), Instant::now());
    }
}

// ── HTTP client ───────────────────────────────────────────────────────────────

/// Thin fetch layer with a desktop-browser header set. The stats upstream
/// throttles or blocks generic client identification, hence the spoofing.
///
/// No retry here. Failures come back typed so the orchestrator can make the
/// retry decision and record the attempt.
pub struct HttpClient {
    inner: reqwest::Client,
    min_body_bytes: usize,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            min_body_bytes: config.min_body_bytes,
        })
    }

    /// Fetch a URL as text, classifying failures into the unit taxonomy.
    pub async fn get_text(&self, url: &str) -> Result<String, PipelineError> {
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            warn!("{} returned HTTP {}", url, status);
            return Err(PipelineError::HttpStatus(status.as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::Network(e.to_string()))?;

        // 200 with a near-empty body is the upstream's bot response
        if body.trim().len() < self.min_body_bytes {
            warn!("Implausibly short body ({} bytes) from {}", body.len(), url);
            return Err(PipelineError::EmptyBody(body.len()));
        }

        Ok(body)
    }
}
