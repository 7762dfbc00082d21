use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt fetch failed for `{project}/{slug}`: {reason}")]
    Fetch { project: String, slug: String, reason: String },
    #[error("prompt service returned empty text for `{project}/{slug}`")]
    EmptyPrompt { project: String, slug: String },
}

/// Names one prompt in the external prompt service. Environment and
/// version are mutually exclusive selectors; distinct selectors are
/// distinct cache entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PromptRef {
    pub project: String,
    pub slug: String,
    pub environment: Option<String>,
    pub version: Option<String>,
}

impl PromptRef {
    pub fn new(project: impl Into<String>, slug: impl Into<String>) -> Self {
        Self { project: project.into(), slug: slug.into(), environment: None, version: None }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[async_trait]
pub trait PromptFetcher: Send + Sync {
    async fn fetch(&self, reference: &PromptRef) -> Result<String, PromptError>;
}

/// HTTP fetcher for the external prompt service.
pub struct HttpPromptFetcher {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt: String,
}

impl HttpPromptFetcher {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl PromptFetcher for HttpPromptFetcher {
    async fn fetch(&self, reference: &PromptRef) -> Result<String, PromptError> {
        let fetch_error = |reason: String| PromptError::Fetch {
            project: reference.project.clone(),
            slug: reference.slug.clone(),
            reason,
        };

        let mut request = self.http.get(format!(
            "{}/v1/projects/{}/prompts/{}",
            self.base_url, reference.project, reference.slug
        ));
        if let Some(environment) = &reference.environment {
            request = request.query(&[("environment", environment)]);
        } else if let Some(version) = &reference.version {
            request = request.query(&[("version", version)]);
        }

        let response = request.send().await.map_err(|err| fetch_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("status {status}")));
        }

        let parsed: PromptResponse =
            response.json().await.map_err(|err| fetch_error(err.to_string()))?;
        Ok(parsed.prompt)
    }
}

struct CacheEntry {
    fetched_at: Instant,
    text: String,
}

/// Resolves prompt references to text with time-bounded caching and a
/// locally supplied fallback tier.
///
/// Resolution order: fresh cache entry -> external fetch (trimmed,
/// cached) -> fallback text -> error. Blank service responses count as
/// fetch failures, never as valid empty prompts. The cache is shared and
/// read-mostly; a stale-but-unexpired entry may be served to concurrent
/// callers without a re-fetch.
pub struct PromptResolver {
    fetcher: Option<Box<dyn PromptFetcher>>,
    ttl: Duration,
    cache: Mutex<HashMap<PromptRef, CacheEntry>>,
}

impl PromptResolver {
    pub fn new(fetcher: Option<Box<dyn PromptFetcher>>, ttl: Duration) -> Self {
        Self { fetcher, ttl, cache: Mutex::new(HashMap::new()) }
    }

    pub async fn resolve(
        &self,
        reference: &PromptRef,
        fallback: Option<&str>,
    ) -> Result<String, PromptError> {
        if let Some(cached) = self.cached(reference) {
            return Ok(cached);
        }

        match self.fetch_fresh(reference).await {
            Ok(text) => Ok(text),
            Err(error) => match fallback.map(str::trim).filter(|text| !text.is_empty()) {
                Some(text) => Ok(text.to_string()),
                None => Err(error),
            },
        }
    }

    fn cached(&self, reference: &PromptRef) -> Option<String> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(reference)?;
        (entry.fetched_at.elapsed() <= self.ttl).then(|| entry.text.clone())
    }

    async fn fetch_fresh(&self, reference: &PromptRef) -> Result<String, PromptError> {
        let Some(fetcher) = &self.fetcher else {
            return Err(PromptError::Fetch {
                project: reference.project.clone(),
                slug: reference.slug.clone(),
                reason: "no prompt service configured".to_string(),
            });
        };

        let text = fetcher.fetch(reference).await?.trim().to_string();
        if text.is_empty() {
            return Err(PromptError::EmptyPrompt {
                project: reference.project.clone(),
                slug: reference.slug.clone(),
            });
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                reference.clone(),
                CacheEntry { fetched_at: Instant::now(), text: text.clone() },
            );
        }
        Ok(text)
    }
}
