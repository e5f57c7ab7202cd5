// gul-client/src/http.rs
// ============================================================================
// Module: GUL HTTP Fetcher
// Description: Bounded artifact downloads from a static CDN surface.
// Purpose: Fetch manifest, snapshot, and delta objects with strict size
//          caps, retry with jittered backoff, and cancellation that reaches
//          into in-flight requests.
// Dependencies: gul-core, reqwest, tokio, rand, tracing
// ============================================================================

//! ## Overview
//! The distribution surface is static objects behind plain GETs. Any
//! response other than 200 is a transport failure; advertised or observed
//! sizes beyond the configured ceiling abort the read with bounded memory.
//! Only transport failures retry: exponential backoff from one second,
//! capped at thirty, plus a uniform jitter in [0, base/2). A cancellation
//! signal short-circuits both in-flight requests and backoff waits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use gul_core::Manifest;
use rand::Rng;
use reqwest::StatusCode;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::errors::SyncError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// First backoff step for transient failures.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Ceiling on a single backoff step.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Progress callback: bytes downloaded so far and the total when known.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Resolves once the cancellation signal fires or its sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// SECTION: Fetcher
// ============================================================================

/// HTTP client for the static artifact surface.
pub struct HttpFetcher {
    /// Underlying HTTP client with the per-request timeout baked in.
    client: reqwest::Client,
    /// Absolute manifest URL.
    manifest_url: String,
    /// Directory portion of the manifest URL, for relative artifact paths.
    base_url: String,
    /// Artifact download ceiling in bytes.
    max_download: u64,
}

impl HttpFetcher {
    /// Builds a fetcher from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when the HTTP client cannot be
    /// constructed or the manifest URL is malformed.
    pub fn new(config: &ClientConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| SyncError::InvalidConfig(format!("http client build: {err}")))?;

        let manifest_url = config.manifest_url.clone();
        let scheme_end = manifest_url.find("://").map(|i| i + 3);
        let base_url = match (scheme_end, manifest_url.rfind('/')) {
            (Some(start), Some(cut)) if cut >= start => manifest_url[..cut].to_string(),
            _ => {
                return Err(SyncError::InvalidConfig(format!(
                    "manifest_url must be an absolute object url: {manifest_url}"
                )));
            }
        };

        Ok(Self {
            client,
            manifest_url,
            base_url,
            max_download: config.max_download_size,
        })
    }

    /// Fetches and parses the manifest.
    ///
    /// Signature verification is the caller's responsibility; this method
    /// only enforces transport and structural validity.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] on transport failure,
    /// [`SyncError::TooLarge`] past the size ceiling, and
    /// [`SyncError::Manifest`] on malformed bytes.
    pub async fn fetch_manifest(
        &self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Manifest, SyncError> {
        let bytes = self.fetch_bytes(&self.manifest_url, None, cancel).await?;
        Ok(Manifest::from_json(&bytes)?)
    }

    /// Fetches the manifest, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last transport error after `max_retries` attempts, or
    /// the first non-retryable error immediately.
    pub async fn fetch_manifest_with_retry(
        &self,
        max_retries: u32,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Manifest, SyncError> {
        let attempts = max_retries.max(1);
        let mut last_err = SyncError::Unavailable("no attempts made".to_string());
        for attempt in 0..attempts {
            match self.fetch_manifest(cancel).await {
                Ok(manifest) => return Ok(manifest),
                Err(err) if err.is_retryable() => {
                    tracing::debug!(attempt, error = %err, "manifest fetch failed, backing off");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }

            if attempt + 1 < attempts {
                let base = backoff_step(attempt);
                let jitter = rand::thread_rng().gen_range(Duration::ZERO..base / 2);
                tokio::select! {
                    () = cancelled(cancel) => return Err(SyncError::Cancelled),
                    () = tokio::time::sleep(base + jitter) => {}
                }
            }
        }
        Err(last_err)
    }

    /// Fetches an artifact by its manifest-relative or absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] on transport failure and
    /// [`SyncError::TooLarge`] past the size ceiling.
    pub async fn fetch_artifact(
        &self,
        url: &str,
        progress: Option<&ProgressFn>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Vec<u8>, SyncError> {
        if url.is_empty() {
            return Err(SyncError::Unavailable("empty artifact url".to_string()));
        }
        let resolved = self.resolve(url);
        self.fetch_bytes(&resolved, progress, cancel).await
    }

    /// Probes the manifest's Last-Modified header without downloading it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] on transport failure.
    pub async fn last_modified(
        &self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<String>, SyncError> {
        let request = self.client.head(&self.manifest_url).send();
        let response = tokio::select! {
            () = cancelled(cancel) => return Err(SyncError::Cancelled),
            response = request => response.map_err(|err| SyncError::Unavailable(err.to_string()))?,
        };
        if response.status() != StatusCode::OK {
            return Err(SyncError::Unavailable(format!(
                "unexpected status {} for HEAD manifest",
                response.status()
            )));
        }
        Ok(response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string))
    }

    /// Resolves a possibly relative artifact URL against the manifest base.
    fn resolve(&self, url: &str) -> String {
        if url.contains("://") {
            return url.to_string();
        }
        format!("{}/{}", self.base_url, url.trim_start_matches('/'))
    }

    /// Performs a bounded GET, streaming the body under the size ceiling.
    async fn fetch_bytes(
        &self,
        url: &str,
        progress: Option<&ProgressFn>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Vec<u8>, SyncError> {
        let request = self.client.get(url).send();
        let response = tokio::select! {
            () = cancelled(cancel) => return Err(SyncError::Cancelled),
            response = request => response.map_err(|err| SyncError::Unavailable(err.to_string()))?,
        };

        if response.status() != StatusCode::OK {
            return Err(SyncError::Unavailable(format!(
                "unexpected status {} for {url}",
                response.status()
            )));
        }

        let total = response.content_length();
        if let Some(expected) = total {
            if expected > self.max_download {
                return Err(SyncError::TooLarge {
                    actual: expected,
                    max: self.max_download,
                });
            }
        }

        let mut body = Vec::new();
        let mut response = response;
        loop {
            let chunk = tokio::select! {
                () = cancelled(cancel) => return Err(SyncError::Cancelled),
                chunk = response.chunk() => {
                    chunk.map_err(|err| SyncError::Unavailable(err.to_string()))?
                }
            };
            let Some(chunk) = chunk else {
                break;
            };
            if body.len() as u64 + chunk.len() as u64 > self.max_download {
                return Err(SyncError::TooLarge {
                    actual: body.len() as u64 + chunk.len() as u64,
                    max: self.max_download,
                });
            }
            body.extend_from_slice(&chunk);
            if let Some(report) = progress {
                report(body.len() as u64, total);
            }
        }
        Ok(body)
    }
}

/// Exponential backoff step for a zero-based attempt index.
fn backoff_step(attempt: u32) -> Duration {
    BACKOFF_BASE
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(BACKOFF_CAP)
        .min(BACKOFF_CAP)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
