// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Destination screening against a sanctioned-entity list.
//!
//! The gate fails closed: a screening source that errors or cannot be
//! reached blocks the address. Verdicts from a healthy source are cached
//! per address in an LRU with a TTL; errors are never cached.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("Sanctions source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid sanctions source response: {0}")]
    InvalidResponse(String),

    #[error("Failed to load sanctions list: {0}")]
    Load(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Block,
}

/// Cached screening verdict for an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceRecord {
    pub address: String,
    pub verdict: Verdict,
    pub checked_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl ComplianceRecord {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now < self.checked_at + ttl,
            Err(_) => true,
        }
    }
}

/// External sanctioned-entity lookup.
#[async_trait]
pub trait SanctionsSource: Send + Sync {
    async fn is_sanctioned(&self, address: &str) -> Result<bool, ComplianceError>;
}

/// Sanctions list held in memory, one lowercase address per entry.
#[derive(Debug, Default, Clone)]
pub struct StaticSanctionsList {
    entries: HashSet<String>,
}

impl StaticSanctionsList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    /// Load from a text file: one address per line, `#` starts a comment.
    pub fn from_file(path: &Path) -> Result<Self, ComplianceError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ComplianceError::Load(format!("{}: {e}", path.display())))?;
        Ok(Self::new(content.lines().map(|line| {
            line.split('#').next().unwrap_or_default().to_string()
        })))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SanctionsSource for StaticSanctionsList {
    async fn is_sanctioned(&self, address: &str) -> Result<bool, ComplianceError> {
        Ok(self.entries.contains(&address.to_lowercase()))
    }
}

#[derive(Debug, Deserialize)]
struct ScreeningResponse {
    sanctioned: bool,
}

/// Screening service reached over HTTP: `GET {base}/{address}` returning
/// `{"sanctioned": bool}`.
pub struct HttpSanctionsSource {
    client: reqwest::Client,
    base_url: url::Url,
}

impl HttpSanctionsSource {
    pub fn new(mut base_url: url::Url, timeout: Duration) -> Result<Self, ComplianceError> {
        // `join` replaces the last segment unless the base ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ComplianceError::Load(e.to_string()))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl SanctionsSource for HttpSanctionsSource {
    async fn is_sanctioned(&self, address: &str) -> Result<bool, ComplianceError> {
        let url = self
            .base_url
            .join(&address.to_lowercase())
            .map_err(|e| ComplianceError::InvalidResponse(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ComplianceError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ComplianceError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let body: ScreeningResponse = response
            .json()
            .await
            .map_err(|e| ComplianceError::InvalidResponse(e.to_string()))?;
        Ok(body.sanctioned)
    }
}

/// Fail-closed screening with a per-address verdict cache.
pub struct ComplianceGate {
    source: Arc<dyn SanctionsSource>,
    cache: Mutex<LruCache<String, ComplianceRecord>>,
    ttl: Duration,
}

impl ComplianceGate {
    pub fn new(source: Arc<dyn SanctionsSource>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Screen an address. Never errors: failures become [`Verdict::Block`].
    pub async fn check(&self, address: &str) -> Verdict {
        self.check_at(address, Utc::now()).await
    }

    pub(crate) async fn check_at(&self, address: &str, now: DateTime<Utc>) -> Verdict {
        let key = address.to_lowercase();

        if let Some(record) = self.cached(&key, now) {
            return record.verdict;
        }

        let verdict = match self.source.is_sanctioned(&key).await {
            Ok(true) => Verdict::Block,
            Ok(false) => Verdict::Allow,
            Err(e) => {
                tracing::warn!(error = %e, "Sanctions screening failed, blocking");
                return Verdict::Block;
            }
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key.clone(),
                ComplianceRecord {
                    address: key,
                    verdict,
                    checked_at: now,
                    ttl: self.ttl,
                },
            );
        }
        verdict
    }

    /// Fresh cached record for an address, if any.
    pub fn cached(&self, address: &str, now: DateTime<Utc>) -> Option<ComplianceRecord> {
        let key = address.to_lowercase();
        let mut cache = self.cache.lock().ok()?;
        if let Some(record) = cache.get(&key) {
            if record.is_fresh(now) {
                return Some(record.clone());
            }
            cache.pop(&key);
        }
        None
    }
}
