//! Runtime configuration for the sync engine and the backend it talks to.
//!
//! `SyncConfig` tunes a synchronization pass; `BackendConfig` holds the
//! public Supabase project endpoint and anon key shared by the auth client
//! and the remote table service. Secret credentials never live here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PULL_PAGE_SIZE: usize = 1000;
const DEFAULT_WATERMARK_OVERLAP_MS: u64 = 300_000;

/// How the pull stage selects remote rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullMode {
    /// Every pass fetches every row the owner has (the correctness baseline).
    #[default]
    Full,
    /// After a first full scan, only rows updated since the last pulled
    /// watermark minus [`SyncConfig::watermark_overlap`]. Watermarks live in
    /// memory only.
    ///
    /// `updated_at` is stamped by the pushing client, not the server. A row
    /// whose stamp trails the watermark by more than the overlap, because its
    /// writer's clock is behind or its upsert landed late, is skipped until
    /// the next full scan.
    Incremental,
}

/// Tuning for synchronization passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Upper bound for each remote call, in milliseconds
    pub request_timeout_ms: u64,
    pub pull_mode: PullMode,
    /// Rows per page when scanning a remote table
    pub pull_page_size: usize,
    /// How far before the watermark an incremental pull starts, in milliseconds
    pub watermark_overlap_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            pull_mode: PullMode::Full,
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
            watermark_overlap_ms: DEFAULT_WATERMARK_OVERLAP_MS,
        }
    }
}

impl SyncConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub const fn watermark_overlap(&self) -> Duration {
        Duration::from_millis(self.watermark_overlap_ms)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_watermark_overlap(mut self, overlap: Duration) -> Self {
        self.watermark_overlap_ms = overlap.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_pull_mode(mut self, mode: PullMode) -> Self {
        self.pull_mode = mode;
        self
    }

    #[must_use]
    pub fn with_pull_page_size(mut self, page_size: usize) -> Self {
        self.pull_page_size = page_size.max(1);
        self
    }
}

/// Supabase project endpoint and public anon key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project base URL without any service suffix
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl BackendConfig {
    /// Validate and normalize a project URL and anon key.
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self, String> {
        let url = normalize_text_option(Some(url.into()))
            .ok_or_else(|| "Supabase URL must not be empty".to_string())?;
        if !is_http_url(&url) {
            return Err("Supabase URL must include http:// or https://".to_string());
        }
        let anon_key = normalize_text_option(Some(anon_key.into()))
            .ok_or_else(|| "Supabase anon key must not be empty".to_string())?;

        let base = url.trim_end_matches('/');
        let base = base
            .strip_suffix("/auth/v1")
            .or_else(|| base.strip_suffix("/rest/v1"))
            .unwrap_or(base);

        Ok(Self {
            supabase_url: base.to_string(),
            supabase_anon_key: anon_key,
        })
    }

    /// Both values or neither; a half-configured backend is an error.
    pub fn from_optional(
        url: Option<String>,
        anon_key: Option<String>,
    ) -> Result<Option<Self>, String> {
        match (normalize_text_option(url), normalize_text_option(anon_key)) {
            (None, None) => Ok(None),
            (Some(url), Some(anon_key)) => Self::new(url, anon_key).map(Some),
            (Some(_), None) => Err("Supabase anon key is missing".to_string()),
            (None, Some(_)) => Err("Supabase URL is missing".to_string()),
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.supabase_url)
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }
}
