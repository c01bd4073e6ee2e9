//! Client configuration.
//!
//! Values come from an optional JSON file and the process environment. The
//! Supabase URL and anon key are public, safe-to-ship values; user secrets
//! never belong here.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
pub const SUPABASE_ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";
pub const CACHE_DIR_ENV: &str = "TOKE_CACHE_DIR";

const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const APP_DIR_NAME: &str = "toke-diary";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Refresh the access token when it expires within this many seconds.
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: i64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            cache_dir: None,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Validated Supabase project endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseEndpoint {
    pub url: String,
    pub anon_key: String,
}

impl ClientConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("failed to read {}: {error}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|error| Error::Config(format!("invalid config {}: {error}", path.display())))
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from a variable lookup; unset and blank variables are ignored.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            supabase_url: normalize_text_option(lookup(SUPABASE_URL_ENV)),
            supabase_anon_key: normalize_text_option(lookup(SUPABASE_ANON_KEY_ENV)),
            cache_dir: normalize_text_option(lookup(CACHE_DIR_ENV)).map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Fill fields missing from `self` with values from `fallback`.
    #[must_use]
    pub fn with_fallback(self, fallback: Self) -> Self {
        let supabase_url = normalize_text_option(self.supabase_url);
        let supabase_anon_key = normalize_text_option(self.supabase_anon_key);
        let (supabase_url, supabase_anon_key) =
            if supabase_url.is_none() && supabase_anon_key.is_none() {
                (fallback.supabase_url, fallback.supabase_anon_key)
            } else {
                (supabase_url, supabase_anon_key)
            };

        Self {
            supabase_url,
            supabase_anon_key,
            cache_dir: self.cache_dir.or(fallback.cache_dir),
            refresh_margin_secs: self.refresh_margin_secs,
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    /// The Supabase URL and anon key, which must be configured together.
    pub fn supabase(&self) -> Result<SupabaseEndpoint> {
        let url = normalize_text_option(self.supabase_url.clone());
        let anon_key = normalize_text_option(self.supabase_anon_key.clone());
        match (url, anon_key) {
            (Some(url), Some(anon_key)) => {
                if !is_http_url(&url) {
                    return Err(Error::Config(format!(
                        "{SUPABASE_URL_ENV} must include http:// or https://"
                    )));
                }
                Ok(SupabaseEndpoint {
                    url: url.trim_end_matches('/').to_string(),
                    anon_key,
                })
            }
            (None, None) => Err(Error::Config(format!(
                "Supabase is not configured; set {SUPABASE_URL_ENV} and {SUPABASE_ANON_KEY_ENV}"
            ))),
            _ => Err(Error::Config(format!(
                "{SUPABASE_URL_ENV} and {SUPABASE_ANON_KEY_ENV} must be set together"
            ))),
        }
    }

    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        default_cache_dir().ok_or_else(|| {
            Error::Config(format!(
                "no local data directory on this platform; set {CACHE_DIR_ENV}"
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.supabase()?;
        if self.refresh_margin_secs < 0 {
            return Err(Error::Config(
                "refresh_margin_secs must not be negative".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `<local data dir>/toke-diary/cache`
#[must_use]
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME).join("cache"))
}

const fn default_refresh_margin_secs() -> i64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
