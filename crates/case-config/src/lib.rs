// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-config
//!
//! Loads the engine's configuration from a TOML file, overlaid by the
//! enumerated environment variables, into a single validated
//! [`CaseEngineConfig`].
#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Failure to load or parse configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was not found.
        path: String,
    },
    /// The configuration file could not be parsed as TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// The parser's error message.
        reason: String,
    },
    /// The loaded configuration failed validation.
    #[error("config validation failed: {}", reasons.join("; "))]
    ValidationError {
        /// One message per failed check.
        reasons: Vec<String>,
    },
    /// An environment variable overlay could not be applied.
    #[error("failed to apply environment overlay for {field}: {reason}")]
    EnvOverlayError {
        /// The field the overlay targeted.
        field: String,
        /// Why the overlay failed (usually a parse error).
        reason: String,
    },
}

/// A non-fatal advisory surfaced after a successful config load.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// `CASE_WAIT_TIMEOUT` is unusually large, which delays expiry of
    /// stalled cases.
    LargeWaitTimeout {
        /// The configured timeout, in seconds.
        secs: u64,
    },
    /// `COMMITTEE_PROVIDER_POOL` has fewer than 3 distinct provider
    /// families, so the committee cannot enforce family diversity.
    ThinProviderPool {
        /// The number of distinct families configured.
        family_count: usize,
    },
    /// A deprecated field was present in the file and was ignored.
    DeprecatedField {
        /// The field's name.
        field: String,
        /// What to use instead.
        suggestion: String,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeWaitTimeout { secs } => write!(f, "CASE_WAIT_TIMEOUT of {secs}s is unusually large"),
            Self::ThinProviderPool { family_count } => {
                write!(f, "COMMITTEE_PROVIDER_POOL has only {family_count} distinct families; diversity selection needs at least 3")
            }
            Self::DeprecatedField { field, suggestion } => write!(f, "field `{field}` is deprecated; use `{suggestion}` instead"),
        }
    }
}

const MAX_REASONABLE_WAIT_TIMEOUT_SECS: u64 = 30 * 24 * 3600;
const DEFAULT_CASE_WAIT_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_cap_ms() -> u64 {
    16_000
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_customer_fuzzy_high() -> f64 {
    0.75
}
fn default_customer_fuzzy_low() -> f64 {
    0.60
}
fn default_case_wait_timeout_secs() -> u64 {
    DEFAULT_CASE_WAIT_TIMEOUT_SECS
}
fn default_true() -> bool {
    true
}
fn default_committee_ambiguity_margin() -> f64 {
    0.1
}
fn default_catalog_cache_ttl_secs() -> u64 {
    3600
}
fn default_lease_ttl_secs() -> u64 {
    120
}

/// The engine's full configuration, built from the enumerated environment
/// variables in spec section 6 and whatever TOML file it overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CaseEngineConfig {
    /// `STATE_STORE_ENDPOINT`.
    pub state_store_endpoint: String,
    /// `BLOB_ENDPOINT`.
    pub blob_endpoint: String,
    /// `SECRET_STORE_URL`.
    pub secret_store_url: String,
    /// `EXTRACTOR_STRICT_FORMULAS`, default `true`.
    #[serde(default = "default_true")]
    pub extractor_strict_formulas: bool,
    /// `COMMITTEE_PROVIDER_POOL`: the configured provider identifiers,
    /// each `{vendor_family}/{model}`.
    #[serde(default)]
    pub committee_provider_pool: Vec<String>,
    /// `COMMITTEE_WEIGHTS_FILE`: path to the signed per-provider weights
    /// file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committee_weights_file: Option<String>,
    /// Ambiguity margin for committee field winners, default `0.1`.
    #[serde(default = "default_committee_ambiguity_margin")]
    pub committee_ambiguity_margin: f64,
    /// `RESOLVER_FUZZY_ENABLED`, default `false` (applies to item
    /// resolution; customer resolution always attempts fuzzy matching).
    #[serde(default)]
    pub resolver_fuzzy_enabled: bool,
    /// `CUSTOMER_FUZZY_HIGH`, default `0.75`.
    #[serde(default = "default_customer_fuzzy_high")]
    pub customer_fuzzy_high: f64,
    /// The low confidence threshold below which a customer match is
    /// `not_found`, default `0.60`. Not independently set by an
    /// environment variable in the current deployment surface; kept
    /// configurable for golden-set tuning.
    #[serde(default = "default_customer_fuzzy_low")]
    pub customer_fuzzy_low: f64,
    /// `RETRY_BASE_MS`, default `1000`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// `RETRY_CAP_MS`, default `16000`.
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    /// `RETRY_MAX_ATTEMPTS`, default `5`.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// `CASE_WAIT_TIMEOUT`, in seconds, default 7 days.
    #[serde(default = "default_case_wait_timeout_secs")]
    pub case_wait_timeout_secs: u64,
    /// Catalog cache TTL, in seconds, default 1 hour.
    #[serde(default = "default_catalog_cache_ttl_secs")]
    pub catalog_cache_ttl_secs: u64,
    /// `LEASE_TTL_SECS`: how long a worker's claim on a case lasts before
    /// it must renew, default 120s.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for CaseEngineConfig {
    fn default() -> Self {
        Self {
            state_store_endpoint: String::new(),
            blob_endpoint: String::new(),
            secret_store_url: String::new(),
            extractor_strict_formulas: default_true(),
            committee_provider_pool: Vec::new(),
            committee_weights_file: None,
            committee_ambiguity_margin: default_committee_ambiguity_margin(),
            resolver_fuzzy_enabled: false,
            customer_fuzzy_high: default_customer_fuzzy_high(),
            customer_fuzzy_low: default_customer_fuzzy_low(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            case_wait_timeout_secs: default_case_wait_timeout_secs(),
            catalog_cache_ttl_secs: default_catalog_cache_ttl_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl CaseEngineConfig {
    /// Loads configuration from a TOML file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
    }

    /// Overlays the enumerated environment variables (spec section 6) onto
    /// `self`, in place. Unset variables leave the existing value
    /// untouched.
    pub fn apply_env_overlay(&mut self, env: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        macro_rules! overlay_string {
            ($field:ident, $key:literal) => {
                if let Some(value) = env.get($key) {
                    self.$field = value.clone();
                }
            };
        }
        macro_rules! overlay_parsed {
            ($field:ident, $key:literal) => {
                if let Some(value) = env.get($key) {
                    self.$field = value.parse().map_err(|_| ConfigError::EnvOverlayError {
                        field: $key.to_string(),
                        reason: format!("could not parse `{value}`"),
                    })?;
                }
            };
        }

        overlay_string!(state_store_endpoint, "STATE_STORE_ENDPOINT");
        overlay_string!(blob_endpoint, "BLOB_ENDPOINT");
        overlay_string!(secret_store_url, "SECRET_STORE_URL");
        overlay_parsed!(extractor_strict_formulas, "EXTRACTOR_STRICT_FORMULAS");
        if let Some(value) = env.get("COMMITTEE_PROVIDER_POOL") {
            self.committee_provider_pool = value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Some(value) = env.get("COMMITTEE_WEIGHTS_FILE") {
            self.committee_weights_file = Some(value.clone());
        }
        overlay_parsed!(resolver_fuzzy_enabled, "RESOLVER_FUZZY_ENABLED");
        overlay_parsed!(customer_fuzzy_high, "CUSTOMER_FUZZY_HIGH");
        overlay_parsed!(retry_base_ms, "RETRY_BASE_MS");
        overlay_parsed!(retry_cap_ms, "RETRY_CAP_MS");
        overlay_parsed!(retry_max_attempts, "RETRY_MAX_ATTEMPTS");
        overlay_parsed!(case_wait_timeout_secs, "CASE_WAIT_TIMEOUT");
        overlay_parsed!(lease_ttl_secs, "LEASE_TTL_SECS");
        Ok(())
    }

    /// Validates the configuration, returning advisory [`ConfigWarning`]s
    /// for anything unusual but not fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any required endpoint is
    /// empty or the retry/threshold values are out of range.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        if self.state_store_endpoint.is_empty() {
            reasons.push("state_store_endpoint must not be empty".to_string());
        }
        if self.blob_endpoint.is_empty() {
            reasons.push("blob_endpoint must not be empty".to_string());
        }
        if self.secret_store_url.is_empty() {
            reasons.push("secret_store_url must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.customer_fuzzy_high) {
            reasons.push("customer_fuzzy_high must be in [0,1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.customer_fuzzy_low) {
            reasons.push("customer_fuzzy_low must be in [0,1]".to_string());
        }
        if self.customer_fuzzy_low > self.customer_fuzzy_high {
            reasons.push("customer_fuzzy_low must not exceed customer_fuzzy_high".to_string());
        }
        if self.retry_max_attempts == 0 {
            reasons.push("retry_max_attempts must be at least 1".to_string());
        }
        if self.retry_base_ms > self.retry_cap_ms {
            reasons.push("retry_base_ms must not exceed retry_cap_ms".to_string());
        }
        if !reasons.is_empty() {
            return Err(ConfigError::ValidationError { reasons });
        }

        let mut warnings = Vec::new();
        if self.case_wait_timeout_secs > MAX_REASONABLE_WAIT_TIMEOUT_SECS {
            warnings.push(ConfigWarning::LargeWaitTimeout {
                secs: self.case_wait_timeout_secs,
            });
        }
        let family_count = self
            .committee_provider_pool
            .iter()
            .filter_map(|entry| entry.split('/').next())
            .collect::<std::collections::HashSet<_>>()
            .len();
        if family_count < 3 {
            warnings.push(ConfigWarning::ThinProviderPool { family_count });
        }
        Ok(warnings)
    }
}
