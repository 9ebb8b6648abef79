//! Scan settings loaded from a TOML file of named profiles.
//!
//! Resolution order is built-in defaults, then the selected profile, then
//! [`SettingsOverride`] values (the CLI flags).
//!
//! ```toml
//! default_profile = "hypha"
//!
//! [profiles.hypha]
//! origin = "29983"
//! categories = ["closedprops", "stagingprop", "proposal"]
//! consistency_runs = 3
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rpc::{TableTarget, DEFAULT_CONTRACT, DEFAULT_ENDPOINT};
use crate::scan::{
    Backoff, CursorSeed, RetryPolicy, ScanOptions, ScanRequest, DEFAULT_INTER_BATCH_DELAY,
    DEFAULT_MAX_BATCHES, DEFAULT_PAGE_SIZE,
};
use crate::types::{CategoryFilter, Key, NodeId};
use crate::verify::{ConsistencyVerifier, DEFAULT_INTER_RUN_DELAY};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "EDGESCAN_CONFIG";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Problems loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A profile was named that the file does not define.
    #[error("profile '{name}' not found")]
    ProfileNotFound {
        /// Missing profile.
        name: String,
    },
    /// A setting holds a value outside its domain.
    #[error("{field} value '{value}' is invalid: {reason}")]
    InvalidValue {
        /// Offending setting.
        field: &'static str,
        /// Value as given.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
    /// No origin node was configured.
    #[error("no origin node configured; pass --origin or set `origin` in the profile")]
    MissingOrigin,
}

/// Fully resolved scan settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanSettings {
    /// Profile the settings came from, if any.
    pub profile: Option<String>,
    /// Node base URL.
    pub endpoint: String,
    /// Contract account (code and scope).
    pub contract: String,
    /// DAO node whose edges are collected.
    pub origin: Option<NodeId>,
    /// Category allowlist.
    pub categories: CategoryFilter,
    /// Rows per page.
    pub page_size: u32,
    /// Page cap per scan.
    pub max_batches: u32,
    /// Pause between pages, in milliseconds.
    pub inter_batch_delay_ms: u64,
    /// Retries per page.
    pub max_retries: u32,
    /// Base retry delay, in milliseconds.
    pub retry_delay_ms: u64,
    /// Retry delay growth.
    pub backoff: Backoff,
    /// Per-request timeout, in milliseconds.
    pub request_timeout_ms: u64,
    /// Full scans performed by `verify`.
    pub consistency_runs: usize,
    /// Pause between sequential verification runs, in milliseconds.
    pub inter_run_delay_ms: u64,
    /// Starting position of the first page.
    pub cursor_seed: CursorSeed,
    /// Bound every page to the origin node.
    pub bound_to_origin: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            profile: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            contract: DEFAULT_CONTRACT.to_string(),
            origin: None,
            categories: CategoryFilter::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_batches: DEFAULT_MAX_BATCHES,
            inter_batch_delay_ms: millis(DEFAULT_INTER_BATCH_DELAY),
            max_retries: retry.max_retries,
            retry_delay_ms: millis(retry.base_delay),
            backoff: retry.backoff,
            request_timeout_ms: millis(DEFAULT_REQUEST_TIMEOUT),
            consistency_runs: 1,
            inter_run_delay_ms: millis(DEFAULT_INTER_RUN_DELAY),
            cursor_seed: CursorSeed::default(),
            bound_to_origin: false,
        }
    }
}

impl ScanSettings {
    /// Applies command-line overrides on top of these settings.
    pub fn apply(&mut self, overrides: &SettingsOverride) {
        if let Some(endpoint) = &overrides.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(contract) = &overrides.contract {
            self.contract = contract.clone();
        }
        if let Some(origin) = &overrides.origin {
            self.origin = Some(origin.clone());
        }
        if let Some(categories) = &overrides.categories {
            self.categories = categories.clone();
        }
        if let Some(page_size) = overrides.page_size {
            self.page_size = page_size;
        }
        if let Some(max_batches) = overrides.max_batches {
            self.max_batches = max_batches;
        }
        if let Some(delay) = overrides.inter_batch_delay_ms {
            self.inter_batch_delay_ms = delay;
        }
        if let Some(retries) = overrides.max_retries {
            self.max_retries = retries;
        }
        if let Some(runs) = overrides.consistency_runs {
            self.consistency_runs = runs;
        }
        if let Some(delay) = overrides.inter_run_delay_ms {
            self.inter_run_delay_ms = delay;
        }
    }

    /// Rejects values no scan can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("page_size", u64::from(self.page_size))?;
        positive("max_batches", u64::from(self.max_batches))?;
        positive("consistency_runs", self.consistency_runs as u64)?;
        if self.endpoint.trim().is_empty() {
            return Err(invalid("endpoint", &self.endpoint, "must not be empty"));
        }
        if self.contract.trim().is_empty() {
            return Err(invalid("contract", &self.contract, "must not be empty"));
        }
        Ok(())
    }

    /// Retry policy described by the settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            backoff: self.backoff,
            ..RetryPolicy::default()
        }
    }

    /// Paging options described by the settings.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::default()
            .page_size(self.page_size)
            .max_batches(self.max_batches)
            .inter_batch_delay(Duration::from_millis(self.inter_batch_delay_ms))
            .retry(self.retry_policy())
    }

    /// Scan target described by the settings. Requires an origin.
    pub fn scan_request(&self) -> Result<ScanRequest, ConfigError> {
        let origin = self.origin.clone().ok_or(ConfigError::MissingOrigin)?;
        let mut request = ScanRequest::new(origin)
            .target(TableTarget::edges(self.contract.clone()))
            .categories(self.categories.clone())
            .seed(self.cursor_seed);
        request.bound_to_origin = self.bound_to_origin;
        Ok(request)
    }

    /// Verifier performing the configured number of runs.
    pub fn verifier(&self) -> ConsistencyVerifier {
        ConsistencyVerifier::new(self.consistency_runs)
            .inter_run_delay(Duration::from_millis(self.inter_run_delay_ms))
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Values given on the command line; `None` keeps the configured value.
#[derive(Clone, Debug, Default)]
#[allow(missing_docs)]
pub struct SettingsOverride {
    pub endpoint: Option<String>,
    pub contract: Option<String>,
    pub origin: Option<NodeId>,
    pub categories: Option<CategoryFilter>,
    pub page_size: Option<u32>,
    pub max_batches: Option<u32>,
    pub inter_batch_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub consistency_runs: Option<usize>,
    pub inter_run_delay_ms: Option<u64>,
}

/// A loaded config file.
#[derive(Debug, Default)]
pub struct EdgescanConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl EdgescanConfig {
    /// Loads the file at `explicit`, `$EDGESCAN_CONFIG` or the default
    /// location, in that order. A missing file is an empty config.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let config = Self { path, data };
        config.check_default_profile()?;
        Ok(config)
    }

    /// Parses a config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let data = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let config = Self { path: None, data };
        config.check_default_profile()?;
        Ok(config)
    }

    /// Location the config was (or would have been) read from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Profile used when none is named.
    pub fn default_profile_name(&self) -> Option<&str> {
        self.data.default_profile.as_deref()
    }

    /// Names of every defined profile.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.data.profiles.keys().map(String::as_str)
    }

    /// Defaults overlaid with `profile`, or with the default profile when
    /// `profile` is `None`.
    pub fn settings(&self, profile: Option<&str>) -> Result<ScanSettings, ConfigError> {
        let mut settings = ScanSettings::default();
        let name = profile.or(self.data.default_profile.as_deref());
        if let Some(name) = name {
            let raw = self
                .data
                .profiles
                .get(name)
                .ok_or_else(|| ConfigError::ProfileNotFound {
                    name: name.to_string(),
                })?;
            overlay(&mut settings, raw)?;
            settings.profile = Some(name.to_string());
        }
        Ok(settings)
    }

    fn check_default_profile(&self) -> Result<(), ConfigError> {
        match self.data.default_profile.as_ref() {
            Some(name) if !self.data.profiles.contains_key(name) => {
                Err(ConfigError::ProfileNotFound { name: name.clone() })
            }
            _ => Ok(()),
        }
    }
}

/// `<config dir>/edgescan/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("edgescan").join("config.toml"))
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn overlay(settings: &mut ScanSettings, raw: &RawProfile) -> Result<(), ConfigError> {
    if let Some(endpoint) = &raw.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(contract) = &raw.contract {
        settings.contract = contract.clone();
    }
    if let Some(origin) = &raw.origin {
        settings.origin = Some(NodeId(origin.clone()));
    }
    if let Some(categories) = &raw.categories {
        let joined = categories.join(",");
        settings.categories = CategoryFilter::parse(&joined)
            .map_err(|reason| invalid("categories", &joined, reason))?;
    }
    if let Some(backoff) = &raw.backoff {
        settings.backoff = parse_backoff(backoff)?;
    }
    if let Some(seed) = &raw.cursor_seed {
        settings.cursor_seed = parse_cursor_seed(seed)?;
    }
    settings.page_size = raw.page_size.unwrap_or(settings.page_size);
    settings.max_batches = raw.max_batches.unwrap_or(settings.max_batches);
    settings.inter_batch_delay_ms = raw
        .inter_batch_delay_ms
        .unwrap_or(settings.inter_batch_delay_ms);
    settings.max_retries = raw.max_retries.unwrap_or(settings.max_retries);
    settings.retry_delay_ms = raw.retry_delay_ms.unwrap_or(settings.retry_delay_ms);
    settings.request_timeout_ms = raw
        .request_timeout_ms
        .unwrap_or(settings.request_timeout_ms);
    settings.consistency_runs = raw.consistency_runs.unwrap_or(settings.consistency_runs);
    settings.inter_run_delay_ms = raw.inter_run_delay_ms.unwrap_or(settings.inter_run_delay_ms);
    settings.bound_to_origin = raw.bound_to_origin.unwrap_or(settings.bound_to_origin);
    Ok(())
}

fn parse_backoff(value: &str) -> Result<Backoff, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fixed" => Ok(Backoff::Fixed),
        "exponential" => Ok(Backoff::Exponential),
        _ => Err(invalid(
            "backoff",
            value,
            "expected 'fixed' or 'exponential'",
        )),
    }
}

fn parse_cursor_seed(value: &str) -> Result<CursorSeed, ConfigError> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "origin" => Ok(CursorSeed::Origin),
        "index_start" => Ok(CursorSeed::IndexStart),
        _ => Err(invalid(
            "cursor_seed",
            value,
            "expected 'origin' or 'index_start'",
        )),
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "0", "must be at least 1"));
    }
    Ok(())
}

fn invalid(field: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    endpoint: Option<String>,
    contract: Option<String>,
    origin: Option<Key>,
    categories: Option<Vec<String>>,
    page_size: Option<u32>,
    max_batches: Option<u32>,
    inter_batch_delay_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    backoff: Option<String>,
    request_timeout_ms: Option<u64>,
    consistency_runs: Option<usize>,
    inter_run_delay_ms: Option<u64>,
    cursor_seed: Option<String>,
    bound_to_origin: Option<bool>,
}
