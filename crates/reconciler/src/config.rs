//! File and environment configuration for controllers.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::finalizer::DEFAULT_FINALIZER_PREFIX;
use crate::outcome::DEFAULT_REQUEUE_AFTER;

/// Controller settings loadable from TOML.
///
/// ```toml
/// requeue_after_secs = 5
/// finalizer_prefix = "example.io"
/// max_concurrent_reconciles = 4
///
/// [rate_limit]
/// qps = 10
/// burst = 20
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Delay of fixed-interval requeues.
    #[serde(
        rename = "requeue_after_secs",
        with = "duration_secs",
        default = "default_requeue_after"
    )]
    pub requeue_after: Duration,

    /// Prefix of the finalizer marker.
    #[serde(default = "default_finalizer_prefix")]
    pub finalizer_prefix: String,

    /// Never add the finalizer marker.
    #[serde(default)]
    pub skip_finalizer: bool,

    /// Never add or remove the finalizer marker.
    #[serde(default)]
    pub skip_patch_finalizer: bool,

    /// Never write conditions back to the store.
    #[serde(default)]
    pub skip_status_sync: bool,

    /// Dispatcher passthrough.
    #[serde(flatten)]
    pub dispatch: DispatchOptions,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_after: default_requeue_after(),
            finalizer_prefix: default_finalizer_prefix(),
            skip_finalizer: false,
            skip_patch_finalizer: false,
            skip_status_sync: false,
            dispatch: DispatchOptions::default(),
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Apply `CONVERGE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(secs) = std::env::var("CONVERGE_REQUEUE_AFTER_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::config(format!("CONVERGE_REQUEUE_AFTER_SECS: {e}")))?;
            self.requeue_after = Duration::from_secs(secs);
        }
        if let Ok(prefix) = std::env::var("CONVERGE_FINALIZER_PREFIX") {
            self.finalizer_prefix = prefix;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.requeue_after.is_zero() {
            return Err(Error::config("requeue_after_secs must be positive"));
        }
        if self.finalizer_prefix.is_empty() || self.finalizer_prefix.contains('/') {
            return Err(Error::config(format!(
                "finalizer_prefix '{}' must be non-empty and contain no '/'",
                self.finalizer_prefix
            )));
        }
        self.dispatch.validate()
    }
}

/// Settings passed through to the dispatcher untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Upper bound on keys reconciled in parallel.
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Token-bucket limit on reconcile starts.
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            rate_limit: None,
        }
    }
}

impl DispatchOptions {
    /// Set the concurrency bound.
    #[must_use]
    pub const fn max_concurrent_reconciles(mut self, max: usize) -> Self {
        self.max_concurrent_reconciles = max;
        self
    }

    /// Set the rate limit.
    #[must_use]
    pub const fn rate_limit(mut self, qps: u32, burst: u32) -> Self {
        self.rate_limit = Some(RateLimit { qps, burst });
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::config("max_concurrent_reconciles must be at least 1"));
        }
        match self.rate_limit {
            Some(RateLimit { qps: 0, .. }) => Err(Error::config("rate_limit.qps must be positive")),
            Some(RateLimit { burst: 0, .. }) => {
                Err(Error::config("rate_limit.burst must be positive"))
            }
            _ => Ok(()),
        }
    }
}

/// Token-bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub qps: u32,
    pub burst: u32,
}

const fn default_requeue_after() -> Duration {
    DEFAULT_REQUEUE_AFTER
}

fn default_finalizer_prefix() -> String {
    DEFAULT_FINALIZER_PREFIX.to_string()
}

const fn default_max_concurrent_reconciles() -> usize {
    1
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
