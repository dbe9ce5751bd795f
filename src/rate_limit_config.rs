use serde::{Deserialize, Serialize};
use crate::algorithms::MAX_WINDOW;
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Rate limit algorithm enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindow,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::TokenBucket => "token-bucket",
            AlgorithmKind::LeakyBucket => "leaky-bucket",
            AlgorithmKind::FixedWindow => "fixed-window",
            AlgorithmKind::SlidingWindow => "sliding-window",
        }
    }

    /// Whether the algorithm is configured by `rate`/`capacity` rather than
    /// by `limit`/`window`.
    pub fn is_bucket(&self) -> bool {
        matches!(self, AlgorithmKind::TokenBucket | AlgorithmKind::LeakyBucket)
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for the single limiter a process runs.
///
/// Bucket algorithms read `rate` and `capacity`; window algorithms read
/// `limit` and `window`. All fields are validated regardless so a settings
/// value can be switched between algorithms safely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LimiterSettings {
    pub algorithm: AlgorithmKind,

    /// Tokens (or leaked requests) per second
    #[validate(range(exclusive_min = 0.0))]
    pub rate: f64,

    #[validate(range(min = 1))]
    pub capacity: u64,

    /// Requests allowed per window
    #[validate(range(min = 1))]
    pub limit: u64,

    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_window"))]
    pub window: Duration,
}

fn validate_window(window: &Duration) -> Result<(), ValidationError> {
    if window.as_millis() == 0 {
        return Err(ValidationError::new("window_too_short"));
    }
    if *window > MAX_WINDOW {
        return Err(ValidationError::new("window_too_long"));
    }
    Ok(())
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::TokenBucket,
            rate: 0.5,
            capacity: 3,
            limit: 60,
            window: Duration::from_secs(60),
        }
    }
}

impl LimiterSettings {
    /// Value reported as the maximum number of requests.
    pub fn request_limit(&self) -> u64 {
        if self.algorithm.is_bucket() {
            self.capacity
        } else {
            self.limit
        }
    }
}
