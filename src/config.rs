use crate::rate_limit_config::{AlgorithmKind, LimiterSettings};
use clap::Parser;
use humantime_serde::re::humantime;
use std::net::SocketAddr;
use std::time::Duration;

/// Process configuration, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "throttler", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; empty runs with an in-process store
    #[arg(long, env = "REDIS_URL", default_value = "")]
    pub redis_url: String,

    /// Rate limiting algorithm
    #[arg(long, env = "ALGORITHM", value_enum, default_value_t = AlgorithmKind::TokenBucket)]
    pub algorithm: AlgorithmKind,

    /// Bucket refill/leak rate per second
    #[arg(long, env = "RATE", default_value_t = 0.5)]
    pub rate: f64,

    /// Bucket capacity
    #[arg(long, env = "CAPACITY", default_value_t = 3)]
    pub capacity: u64,

    /// Requests allowed per window
    #[arg(long, env = "LIMIT", default_value_t = 60)]
    pub limit: u64,

    /// Window length, e.g. `60s` or `1m`
    #[arg(long, env = "WINDOW", default_value = "60s", value_parser = humantime::parse_duration)]
    pub window: Duration,

    /// Headers whose values identify a client, comma separated
    #[arg(long, env = "KEY_HEADERS", value_delimiter = ',', default_value = "X-Forwarded-For")]
    pub key_headers: Vec<String>,

    /// Deadline for a single rate limit decision
    #[arg(long, env = "STORE_TIMEOUT", default_value = "500ms", value_parser = humantime::parse_duration)]
    pub store_timeout: Duration,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from command line flags and environment variables
    pub fn from_env() -> Self {
        Config::parse()
    }

    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings {
            algorithm: self.algorithm,
            rate: self.rate,
            capacity: self.capacity,
            limit: self.limit,
            window: self.window,
        }
    }

    pub fn uses_redis(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }
}
