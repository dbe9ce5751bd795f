use crate::rate_limit_config::LimiterSettings;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store: String,
    pub store_connected: bool,
}

impl HealthResponse {
    pub fn new(store: &str, store_connected: bool) -> Self {
        Self {
            status: if store_connected { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
            store_connected,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub request_limit: u64,
    #[serde(flatten)]
    pub settings: LimiterSettings,
}

impl LimitsResponse {
    pub fn new(settings: &LimiterSettings) -> Self {
        Self {
            request_limit: settings.request_limit(),
            settings: settings.clone(),
        }
    }
}
