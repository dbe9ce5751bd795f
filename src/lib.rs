pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod key_generator;
pub mod memory_store;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis;
pub mod response;
pub mod server;
pub mod store;

pub use algorithms::{RateKey, State};
pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use rate_limit_config::{AlgorithmKind, LimiterSettings};
pub use rate_limiter::{Algorithm, Decision, RateLimiter, Request};
pub use server::create_app;
pub use store::CounterStore;
