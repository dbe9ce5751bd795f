//! Mapping an inbound request to the key it is rate limited under.

use crate::error::{ThrottlerError, ThrottlerResult};
use axum::extract::Request;

/// Derives a rate limit key from an inbound request.
///
/// Implementations may look at headers, path, method or extensions but must
/// not consume the body.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, request: &Request) -> ThrottlerResult<String>;
}

/// Joins the values of a fixed list of headers with `-`.
///
/// Pick headers that uniquely identify a client. A request missing any of
/// them, or carrying only whitespace, cannot be keyed.
#[derive(Debug, Clone)]
pub struct HeaderKeyExtractor {
    headers: Vec<String>,
}

impl HeaderKeyExtractor {
    pub fn new<I, S>(headers: I) -> ThrottlerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers: Vec<String> = headers
            .into_iter()
            .map(Into::into)
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if headers.is_empty() {
            return Err(ThrottlerError::Configuration(
                "at least one key header is required".to_string(),
            ));
        }
        Ok(Self { headers })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl KeyExtractor for HeaderKeyExtractor {
    fn extract(&self, request: &Request) -> ThrottlerResult<String> {
        let mut values = Vec::with_capacity(self.headers.len());
        for name in &self.headers {
            let value = request
                .headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .unwrap_or_default();
            if value.is_empty() {
                return Err(ThrottlerError::KeyExtractionFailed(format!(
                    "the header {} must have a value set",
                    name
                )));
            }
            values.push(value);
        }
        Ok(values.join("-"))
    }
}
