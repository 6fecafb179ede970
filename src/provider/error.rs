//! Errors returned by the Linode API client

use thiserror::Error;

use super::types::ApiErrorBody;

/// Failure of a single Linode API request
#[derive(Debug, Error)]
pub enum LinodeError {
    /// The API answered with a non-2xx status
    #[error("[{status}] {}", render_reasons(.reasons))]
    Api {
        /// HTTP status code
        status: u16,
        /// Reasons from the error body
        reasons: Vec<String>,
    },

    /// The request never produced a response (connect, TLS, timeout)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A 2xx response body could not be decoded
    #[error("unexpected response body: {0}")]
    Decode(String),
}

fn render_reasons(reasons: &[String]) -> String {
    if reasons.is_empty() {
        "no reason given".to_string()
    } else {
        reasons.join("; ")
    }
}

impl LinodeError {
    /// Build an API error from a status code and the raw response body
    pub fn from_response(status: u16, body: &str) -> Self {
        let reasons = serde_json::from_str::<ApiErrorBody>(body)
            .map(|b| b.errors.iter().map(|r| r.render()).collect())
            .unwrap_or_else(|_| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    vec![trimmed.to_string()]
                }
            });
        Self::Api { status, reasons }
    }

    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            LinodeError::Api { status, .. } => Some(*status),
            LinodeError::Transport(e) => e.status().map(|s| s.as_u16()),
            LinodeError::Decode(_) => None,
        }
    }

    /// True for HTTP 404
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// True for failures that may clear on their own
    pub fn is_transient(&self) -> bool {
        match self {
            LinodeError::Api { status, .. } => *status >= 500 || *status == 429,
            LinodeError::Transport(e) => !e.is_decode() && !e.is_builder(),
            LinodeError::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structured_error_body() {
        let body = r#"{"errors": [{"reason": "Not found"}, {"reason": "Invalid", "field": "count"}]}"#;
        let err = LinodeError::from_response(404, body);
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "[404] Not found; count: Invalid");
    }

    #[test]
    fn keeps_raw_body_when_not_json() {
        let err = LinodeError::from_response(502, "<html>bad gateway</html>");
        assert!(err.is_transient());
        assert!(err.to_string().contains("bad gateway"));

        let err = LinodeError::from_response(503, "  ");
        assert_eq!(err.to_string(), "[503] no reason given");
    }

    #[test]
    fn rate_limiting_is_transient() {
        assert!(LinodeError::from_response(429, "{}").is_transient());
        assert!(!LinodeError::from_response(400, "{}").is_transient());
        assert!(!LinodeError::Decode("eof".to_string()).is_transient());
    }
}
