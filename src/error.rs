// Error taxonomy for Flow Monitor
//
// Every failure the library surfaces is one of these kinds. Errors cross the
// message bridge as their display string, so `from_wire` must stay the
// inverse of the `#[error]` formats below.

use thiserror::Error;

/// Maximum length of a response body excerpt kept for diagnostics
pub const EXCERPT_LIMIT: usize = 240;

/// Errors produced while scanning flows or searching run history
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowMonitorError {
    /// Missing or invalid credentials; the user has to fix the configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token acquisition or interactive sign-in failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Non-2xx response, or the request never produced a response
    #[error("{}", format_http(.status, .message))]
    Http { status: Option<u16>, message: String },

    /// Body was not JSON or did not have the expected shape
    #[error("Unexpected response format: {0}")]
    Format(String),

    /// A bridge request was not answered in time
    #[error("Timeout after {millis}ms for {request}")]
    Timeout { request: String, millis: u64 },
}

fn format_http(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("HTTP {}: {}", code, message),
        None => format!("HTTP request failed: {}", message),
    }
}

/// Convenience result alias used across the crate
pub type Result<T> = std::result::Result<T, FlowMonitorError>;

impl FlowMonitorError {
    /// Build an HTTP error from a status code and the raw response body
    pub fn http(status: u16, body: &str) -> Self {
        FlowMonitorError::Http {
            status: Some(status),
            message: excerpt(body),
        }
    }

    /// Whether the user must (re-)enter credentials to continue
    pub fn needs_configuration(&self) -> bool {
        match self {
            FlowMonitorError::Config(_) => true,
            FlowMonitorError::Auth(message) => message.contains("AADSTS50194"),
            _ => false,
        }
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            FlowMonitorError::Config(_) => {
                "Flow Monitor is not set up yet. Enter your Azure AD client ID (and tenant ID for single-tenant apps) and try again."
                    .to_string()
            }
            FlowMonitorError::Auth(_) if self.needs_configuration() => {
                "This app registration is single-tenant. Enter your tenant ID and try again."
                    .to_string()
            }
            FlowMonitorError::Auth(_) => {
                "Sign-in failed. Retry, or check your client and tenant settings.".to_string()
            }
            other => excerpt(&other.to_string()),
        }
    }

    /// Rebuild an error from the string form it had on the other side of the bridge
    pub fn from_wire(message: &str) -> Self {
        if let Some(rest) = message.strip_prefix("Configuration error: ") {
            return FlowMonitorError::Config(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("Authentication failed: ") {
            return FlowMonitorError::Auth(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("Unexpected response format: ") {
            return FlowMonitorError::Format(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("HTTP request failed: ") {
            return FlowMonitorError::Http {
                status: None,
                message: rest.to_string(),
            };
        }
        if let Some(rest) = message.strip_prefix("HTTP ") {
            if let Some((code, body)) = rest.split_once(": ") {
                if let Ok(status) = code.parse::<u16>() {
                    return FlowMonitorError::Http {
                        status: Some(status),
                        message: body.to_string(),
                    };
                }
            }
        }
        if let Some(rest) = message.strip_prefix("Timeout after ") {
            if let Some((millis, request)) = rest.split_once("ms for ") {
                if let Ok(millis) = millis.parse::<u64>() {
                    return FlowMonitorError::Timeout {
                        request: request.to_string(),
                        millis,
                    };
                }
            }
        }
        if message.contains("not configured") {
            return FlowMonitorError::Config(message.to_string());
        }
        FlowMonitorError::Http {
            status: None,
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for FlowMonitorError {
    fn from(err: reqwest::Error) -> Self {
        FlowMonitorError::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for FlowMonitorError {
    fn from(err: serde_json::Error) -> Self {
        FlowMonitorError::Format(err.to_string())
    }
}

/// Truncate text to `EXCERPT_LIMIT` characters
pub fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_truncates_body() {
        let body = "x".repeat(1000);
        let err = FlowMonitorError::http(500, &body);
        match &err {
            FlowMonitorError::Http { status, message } => {
                assert_eq!(*status, Some(500));
                assert_eq!(message.len(), EXCERPT_LIMIT);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().starts_with("HTTP 500: "));
    }

    #[test]
    fn test_wire_round_trip_keeps_kind() {
        let errors = vec![
            FlowMonitorError::Config("Client ID not configured".to_string()),
            FlowMonitorError::Auth("Azure AD Error: access_denied".to_string()),
            FlowMonitorError::http(404, "not found"),
            FlowMonitorError::Format("Non-JSON response".to_string()),
            FlowMonitorError::Timeout {
                request: "LIST_RUNS".to_string(),
                millis: 30000,
            },
            FlowMonitorError::Http {
                status: None,
                message: "connection refused".to_string(),
            },
        ];
        for err in errors {
            assert_eq!(FlowMonitorError::from_wire(&err.to_string()), err);
        }
    }

    #[test]
    fn test_needs_configuration() {
        assert!(FlowMonitorError::Config("missing".to_string()).needs_configuration());
        assert!(FlowMonitorError::Auth("AADSTS50194: single tenant".to_string())
            .needs_configuration());
        assert!(!FlowMonitorError::Auth("denied".to_string()).needs_configuration());
        assert!(!FlowMonitorError::http(500, "boom").needs_configuration());
    }

    #[test]
    fn test_user_message_is_bounded() {
        let err = FlowMonitorError::Format("y".repeat(600));
        assert!(err.user_message().chars().count() <= EXCERPT_LIMIT);
        let config = FlowMonitorError::Config("missing".to_string());
        assert!(config.user_message().contains("client ID"));
    }
}
