//! The SolarNetwork JSON response envelope.

use serde::{Deserialize, Serialize};

/// Response envelope wrapping every SolarNetwork API result.
///
/// ```json
/// {"success": true, "data": { ... }}
/// {"success": false, "message": "Access denied", "code": "SEC.001"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    #[serde(default)]
    pub success: bool,
    /// The result payload.
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// An error or informational message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// A machine readable error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    /// A successful response carrying `data`.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            code,
        }
    }
}

/// Format an API error message, appending the code in parentheses when present.
///
/// # Examples
///
/// ```
/// use solarnet_core::response::describe_error;
///
/// assert_eq!(describe_error("Denied", Some("SEC.001")), "Denied (SEC.001)");
/// assert_eq!(describe_error("Denied", None), "Denied");
/// ```
#[must_use]
pub fn describe_error(message: &str, code: Option<&str>) -> String {
    match code {
        Some(code) if !code.is_empty() => format!("{message} ({code})"),
        _ => message.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_deserialize_failure_without_data() {
        let resp: ApiResponse<serde_json::Value> =
            serde_json::from_str(r#"{"success":false,"message":"Nope","code":"X.1"}"#).unwrap();
        assert!(!resp.success);
        assert!(resp.data.is_none());
        assert_eq!(resp.code.as_deref(), Some("X.1"));
    }

    #[test]
    fn test_should_deserialize_success_without_data() {
        let resp: ApiResponse<serde_json::Value> =
            serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(resp.success);
        assert!(resp.data.is_none());
    }
}
