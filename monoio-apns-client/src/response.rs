use http::StatusCode;
use serde::Deserialize;

/// Outcome of one notification as reported by the gateway.
///
/// Rejections are data here, not errors: a result with a non-success status
/// carries the gateway's reason in `description`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResult {
    pub notification_id: String,
    pub status: StatusCode,
    pub description: Option<String>,
    /// Last time the token was known valid, for 410 responses (ms since epoch).
    pub timestamp: Option<u64>,
}

impl NotificationResult {
    pub fn new(notification_id: impl Into<String>, status: StatusCode) -> Self {
        Self {
            notification_id: notification_id.into(),
            status,
            description: None,
            timestamp: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// JSON body sent with a rejection.
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl ErrorBody {
    /// None while the body is incomplete or does not name a reason.
    pub(crate) fn parse(data: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Self>(data) {
            Ok(body) if !body.reason.is_empty() => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reason() {
        let body = ErrorBody::parse(br#"{"reason":"BadDeviceToken"}"#).unwrap();
        assert_eq!(body.reason, "BadDeviceToken");
        assert_eq!(body.timestamp, None);
    }

    #[test]
    fn parse_unregistered_timestamp() {
        let body = ErrorBody::parse(br#"{"reason":"Unregistered","timestamp":1700000000000}"#)
            .unwrap();
        assert_eq!(body.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn partial_or_reasonless_bodies() {
        assert_eq!(ErrorBody::parse(br#"{"reason":"Bad"#), None);
        assert_eq!(ErrorBody::parse(br#"{}"#), None);
        assert_eq!(ErrorBody::parse(b"not json"), None);
    }

    #[test]
    fn success_status() {
        assert!(NotificationResult::new("n1", StatusCode::OK).is_successful());
        assert!(!NotificationResult::new("n1", StatusCode::BAD_REQUEST).is_successful());
    }
}
