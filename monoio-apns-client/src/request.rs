use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{header::HOST, request::Builder, HeaderValue, Method, Request, Version};
use smol_str::SmolStr;

use crate::client::key::Endpoint;

pub const APNS_ID: &str = "apns-id";
pub const APNS_TOPIC: &str = "apns-topic";
pub const APNS_EXPIRATION: &str = "apns-expiration";
pub const APNS_PRIORITY: &str = "apns-priority";
pub const APNS_COLLAPSE_ID: &str = "apns-collapse-id";
pub const APNS_PUSH_TYPE: &str = "apns-push-type";

/// Delivery priority, sent as `apns-priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Immediate,
    Conserve,
    Low,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Immediate => 10,
            Self::Conserve => 5,
            Self::Low => 1,
        }
    }
}

/// Kind of push, sent as `apns-push-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
    Location,
    Voip,
    Complication,
    FileProvider,
    Mdm,
    LiveActivity,
    PushToTalk,
}

impl PushType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
            Self::Location => "location",
            Self::Voip => "voip",
            Self::Complication => "complication",
            Self::FileProvider => "fileprovider",
            Self::Mdm => "mdm",
            Self::LiveActivity => "liveactivity",
            Self::PushToTalk => "pushtotalk",
        }
    }
}

/// One notification for one device.
///
/// The notification id must be unique among the notifications in flight on a
/// connection; [`NotificationRequest::new`] generates a random one.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    device_token: SmolStr,
    message: serde_json::Value,
    notification_id: String,
    time_to_live: Option<u64>,
    priority: Option<Priority>,
    collapse_key: Option<String>,
    push_type: Option<PushType>,
}

impl NotificationRequest {
    pub fn new(device_token: impl Into<SmolStr>, message: serde_json::Value) -> Self {
        Self {
            device_token: device_token.into(),
            message,
            notification_id: uuid::Uuid::new_v4().to_string(),
            time_to_live: None,
            priority: None,
            collapse_key: None,
            push_type: None,
        }
    }

    pub fn notification_id(mut self, id: impl Into<String>) -> Self {
        self.notification_id = id.into();
        self
    }

    /// Seconds the gateway keeps retrying delivery.
    pub fn time_to_live(mut self, seconds: u64) -> Self {
        self.time_to_live = Some(seconds);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn collapse_key(mut self, key: impl Into<String>) -> Self {
        self.collapse_key = Some(key.into());
        self
    }

    pub fn push_type(mut self, push_type: PushType) -> Self {
        self.push_type = Some(push_type);
        self
    }

    pub fn id(&self) -> &str {
        &self.notification_id
    }

    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    pub fn message(&self) -> &serde_json::Value {
        &self.message
    }

    /// Request head for the gateway. `authorization` is added as is.
    pub(crate) fn build_head(
        &self,
        endpoint: &Endpoint,
        topic: Option<&str>,
        authorization: Option<HeaderValue>,
    ) -> crate::Result<Request<()>> {
        let uri = format!("https://{}/3/device/{}", endpoint.host, self.device_token);
        let mut builder = Builder::new()
            .method(Method::POST)
            .uri(uri)
            .version(Version::HTTP_2)
            .header(HOST, endpoint.host.as_str())
            .header(APNS_ID, self.notification_id.as_str());
        if let Some(topic) = topic {
            builder = builder.header(APNS_TOPIC, topic);
        }
        if let Some(ttl) = self.time_to_live {
            builder = builder.header(APNS_EXPIRATION, unix_now().saturating_add(ttl));
        }
        if let Some(priority) = self.priority {
            builder = builder.header(APNS_PRIORITY, u32::from(priority.as_u8()));
        }
        if let Some(collapse_key) = &self.collapse_key {
            builder = builder.header(APNS_COLLAPSE_ID, collapse_key.as_str());
        }
        if let Some(push_type) = self.push_type {
            builder = builder.header(APNS_PUSH_TYPE, push_type.as_str());
        }
        if let Some(authorization) = authorization {
            builder = builder.header(http::header::AUTHORIZATION, authorization);
        }
        Ok(builder.body(())?)
    }

    pub(crate) fn build_body(&self) -> crate::Result<Bytes> {
        Ok(serde_json::to_vec(&self.message)?.into())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn minimal_head() {
        let request = NotificationRequest::new("abc", json!({"aps": {"alert": "hi"}}))
            .notification_id("n1");
        let head = request
            .build_head(&Endpoint::production(), Some("com.example.app"), None)
            .expect("valid head");

        assert_eq!(head.method(), Method::POST);
        assert_eq!(head.uri().scheme_str(), Some("https"));
        assert_eq!(head.uri().path(), "/3/device/abc");
        assert_eq!(head.headers()[HOST], "api.push.apple.com");
        assert_eq!(head.headers()[APNS_ID], "n1");
        assert_eq!(head.headers()[APNS_TOPIC], "com.example.app");
        assert!(!head.headers().contains_key(APNS_EXPIRATION));
        assert!(!head.headers().contains_key(APNS_PRIORITY));
        assert!(!head.headers().contains_key(http::header::AUTHORIZATION));
    }

    #[test]
    fn optional_headers() {
        let request = NotificationRequest::new("abc", json!({}))
            .notification_id("n2")
            .time_to_live(60)
            .priority(Priority::Conserve)
            .collapse_key("score")
            .push_type(PushType::Background);
        let before = unix_now();
        let head = request
            .build_head(
                &Endpoint::development(),
                None,
                Some(HeaderValue::from_static("bearer token")),
            )
            .expect("valid head");
        let headers = head.headers();

        let expiration: u64 = headers[APNS_EXPIRATION]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(expiration >= before + 60 && expiration <= unix_now() + 60);
        assert_eq!(headers[APNS_PRIORITY], "5");
        assert_eq!(headers[APNS_COLLAPSE_ID], "score");
        assert_eq!(headers[APNS_PUSH_TYPE], "background");
        assert_eq!(headers[http::header::AUTHORIZATION], "bearer token");
        assert_eq!(headers[HOST], "api.development.push.apple.com");
        assert!(!headers.contains_key(APNS_TOPIC));
    }

    #[test]
    fn generated_ids_differ() {
        let a = NotificationRequest::new("t", json!({}));
        let b = NotificationRequest::new("t", json!({}));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn body_is_json_payload() {
        let request = NotificationRequest::new("t", json!({"alert": "héllo"}));
        let body = request.build_body().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, json!({"alert": "héllo"}));
    }
}
