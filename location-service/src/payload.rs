//! JSON request and reply payloads
//!
//! Every identity speaks the same payload shapes. Replies always carry
//! `returnValue`; fix replies keep the field order of the historical service.

use location_provider::{AccuracyLevel, LocationFix};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Reply sent when serialization itself fails
const FALLBACK_ERROR: &str = r#"{"returnValue":false,"errorCode":3,"errorText":"Internal error"}"#;

/// `errorCode` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    Timeout,
    PositionUnavailable,
    Unknown,
    LocationServiceOff,
    MalformedRequest,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::Timeout => 1,
            ErrorCode::PositionUnavailable => 2,
            ErrorCode::Unknown => 3,
            ErrorCode::LocationServiceOff => 5,
            ErrorCode::MalformedRequest => -1,
        }
    }
}

/// The three-level accuracy vocabulary of inbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyHint {
    High,
    Default,
    Low,
}

impl AccuracyHint {
    /// `1` is high, `3` is low; anything else, including no value, is default
    pub fn from_request(value: Option<i64>) -> Self {
        match value {
            Some(1) => AccuracyHint::High,
            Some(3) => AccuracyHint::Low,
            _ => AccuracyHint::Default,
        }
    }

    pub fn accuracy_level(self) -> AccuracyLevel {
        match self {
            AccuracyHint::High => AccuracyLevel::Exact,
            AccuracyHint::Default => AccuracyLevel::Neighborhood,
            AccuracyHint::Low => AccuracyLevel::City,
        }
    }
}

/// `getCurrentPosition` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PositionRequest {
    pub accuracy: Option<i64>,
    /// Seconds to wait for a fix
    pub timeout: Option<u64>,
}

impl PositionRequest {
    pub fn accuracy_hint(&self) -> AccuracyHint {
        AccuracyHint::from_request(self.accuracy)
    }
}

/// `startTracking` request; no fields are interpreted
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TrackingRequest {}

/// Parse a request payload; an empty payload is the same as `{}`
pub fn parse_request<T>(payload: &str) -> Result<T, ServiceError>
where
    T: DeserializeOwned + Default,
{
    if payload.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(payload)?)
}

/// A position fix on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionReply {
    pub return_value: bool,
    pub error_code: i32,
    pub altitude: f64,
    pub heading: f64,
    pub horiz_accuracy: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: f64,
    pub velocity: f64,
    pub vert_accuracy: f64,
}

impl From<&LocationFix> for PositionReply {
    fn from(fix: &LocationFix) -> Self {
        Self {
            return_value: fix.success,
            error_code: fix.error_code,
            altitude: fix.altitude,
            heading: fix.heading,
            horiz_accuracy: fix.horizontal_accuracy,
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp,
            velocity: fix.velocity,
            vert_accuracy: fix.vertical_accuracy,
        }
    }
}

/// Plain acknowledgement, e.g. of `startTracking`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckReply {
    pub return_value: bool,
}

impl AckReply {
    pub fn ok() -> Self {
        Self { return_value: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub return_value: bool,
    pub error_code: i32,
    pub error_text: String,
}

impl ErrorReply {
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            return_value: false,
            error_code: code.code(),
            error_text: text.into(),
        }
    }
}

impl From<&ServiceError> for ErrorReply {
    fn from(error: &ServiceError) -> Self {
        ErrorReply::new(error.error_code(), error.to_string())
    }
}

/// Serialize a reply, falling back to a generic error reply
pub fn encode<T: Serialize>(reply: &T) -> String {
    match serde_json::to_string(reply) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize reply: {}", e);
            FALLBACK_ERROR.to_string()
        }
    }
}
