// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns hits, events, errors and log lines into serialized dispatch operations.
//!
//! Serialization never fails the caller: a record that cannot be encoded is sent with an
//! empty body instead.

use bytes::Bytes;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::request_info::RequestInfo;

pub const LOG_PATH: &str = "/api/v1/log";
pub const HIT_PATH: &str = "/api/v1/hit";
pub const EVENT_PATH: &str = "/api/v1/event";
pub const ERROR_PATH: &str = "/api/v1/error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Log,
    Hit,
    Event,
    Error,
}

impl RecordKind {
    pub fn target_path(self) -> &'static str {
        match self {
            RecordKind::Log => LOG_PATH,
            RecordKind::Hit => HIT_PATH,
            RecordKind::Event => EVENT_PATH,
            RecordKind::Error => ERROR_PATH,
        }
    }

    /// Name used for the local file of this kind
    pub fn sink_name(self) -> &'static str {
        match self {
            RecordKind::Log => "logs",
            RecordKind::Hit => "hits",
            RecordKind::Event => "events",
            RecordKind::Error => "errors",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sink_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    PlainText,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::PlainText => "text/plain",
        }
    }
}

/// One serialized record waiting for its single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOperation {
    pub kind: RecordKind,
    pub target_path: &'static str,
    pub content_type: ContentType,
    pub payload: Bytes,
}

impl DispatchOperation {
    fn json(kind: RecordKind, map: Map<String, Value>) -> Self {
        let payload = serde_json::to_vec(&Value::Object(map)).unwrap_or_default();
        DispatchOperation {
            kind,
            target_path: kind.target_path(),
            content_type: ContentType::Json,
            payload: Bytes::from(payload),
        }
    }
}

pub fn build_log(text: impl Into<String>) -> DispatchOperation {
    DispatchOperation {
        kind: RecordKind::Log,
        target_path: LOG_PATH,
        content_type: ContentType::PlainText,
        payload: Bytes::from(text.into()),
    }
}

/// `dur_ms` is only sent for a positive duration, `status` only for failures (>= 400) and
/// `size` only for a non-empty response.
pub fn build_hit(
    info: &RequestInfo,
    status: u16,
    response_size: u64,
    duration: Duration,
) -> DispatchOperation {
    let mut map = info.to_map();
    if !duration.is_zero() {
        map.insert(
            "dur_ms".to_string(),
            Value::from(duration.as_nanos() as f64 / 1_000_000.0),
        );
    }
    if status >= 400 {
        map.insert("status".to_string(), Value::from(status));
    }
    if response_size > 0 {
        map.insert("size".to_string(), Value::from(response_size));
    }
    DispatchOperation::json(RecordKind::Hit, map)
}

/// Request fields win over caller fields of the same name.
pub fn build_event(info: Option<&RequestInfo>, mut fields: Map<String, Value>) -> DispatchOperation {
    if let Some(info) = info {
        info.merge_into(&mut fields);
    }
    DispatchOperation::json(RecordKind::Event, fields)
}

pub fn build_error(info: Option<&RequestInfo>, message: &str) -> DispatchOperation {
    let mut map = info.map(RequestInfo::to_map).unwrap_or_default();
    map.insert("msg".to_string(), Value::from(message));
    DispatchOperation::json(RecordKind::Error, map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info() -> RequestInfo {
        RequestInfo {
            method: "GET".to_string(),
            url: "/index.html".to_string(),
            ip: "1.1.1.1".to_string(),
            user_agent: "curl/8.0".to_string(),
            ..Default::default()
        }
    }

    fn payload_json(op: &DispatchOperation) -> Value {
        serde_json::from_slice(&op.payload).unwrap()
    }

    #[test]
    fn test_build_log() {
        let op = build_log("server started");
        assert_eq!(op.kind, RecordKind::Log);
        assert_eq!(op.target_path, "/api/v1/log");
        assert_eq!(op.content_type.as_str(), "text/plain");
        assert_eq!(op.payload, Bytes::from_static(b"server started"));
    }

    #[test]
    fn test_hit_without_optional_fields() {
        let op = build_hit(&info(), 200, 0, Duration::ZERO);
        assert_eq!(op.target_path, "/api/v1/hit");
        assert_eq!(op.content_type, ContentType::Json);
        assert_eq!(
            payload_json(&op),
            json!({
                "method": "GET",
                "url": "/index.html",
                "ip": "1.1.1.1",
                "user_agent": "curl/8.0",
            })
        );
    }

    #[test]
    fn test_hit_with_all_fields() {
        let op = build_hit(&info(), 404, 512, Duration::from_micros(1500));
        let value = payload_json(&op);
        assert_eq!(value["status"], json!(404));
        assert_eq!(value["size"], json!(512));
        assert_eq!(value["dur_ms"], json!(1.5));
    }

    #[test]
    fn test_hit_status_below_400_omitted() {
        let op = build_hit(&info(), 302, 10, Duration::from_millis(3));
        let value = payload_json(&op);
        assert!(value.get("status").is_none());
        assert_eq!(value["size"], json!(10));
        assert_eq!(value["dur_ms"], json!(3.0));
    }

    #[test]
    fn test_event_merges_request_info() {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("signup"));
        fields.insert("url".to_string(), json!("caller-url"));
        let op = build_event(Some(&info()), fields);
        assert_eq!(op.target_path, "/api/v1/event");
        assert_eq!(
            payload_json(&op),
            json!({
                "name": "signup",
                "method": "GET",
                "url": "/index.html",
                "ip": "1.1.1.1",
                "user_agent": "curl/8.0",
            })
        );
    }

    #[test]
    fn test_event_without_request() {
        let mut fields = Map::new();
        fields.insert("a".to_string(), json!(1));
        let op = build_event(None, fields);
        assert_eq!(payload_json(&op), json!({"a": 1}));
    }

    #[test]
    fn test_build_error() {
        let op = build_error(Some(&info()), "boom");
        assert_eq!(op.kind, RecordKind::Error);
        assert_eq!(op.target_path, "/api/v1/error");
        let value = payload_json(&op);
        assert_eq!(value["msg"], json!("boom"));
        assert_eq!(value["ip"], json!("1.1.1.1"));

        let op = build_error(None, "no request");
        assert_eq!(payload_json(&op), json!({"msg": "no request"}));
    }

    #[test]
    fn test_sink_names() {
        assert_eq!(RecordKind::Log.to_string(), "logs");
        assert_eq!(RecordKind::Hit.to_string(), "hits");
        assert_eq!(RecordKind::Event.to_string(), "events");
        assert_eq!(RecordKind::Error.to_string(), "errors");
    }
}
