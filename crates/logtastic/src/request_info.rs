// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Normalized view of an inbound request for telemetry records.

use hyper::http::{HeaderMap, Request};
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;

/// Proxy headers consulted for the client address, best first.
const CLIENT_IP_HEADERS: [&str; 3] = ["CF-Connecting-IP", "X-Real-Ip", "X-Forwarded-For"];

/// Query parameters that carry a referrer when the `Referer` header is absent.
const REFERRER_QUERY_PARAMS: [&str; 5] = ["ref", "referer", "referrer", "source", "utm_source"];

/// Client hint headers copied verbatim, paired with the field they are recorded under.
const CLIENT_HINT_HEADERS: [(&str, &str); 6] = [
    ("Sec-CH-UA", "ch_ua"),
    ("Sec-CH-UA-Mobile", "ch_ua_mobile"),
    ("Sec-CH-UA-Platform", "ch_ua_platform"),
    ("Sec-CH-UA-Model", "ch_ua_model"),
    ("Sec-CH-UA-Platform-Version", "ch_ua_platform_version"),
    ("Accept-Language", "accept_language"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub referrer: String,
    #[serde(flatten)]
    pub client_hints: Map<String, Value>,
}

impl RequestInfo {
    /// `remote_addr` is the raw peer address of the connection, used when no proxy header
    /// names the client.
    pub fn from_request<B>(req: &Request<B>, remote_addr: Option<SocketAddr>) -> Self {
        let headers = req.headers();
        let raw_addr = remote_addr.map(|addr| addr.to_string()).unwrap_or_default();

        let mut client_hints = Map::new();
        for (header, field) in CLIENT_HINT_HEADERS {
            let value = header_str(headers, header);
            if !value.is_empty() {
                client_hints.insert(field.to_string(), Value::String(value.to_string()));
            }
        }

        RequestInfo {
            method: req.method().to_string(),
            url: req.uri().to_string(),
            ip: best_remote_address(headers, &raw_addr),
            user_agent: header_str(headers, "User-Agent").to_string(),
            referrer: referrer(headers, req.uri().query()),
            client_hints,
        }
    }

    /// Copies every field into `map`, replacing existing keys of the same name.
    pub fn merge_into(&self, map: &mut Map<String, Value>) {
        if let Ok(Value::Object(fields)) = serde_json::to_value(self) {
            map.extend(fields);
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        self.merge_into(&mut map);
        map
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Returns the first non-empty address among the proxy headers and the raw connection
/// address. Values like "ip1, ip2, ip3" are reduced to ip1, which is the original client.
pub fn best_remote_address(headers: &HeaderMap, raw_addr: &str) -> String {
    CLIENT_IP_HEADERS
        .iter()
        .map(|name| header_str(headers, name))
        .chain(std::iter::once(raw_addr))
        .map(|candidate| candidate.split(',').next().unwrap_or("").trim())
        .find(|candidate| !candidate.is_empty())
        .unwrap_or("")
        .to_string()
}

pub fn referrer(headers: &HeaderMap, query: Option<&str>) -> String {
    let from_header = header_str(headers, "Referer");
    if !from_header.is_empty() {
        return from_header.to_string();
    }
    let Some(query) = query else {
        return String::new();
    };
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    REFERRER_QUERY_PARAMS
        .iter()
        .find_map(|param| {
            pairs
                .iter()
                .find(|(key, value)| key == param && !value.is_empty())
                .map(|(_, value)| value.clone())
        })
        .unwrap_or_default()
}
