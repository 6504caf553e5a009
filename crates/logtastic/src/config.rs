// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_COLLECTOR: &str = "127.0.0.1:9327";
const DEFAULT_PORT: u16 = 9339;
const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_THROTTLE_MS: u64 = 2000;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Keys shorter than this are placeholders, not real credentials.
const MIN_API_KEY_LEN: usize = 30;

/// Settings for the telemetry dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Collector base url, always with a scheme and without a trailing slash.
    pub collector_url: String,
    pub api_key: Option<String>,
    pub queue_capacity: usize,
    /// How long enqueueing is suppressed after a failed delivery
    pub throttle_duration: Duration,
    /// Bound on each outbound POST
    pub request_timeout: Duration,
    /// Enables the local file sink when set
    pub log_dir: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            collector_url: normalize_collector_url(DEFAULT_COLLECTOR),
            api_key: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            throttle_duration: Duration::from_millis(DEFAULT_THROTTLE_MS),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub production: bool,
    pub max_request_content_length: usize,
    pub dispatch: DispatchConfig,
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let production = env::var("LOGTASTIC_PROD")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);

        let api_key = match read_api_key(env::var("LOGTASTIC_API_KEY").ok()) {
            Some(key) => Some(key),
            None if production => {
                return Err(anyhow::anyhow!(
                    "LOGTASTIC_API_KEY must be set to a key of at least {MIN_API_KEY_LEN} characters in production"
                )
                .into());
            }
            None => {
                debug!("LOGTASTIC_API_KEY not set, sending telemetry without an api key");
                None
            }
        };

        let queue_capacity = parse_env("LOGTASTIC_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(anyhow::anyhow!("LOGTASTIC_QUEUE_CAPACITY must be greater than 0").into());
        }

        let request_timeout_ms = parse_env("LOGTASTIC_TIMEOUT_MS", DEFAULT_TIMEOUT_MS);
        if request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("LOGTASTIC_TIMEOUT_MS must be greater than 0").into());
        }

        let collector_url = normalize_collector_url(
            &env::var("LOGTASTIC_SERVER").unwrap_or_else(|_| DEFAULT_COLLECTOR.to_string()),
        );

        let log_dir = env::var("LOGTASTIC_LOG_DIR")
            .ok()
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(Config {
            port: parse_env("LOGTASTIC_PORT", DEFAULT_PORT),
            production,
            max_request_content_length: parse_env(
                "LOGTASTIC_MAX_BODY_BYTES",
                DEFAULT_MAX_BODY_BYTES,
            ),
            dispatch: DispatchConfig {
                collector_url,
                api_key,
                queue_capacity,
                throttle_duration: Duration::from_millis(parse_env(
                    "LOGTASTIC_THROTTLE_MS",
                    DEFAULT_THROTTLE_MS,
                )),
                request_timeout: Duration::from_millis(request_timeout_ms),
                log_dir,
            },
        })
    }
}

fn read_api_key(raw: Option<String>) -> Option<String> {
    let key = raw?.trim().to_string();
    if key.len() < MIN_API_KEY_LEN {
        if !key.is_empty() {
            warn!(
                "LOGTASTIC_API_KEY is too short, len: {}, wanted: {MIN_API_KEY_LEN}. Ignoring it.",
                key.len()
            );
        }
        return None;
    }
    Some(key)
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(val) => val.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("Invalid value '{val}' for {name}, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Accepts `host:port` as well as a full url.
pub fn normalize_collector_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
