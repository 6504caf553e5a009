// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::errors::DeliveryError;
use crate::record::DispatchOperation;
use crate::throttle::ThrottleGate;

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// The single consumer of the dispatch queue. Each operation gets exactly one POST to the
/// collector; a failure throttles the producers and the operation is dropped.
pub struct DispatchFlusher {
    client: reqwest::Client,
    collector_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    throttle_duration: Duration,
    throttle: Arc<ThrottleGate>,
}

impl DispatchFlusher {
    pub fn new(config: &DispatchConfig, client: reqwest::Client, throttle: Arc<ThrottleGate>) -> Self {
        DispatchFlusher {
            client,
            collector_url: config.collector_url.clone(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
            throttle_duration: config.throttle_duration,
            throttle,
        }
    }

    /// Drains `rx` until it closes or `cancel` fires. Operations still queued at cancellation
    /// are abandoned.
    pub async fn start_flusher(&self, mut rx: Receiver<DispatchOperation>, cancel: CancellationToken) {
        debug!("Logtastic flusher started");
        loop {
            let op = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Logtastic flusher cancelled, abandoning {} queued operations", rx.len());
                    break;
                }
                op = rx.recv() => match op {
                    Some(op) => op,
                    None => break,
                },
            };

            if let Err(e) = self.send(&op).await {
                warn!(
                    "Logtastic POST {} failed: {e}, will throttle for {} ms",
                    op.target_path,
                    self.throttle_duration.as_millis()
                );
                self.throttle.throttle_for(self.throttle_duration);
            }
        }
        debug!("Logtastic flusher stopped");
    }

    pub async fn send(&self, op: &DispatchOperation) -> Result<(), DeliveryError> {
        let url = format!("{}{}", self.collector_url, op.target_path);
        debug!("Logtastic POST {url}");

        let mut request = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .header(CONTENT_TYPE, op.content_type.as_str())
            .body(op.payload.clone());
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let time = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout(time.elapsed().as_millis())
            } else {
                DeliveryError::Network(e)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }
        debug!(
            "Logtastic delivered {} in {} ms",
            op.target_path,
            time.elapsed().as_millis()
        );
        Ok(())
    }
}
