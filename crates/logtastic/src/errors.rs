// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;
use std::path::PathBuf;

/// Why a single delivery to the collector failed. Every variant throttles the
/// dispatcher; none of them is retried.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("collector responded with {0}")]
    Status(StatusCode),
    #[error("timed out after {0} ms")]
    Timeout(u128),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
