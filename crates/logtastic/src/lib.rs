// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous, best-effort forwarding of logs, hits, events and errors to a logtastic
//! collector. Request handlers never wait on the network: records go through a bounded
//! queue drained by a single background flusher, and a failed delivery briefly throttles
//! all producers.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod flusher;
pub mod http_utils;
pub mod local_sink;
pub mod record;
pub mod request_info;
pub mod server;
pub mod throttle;

pub use dispatcher::{EnqueueOutcome, Logtastic};
