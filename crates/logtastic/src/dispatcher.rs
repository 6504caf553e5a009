// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget telemetry dispatch.
//!
//! ```text
//! handlers → Logtastic::enqueue → (local sink) → throttle gate → bounded queue → flusher → collector
//!                                                    ↑                                │
//!                                                    └────────── on failure ──────────┘
//! ```
//!
//! Producers never wait: a throttled gate or a full queue drops the operation on the spot.
//! The flusher is spawned on the first enqueue that can reach a tokio runtime, exactly once
//! per `Logtastic` instance.

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::DispatchConfig;
use crate::flusher::DispatchFlusher;
use crate::http_utils::build_client;
use crate::local_sink::{DailyFileSink, LocalSink};
use crate::record::{self, DispatchOperation};
use crate::request_info::RequestInfo;
use crate::throttle::ThrottleGate;

/// What happened to an operation handed to [`Logtastic::enqueue`]. Only `Queued` means it
/// will be delivered (or at least attempted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Dropped because a recent delivery failed; carries the time left in the window.
    Throttled(Duration),
    QueueFull,
    Closed,
}

struct Inner {
    tx: Sender<DispatchOperation>,
    /// Taken when the flusher is spawned, so it can only be spawned once.
    idle_flusher: Mutex<Option<(DispatchFlusher, Receiver<DispatchOperation>)>>,
    flusher_started: AtomicBool,
    flusher_starts: AtomicUsize,
    /// Runtime current at construction, if any.
    runtime: Option<Handle>,
    throttle: Arc<ThrottleGate>,
    sink: Option<Arc<dyn LocalSink>>,
    cancel: CancellationToken,
}

/// Handle to the dispatch service. Build one at startup and clone it into every handler
/// that emits telemetry; clones share the queue, the gate and the flusher.
#[derive(Clone)]
pub struct Logtastic {
    inner: Arc<Inner>,
}

impl Logtastic {
    /// Uses a [`DailyFileSink`] when `config.log_dir` is set.
    pub fn new(config: &DispatchConfig) -> Self {
        let sink = config
            .log_dir
            .as_ref()
            .map(|dir| Arc::new(DailyFileSink::new(dir.clone())) as Arc<dyn LocalSink>);
        Self::with_sink(config, sink)
    }

    pub fn with_sink(config: &DispatchConfig, sink: Option<Arc<dyn LocalSink>>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let throttle = Arc::new(ThrottleGate::new());
        let client = build_client(config.request_timeout).unwrap_or_else(|e| {
            error!("Unable to build logtastic http client: {e}, using defaults");
            reqwest::Client::new()
        });
        let flusher = DispatchFlusher::new(config, client, Arc::clone(&throttle));

        Logtastic {
            inner: Arc::new(Inner {
                tx,
                idle_flusher: Mutex::new(Some((flusher, rx))),
                flusher_started: AtomicBool::new(false),
                flusher_starts: AtomicUsize::new(0),
                runtime: Handle::try_current().ok(),
                throttle,
                sink,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn log(&self, text: impl Into<String>) -> EnqueueOutcome {
        self.enqueue(record::build_log(text))
    }

    pub fn hit(
        &self,
        info: &RequestInfo,
        status: u16,
        response_size: u64,
        duration: Duration,
    ) -> EnqueueOutcome {
        self.enqueue(record::build_hit(info, status, response_size, duration))
    }

    pub fn event(&self, info: Option<&RequestInfo>, fields: Map<String, Value>) -> EnqueueOutcome {
        self.enqueue(record::build_event(info, fields))
    }

    pub fn error(&self, info: Option<&RequestInfo>, message: &str) -> EnqueueOutcome {
        self.enqueue(record::build_error(info, message))
    }

    /// Never blocks. The local sink, when configured, gets every record regardless of the
    /// remote outcome.
    pub fn enqueue(&self, op: DispatchOperation) -> EnqueueOutcome {
        self.ensure_flusher();

        if let Some(sink) = &self.inner.sink {
            sink.write(op.kind, &op.payload);
        }

        if self.inner.cancel.is_cancelled() {
            debug!("Logtastic is shut down, dropping {}", op.target_path);
            return EnqueueOutcome::Closed;
        }

        if let Some(remaining) = self.inner.throttle.remaining() {
            debug!(
                "Logtastic skipping {} because throttling for {} ms",
                op.target_path,
                remaining.as_millis()
            );
            return EnqueueOutcome::Throttled(remaining);
        }

        match self.inner.tx.try_send(op) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(op)) => {
                warn!("Logtastic POST {} failed: channel full", op.target_path);
                EnqueueOutcome::QueueFull
            }
            Err(TrySendError::Closed(op)) => {
                warn!("Logtastic POST {} failed: flusher stopped", op.target_path);
                EnqueueOutcome::Closed
            }
        }
    }

    /// Spawns the flusher unless it already runs. Without a runtime, neither captured at
    /// construction nor current, the start is retried on the next enqueue.
    fn ensure_flusher(&self) {
        let inner = &self.inner;
        if inner.flusher_started.load(Ordering::Acquire) {
            return;
        }
        let runtime = match inner.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                debug!("Logtastic flusher not started yet, no tokio runtime");
                return;
            }
        };

        let mut idle = match inner.idle_flusher.lock() {
            Ok(idle) => idle,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((flusher, rx)) = idle.take() {
            inner.flusher_starts.fetch_add(1, Ordering::SeqCst);
            let cancel = inner.cancel.clone();
            runtime.spawn(async move {
                flusher.start_flusher(rx, cancel).await;
            });
            inner.flusher_started.store(true, Ordering::Release);
        }
    }

    /// Stops the flusher. Queued operations are abandoned and later enqueues are dropped.
    pub fn shutdown(&self) {
        debug!("Logtastic shutting down with {} queued operations", self.pending());
        self.inner.cancel.cancel();
    }

    /// Number of operations waiting in the queue.
    pub fn pending(&self) -> usize {
        self.inner.tx.max_capacity() - self.inner.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.inner.tx.max_capacity()
    }

    pub fn flusher_starts(&self) -> usize {
        self.inner.flusher_starts.load(Ordering::SeqCst)
    }

    pub fn throttle_remaining(&self) -> Option<Duration> {
        self.inner.throttle.remaining()
    }

    #[cfg(test)]
    pub(crate) fn throttle_for(&self, duration: Duration) {
        self.inner.throttle.throttle_for(duration);
    }
}
