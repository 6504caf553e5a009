// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use serde_json::{Map, Value};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dispatcher::Logtastic;
use crate::http_utils::{
    empty_response, limit_str, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use crate::request_info::RequestInfo;

const EVENT_ENDPOINT_PATH: &str = "/event";
const API_EVENT_ENDPOINT_PATH: &str = "/api/event";
/// How much of a rejected body ends up in the local log
const LOGGED_BODY_LIMIT: usize = 100;

pub struct Server {
    pub config: Arc<Config>,
    pub logtastic: Logtastic,
}

impl Server {
    pub fn new(config: Arc<Config>, logtastic: Logtastic) -> Self {
        Server { config, logtastic }
    }

    /// Binds the configured port on all interfaces and serves until `cancel` fires.
    pub async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(&addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        self.serve(listener, cancel).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let (conn, remote_addr) = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Server shutting down, aborting {} connections", joinset.len());
                    joinset.abort_all();
                    return Ok(());
                }
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok(accepted) => accepted,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };

            let config = Arc::clone(&self.config);
            let logtastic = self.logtastic.clone();
            let service = service_fn(move |req| {
                Self::handle(Arc::clone(&config), logtastic.clone(), req, Some(remote_addr))
            });

            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    /// Routes one request and records it as a hit.
    pub async fn handle<B>(
        config: Arc<Config>,
        logtastic: Logtastic,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();
        let info = RequestInfo::from_request(&req, remote_addr);

        let response = match req.uri().path() {
            EVENT_ENDPOINT_PATH | API_EVENT_ENDPOINT_PATH => {
                Self::event_handler(&config, &logtastic, &info, req).await
            }
            _ => empty_response(StatusCode::NOT_FOUND),
        };

        if let Ok(response) = &response {
            let size = response.body().size_hint().exact().unwrap_or(0);
            logtastic.hit(&info, response.status().as_u16(), size, start.elapsed());
        }
        response
    }

    /// Validates the body is a JSON object, augments it with the request info and forwards it
    /// as an event.
    async fn event_handler<B>(
        config: &Config,
        logtastic: &Logtastic,
        info: &RequestInfo,
        req: Request<B>,
    ) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.method() != Method::POST {
            return log_and_create_http_response(
                "Method not allowed",
                StatusCode::METHOD_NOT_ALLOWED,
            );
        }

        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing event",
        ) {
            return response;
        }

        let body_bytes: Bytes = match Limited::new(body, config.max_request_content_length)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Bad request: error reading event body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let fields: Map<String, Value> = match serde_json::from_slice(&body_bytes) {
            Ok(fields) => fields,
            Err(e) => {
                let body = String::from_utf8_lossy(&body_bytes);
                return log_and_create_http_response(
                    &format!(
                        "Bad request: unmarshalling event body: {e}\n{}",
                        limit_str(&body, LOGGED_BODY_LIMIT)
                    ),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        logtastic.event(Some(info), fields);
        empty_response(StatusCode::OK)
    }
}
