// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::time::timeout;

/// Send an HTTP request over TCP and return the response
pub async fn send_tcp_request(
    port: u16,
    uri: &str,
    method: &str,
    headers: &[(&str, &str)],
    body: Option<Vec<u8>>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Host", format!("127.0.0.1:{}", port))
        .header("Content-Type", "application/json");
    for (name, value) in headers {
        request_builder = request_builder.header(*name, *value);
    }

    let body_data = body.unwrap_or_default();
    request_builder = request_builder.header("Content-Length", body_data.len().to_string());
    let request = request_builder.body(Full::new(Bytes::from(body_data)))?;
    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;

    Ok(response)
}

