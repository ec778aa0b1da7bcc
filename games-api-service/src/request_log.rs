// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Per-request access log.
//!
//! The middleware formats one line per request, prints it through
//! `tracing`, and hands it to a background task over a bounded channel.
//! The task appends to `<log_dir>/requests.log`. A full queue or a failed
//! write only produces a warning; the request itself is never held up.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Method, Uri, header::USER_AGENT},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use games_common::iso_timestamp;
use lambda_http::request::RequestContext;
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::mpsc::{self, error::TrySendError},
};
use tracing::{info, warn};

pub const REQUEST_LOG_FILE: &str = "requests.log";

#[derive(Clone)]
pub struct RequestLogger {
    sender: mpsc::Sender<String>,
}

impl RequestLogger {
    /// Starts the file writer and returns the handle the middleware uses.
    pub fn spawn(log_dir: PathBuf, capacity: usize) -> Self {
        let (logger, receiver) = Self::channel(capacity);
        tokio::spawn(run_log_writer(log_dir, receiver));
        logger
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn record(&self, line: String) {
        match self.sender.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("request log queue full; dropping line");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("request log writer stopped; dropping line");
            }
        }
    }
}

pub fn format_request_line(
    at: DateTime<Utc>,
    method: &Method,
    uri: &Uri,
    client_addr: &str,
    user_agent: &str,
) -> String {
    format!(
        "[{}] {method} {uri} - IP: {client_addr} - User-Agent: {user_agent}",
        iso_timestamp(at)
    )
}

pub async fn log_requests(
    State(logger): State<RequestLogger>,
    request: Request,
    next: Next,
) -> Response {
    let client_addr = client_ip(&request);
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("Unknown");

    info!(
        method = %request.method(),
        uri = %request.uri(),
        client_addr = %client_addr,
        user_agent = %user_agent,
        "request received"
    );
    logger.record(format_request_line(
        Utc::now(),
        request.method(),
        request.uri(),
        &client_addr,
        user_agent,
    ));

    next.run(request).await
}

/// Peer address from the TCP listener, or the caller address API Gateway
/// reports when running under lambda.
fn client_ip(request: &Request) -> String {
    let extensions = request.extensions();
    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    let source_ip = match extensions.get::<RequestContext>() {
        Some(RequestContext::ApiGatewayV2(context)) => context.http.source_ip.clone(),
        Some(RequestContext::ApiGatewayV1(context)) => context.identity.source_ip.clone(),
        Some(RequestContext::WebSocket(context)) => context.identity.source_ip.clone(),
        _ => None,
    };
    source_ip.unwrap_or_else(|| "unknown".to_string())
}

async fn run_log_writer(log_dir: PathBuf, mut receiver: mpsc::Receiver<String>) {
    let path = log_dir.join(REQUEST_LOG_FILE);
    while let Some(line) = receiver.recv().await {
        if let Err(error) = append_line(&log_dir, &path, &line).await {
            warn!(path = %path.display(), error = %error, "failed to append request log line");
        }
    }
}

async fn append_line(log_dir: &Path, path: &Path, line: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(log_dir).await?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await
}
