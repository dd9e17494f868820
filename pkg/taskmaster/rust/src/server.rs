// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Line-oriented control listener.
//!
//! Each request is one line. Each response is its body lines followed by a
//! single empty line, so a client reads until it sees an empty line.

use crate::supervisor::Supervisor;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept control connections until the supervisor's shutdown token fires,
/// then give open connections a moment to flush their last response.
pub async fn serve(listener: TcpListener, supervisor: Arc<Supervisor>) -> Result<()> {
    let token = supervisor.shutdown_token();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("control connection from {peer}");
                    let supervisor = Arc::clone(&supervisor);
                    let token = token.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, supervisor, token).await {
                            warn!("control connection from {peer} failed: {e:#}");
                        }
                    });
                }
                Err(e) => warn!("failed to accept control connection: {e}"),
            },
        }
    }

    info!("control listener closed");
    let drained = timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("aborting {} control connection(s)", connections.len());
        connections.abort_all();
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    supervisor: Arc<Supervisor>,
    token: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line.context("failed to read request")?,
        };
        let Some(line) = line else {
            break;
        };
        let response = supervisor.handle_command(&line).await;
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

/// Body lines, then the empty terminator line.
pub async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, body: &str) -> Result<()> {
    let mut framed = String::with_capacity(body.len() + 2);
    for line in body.lines().filter(|l| !l.is_empty()) {
        framed.push_str(line);
        framed.push('\n');
    }
    framed.push('\n');
    writer
        .write_all(framed.as_bytes())
        .await
        .context("failed to write response")?;
    writer.flush().await.context("failed to flush response")?;
    Ok(())
}
