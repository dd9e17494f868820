// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_taskmaster::{Command, LogAlerter, Supervisor, server};
use log::{LevelFilter, error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

#[derive(Parser, Debug)]
#[command(name = "dd-taskmasterd", version, about = "Process supervisor daemon")]
struct Cli {
    /// YAML file describing the supervised programs.
    #[arg(short, long)]
    config: PathBuf,

    /// Address the control listener binds to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Control port; 0 picks a free one.
    #[arg(short, long, default_value_t = 4242)]
    port: u16,

    /// Initial log level, changeable at runtime with `loglevel`.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Install at the most verbose level so `loglevel` can widen it later.
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Trace)
        .init()?;
    log::set_max_level(cli.log_level);
    info!(
        "dd-taskmasterd starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let mut sigterm = signal(SignalKind::terminate()).context("failed to set up SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to set up SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("failed to set up SIGHUP handler")?;

    let supervisor = Arc::new(Supervisor::new(&cli.config, Arc::new(LogAlerter)));
    supervisor
        .launch()
        .await
        .with_context(|| format!("failed to launch from {}", cli.config.display()))?;

    let listener = TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", cli.host, cli.port))?;
    info!("listening on {}", listener.local_addr()?);
    let server = tokio::spawn(server::serve(listener, Arc::clone(&supervisor)));

    let token = supervisor.shutdown_token();
    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading {}", supervisor.config_path().display());
                match supervisor.execute(Command::Reload).await {
                    Ok(report) => info!("{report}"),
                    Err(e) => error!("{e}"),
                }
            }
            _ = token.cancelled() => {
                info!("shutdown requested over control connection");
                break;
            }
        }
    }

    let summary = supervisor.shutdown().await;
    info!("programs stopped: {summary}");
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("control listener failed: {e:#}"),
        Err(e) => error!("control listener task failed: {e}"),
    }
    info!("dd-taskmasterd shutting down");
    Ok(())
}
