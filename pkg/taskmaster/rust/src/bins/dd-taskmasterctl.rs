// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Parser, Debug)]
#[command(name = "dd-taskmasterctl", version, about = "Control client for dd-taskmasterd")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 4242)]
    port: u16,

    /// Command to send, e.g. `status` or `restart web`. Interactive when omitted.
    command: Vec<String>,
}

struct Connection {
    writer: OwnedWriteHalf,
    responses: Lines<BufReader<OwnedReadHalf>>,
}

impl Connection {
    async fn open(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to dd-taskmasterd at {host}:{port}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            writer,
            responses: BufReader::new(reader).lines(),
        })
    }

    async fn request(&mut self, line: &str) -> Result<Vec<String>> {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .context("failed to send command")?;

        let mut body = Vec::new();
        loop {
            match self.responses.next_line().await? {
                Some(l) if l.is_empty() => return Ok(body),
                Some(l) => body.push(l),
                None => bail!("connection closed by dd-taskmasterd"),
            }
        }
    }
}

fn print_body(body: &[String]) {
    for line in body {
        println!("{line}");
    }
}

fn is_error(body: &[String]) -> bool {
    body.first().is_some_and(|l| l.starts_with("error:"))
}

async fn interactive(conn: &mut Connection, input: &mut Lines<BufReader<Stdin>>) -> Result<()> {
    loop {
        print!("taskmaster> ");
        std::io::stdout().flush()?;
        let Some(line) = input.next_line().await? else {
            println!();
            return Ok(());
        };
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => return Ok(()),
            _ => {}
        }
        let body = conn.request(line).await?;
        print_body(&body);
        if line == "shutdown" && !is_error(&body) {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut conn = Connection::open(&cli.host, cli.port).await?;

    if cli.command.is_empty() {
        let mut input = BufReader::new(tokio::io::stdin()).lines();
        return interactive(&mut conn, &mut input).await;
    }

    let body = conn.request(&cli.command.join(" ")).await?;
    print_body(&body);
    if is_error(&body) {
        std::process::exit(1);
    }
    Ok(())
}
