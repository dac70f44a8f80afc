//! innet-ctl — client and collector for an innet hop chain.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use innet_core::wire::{MAX_CHUNK_NUM, MAX_CHUNK_PAYLOAD};

mod cmd;

use cmd::run::{cmd_run, RunOptions};
use cmd::status::cmd_status;

const DEFAULT_PORT: u16 = 9001;

/// Most mixed signals `run` will generate.
const MAX_ROWS: usize = 256;

/// Upper bound on one JSON-encoded sample, e.g. `-0.12345678901234567,`.
const MAX_SAMPLE_JSON_BYTES: usize = 24;

/// Most samples that still fit in one raw data message.
const MAX_SAMPLES: usize = MAX_CHUNK_NUM * MAX_CHUNK_PAYLOAD / MAX_SAMPLE_JSON_BYTES;

fn print_usage() {
    println!("Usage: innet-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                Show hop role, mode, and counters");
    println!("  run --to <addr>       Send a random mixture into the chain and wait");
    println!("      [--listen <addr>]   Collector address (default: 0.0.0.0:9998)");
    println!("      [--rows <n>]        Mixed signals (default: 4)");
    println!("      [--cols <n>]        Samples per signal (default: 1024)");
    println!("      [--seed <n>]        Random seed (default: 1)");
    println!("      [--timeout <secs>]  Give up after this long (default: 10)");
    println!();
    println!("Options:");
    println!("  --port <port>   Status endpoint port (default: {})", DEFAULT_PORT);
}

fn flag_value<T>(args: &[&str], i: usize, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    args.get(i)
        .with_context(|| format!("{} requires a value", name))?
        .parse()
        .with_context(|| format!("{} has an invalid value", name))
}

fn parse_run(args: &[&str]) -> Result<RunOptions> {
    let mut to: Option<SocketAddr> = None;
    let mut opts = RunOptions {
        to: SocketAddr::from(([127, 0, 0, 1], 9999)),
        listen: SocketAddr::from(([0, 0, 0, 0], 9998)),
        rows: 4,
        cols: 1024,
        seed: 1,
        timeout: Duration::from_secs(10),
    };

    let mut i = 0;
    while i < args.len() {
        let name = args[i];
        i += 1;
        match name {
            "--to" => to = Some(flag_value(args, i, name)?),
            "--listen" => opts.listen = flag_value(args, i, name)?,
            "--rows" => opts.rows = flag_value(args, i, name)?,
            "--cols" => opts.cols = flag_value(args, i, name)?,
            "--seed" => opts.seed = flag_value(args, i, name)?,
            "--timeout" => opts.timeout = Duration::from_secs(flag_value(args, i, name)?),
            other => anyhow::bail!("unknown run option: {}", other),
        }
        i += 1;
    }

    opts.to = to.context("run requires --to <addr>")?;
    if opts.rows == 0 || opts.cols == 0 {
        anyhow::bail!("--rows and --cols must be at least 1");
    }
    if opts.rows > MAX_ROWS {
        anyhow::bail!("--rows must be at most {}", MAX_ROWS);
    }
    match opts.rows.checked_mul(opts.cols) {
        Some(samples) if samples <= MAX_SAMPLES => {}
        _ => anyhow::bail!(
            "--rows x --cols must be at most {} samples to fit in one message",
            MAX_SAMPLES
        ),
    }
    Ok(opts)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(port).await,
        ["run", rest @ ..] => cmd_run(parse_run(rest)?).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
