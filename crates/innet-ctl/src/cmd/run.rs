//! Send a mixture into the chain and collect the final result.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;

use innet_core::wire::MessageType;
use innet_core::{fragment, reassemble, Chunk, Continuation};
use innet_services::{Assembled, Matrix, MessageAssembler};

pub struct RunOptions {
    pub to: SocketAddr,
    pub listen: SocketAddr,
    pub rows: usize,
    pub cols: usize,
    pub seed: u64,
    pub timeout: Duration,
}

/// `rows` observed signals, each a random mix of `rows` uniform sources.
/// Source 0 is scaled up so the mixture has a clear dominant direction.
pub fn mixture(rows: usize, cols: usize, seed: u64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let mixing: Vec<f64> = (0..rows * rows).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let sources: Vec<f64> = (0..rows * cols)
        .map(|i| {
            let scale = if i < cols { 3.0 } else { 1.0 };
            scale * rng.gen_range(-1.0..1.0)
        })
        .collect();

    let mut data = vec![0.0; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            data[r * cols + c] = (0..rows)
                .map(|k| mixing[r * rows + k] * sources[k * cols + c])
                .sum();
        }
    }
    Matrix { rows, cols, data }
}

pub async fn cmd_run(opts: RunOptions) -> Result<()> {
    let socket = UdpSocket::bind(opts.listen)
        .await
        .with_context(|| format!("failed to bind collector socket on {}", opts.listen))?;

    let matrix = mixture(opts.rows, opts.cols, opts.seed);
    let payload = Bytes::from(matrix.to_bytes()?);
    let fragmented = fragment(&payload, MessageType::RawData, 1, 0)?;

    for chunk in &fragmented.chunks {
        socket
            .send_to(&chunk.to_datagram(), opts.to)
            .await
            .with_context(|| format!("failed to send to {}", opts.to))?;
    }
    println!(
        "Sent {}x{} mixture ({} bytes, {} chunks) to {}",
        opts.rows,
        opts.cols,
        fragmented.payload_len,
        fragmented.chunks.len(),
        opts.to
    );

    let result = tokio::time::timeout(opts.timeout, collect(&socket, opts.timeout))
        .await
        .ok()
        .flatten();
    let Some(continuation) = result else {
        bail!(
            "no final result within {}s (chunks lost in transit are not retransmitted)",
            opts.timeout.as_secs()
        );
    };

    let weights: Vec<f64> = serde_json::from_slice(&continuation.iterate)
        .context("final result does not carry a weight vector")?;

    println!("═══════════════════════════════════════");
    println!("  Final Result");
    println!("═══════════════════════════════════════");
    println!("  Rounds    : {}", continuation.resume_at);
    println!("  Weights   :");
    for (i, w) in weights.iter().enumerate() {
        println!("    [{:>2}] {:+.6}", i, w);
    }

    Ok(())
}

/// Wait for a complete, final intermediate-result message.
async fn collect(socket: &UdpSocket, timeout: Duration) -> Option<Continuation> {
    let mut assembler = MessageAssembler::new(timeout);
    let mut buf = vec![0u8; 65536];

    loop {
        let (len, _) = socket.recv_from(&mut buf).await.ok()?;
        let Ok(chunk) = Chunk::from_datagram(&buf[..len]) else {
            continue;
        };
        // The last hop also forwards the raw data.
        if chunk.header.msg_type != MessageType::IntermediateResult {
            continue;
        }
        let Assembled::Complete(chunks) = assembler.push(chunk) else {
            continue;
        };
        let Ok(record) = reassemble(&chunks) else {
            eprintln!("Result message failed integrity check, waiting.");
            continue;
        };
        match Continuation::decode(&record) {
            Ok(c) if c.is_final => return Some(c),
            Ok(c) => eprintln!(
                "Received non-final result (resume at {}), waiting.",
                c.resume_at
            ),
            Err(e) => eprintln!("Malformed result: {}", e),
        }
    }
}
