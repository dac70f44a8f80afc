//! innet integration test harness.
//!
//! Every test builds a chain of hop relays inside the test process, each on
//! its own loopback UDP socket, with a collector socket at the end of the
//! chain standing in for the receiving host:
//!
//!   client ─▶ hop 0 (leader) ─▶ hop 1 ─▶ … ─▶ collector
//!
//! Hops are shut down when the returned `Hop` is dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use innet_core::config::HopMode;
use innet_core::wire::MessageType;
use innet_core::{fragment, reassemble, Chunk, Continuation};
use innet_services::{
    Assembled, ChainHop, HopRelay, HopStats, IterationKernel, MessageAssembler, RelaySettings,
};

mod chain;
mod failures;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Hop {
    pub addr: SocketAddr,
    pub stats: HopStats,
    _shutdown: broadcast::Sender<()>,
}

pub struct HopSpec<K> {
    pub kernel: K,
    pub max_rounds: u32,
    pub mode: HopMode,
}

impl<K> HopSpec<K> {
    pub fn compute(kernel: K, max_rounds: u32) -> Self {
        Self {
            kernel,
            max_rounds,
            mode: HopMode::ComputeForward,
        }
    }

    pub fn store_forward(kernel: K) -> Self {
        Self {
            kernel,
            max_rounds: 1,
            mode: HopMode::StoreForward,
        }
    }
}

/// Start one hop relay forwarding to `next_hop`.
pub async fn spawn_hop<K: IterationKernel>(
    spec: HopSpec<K>,
    leader: bool,
    next_hop: SocketAddr,
) -> Hop {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();
    let stats = HopStats::new();
    let (shutdown_tx, _) = broadcast::channel(1);
    let settings = RelaySettings {
        next_hop,
        mode: spec.mode,
        leader,
        assembly_timeout: Duration::from_secs(30),
    };
    let hop = Arc::new(ChainHop::new(spec.kernel, spec.max_rounds));
    tokio::spawn(
        HopRelay::new(socket, settings, hop, stats.clone(), shutdown_tx.subscribe()).run(),
    );
    Hop {
        addr,
        stats,
        _shutdown: shutdown_tx,
    }
}

/// Build a chain ending at `collector`. The first spec becomes the leader.
/// Returned hops are in chain order.
pub async fn spawn_chain<K: IterationKernel>(
    specs: Vec<HopSpec<K>>,
    collector: SocketAddr,
) -> Vec<Hop> {
    let count = specs.len();
    let mut hops = Vec::with_capacity(count);
    let mut next = collector;
    for (i, spec) in specs.into_iter().enumerate().rev() {
        let hop = spawn_hop(spec, i == 0, next).await;
        next = hop.addr;
        hops.push(hop);
    }
    hops.reverse();
    hops
}

pub struct Collector {
    pub socket: UdpSocket,
}

impl Collector {
    pub async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub async fn recv_chunk(&self) -> Result<Chunk> {
        let mut buf = vec![0u8; 65536];
        let (len, _) = tokio::time::timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .context("timed out waiting for a chunk")??;
        Ok(Chunk::from_datagram(&buf[..len])?)
    }

    /// Skip forwarded raw data and return the next complete result message.
    pub async fn recv_result(&self) -> Result<(Vec<Chunk>, Continuation)> {
        let mut assembler = MessageAssembler::new(Duration::from_secs(30));
        loop {
            let chunk = self.recv_chunk().await?;
            if chunk.header.msg_type != MessageType::IntermediateResult {
                continue;
            }
            if let Assembled::Complete(chunks) = assembler.push(chunk) {
                let record = reassemble(&chunks)?;
                let continuation = Continuation::decode(&record)?;
                return Ok((chunks, continuation));
            }
        }
    }

    /// Count raw data chunks until nothing arrives for `quiet`. Fails if
    /// anything other than raw data shows up.
    pub async fn expect_no_result(&self, quiet: Duration) -> Result<usize> {
        let mut buf = vec![0u8; 65536];
        let mut raw = 0;
        loop {
            match tokio::time::timeout(quiet, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(raw),
                Ok(received) => {
                    let (len, _) = received?;
                    let chunk = Chunk::from_datagram(&buf[..len])?;
                    if chunk.header.msg_type != MessageType::RawData {
                        bail!("unexpected result chunk: {:?}", chunk.header);
                    }
                    raw += 1;
                }
            }
        }
    }
}

pub fn raw_data(payload: Bytes, msg_num: u16) -> Vec<Chunk> {
    fragment(&payload, MessageType::RawData, 1, msg_num)
        .unwrap()
        .chunks
}

pub async fn send_chunks(to: SocketAddr, chunks: &[Chunk]) {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for chunk in chunks {
        client.send_to(&chunk.to_datagram(), to).await.unwrap();
    }
}

/// Poll until `cond` holds or a few seconds pass.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..250 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("condition not reached in time")
}

/// Decode the scripted kernel's round trace.
pub fn rounds_run(continuation: &Continuation) -> Vec<u16> {
    serde_json::from_slice(&continuation.iterate).unwrap()
}
