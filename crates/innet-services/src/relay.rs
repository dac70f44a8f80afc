//! Hop relay — the UDP data plane of one node in the chain.
//!
//! Raw data datagrams are forwarded downstream the moment they arrive and
//! buffered for local computation. Intermediate results are assembled,
//! advanced by the chain hop, and the new continuation is sent on. Every
//! error drops the affected chunk or message; nothing is retransmitted and
//! nothing is reported upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use innet_core::config::HopMode;
use innet_core::fragment::{verify, Chunk};
use innet_core::wire::MessageType;

use crate::assembly::{Assembled, MessageAssembler};
use crate::hop::{ChainHop, HopError, HopOutput};
use crate::kernel::IterationKernel;
use crate::stats::{DropClass, HopStats};

/// Largest datagram accepted.
const RECV_BUF_LEN: usize = 65536;

/// How often stale assemblies are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub next_hop: SocketAddr,
    pub mode: HopMode,
    pub leader: bool,
    pub assembly_timeout: Duration,
}

pub struct HopRelay<K> {
    socket: Arc<UdpSocket>,
    settings: RelaySettings,
    hop: Arc<ChainHop<K>>,
    assembler: MessageAssembler,
    stats: HopStats,
    shutdown: broadcast::Receiver<()>,
}

impl<K: IterationKernel> HopRelay<K> {
    pub fn new(
        socket: Arc<UdpSocket>,
        settings: RelaySettings,
        hop: Arc<ChainHop<K>>,
        stats: HopStats,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let assembler = MessageAssembler::new(settings.assembly_timeout);
        Self {
            socket,
            settings,
            hop,
            assembler,
            stats,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);

        tracing::info!(
            listen = %self.socket.local_addr().context("socket has no local address")?,
            next_hop = %self.settings.next_hop,
            mode = ?self.settings.mode,
            leader = self.settings.leader,
            max_rounds = self.hop.max_rounds(),
            "hop relay started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("hop relay shutting down");
                    return Ok(());
                }

                _ = cleanup.tick() => {
                    let dropped = self.assembler.cleanup_stale();
                    if dropped > 0 {
                        tracing::debug!(dropped, "stale assemblies removed");
                    }
                }

                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = received.context("recv_from failed")?;
                    self.handle_datagram(&buf[..len], from).await;
                }
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        self.stats.datagram_received();

        let chunk = match Chunk::from_datagram(datagram) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(%from, error = %e, "malformed chunk, discarding");
                self.stats.dropped(DropClass::Format, None);
                return;
            }
        };

        tracing::trace!(
            %from,
            msg_type = ?chunk.header.msg_type,
            msg_num = chunk.header.msg_num,
            chunk_num = chunk.header.chunk_num,
            total_chunk_num = chunk.header.total_chunk_num,
            "chunk received"
        );

        if self.settings.mode == HopMode::StoreForward {
            self.forward(datagram).await;
            return;
        }

        let msg_type = chunk.header.msg_type;
        if msg_type == MessageType::RawData {
            // Downstream hops need the raw data too.
            self.forward(datagram).await;
        }

        match self.assembler.push(chunk) {
            Assembled::Incomplete => {}
            Assembled::Overflow { msg_num } => {
                tracing::warn!(msg_num, "message exceeded chunk limit, discarding");
                self.stats.dropped(DropClass::Sequence, Some(msg_num));
            }
            Assembled::Complete(chunks) => match msg_type {
                MessageType::RawData => self.on_data_message(chunks).await,
                MessageType::IntermediateResult => self.on_result_message(chunks).await,
            },
        }
    }

    async fn on_data_message(&mut self, chunks: Vec<Chunk>) {
        let msg_num = chunks[0].header.msg_num;
        if let Err(e) = verify(&chunks) {
            tracing::warn!(msg_num, error = %e, "raw data failed integrity check, discarding");
            self.stats.dropped(DropClass::Sequence, Some(msg_num));
            return;
        }

        if self.settings.leader {
            let hop = self.hop.clone();
            let result = tokio::task::spawn_blocking(move || hop.start(&chunks)).await;
            self.emit(msg_num, result).await;
        } else {
            tracing::debug!(msg_num, chunks = chunks.len(), "raw data buffered");
            self.assembler.store_data(msg_num, chunks);
        }
    }

    async fn on_result_message(&mut self, chunks: Vec<Chunk>) {
        let msg_num = chunks[0].header.msg_num;
        let data = self.assembler.take_data(msg_num);
        let hop = self.hop.clone();
        let result =
            tokio::task::spawn_blocking(move || hop.resume(&chunks, data.as_deref())).await;
        self.emit(msg_num, result).await;
    }

    async fn emit(
        &mut self,
        msg_num: u16,
        result: Result<Result<HopOutput, HopError>, tokio::task::JoinError>,
    ) {
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(msg_num, error = %e, "message dropped");
                self.stats.dropped(DropClass::of(&e), Some(msg_num));
                return;
            }
            Err(e) => {
                tracing::error!(msg_num, error = %e, "compute task failed");
                self.stats.dropped(DropClass::Kernel, Some(msg_num));
                return;
            }
        };

        self.stats
            .processed(msg_num, output.action, output.resume_at, output.is_final);
        for chunk in &output.chunks {
            self.forward(&chunk.to_datagram()).await;
        }
    }

    async fn forward(&self, datagram: &[u8]) {
        match self.socket.send_to(datagram, self.settings.next_hop).await {
            Ok(_) => self.stats.chunks_forwarded(1),
            Err(e) => {
                tracing::warn!(next_hop = %self.settings.next_hop, error = %e, "forward failed");
            }
        }
    }
}
