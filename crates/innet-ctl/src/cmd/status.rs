//! Hop status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    hop: HopInfo,
    stats: Stats,
}

#[derive(Deserialize)]
struct HopInfo {
    role: String,
    mode: String,
    kernel: String,
    max_rounds: u32,
    listen_addr: String,
    next_hop: String,
}

#[derive(Deserialize)]
struct Stats {
    datagrams_received: u64,
    chunks_forwarded: u64,
    messages_computed: u64,
    messages_fast_forwarded: u64,
    final_results: u64,
    dropped_format: u64,
    dropped_sequence: u64,
    dropped_state: u64,
    dropped_kernel: u64,
    dropped_orphan: u64,
    recent: Vec<MessageTrace>,
}

#[derive(Deserialize)]
struct MessageTrace {
    msg_num: u16,
    outcome: String,
    resume_at: Option<u8>,
    is_final: bool,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;
    let hop = &resp.hop;
    let s = &resp.stats;

    println!("═══════════════════════════════════════");
    println!("  innet Hop Status");
    println!("═══════════════════════════════════════");
    println!("  Role             : {}", hop.role);
    println!("  Mode             : {}", hop.mode);
    println!("  Kernel           : {}", hop.kernel);
    println!("  Max rounds       : {}", hop.max_rounds);
    println!("  Listening on     : {}", hop.listen_addr);
    println!("  Next hop         : {}", hop.next_hop);
    println!();
    println!("  Datagrams in     : {}", s.datagrams_received);
    println!("  Chunks forwarded : {}", s.chunks_forwarded);
    println!("  Computed         : {}", s.messages_computed);
    println!("  Fast forwarded   : {}", s.messages_fast_forwarded);
    println!("  Final results    : {}", s.final_results);
    println!(
        "  Dropped          : format {} / sequence {} / state {} / kernel {} / orphan {}",
        s.dropped_format, s.dropped_sequence, s.dropped_state, s.dropped_kernel, s.dropped_orphan
    );

    if s.recent.is_empty() {
        println!("\n  No messages processed yet.");
    } else {
        println!("\n  Recent messages:");
        for t in &s.recent {
            let resume = t
                .resume_at
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  ┌─ message {}", t.msg_num);
            println!("  │  outcome   : {}", t.outcome);
            println!("  │  resume at : {}", resume);
            println!("  └─ final     : {}", t.is_final);
        }
    }

    Ok(())
}
