use crate::*;

use innet_services::{Matrix, PowerIterationKernel, ScriptedKernel};

// ══════════════════════════════════════════════════════════════════════════════
//  Multi-hop chains
// ══════════════════════════════════════════════════════════════════════════════

/// Three hops, two rounds each, six rounds in total: every hop computes and
/// the last one emits the final result.
#[tokio::test]
async fn test_three_hops_share_the_rounds() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        (0..3)
            .map(|_| HopSpec::compute(ScriptedKernel::new(6), 2))
            .collect(),
        collector.addr(),
    )
    .await;

    send_chunks(hops[0].addr, &raw_data(Bytes::from(vec![5u8; 3500]), 0)).await;

    let (chunks, result) = collector.recv_result().await?;
    assert!(result.is_final);
    assert_eq!(result.resume_at, 6);
    assert_eq!(rounds_run(&result), vec![0, 1, 2, 3, 4, 5]);
    assert!(chunks.iter().all(|c| c.header.iteration_complete()));
    assert!(chunks.iter().all(|c| c.header.iter_num == 6));

    for hop in &hops {
        let s = hop.stats.snapshot();
        assert_eq!(s.messages_computed, 1);
        assert_eq!(s.messages_fast_forwarded, 0);
    }
    assert_eq!(hops[2].stats.snapshot().final_results, 1);
    Ok(())
}

/// The leader has budget for the whole problem; followers only pass the
/// final result along.
#[tokio::test]
async fn test_final_result_is_fast_forwarded() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        (0..3)
            .map(|_| HopSpec::compute(ScriptedKernel::new(3), 8))
            .collect(),
        collector.addr(),
    )
    .await;

    send_chunks(hops[0].addr, &raw_data(Bytes::from_static(b"tiny"), 2)).await;

    let (chunks, result) = collector.recv_result().await?;
    assert!(result.is_final);
    assert_eq!(result.resume_at, 3);
    assert_eq!(chunks[0].header.msg_num, 2);

    assert_eq!(hops[0].stats.snapshot().messages_computed, 1);
    for hop in &hops[1..] {
        let s = hop.stats.snapshot();
        assert_eq!(s.messages_computed, 0);
        assert_eq!(s.messages_fast_forwarded, 1);
    }
    Ok(())
}

/// Convergence ends the computation early and reports the total round count.
#[tokio::test]
async fn test_convergence_finishes_early() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        (0..3)
            .map(|_| HopSpec::compute(ScriptedKernel::new(20).converging_after(3), 2))
            .collect(),
        collector.addr(),
    )
    .await;

    send_chunks(hops[0].addr, &raw_data(Bytes::from(vec![1u8; 100]), 0)).await;

    let (_, result) = collector.recv_result().await?;
    assert!(result.is_final);
    assert_eq!(result.resume_at, 20);
    assert_eq!(rounds_run(&result), vec![0, 1, 2]);
    assert_eq!(hops[2].stats.snapshot().messages_fast_forwarded, 1);
    Ok(())
}

/// A chain too short for the problem delivers a partial result.
#[tokio::test]
async fn test_short_chain_delivers_partial_result() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        (0..2)
            .map(|_| HopSpec::compute(ScriptedKernel::new(10), 3))
            .collect(),
        collector.addr(),
    )
    .await;

    send_chunks(hops[0].addr, &raw_data(Bytes::from(vec![0u8; 10]), 0)).await;

    let (chunks, result) = collector.recv_result().await?;
    assert!(!result.is_final);
    assert_eq!(result.resume_at, 6);
    assert_eq!(chunks[0].header.iter_num, 6);
    assert!(!chunks[0].header.iteration_complete());
    Ok(())
}

/// A store-and-forward hop in the middle passes data and results through
/// untouched.
#[tokio::test]
async fn test_store_forward_hop_in_the_middle() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        vec![
            HopSpec::compute(ScriptedKernel::new(4), 2),
            HopSpec::store_forward(ScriptedKernel::new(4)),
            HopSpec::compute(ScriptedKernel::new(4), 2),
        ],
        collector.addr(),
    )
    .await;

    let data = raw_data(Bytes::from(vec![3u8; 2000]), 0);
    send_chunks(hops[0].addr, &data).await;

    let (_, result) = collector.recv_result().await?;
    assert!(result.is_final);
    assert_eq!(rounds_run(&result), vec![0, 1, 2, 3]);

    // Two data chunks and one result chunk.
    wait_for(|| hops[1].stats.snapshot().chunks_forwarded == 3).await?;
    assert_eq!(hops[1].stats.snapshot().messages_computed, 0);
    Ok(())
}

/// Independent messages through the same chain do not interfere.
#[tokio::test]
async fn test_messages_are_independent() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        (0..2)
            .map(|_| HopSpec::compute(ScriptedKernel::new(4), 2))
            .collect(),
        collector.addr(),
    )
    .await;

    for msg_num in 0..3u16 {
        let chunks = fragment(
            &Bytes::from(vec![msg_num as u8; 1500]),
            MessageType::RawData,
            3,
            msg_num,
        )?
        .chunks;
        send_chunks(hops[0].addr, &chunks).await;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (chunks, result) = collector.recv_result().await?;
        assert!(result.is_final);
        assert_eq!(chunks[0].header.total_msg_num, 3);
        seen.push(chunks[0].header.msg_num);
    }
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2]);
    Ok(())
}

/// Power iteration split across two hops converges to a unit weight vector.
#[tokio::test]
async fn test_power_iteration_across_hops() -> Result<()> {
    let rows = 3;
    let cols = 256;
    let mut data = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let t = c as f64;
            let dominant = 4.0 * (t * 0.37).sin();
            let minor = (t * 1.3).cos();
            data.push((r as f64 + 1.0) * dominant + (r as f64 - 1.0) * minor);
        }
    }
    let matrix = Matrix { rows, cols, data };
    let payload = Bytes::from(matrix.to_bytes()?);

    let collector = Collector::bind().await;
    let hops = spawn_chain(
        (0..2)
            .map(|_| HopSpec::compute(PowerIterationKernel::default(), 3))
            .collect(),
        collector.addr(),
    )
    .await;

    send_chunks(hops[0].addr, &raw_data(payload, 0)).await;

    let (_, result) = collector.recv_result().await?;
    assert!(result.is_final);
    // 16, 32, 64, 128 and 256 samples.
    assert_eq!(result.resume_at, 5);

    let weights: Vec<f64> = serde_json::from_slice(&result.iterate)?;
    assert_eq!(weights.len(), rows);
    let norm = weights.iter().map(|w| w * w).sum::<f64>().sqrt();
    assert!((norm - 1.0).abs() < 1e-9, "norm {norm}");
    Ok(())
}
