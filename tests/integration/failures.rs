use crate::*;

use innet_services::{continuation_chunks, ScriptedKernel};

// ══════════════════════════════════════════════════════════════════════════════
//  Loss, reordering, and malformed input
// ══════════════════════════════════════════════════════════════════════════════

const QUIET: Duration = Duration::from_millis(300);

/// A raw data chunk lost before the leader: the message fails its integrity
/// check and no result is produced. The surviving chunks are still
/// forwarded.
#[tokio::test]
async fn test_lost_data_chunk_drops_message() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        vec![HopSpec::compute(ScriptedKernel::new(4), 4)],
        collector.addr(),
    )
    .await;

    let mut data = raw_data(Bytes::from(vec![8u8; 4000]), 0);
    data.remove(1);
    send_chunks(hops[0].addr, &data).await;

    let forwarded = collector.expect_no_result(QUIET).await?;
    assert_eq!(forwarded, 2);
    let s = hops[0].stats.snapshot();
    assert_eq!(s.dropped_sequence, 1);
    assert_eq!(s.messages_computed, 0);
    Ok(())
}

/// Chunks arriving out of order are not sorted back into place.
#[tokio::test]
async fn test_reordered_chunks_drop_message() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        vec![HopSpec::compute(ScriptedKernel::new(4), 4)],
        collector.addr(),
    )
    .await;

    let mut data = raw_data(Bytes::from(vec![8u8; 4000]), 0);
    data.swap(0, 1);
    send_chunks(hops[0].addr, &data).await;

    assert_eq!(collector.expect_no_result(QUIET).await?, 3);
    assert_eq!(hops[0].stats.snapshot().dropped_sequence, 1);
    Ok(())
}

/// A follower whose raw data never arrived drops the partial result.
#[tokio::test]
async fn test_follower_without_data_drops_result() -> Result<()> {
    let collector = Collector::bind().await;
    let follower = spawn_hop(
        HopSpec::compute(ScriptedKernel::new(6), 2),
        false,
        collector.addr(),
    )
    .await;

    let partial = continuation_chunks(
        &Continuation {
            is_final: false,
            resume_at: 2,
            iterate: Bytes::from_static(b"[0,1]"),
        },
        1,
        0,
    )?;
    send_chunks(follower.addr, &partial).await;

    assert_eq!(collector.expect_no_result(QUIET).await?, 0);
    assert_eq!(follower.stats.snapshot().dropped_orphan, 1);
    Ok(())
}

/// A final result reaches a follower with no data and is still passed on.
#[tokio::test]
async fn test_final_result_needs_no_data() -> Result<()> {
    let collector = Collector::bind().await;
    let follower = spawn_hop(
        HopSpec::compute(ScriptedKernel::new(6), 2),
        false,
        collector.addr(),
    )
    .await;

    let done = continuation_chunks(
        &Continuation {
            is_final: true,
            resume_at: 6,
            iterate: Bytes::from_static(b"[0,1,2,3,4,5]"),
        },
        1,
        0,
    )?;
    send_chunks(follower.addr, &done).await;

    let (chunks, result) = collector.recv_result().await?;
    assert_eq!(chunks, done);
    assert_eq!(rounds_run(&result), vec![0, 1, 2, 3, 4, 5]);
    Ok(())
}

/// A result whose header disagrees with its record is a state error.
#[tokio::test]
async fn test_header_record_mismatch_is_dropped() -> Result<()> {
    let collector = Collector::bind().await;
    let follower = spawn_hop(
        HopSpec::compute(ScriptedKernel::new(6), 2),
        false,
        collector.addr(),
    )
    .await;

    send_chunks(follower.addr, &raw_data(Bytes::from_static(b"data"), 0)).await;
    let mut partial = continuation_chunks(
        &Continuation {
            is_final: false,
            resume_at: 2,
            iterate: Bytes::from_static(b"[0,1]"),
        },
        1,
        0,
    )?;
    partial[0].header.iter_num = 4;
    send_chunks(follower.addr, &partial).await;

    assert_eq!(collector.expect_no_result(QUIET).await?, 1);
    assert_eq!(follower.stats.snapshot().dropped_state, 1);
    Ok(())
}

/// Garbage datagrams are counted and ignored; the hop keeps working.
#[tokio::test]
async fn test_malformed_datagrams_are_ignored() -> Result<()> {
    let collector = Collector::bind().await;
    let hops = spawn_chain(
        vec![HopSpec::compute(ScriptedKernel::new(2), 2)],
        collector.addr(),
    )
    .await;

    let client = UdpSocket::bind("127.0.0.1:0").await?;
    client.send_to(&[0u8; 5], hops[0].addr).await?;
    // Unknown message type.
    let mut bogus = raw_data(Bytes::from_static(b"x"), 0)[0].to_datagram().to_vec();
    bogus[0] = 7;
    client.send_to(&bogus, hops[0].addr).await?;

    wait_for(|| hops[0].stats.snapshot().dropped_format == 2).await?;

    send_chunks(hops[0].addr, &raw_data(Bytes::from_static(b"x"), 1)).await;
    let (_, result) = collector.recv_result().await?;
    assert!(result.is_final);
    Ok(())
}
