mod common;

use common::{connect, ingest, query, start_agent_in, wire_kpak};
use sutra_protocol::pb;
use tempfile::TempDir;

// Ingest many conflicting kpaks, kill the node, restart over the same WAL,
// and check that replay reconstructs exactly the reconciled maximum per
// subject+predicate.
#[tokio::test]
async fn restart_recovers_reconciled_truth_from_wal() {
    let dir = TempDir::new().unwrap();

    let subjects = ["web-1", "web-2", "db-1", "db-2", "cache-1"];
    let first = start_agent_in(&dir, |_| {}).await;
    {
        let mut client = connect(&first).await;

        // 100 kpaks over 5 subjects: 4 predicates each, 5 rounds of rising
        // confidence. Only the last round should survive reconciliation.
        let mut batch = Vec::new();
        for round in 0..5u32 {
            for subject in &subjects {
                for predicate in ["cpu", "memory", "disk", "status"] {
                    let mut kpak = wire_kpak(
                        subject,
                        predicate,
                        &format!("value-{round}"),
                        "monitor",
                        0.5 + 0.1 * round as f32,
                    );
                    kpak.timestamp = 1_000 + round as i64;
                    batch.push(kpak);
                }
            }
        }
        assert_eq!(batch.len(), 100);

        let reply = ingest(&mut client, batch).await;
        assert_eq!(reply.accepted + reply.rejected, 100);
        assert_eq!(reply.accepted, 100);
    }
    first.shutdown().await.unwrap();

    let second = start_agent_in(&dir, |_| {}).await;
    let mut client = connect(&second).await;

    let metrics = client
        .get_metrics(pb::MetricsRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(metrics.total_kpaks, 20);
    assert_eq!(metrics.total_subjects, 5);

    for subject in &subjects {
        let believed = query(&mut client, subject, None).await;
        assert_eq!(believed.len(), 4);
        for kpak in believed {
            assert_eq!(kpak.object, "value-4");
            assert_eq!(kpak.timestamp, 1_004);
        }
    }

    second.shutdown().await.unwrap();
}

// Replaying the same log into a fresh node twice must produce the same
// truth: recovery is a function of the log contents alone.
#[tokio::test]
async fn replay_is_idempotent_across_restarts() {
    let dir = TempDir::new().unwrap();

    let first = start_agent_in(&dir, |_| {}).await;
    {
        let mut client = connect(&first).await;
        let mut low = wire_kpak("pluto", "is_planet", "true", "old-text", 0.6);
        low.timestamp = 1_000;
        let mut high = wire_kpak("pluto", "is_planet", "false", "iau-2006", 0.99);
        high.timestamp = 1_001;
        ingest(&mut client, vec![low, high]).await;
    }
    first.shutdown().await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let node = start_agent_in(&dir, |_| {}).await;
        let mut client = connect(&node).await;
        let mut believed = query(&mut client, "pluto", None).await;
        assert_eq!(believed.len(), 1);
        assert_eq!(believed[0].object, "false");
        seen.push(believed.remove(0));
        node.shutdown().await.unwrap();
    }
    assert_eq!(seen[0], seen[1]);
}
