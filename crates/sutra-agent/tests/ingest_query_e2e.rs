mod common;

use common::{connect, ingest, query, start_agent, wire_kpak};
use sutra_protocol::pb;

#[tokio::test]
async fn ingest_then_query_roundtrips_over_the_wire() {
    let (_dir, agent) = start_agent(|_| {}).await;
    let mut client = connect(&agent).await;

    let reply = ingest(
        &mut client,
        vec![
            wire_kpak("mars", "color", "red", "probe", 0.9),
            wire_kpak("mars", "moons", "2", "probe", 0.9),
            wire_kpak("venus", "moons", "0", "probe", 0.9),
        ],
    )
    .await;
    assert_eq!(reply.accepted, 3);
    assert_eq!(reply.rejected, 0);
    assert!(reply.errors.is_empty());

    let mars = query(&mut client, "mars", None).await;
    assert_eq!(mars.len(), 2);
    assert!(mars.iter().all(|k| k.subject == "mars"));

    let moons = query(&mut client, "mars", Some("moons")).await;
    assert_eq!(moons.len(), 1);
    assert_eq!(moons[0].object, "2");

    assert!(query(&mut client, "jupiter", None).await.is_empty());

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn preserved_timestamp_yields_canonical_fingerprints() {
    let (_dir, agent) = start_agent(|_| {}).await;
    let mut client = connect(&agent).await;

    let mut kpak = wire_kpak("pluto", "is_planet", "true", "test", 0.99);
    kpak.timestamp = 1_700_000_000;
    // Sender-supplied fingerprints are never trusted.
    kpak.id = "bogus".to_string();
    kpak.spid = "bogus".to_string();

    let reply = ingest(&mut client, vec![kpak]).await;
    assert_eq!(reply.accepted, 1);

    let believed = query(&mut client, "pluto", Some("is_planet")).await;
    assert_eq!(believed.len(), 1);
    assert_eq!(believed[0].timestamp, 1_700_000_000);
    assert_eq!(believed[0].id, "fea5289e8e0dfd8a");
    assert_eq!(believed[0].spid, "1c4cdc48c67a");

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn dominated_and_duplicate_kpaks_are_rejected() {
    let (_dir, agent) = start_agent(|_| {}).await;
    let mut client = connect(&agent).await;

    let mut weak = wire_kpak("pluto", "is_planet", "true", "old-text", 0.6);
    weak.timestamp = 1_000;
    let mut strong = wire_kpak("pluto", "is_planet", "false", "iau-2006", 0.99);
    strong.timestamp = 1_001;

    let reply = ingest(
        &mut client,
        vec![weak.clone(), strong.clone(), weak, strong],
    )
    .await;
    assert_eq!(reply.accepted, 2);
    assert_eq!(reply.rejected, 2);

    let believed = query(&mut client, "pluto", None).await;
    assert_eq!(believed.len(), 1);
    assert_eq!(believed[0].object, "false");
    assert_eq!(believed[0].confidence, 0.99);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_confidence_is_rejected_with_an_error_entry() {
    let (_dir, agent) = start_agent(|_| {}).await;
    let mut client = connect(&agent).await;

    let reply = ingest(
        &mut client,
        vec![
            wire_kpak("ok", "p", "v", "test", 0.5),
            wire_kpak("bad", "p", "v", "test", 1.5),
            wire_kpak("worse", "p", "v", "test", f32::NAN),
        ],
    )
    .await;
    assert_eq!(reply.accepted, 1);
    assert_eq!(reply.rejected, 2);
    assert_eq!(reply.errors.len(), 2);
    assert!(reply.errors.iter().all(|e| e.contains("confidence")));

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn default_ttl_applies_when_inbound_kpak_has_none() {
    let (_dir, agent) = start_agent(|config| {
        config.default_ttl_seconds = 3600;
    })
    .await;
    let mut client = connect(&agent).await;

    ingest(&mut client, vec![wire_kpak("s", "p", "v", "test", 1.0)]).await;

    let believed = query(&mut client, "s", Some("p")).await;
    assert_eq!(believed.len(), 1);
    assert!(believed[0].expires_at > 0);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn inbound_expiry_is_preserved() {
    let (_dir, agent) = start_agent(|config| {
        config.default_ttl_seconds = 3600;
    })
    .await;
    let mut client = connect(&agent).await;

    let mut kpak = wire_kpak("s", "p", "v", "test", 1.0);
    kpak.expires_at = 4_000_000_000;
    ingest(&mut client, vec![kpak]).await;

    let believed = query(&mut client, "s", Some("p")).await;
    assert_eq!(believed[0].expires_at, 4_000_000_000);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn health_reports_warming_agent_as_degraded() {
    let (_dir, agent) = start_agent(|_| {}).await;
    let mut client = connect(&agent).await;

    ingest(&mut client, vec![wire_kpak("s", "p", "v", "test", 1.0)]).await;

    let health = client
        .health(pb::HealthRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(health.status, "degraded");
    assert_eq!(health.kpak_count, 1);
    assert!(health.uptime_seconds < 30);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn metrics_reflect_traffic_and_sources() {
    let (_dir, agent) = start_agent(|_| {}).await;
    let mut client = connect(&agent).await;

    ingest(
        &mut client,
        vec![
            wire_kpak("a", "p", "v", "scout-a", 0.9),
            wire_kpak("b", "p", "v", "scout-b", 0.9),
        ],
    )
    .await;
    query(&mut client, "a", None).await;

    let metrics = client
        .get_metrics(pb::MetricsRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(metrics.total_kpaks, 2);
    assert_eq!(metrics.total_subjects, 2);
    assert_eq!(metrics.ingest_rate_per_min, 2);
    assert_eq!(metrics.query_rate_per_min, 1);
    assert_eq!(metrics.version, env!("CARGO_PKG_VERSION"));
    assert!(metrics.active_sources.contains(&"scout-a".to_string()));
    assert!(metrics.active_sources.contains(&"scout-b".to_string()));

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn peers_lists_the_local_node() {
    let (_dir, agent) = start_agent(|_| {}).await;
    let mut client = connect(&agent).await;

    let peers = client
        .get_peers(pb::PeersRequest {})
        .await
        .unwrap()
        .into_inner()
        .peers;
    assert_eq!(peers.len(), 1);
    assert!(peers[0].name.starts_with("sutra-"));
    assert_eq!(peers[0].state, 0);

    agent.shutdown().await.unwrap();
}
