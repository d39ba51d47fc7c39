#![allow(dead_code)]

use std::time::{Duration, Instant};

use sutra_agent::{Agent, AgentConfig};
use sutra_protocol::pb;
use sutra_protocol::pb::sutra_service_client::SutraServiceClient;
use tempfile::TempDir;
use tonic::transport::Channel;

/// Starts an agent on ephemeral ports with its WAL in a fresh tempdir.
/// The tempdir must outlive the agent.
pub async fn start_agent(configure: impl FnOnce(&mut AgentConfig)) -> (TempDir, Agent) {
    let dir = TempDir::new().unwrap();
    let agent = start_agent_in(&dir, configure).await;
    (dir, agent)
}

/// Starts an agent whose WAL lives in the caller's tempdir, so a second
/// agent can be restarted over the same log.
pub async fn start_agent_in(dir: &TempDir, configure: impl FnOnce(&mut AgentConfig)) -> Agent {
    let mut config = AgentConfig {
        host: "127.0.0.1".to_string(),
        grpc_port: 0,
        gossip_port: 0,
        wal_path: dir.path().join("sutra.wal").to_string_lossy().into_owned(),
        gc_enabled: false,
        ..AgentConfig::default()
    };
    configure(&mut config);

    let agent = Agent::new(config).unwrap();
    agent.start().await.unwrap();
    agent
}

pub async fn connect(agent: &Agent) -> SutraServiceClient<Channel> {
    let addr = agent.grpc_addr().unwrap();
    SutraServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap()
}

pub fn wire_kpak(
    subject: &str,
    predicate: &str,
    object: &str,
    source: &str,
    confidence: f32,
) -> pb::Kpak {
    pb::Kpak {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object: object.to_string(),
        source: source.to_string(),
        confidence,
        timestamp: 0,
        id: String::new(),
        spid: String::new(),
        expires_at: 0,
    }
}

pub async fn ingest(
    client: &mut SutraServiceClient<Channel>,
    kpaks: Vec<pb::Kpak>,
) -> pb::IngestResponse {
    client
        .ingest(tokio_stream::iter(kpaks))
        .await
        .unwrap()
        .into_inner()
}

pub async fn query(
    client: &mut SutraServiceClient<Channel>,
    subject: &str,
    predicate: Option<&str>,
) -> Vec<pb::Kpak> {
    let request = pb::QueryRequest {
        subject: subject.to_string(),
        predicate: predicate.map(|p| p.to_string()),
    };
    let mut stream = client.query(request).await.unwrap().into_inner();

    let mut kpaks = Vec::new();
    while let Some(kpak) = stream.message().await.unwrap() {
        kpaks.push(kpak);
    }
    kpaks
}

/// Polls an async condition until it holds or the deadline passes.
pub async fn wait_until<F, Fut>(mut check: F, deadline: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check().await
}
