// Copyright [2026] [The Sutra Mesh Authors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 The Sutra Mesh Authors and Sutra Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

use sutra_core::kpak::unix_now;
use sutra_protocol::pb;
use sutra_protocol::pb::sutra_service_client::SutraServiceClient;
use sutra_protocol::PeerState;

#[derive(Debug, Parser)]
#[command(name = "sutractl")]
#[command(about = "Sutra Control - CLI for interacting with Sutra agents")]
struct Cli {
    /// Address of the agent to talk to.
    #[arg(long, global = true, default_value = "127.0.0.1:9090")]
    agent: String,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one knowledge packet to the mesh.
    Ingest {
        subject: String,
        predicate: String,
        object: String,

        /// Source identifier for this knowledge.
        #[arg(long, default_value = "sutractl")]
        source: String,

        /// Confidence level (0.0-1.0).
        #[arg(long, default_value_t = 1.0)]
        confidence: f32,

        /// Time to live in seconds (0 = never expires).
        #[arg(long, default_value_t = 0)]
        ttl: i64,
    },
    /// Query knowledge about a subject, optionally by predicate.
    Query {
        subject: String,
        predicate: Option<String>,
    },
    /// Check agent health.
    Health,
    /// List gossip mesh peers.
    Peers,
    /// Show agent performance metrics.
    Metrics,
    /// Show combined health and metrics status.
    Status,
}

type CliError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let endpoint = Endpoint::from_shared(format!("http://{}", cli.agent))?
        .timeout(Duration::from_secs(cli.timeout))
        .connect_timeout(Duration::from_secs(cli.timeout));
    let channel = endpoint.connect().await.map_err(|err| -> CliError {
        format!("failed to connect to agent at {}: {err}", cli.agent).into()
    })?;
    let mut client = SutraServiceClient::new(channel);

    match cli.cmd {
        Command::Ingest {
            subject,
            predicate,
            object,
            source,
            confidence,
            ttl,
        } => ingest(&mut client, subject, predicate, object, source, confidence, ttl).await,
        Command::Query { subject, predicate } => query(&mut client, subject, predicate).await,
        Command::Health => health(&mut client).await,
        Command::Peers => peers(&mut client).await,
        Command::Metrics => metrics(&mut client).await,
        Command::Status => status(&mut client).await,
    }
}

async fn ingest(
    client: &mut SutraServiceClient<Channel>,
    subject: String,
    predicate: String,
    object: String,
    source: String,
    confidence: f32,
    ttl: i64,
) -> Result<(), CliError> {
    let expires_at = if ttl > 0 { unix_now() + ttl } else { 0 };
    let kpak = pb::Kpak {
        subject,
        predicate,
        object,
        source,
        confidence,
        timestamp: 0,
        id: String::new(),
        spid: String::new(),
        expires_at,
    };

    let reply = client
        .ingest(tokio_stream::iter(vec![kpak]))
        .await?
        .into_inner();

    println!(
        "accepted: {}  rejected: {}",
        reply.accepted, reply.rejected
    );
    for error in reply.errors {
        eprintln!("error: {error}");
    }
    Ok(())
}

async fn query(
    client: &mut SutraServiceClient<Channel>,
    subject: String,
    predicate: Option<String>,
) -> Result<(), CliError> {
    let request = pb::QueryRequest {
        subject: subject.clone(),
        predicate,
    };
    let mut stream = client.query(request).await?.into_inner();

    let mut count = 0usize;
    while let Some(kpak) = stream.message().await? {
        count += 1;
        let expiry = if kpak.expires_at > 0 {
            format!("  expires_at={}", kpak.expires_at)
        } else {
            String::new()
        };
        println!(
            "{} {} = {}  (source={} confidence={:.2} timestamp={}{})",
            kpak.subject, kpak.predicate, kpak.object, kpak.source, kpak.confidence,
            kpak.timestamp, expiry
        );
    }

    if count == 0 {
        println!("no knowledge found for subject {subject:?}");
    }
    Ok(())
}

async fn health(client: &mut SutraServiceClient<Channel>) -> Result<(), CliError> {
    let reply = client.health(pb::HealthRequest {}).await?.into_inner();
    println!("status: {}", reply.status);
    println!("kpaks: {}", reply.kpak_count);
    println!("uptime: {}s", reply.uptime_seconds);
    Ok(())
}

async fn peers(client: &mut SutraServiceClient<Channel>) -> Result<(), CliError> {
    let reply = client.get_peers(pb::PeersRequest {}).await?.into_inner();
    if reply.peers.is_empty() {
        println!("no peers known");
        return Ok(());
    }
    for peer in reply.peers {
        let state = PeerState::try_from(peer.state)
            .map(PeerState::as_str)
            .unwrap_or("unknown");
        println!(
            "{}  {}  state={}  last_seen={}",
            peer.name, peer.address, state, peer.last_seen
        );
    }
    Ok(())
}

async fn metrics(client: &mut SutraServiceClient<Channel>) -> Result<(), CliError> {
    let reply = client.get_metrics(pb::MetricsRequest {}).await?.into_inner();
    println!("kpaks: {}", reply.total_kpaks);
    println!("subjects: {}", reply.total_subjects);
    println!("ingest rate: {}/min", reply.ingest_rate_per_min);
    println!("query rate: {}/min", reply.query_rate_per_min);
    println!("uptime: {}s", reply.uptime_seconds);
    println!("memory: {} bytes", reply.memory_usage_bytes);
    println!("version: {}", reply.version);
    println!("active sources: {}", reply.active_sources.join(", "));
    Ok(())
}

async fn status(client: &mut SutraServiceClient<Channel>) -> Result<(), CliError> {
    let health = client.health(pb::HealthRequest {}).await?.into_inner();
    let metrics = client.get_metrics(pb::MetricsRequest {}).await?.into_inner();

    println!("agent {} ({})", health.status, metrics.version);
    println!(
        "  {} kpaks over {} subjects, up {}s",
        metrics.total_kpaks, metrics.total_subjects, metrics.uptime_seconds
    );
    println!(
        "  {} ingests/min, {} queries/min, {} active sources",
        metrics.ingest_rate_per_min,
        metrics.query_rate_per_min,
        metrics.active_sources.len()
    );
    Ok(())
}
