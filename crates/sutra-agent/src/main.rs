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
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sutra_agent::{Agent, AgentConfig};

#[derive(Debug, Parser)]
#[command(name = "sutra-agent")]
#[command(about = "Sutra knowledge mesh agent")]
struct Args {
    /// Path to a JSON configuration file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    grpc_port: Option<u16>,

    #[arg(long)]
    gossip_port: Option<u16>,

    /// Peer endpoint to join on startup; may be repeated.
    #[arg(long = "join")]
    join_peers: Vec<String>,

    #[arg(long)]
    wal_path: Option<String>,

    #[arg(long)]
    default_ttl_seconds: Option<i64>,

    #[arg(long)]
    gc_interval_seconds: Option<i64>,

    #[arg(long)]
    gc_disabled: bool,

    /// Log filter, e.g. "info" or "sutra_core=debug".
    #[arg(long)]
    log: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<AgentConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.grpc_port {
            config.grpc_port = port;
        }
        if let Some(port) = self.gossip_port {
            config.gossip_port = port;
        }
        if !self.join_peers.is_empty() {
            config.join_peers = self.join_peers;
        }
        if let Some(path) = self.wal_path {
            config.wal_path = path;
        }
        if let Some(ttl) = self.default_ttl_seconds {
            config.default_ttl_seconds = ttl;
        }
        if let Some(interval) = self.gc_interval_seconds {
            config.gc_interval_seconds = interval;
        }
        if self.gc_disabled {
            config.gc_enabled = false;
        }
        if let Some(log) = self.log {
            config.log_level = log;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.into_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    tracing::info!(
        host = %config.host,
        grpc_port = config.grpc_port,
        gossip_port = config.gossip_port,
        wal = %config.wal_path,
        "starting sutra agent"
    );

    let agent = Agent::new(config)?;
    agent.start().await?;

    wait_for_shutdown_signal().await;

    agent.shutdown().await?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received interrupt"),
            _ = sigterm.recv() => tracing::info!("received terminate"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received interrupt");
    }
}
