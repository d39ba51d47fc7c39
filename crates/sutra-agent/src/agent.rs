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

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;

use sutra_core::engine::Engine;
use sutra_core::gossip::{GossipConfig, Manager};
use sutra_core::metrics::Metrics;
use sutra_core::wal::Wal;
use sutra_core::{Kpak, SutraError, SutraResult};
use sutra_protocol::pb::sutra_service_server::SutraServiceServer;
use sutra_protocol::CLUSTER_NAME;

use crate::config::AgentConfig;
use crate::gc::GarbageCollector;
use crate::server::SutraService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initialized,
    Starting,
    Running,
    Stopped,
}

/// Shared node state handed to the gRPC service and the gossip handler.
pub(crate) struct AgentInner {
    pub(crate) config: AgentConfig,
    pub(crate) engine: Arc<Engine>,
    pub(crate) wal: Arc<Wal>,
    pub(crate) gossip: Arc<Manager>,
    pub(crate) metrics: Arc<Metrics>,
}

struct GrpcTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Agent is the coordinator of one mesh node. It owns every component's
/// lifecycle: `start` replays the WAL into the engine before serving
/// traffic, then brings up the gRPC server, the gossip layer, and the
/// garbage collector; `shutdown` tears them down in reverse order.
pub struct Agent {
    inner: Arc<AgentInner>,
    gc: GarbageCollector,
    state: Mutex<Lifecycle>,
    grpc: Mutex<Option<GrpcTask>>,
    grpc_addr: Mutex<Option<SocketAddr>>,
}

impl Agent {
    /// Builds the agent's components. Fails when the WAL cannot be opened.
    pub fn new(config: AgentConfig) -> SutraResult<Self> {
        let engine = Arc::new(Engine::new());
        let wal = Arc::new(Wal::open(&config.wal_path)?);
        let metrics = Arc::new(Metrics::new());

        let gossip = Arc::new(Manager::new(GossipConfig::new(
            &config.host,
            config.gossip_port,
            config.join_peers.clone(),
            CLUSTER_NAME,
        )));

        // Kpaks arriving over gossip take the same reconcile -> persist
        // path as local ingest, but are never re-broadcast: every node
        // gossips a kpak at most once, which keeps the mesh storm-free.
        {
            let engine = engine.clone();
            let wal = wal.clone();
            let metrics = metrics.clone();
            gossip.set_kpak_handler(Arc::new(move |kpak: Kpak| {
                let accepted = engine.reconcile(&kpak);
                if accepted {
                    if let Err(err) = wal.append(&kpak) {
                        tracing::warn!(error = %err, "failed to persist gossiped kpak");
                    }
                }
                metrics.record_ingest(&kpak.source, accepted);
                accepted
            }));
        }

        let gc = GarbageCollector::new(engine.clone(), config.gc_interval_seconds, config.gc_enabled);

        Ok(Agent {
            inner: Arc::new(AgentInner {
                config,
                engine,
                wal,
                gossip,
                metrics,
            }),
            gc,
            state: Mutex::new(Lifecycle::Initialized),
            grpc: Mutex::new(None),
            grpc_addr: Mutex::new(None),
        })
    }

    /// Starts the agent: WAL replay, gRPC server, gossip, GC. Starting an
    /// agent that is already running (or already stopped) is a lifecycle
    /// error with no side effects.
    pub async fn start(&self) -> SutraResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                Lifecycle::Initialized => *state = Lifecycle::Starting,
                Lifecycle::Starting | Lifecycle::Running => {
                    return Err(SutraError::InvalidState(
                        "agent is already running".to_string(),
                    ));
                }
                Lifecycle::Stopped => {
                    return Err(SutraError::InvalidState(
                        "agent has been stopped".to_string(),
                    ));
                }
            }
        }

        match self.start_components().await {
            Ok(()) => {
                *self.state.lock() = Lifecycle::Running;
                tracing::info!(
                    grpc = ?self.grpc_addr(),
                    gossip = ?self.inner.gossip.local_addr(),
                    "sutra agent started"
                );
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = Lifecycle::Stopped;
                Err(err)
            }
        }
    }

    async fn start_components(&self) -> SutraResult<()> {
        self.replay_wal()?;
        self.start_grpc().await?;
        self.inner.gossip.start().await?;
        self.gc.start();
        Ok(())
    }

    /// Restores the believed truth from the WAL. Replay runs through
    /// reconciliation, so duplicates and dominated records fall out and the
    /// resulting state depends on the log contents alone.
    fn replay_wal(&self) -> SutraResult<()> {
        let kpaks = self.inner.wal.load()?;
        let loaded = kpaks.len();

        let mut accepted = 0usize;
        for kpak in &kpaks {
            if self.inner.engine.reconcile(kpak) {
                accepted += 1;
            }
        }

        tracing::info!(loaded, accepted, wal = %self.inner.wal.path().display(), "restored knowledge from wal");
        Ok(())
    }

    async fn start_grpc(&self) -> SutraResult<()> {
        let addr: SocketAddr = format!("{}:{}", self.inner.config.host, self.inner.config.grpc_port)
            .parse()
            .map_err(|err| {
                SutraError::Network(format!(
                    "invalid grpc bind address {}:{}: {err}",
                    self.inner.config.host, self.inner.config.grpc_port
                ))
            })?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| SutraError::Network(format!("failed to bind grpc on {addr}: {err}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| SutraError::Network(format!("failed to read grpc bind address: {err}")))?;
        let incoming = TcpIncoming::from_listener(listener, true, None)
            .map_err(|err| SutraError::Network(format!("failed to prepare grpc listener: {err}")))?;

        let service = SutraService::new(self.inner.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(SutraServiceServer::new(service))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "grpc server error");
            }
        });

        *self.grpc_addr.lock() = Some(local_addr);
        *self.grpc.lock() = Some(GrpcTask {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Gracefully stops every component in reverse start order. Stopping an
    /// agent that is not running is a no-op.
    pub async fn shutdown(&self) -> SutraResult<()> {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Running {
                return Ok(());
            }
            *state = Lifecycle::Stopped;
        }

        tracing::info!("shutting down sutra agent");

        self.gc.stop().await;

        if let Err(err) = self.inner.gossip.stop().await {
            tracing::warn!(error = %err, "error stopping gossip manager");
        }

        let grpc = self.grpc.lock().take();
        if let Some(grpc) = grpc {
            let _ = grpc.shutdown.send(());
            if let Err(err) = grpc.handle.await {
                tracing::warn!(error = %err, "grpc task ended abnormally");
            }
        }

        if let Err(err) = self.inner.wal.close() {
            tracing::warn!(error = %err, "error closing wal");
        }

        tracing::info!("sutra agent shut down");
        Ok(())
    }

    /// Actual gRPC bind address, available once started. Useful when the
    /// configured port is 0.
    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        *self.grpc_addr.lock()
    }

    pub fn gossip_addr(&self) -> Option<SocketAddr> {
        self.inner.gossip.local_addr()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.inner.engine
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }
}
