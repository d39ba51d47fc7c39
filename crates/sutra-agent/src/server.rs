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

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use sutra_core::kpak::{unix_now, Kpak};
use sutra_protocol::pb;
use sutra_protocol::pb::sutra_service_server::SutraService as SutraServiceTrait;

use crate::agent::AgentInner;

/// SutraService answers the five mesh operations on behalf of one agent.
#[derive(Clone)]
pub struct SutraService {
    inner: Arc<AgentInner>,
}

impl SutraService {
    pub(crate) fn new(inner: Arc<AgentInner>) -> Self {
        SutraService { inner }
    }

    /// Mediates an inbound wire kpak into a local one. A positive inbound
    /// `expires_at` is preserved (even when already in the past; the
    /// reconciler and GC deal with it); otherwise the node-wide default TTL
    /// applies. A positive inbound `timestamp` is preserved and the
    /// fingerprints are recomputed over it, making the server-side values
    /// canonical.
    fn admit(&self, proto: &pb::Kpak) -> Result<Kpak, String> {
        if !proto.confidence.is_finite() || !(0.0..=1.0).contains(&proto.confidence) {
            return Err(format!(
                "invalid confidence {} for subject {:?}",
                proto.confidence, proto.subject
            ));
        }

        let now = unix_now();
        let mut ttl_seconds = 0i64;
        if proto.expires_at > 0 {
            if proto.expires_at > now {
                ttl_seconds = proto.expires_at - now;
            }
        } else if self.inner.config.default_ttl_seconds > 0 {
            ttl_seconds = self.inner.config.default_ttl_seconds;
        }

        let mut kpak = Kpak::with_ttl(
            &proto.subject,
            &proto.predicate,
            &proto.object,
            &proto.source,
            proto.confidence,
            ttl_seconds,
        );

        if proto.expires_at > 0 {
            kpak.expires_at = proto.expires_at;
        }
        if proto.timestamp > 0 {
            kpak.timestamp = proto.timestamp;
            kpak.regenerate_fingerprints();
        }

        Ok(kpak)
    }
}

fn kpak_to_proto(kpak: &Kpak) -> pb::Kpak {
    pb::Kpak {
        subject: kpak.subject.clone(),
        predicate: kpak.predicate.clone(),
        object: kpak.object.clone(),
        source: kpak.source.clone(),
        confidence: kpak.confidence,
        timestamp: kpak.timestamp,
        id: kpak.id.clone(),
        spid: kpak.spid.clone(),
        expires_at: kpak.expires_at,
    }
}

#[tonic::async_trait]
impl SutraServiceTrait for SutraService {
    async fn ingest(
        &self,
        request: Request<Streaming<pb::Kpak>>,
    ) -> Result<Response<pb::IngestResponse>, Status> {
        let mut stream = request.into_inner();

        let mut accepted = 0i32;
        let mut rejected = 0i32;
        let mut errors: Vec<String> = Vec::new();

        loop {
            let proto = match stream.message().await {
                Ok(Some(proto)) => proto,
                Ok(None) => break,
                Err(status) => {
                    tracing::warn!(error = %status, "ingest stream aborted");
                    break;
                }
            };

            let kpak = match self.admit(&proto) {
                Ok(kpak) => kpak,
                Err(message) => {
                    errors.push(message);
                    rejected += 1;
                    self.inner.metrics.record_ingest(&proto.source, false);
                    continue;
                }
            };

            if !self.inner.engine.reconcile(&kpak) {
                rejected += 1;
                self.inner.metrics.record_ingest(&kpak.source, false);
                continue;
            }

            match self.inner.wal.append(&kpak) {
                Ok(()) => {
                    accepted += 1;
                    self.inner.metrics.record_ingest(&kpak.source, true);

                    if let Err(err) = self.inner.gossip.broadcast_kpak(&kpak).await {
                        tracing::warn!(error = %err, "failed to broadcast kpak to mesh");
                    }
                }
                Err(err) => {
                    errors.push(format!("failed to persist kpak: {err}"));
                    rejected += 1;
                    self.inner.metrics.record_ingest(&kpak.source, false);
                }
            }
        }

        Ok(Response::new(pb::IngestResponse {
            accepted,
            rejected,
            errors,
        }))
    }

    type QueryStream = ReceiverStream<Result<pb::Kpak, Status>>;

    async fn query(
        &self,
        request: Request<pb::QueryRequest>,
    ) -> Result<Response<Self::QueryStream>, Status> {
        let req = request.into_inner();
        self.inner.metrics.record_query();

        let kpaks: Vec<Kpak> = match req.predicate.as_deref() {
            Some(predicate) if !predicate.is_empty() => self
                .inner
                .engine
                .query_by_subject_predicate(&req.subject, predicate)
                .into_iter()
                .collect(),
            _ => self.inner.engine.query_by_subject(&req.subject),
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for kpak in kpaks {
                if tx.send(Ok(kpak_to_proto(&kpak))).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn health(
        &self,
        _request: Request<pb::HealthRequest>,
    ) -> Result<Response<pb::HealthResponse>, Status> {
        let stats = self.inner.engine.stats();
        let health = self.inner.metrics.health(stats.total_kpaks as i32);

        Ok(Response::new(pb::HealthResponse {
            status: health.state.as_str().to_string(),
            kpak_count: health.kpak_count,
            uptime_seconds: health.uptime_seconds,
        }))
    }

    async fn get_peers(
        &self,
        _request: Request<pb::PeersRequest>,
    ) -> Result<Response<pb::PeersResponse>, Status> {
        let peers = self
            .inner
            .gossip
            .members()
            .into_iter()
            .map(|member| pb::PeerInfo {
                address: member.addr.to_string(),
                name: member.name,
                state: member.state.as_i32(),
                last_seen: member.last_seen,
            })
            .collect();

        Ok(Response::new(pb::PeersResponse { peers }))
    }

    async fn get_metrics(
        &self,
        _request: Request<pb::MetricsRequest>,
    ) -> Result<Response<pb::MetricsResponse>, Status> {
        let stats = self.inner.engine.stats();
        let snapshot = self
            .inner
            .metrics
            .snapshot(stats.total_kpaks as i32, stats.total_subjects as i32);

        Ok(Response::new(pb::MetricsResponse {
            total_kpaks: snapshot.total_kpaks,
            total_subjects: snapshot.total_subjects,
            ingest_rate_per_min: snapshot.ingest_rate_per_min,
            query_rate_per_min: snapshot.query_rate_per_min,
            uptime_seconds: snapshot.uptime_seconds,
            memory_usage_bytes: snapshot.memory_usage_bytes,
            cpu_usage_percent: snapshot.cpu_usage_percent,
            version: snapshot.version,
            active_sources: snapshot.active_sources,
        }))
    }
}
