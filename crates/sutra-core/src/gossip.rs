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

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use sutra_protocol::{PeerState, MSG_KPAK};

use crate::error::{SutraError, SutraResult};
use crate::kpak::{unix_now, Kpak};

const MSG_JOIN: &str = "join";
const MSG_JOIN_ACK: &str = "join-ack";
const MSG_PING: &str = "ping";
const MSG_ACK: &str = "ack";
const MSG_LEAVE: &str = "leave";

const RECV_BUF_LEN: usize = 64 * 1024;

/// Callback invoked for every kpak received from the mesh. Returns whether
/// the kpak was accepted into the local truth store.
pub type KpakHandler = Arc<dyn Fn(Kpak) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Local bind address for the UDP socket.
    pub bind_addr: String,
    /// Local gossip port; 0 picks an ephemeral port.
    pub bind_port: u16,
    /// `host:port` endpoints contacted once at startup.
    pub join_peers: Vec<String>,
    pub cluster_name: String,
    /// Cadence of the probe/reclassification loop.
    pub probe_interval: Duration,
    /// A member not heard from for this long is suspect.
    pub suspect_after: Duration,
    /// A member not heard from for this long is dead.
    pub dead_after: Duration,
}

impl GossipConfig {
    pub fn new(bind_addr: &str, bind_port: u16, join_peers: Vec<String>, cluster_name: &str) -> Self {
        GossipConfig {
            bind_addr: bind_addr.to_string(),
            bind_port,
            join_peers,
            cluster_name: cluster_name.to_string(),
            probe_interval: Duration::from_secs(1),
            suspect_after: Duration::from_secs(5),
            dead_after: Duration::from_secs(15),
        }
    }
}

/// Metadata each node advertises about itself when joining the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub started: i64,
}

impl NodeMeta {
    fn local() -> Self {
        NodeMeta {
            kind: "sutra-agent".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started: unix_now(),
        }
    }
}

/// A known mesh member as reported by `Manager::members`.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub addr: SocketAddr,
    pub state: PeerState,
    /// Unix seconds of the last message heard from this member.
    pub last_seen: i64,
    pub meta: Option<NodeMeta>,
}

/// Wire form of a member used inside join/ack payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberRecord {
    name: String,
    addr: String,
    meta: Option<NodeMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    from: MemberRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemberList {
    members: Vec<MemberRecord>,
}

/// The gossip envelope. `type` tags the payload so future message kinds can
/// be added without breaking current peers; unknown tags are dropped.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(with = "b64")]
    payload: Vec<u8>,
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

fn encode_envelope(kind: &str, payload: Vec<u8>) -> SutraResult<Vec<u8>> {
    Ok(serde_json::to_vec(&Envelope {
        kind: kind.to_string(),
        payload,
    })?)
}

/// Liveness classification from seconds since the member was last heard.
fn classify(silent_for: Duration, config: &GossipConfig) -> PeerState {
    if silent_for >= config.dead_after {
        PeerState::Dead
    } else if silent_for >= config.suspect_after {
        PeerState::Suspect
    } else {
        PeerState::Alive
    }
}

/// Manager runs SWIM-style peer membership and best-effort dissemination of
/// accepted kpaks over UDP.
///
/// Membership is maintained by a periodic probe loop: every tick one random
/// live member is pinged and all members are reclassified from how long
/// they have been silent. Kpak delivery is at-most-once per peer with no
/// ordering and no retries; the reconciliation trust rule makes duplicate
/// and out-of-order delivery harmless.
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    config: GossipConfig,
    meta: NodeMeta,
    local_name: RwLock<String>,
    members: RwLock<HashMap<String, Member>>,
    handler: RwLock<Option<KpakHandler>>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    running: Mutex<bool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(config: GossipConfig) -> Self {
        Manager {
            inner: Arc::new(Inner {
                config,
                meta: NodeMeta::local(),
                local_name: RwLock::new(String::new()),
                members: RwLock::new(HashMap::new()),
                handler: RwLock::new(None),
                socket: RwLock::new(None),
                running: Mutex::new(false),
                shutdown: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers the callback for kpaks received from peers. Must be set
    /// before `start` for inbound kpaks to be applied.
    pub fn set_kpak_handler(&self, handler: KpakHandler) {
        *self.inner.handler.write() = Some(handler);
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.lock()
    }

    pub fn local_name(&self) -> String {
        self.inner.local_name.read().clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        let socket = self.inner.socket.read().clone()?;
        socket.local_addr().ok()
    }

    /// Binds the gossip socket, starts the receive and probe loops, and
    /// contacts the configured seed peers. Partial join failure is logged
    /// and non-fatal; failure to bind is fatal.
    pub async fn start(&self) -> SutraResult<()> {
        {
            let mut running = self.inner.running.lock();
            if *running {
                return Err(SutraError::InvalidState(
                    "gossip manager already running".to_string(),
                ));
            }
            *running = true;
        }

        let bind = (self.inner.config.bind_addr.as_str(), self.inner.config.bind_port);
        let socket = match UdpSocket::bind(bind).await {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                *self.inner.running.lock() = false;
                return Err(SutraError::Network(format!(
                    "failed to bind gossip socket on {}:{}: {err}",
                    self.inner.config.bind_addr, self.inner.config.bind_port
                )));
            }
        };

        let port = socket
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.inner.config.bind_port);
        let local_name = format!("sutra-{}-{}", self.inner.config.bind_addr, port);
        *self.inner.local_name.write() = local_name.clone();

        let advertised: SocketAddr = match format!("{}:{port}", self.inner.config.bind_addr).parse()
        {
            Ok(addr) => addr,
            Err(err) => {
                *self.inner.running.lock() = false;
                return Err(SutraError::Network(format!(
                    "invalid gossip bind address {}: {err}",
                    self.inner.config.bind_addr
                )));
            }
        };

        self.inner.members.write().insert(
            local_name.clone(),
            Member {
                name: local_name.clone(),
                addr: advertised,
                state: PeerState::Alive,
                last_seen: unix_now(),
                meta: Some(self.inner.meta.clone()),
            },
        );

        *self.inner.socket.write() = Some(socket.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.inner.shutdown.lock() = Some(shutdown_tx);

        let recv_inner = self.inner.clone();
        let recv_socket = socket.clone();
        let mut recv_shutdown = shutdown_rx.clone();
        let recv_task = tokio::spawn(async move {
            recv_loop(recv_inner, recv_socket, &mut recv_shutdown).await;
        });

        let probe_inner = self.inner.clone();
        let probe_socket = socket.clone();
        let mut probe_shutdown = shutdown_rx;
        let probe_task = tokio::spawn(async move {
            probe_loop(probe_inner, probe_socket, &mut probe_shutdown).await;
        });

        {
            let mut tasks = self.inner.tasks.lock();
            tasks.push(recv_task);
            tasks.push(probe_task);
        }

        self.join_seeds(&socket).await;

        tracing::info!(
            cluster = %self.inner.config.cluster_name,
            addr = %advertised,
            name = %local_name,
            "gossip manager started"
        );

        Ok(())
    }

    async fn join_seeds(&self, socket: &UdpSocket) {
        if self.inner.config.join_peers.is_empty() {
            return;
        }

        let hello = Hello {
            from: self.local_record(),
        };
        let payload = match serde_json::to_vec(&hello) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize join message");
                return;
            }
        };
        let data = match encode_envelope(MSG_JOIN, payload) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode join envelope");
                return;
            }
        };

        tracing::info!(peers = ?self.inner.config.join_peers, "joining gossip mesh");

        let mut contacted = 0usize;
        let mut failed = 0usize;
        for peer in &self.inner.config.join_peers {
            match tokio::net::lookup_host(peer.as_str()).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => {
                        if let Err(err) = socket.send_to(&data, addr).await {
                            tracing::warn!(peer = %peer, error = %err, "failed to contact join peer");
                            failed += 1;
                        } else {
                            contacted += 1;
                        }
                    }
                    None => {
                        tracing::warn!(peer = %peer, "join peer resolved to no address");
                        failed += 1;
                    }
                },
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "failed to resolve join peer");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            tracing::warn!(contacted, failed, "failed to join some peers");
        } else {
            tracing::info!(contacted, "contacted join peers");
        }
    }

    fn local_record(&self) -> MemberRecord {
        let name = self.inner.local_name.read().clone();
        let addr = self
            .inner
            .members
            .read()
            .get(&name)
            .map(|member| member.addr.to_string())
            .unwrap_or_default();
        MemberRecord {
            name,
            addr,
            meta: Some(self.inner.meta.clone()),
        }
    }

    /// Announces departure, stops the loops, and releases the socket.
    /// Safe to call more than once.
    pub async fn stop(&self) -> SutraResult<()> {
        {
            let mut running = self.inner.running.lock();
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        // Best-effort leave announcement so peers can drop us early.
        let socket = self.inner.socket.read().clone();
        if let Some(socket) = socket {
            let hello = Hello {
                from: self.local_record(),
            };
            if let Ok(payload) = serde_json::to_vec(&hello) {
                if let Ok(data) = encode_envelope(MSG_LEAVE, payload) {
                    let local = self.local_name();
                    let targets: Vec<SocketAddr> = self
                        .inner
                        .members
                        .read()
                        .values()
                        .filter(|member| member.name != local)
                        .map(|member| member.addr)
                        .collect();
                    for addr in targets {
                        if let Err(err) = socket.send_to(&data, addr).await {
                            tracing::warn!(peer = %addr, error = %err, "failed to send leave");
                        }
                    }
                }
            }
        }

        let shutdown = self.inner.shutdown.lock().take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "gossip task ended abnormally");
            }
        }

        *self.inner.socket.write() = None;
        tracing::info!("gossip manager stopped");
        Ok(())
    }

    /// Sends a kpak envelope to every non-dead member except the local
    /// node. Per-peer send failures are logged and ignored; the broadcast
    /// only fails as a whole when the manager is not running.
    pub async fn broadcast_kpak(&self, kpak: &Kpak) -> SutraResult<()> {
        if !self.is_running() {
            return Err(SutraError::InvalidState(
                "gossip manager not running".to_string(),
            ));
        }
        let Some(socket) = self.inner.socket.read().clone() else {
            return Err(SutraError::InvalidState(
                "gossip manager not running".to_string(),
            ));
        };

        let data = encode_envelope(MSG_KPAK, kpak.to_json()?)?;

        let local = self.local_name();
        let targets: Vec<(String, SocketAddr)> = self
            .inner
            .members
            .read()
            .values()
            .filter(|member| member.name != local && member.state != PeerState::Dead)
            .map(|member| (member.name.clone(), member.addr))
            .collect();

        for (name, addr) in targets {
            if let Err(err) = socket.send_to(&data, addr).await {
                tracing::warn!(peer = %name, error = %err, "failed to send kpak to peer");
            }
        }

        Ok(())
    }

    /// Snapshot of the membership table, local node included. Empty when
    /// the manager is not running.
    pub fn members(&self) -> Vec<Member> {
        if !self.is_running() {
            return Vec::new();
        }
        self.inner.members.read().values().cloned().collect()
    }
}

fn upsert_member(inner: &Inner, record: &MemberRecord) {
    let local = inner.local_name.read().clone();
    if record.name == local || record.name.is_empty() {
        return;
    }
    let addr: SocketAddr = match record.addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::warn!(member = %record.name, addr = %record.addr, error = %err, "ignoring member with unparseable address");
            return;
        }
    };

    let mut members = inner.members.write();
    let now = unix_now();
    members
        .entry(record.name.clone())
        .and_modify(|member| {
            member.addr = addr;
            member.state = PeerState::Alive;
            member.last_seen = now;
            if record.meta.is_some() {
                member.meta = record.meta.clone();
            }
        })
        .or_insert_with(|| {
            tracing::info!(member = %record.name, addr = %addr, "node joined cluster");
            Member {
                name: record.name.clone(),
                addr,
                state: PeerState::Alive,
                last_seen: now,
                meta: record.meta.clone(),
            }
        });
}

fn membership_snapshot(inner: &Inner) -> MemberList {
    let members = inner.members.read();
    MemberList {
        members: members
            .values()
            .map(|member| MemberRecord {
                name: member.name.clone(),
                addr: member.addr.to_string(),
                meta: member.meta.clone(),
            })
            .collect(),
    }
}

async fn recv_loop(inner: Arc<Inner>, socket: Arc<UdpSocket>, shutdown: &mut watch::Receiver<bool>) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "gossip recv error");
                        continue;
                    }
                };
                handle_datagram(&inner, &socket, &buf[..len], src).await;
            }
        }
    }
}

async fn handle_datagram(inner: &Inner, socket: &UdpSocket, data: &[u8], src: SocketAddr) {
    let envelope: Envelope = match serde_json::from_slice(data) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(peer = %src, error = %err, "failed to decode gossip envelope");
            return;
        }
    };

    match envelope.kind.as_str() {
        MSG_KPAK => {
            let kpak = match Kpak::from_json(&envelope.payload) {
                Ok(kpak) => kpak,
                Err(err) => {
                    tracing::warn!(peer = %src, error = %err, "failed to decode gossiped kpak");
                    return;
                }
            };
            let handler = inner.handler.read().clone();
            if let Some(handler) = handler {
                let id = kpak.id.clone();
                if handler(kpak) {
                    tracing::debug!(kpak = %id, "accepted kpak from mesh");
                }
            }
        }
        MSG_JOIN => {
            if let Ok(hello) = serde_json::from_slice::<Hello>(&envelope.payload) {
                upsert_member(inner, &hello.from);
                let snapshot = membership_snapshot(inner);
                if let Ok(payload) = serde_json::to_vec(&snapshot) {
                    if let Ok(reply) = encode_envelope(MSG_JOIN_ACK, payload) {
                        if let Err(err) = socket.send_to(&reply, src).await {
                            tracing::warn!(peer = %src, error = %err, "failed to send join-ack");
                        }
                    }
                }
            }
        }
        MSG_JOIN_ACK => {
            if let Ok(list) = serde_json::from_slice::<MemberList>(&envelope.payload) {
                for record in &list.members {
                    upsert_member(inner, record);
                }
            }
        }
        MSG_PING => {
            if let Ok(hello) = serde_json::from_slice::<Hello>(&envelope.payload) {
                upsert_member(inner, &hello.from);
            }
            let local = inner.local_name.read().clone();
            let addr = inner
                .members
                .read()
                .get(&local)
                .map(|member| member.addr.to_string())
                .unwrap_or_default();
            let hello = Hello {
                from: MemberRecord {
                    name: local,
                    addr,
                    meta: Some(inner.meta.clone()),
                },
            };
            if let Ok(payload) = serde_json::to_vec(&hello) {
                if let Ok(reply) = encode_envelope(MSG_ACK, payload) {
                    if let Err(err) = socket.send_to(&reply, src).await {
                        tracing::warn!(peer = %src, error = %err, "failed to send ack");
                    }
                }
            }
        }
        MSG_ACK => {
            if let Ok(hello) = serde_json::from_slice::<Hello>(&envelope.payload) {
                upsert_member(inner, &hello.from);
            }
        }
        MSG_LEAVE => {
            if let Ok(hello) = serde_json::from_slice::<Hello>(&envelope.payload) {
                if inner.members.write().remove(&hello.from.name).is_some() {
                    tracing::info!(member = %hello.from.name, "node left cluster");
                }
            }
        }
        other => {
            tracing::warn!(peer = %src, kind = %other, "unknown gossip message type");
        }
    }
}

async fn probe_loop(
    inner: Arc<Inner>,
    socket: Arc<UdpSocket>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(inner.config.probe_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                reclassify_members(&inner);
                probe_random_member(&inner, &socket).await;
            }
        }
    }
}

fn reclassify_members(inner: &Inner) {
    let local = inner.local_name.read().clone();
    let now = unix_now();
    let mut members = inner.members.write();
    for member in members.values_mut() {
        if member.name == local {
            member.last_seen = now;
            continue;
        }
        let silent = Duration::from_secs(now.saturating_sub(member.last_seen).max(0) as u64);
        let next = classify(silent, &inner.config);
        if next != member.state {
            tracing::info!(member = %member.name, from = %member.state, to = %next, "member state changed");
            member.state = next;
        }
    }
}

async fn probe_random_member(inner: &Inner, socket: &UdpSocket) {
    let local = inner.local_name.read().clone();
    let candidates: Vec<SocketAddr> = inner
        .members
        .read()
        .values()
        .filter(|member| member.name != local && member.state != PeerState::Dead)
        .map(|member| member.addr)
        .collect();
    if candidates.is_empty() {
        return;
    }

    let target = candidates[rand::thread_rng().gen_range(0..candidates.len())];
    let addr = inner
        .members
        .read()
        .get(&local)
        .map(|member| member.addr.to_string())
        .unwrap_or_default();
    let hello = Hello {
        from: MemberRecord {
            name: local,
            addr,
            meta: Some(inner.meta.clone()),
        },
    };
    let Ok(payload) = serde_json::to_vec(&hello) else {
        return;
    };
    let Ok(data) = encode_envelope(MSG_PING, payload) else {
        return;
    };
    if let Err(err) = socket.send_to(&data, target).await {
        tracing::warn!(peer = %target, error = %err, "failed to probe member");
    }
}
