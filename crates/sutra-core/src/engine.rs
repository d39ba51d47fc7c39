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

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::kpak::Kpak;

/// Engine decides what is currently true. It keeps the believed kpak per
/// spid and a subject index for scoped queries.
///
/// Invariants (under the lock): every stored kpak is indexed under its
/// subject, every indexed spid resolves to a stored kpak with that subject,
/// and subject entries are never empty.
#[derive(Debug, Default)]
pub struct Engine {
    inner: RwLock<EngineState>,
}

#[derive(Debug, Default)]
struct EngineState {
    /// spid -> currently believed kpak.
    truth_store: HashMap<String, Kpak>,
    /// subject -> set of spids present in the truth store.
    subject_index: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub total_kpaks: usize,
    pub total_subjects: usize,
}

impl EngineState {
    fn install(&mut self, kpak: Kpak) {
        self.subject_index
            .entry(kpak.subject.clone())
            .or_default()
            .insert(kpak.spid.clone());
        self.truth_store.insert(kpak.spid.clone(), kpak);
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles a kpak against the current truth. Returns true when the
    /// kpak was accepted: either its spid was unknown or it dominates the
    /// existing kpak under the trust order. A duplicate or dominated kpak
    /// is rejected, which makes replay and gossip delivery idempotent.
    pub fn reconcile(&self, kpak: &Kpak) -> bool {
        let mut state = self.inner.write();

        let accept = match state.truth_store.get(&kpak.spid) {
            None => true,
            Some(existing) => kpak.is_more_trusted_than(existing),
        };
        if accept {
            state.install(kpak.clone());
        }
        accept
    }

    /// Returns every believed kpak for a subject; empty when unknown.
    pub fn query_by_subject(&self, subject: &str) -> Vec<Kpak> {
        let state = self.inner.read();

        let Some(spids) = state.subject_index.get(subject) else {
            return Vec::new();
        };

        spids
            .iter()
            .filter_map(|spid| state.truth_store.get(spid).cloned())
            .collect()
    }

    /// Returns the believed kpak for a specific subject+predicate, if any.
    pub fn query_by_subject_predicate(&self, subject: &str, predicate: &str) -> Option<Kpak> {
        let spid = Kpak::spid_of(subject, predicate);
        self.inner.read().truth_store.get(&spid).cloned()
    }

    /// Snapshot of every currently believed kpak.
    pub fn all_truths(&self) -> Vec<Kpak> {
        self.inner.read().truth_store.values().cloned().collect()
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.inner.read();
        EngineStats {
            total_kpaks: state.truth_store.len(),
            total_subjects: state.subject_index.len(),
        }
    }

    /// Removes every expired kpak, pruning subject entries that become
    /// empty. The whole pass runs under one write lock so queries never see
    /// a half-pruned index. Returns the number of kpaks removed.
    pub fn remove_expired(&self) -> usize {
        let mut state = self.inner.write();

        let expired: Vec<String> = state
            .truth_store
            .iter()
            .filter(|(_, kpak)| kpak.is_expired())
            .map(|(spid, _)| spid.clone())
            .collect();

        for spid in &expired {
            let Some(kpak) = state.truth_store.remove(spid) else {
                continue;
            };
            if let Some(spids) = state.subject_index.get_mut(&kpak.subject) {
                spids.remove(spid);
                if spids.is_empty() {
                    state.subject_index.remove(&kpak.subject);
                }
            }
        }

        expired.len()
    }
}
