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

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::SutraResult;

/// Hex length of the content fingerprint (`id`).
const ID_LEN: usize = 16;
/// Hex length of the subject+predicate fingerprint (`spid`).
const SPID_LEN: usize = 12;

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Kpak is a knowledge packet, the atomic unit of knowledge in the mesh.
/// It is a subject-predicate-object triple with provenance metadata and two
/// derived fingerprints: `id` names this exact kpak value, `spid` keys the
/// reconciliation slot shared by every kpak about the same subject+predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpak {
    pub subject: String,
    pub predicate: String,
    pub object: String,

    pub source: String,
    pub confidence: f32,
    pub timestamp: i64,
    /// Unix seconds at which this kpak expires; 0 means never.
    pub expires_at: i64,

    pub id: String,
    pub spid: String,
}

impl Kpak {
    /// Creates a kpak that never expires, stamped with the current time.
    pub fn new(
        subject: &str,
        predicate: &str,
        object: &str,
        source: &str,
        confidence: f32,
    ) -> Self {
        Self::with_ttl(subject, predicate, object, source, confidence, 0)
    }

    /// Creates a kpak with a TTL in seconds (0 = never expires).
    pub fn with_ttl(
        subject: &str,
        predicate: &str,
        object: &str,
        source: &str,
        confidence: f32,
        ttl_seconds: i64,
    ) -> Self {
        let now = unix_now();
        let expires_at = if ttl_seconds > 0 { now + ttl_seconds } else { 0 };

        let mut kpak = Kpak {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            source: source.to_string(),
            confidence,
            timestamp: now,
            expires_at,
            id: String::new(),
            spid: String::new(),
        };
        kpak.regenerate_fingerprints();
        kpak
    }

    /// Computes the spid for a subject+predicate pair without building a kpak.
    #[must_use]
    pub fn spid_of(subject: &str, predicate: &str) -> String {
        let digest = Sha256::digest(format!("{subject}|{predicate}").as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(SPID_LEN);
        hex
    }

    fn generate_id(&self) -> String {
        // Confidence is rendered at fixed precision so the preimage is
        // byte-identical on every node regardless of float formatting.
        let preimage = format!(
            "{}|{}|{}|{}|{:.6}|{}",
            self.subject, self.predicate, self.object, self.source, self.confidence, self.timestamp
        );
        let mut hex = hex::encode(Sha256::digest(preimage.as_bytes()));
        hex.truncate(ID_LEN);
        hex
    }

    /// Recomputes `id` and `spid` from the current field values. Must be
    /// called after mutating any fingerprinted field, in particular
    /// `timestamp`.
    pub fn regenerate_fingerprints(&mut self) {
        self.id = self.generate_id();
        self.spid = Self::spid_of(&self.subject, &self.predicate);
    }

    /// The trust order: higher confidence wins, equal confidence falls back
    /// to the newer timestamp. Equal confidence and equal timestamp means
    /// neither kpak dominates the other.
    #[must_use]
    pub fn is_more_trusted_than(&self, other: &Kpak) -> bool {
        if self.confidence > other.confidence {
            return true;
        }
        if self.confidence == other.confidence {
            return self.timestamp > other.timestamp;
        }
        false
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        if self.expires_at == 0 {
            return false;
        }
        unix_now() >= self.expires_at
    }

    /// Seconds until this kpak expires: 0 when it never expires, -1 when it
    /// already has.
    #[must_use]
    pub fn time_to_expiry(&self) -> i64 {
        if self.expires_at == 0 {
            return 0;
        }
        let now = unix_now();
        if now >= self.expires_at {
            return -1;
        }
        self.expires_at - now
    }

    /// Serializes the kpak for persistence or network transfer.
    pub fn to_json(&self) -> SutraResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserializes a kpak, preserving the derived fields as transmitted.
    pub fn from_json(data: &[u8]) -> SutraResult<Kpak> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Kpak {
        Kpak::new("pluto", "is_planet", "true", "test", 0.99)
    }

    #[test]
    fn fingerprints_have_expected_shape() {
        let kpak = sample();
        assert_eq!(kpak.id.len(), 16);
        assert_eq!(kpak.spid.len(), 12);
        assert!(kpak.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(kpak.spid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn spid_matches_known_vector() {
        assert_eq!(Kpak::spid_of("pluto", "is_planet"), "1c4cdc48c67a");
        assert_eq!(Kpak::spid_of("server1", "status"), "d911f0f6f220");
    }

    #[test]
    fn id_matches_known_vector_for_fixed_timestamp() {
        let mut kpak = sample();
        kpak.timestamp = 1_700_000_000;
        kpak.regenerate_fingerprints();
        assert_eq!(kpak.id, "fea5289e8e0dfd8a");
        assert_eq!(kpak.spid, "1c4cdc48c67a");
    }

    #[test]
    fn spid_depends_only_on_subject_and_predicate() {
        let a = Kpak::new("pluto", "is_planet", "true", "src-a", 0.2);
        let b = Kpak::new("pluto", "is_planet", "false", "src-b", 0.9);
        assert_eq!(a.spid, b.spid);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn id_changes_when_timestamp_changes() {
        let mut kpak = sample();
        let before = kpak.id.clone();
        kpak.timestamp += 1;
        kpak.regenerate_fingerprints();
        assert_ne!(kpak.id, before);
    }

    #[test]
    fn higher_confidence_is_more_trusted() {
        let low = Kpak::new("s", "p", "v1", "a", 0.6);
        let high = Kpak::new("s", "p", "v2", "b", 0.99);
        assert!(high.is_more_trusted_than(&low));
        assert!(!low.is_more_trusted_than(&high));
    }

    #[test]
    fn equal_confidence_falls_back_to_timestamp() {
        let mut older = Kpak::new("s", "p", "v1", "a", 0.5);
        let mut newer = Kpak::new("s", "p", "v2", "b", 0.5);
        older.timestamp = 100;
        newer.timestamp = 101;
        assert!(newer.is_more_trusted_than(&older));
        assert!(!older.is_more_trusted_than(&newer));
    }

    #[test]
    fn equal_confidence_equal_timestamp_dominates_neither() {
        let mut a = Kpak::new("s", "p", "v1", "a", 0.5);
        let mut b = Kpak::new("s", "p", "v2", "b", 0.5);
        a.timestamp = 100;
        b.timestamp = 100;
        assert!(!a.is_more_trusted_than(&b));
        assert!(!b.is_more_trusted_than(&a));
    }

    #[test]
    fn boundary_confidences_are_valid() {
        let zero = Kpak::new("s", "p", "v", "a", 0.0);
        let one = Kpak::new("s", "p", "v", "a", 1.0);
        assert!(one.is_more_trusted_than(&zero));
    }

    #[test]
    fn zero_ttl_never_expires() {
        let kpak = Kpak::with_ttl("s", "p", "v", "a", 1.0, 0);
        assert_eq!(kpak.expires_at, 0);
        assert!(!kpak.is_expired());
        assert_eq!(kpak.time_to_expiry(), 0);
    }

    #[test]
    fn positive_ttl_sets_expiry_in_the_future() {
        let kpak = Kpak::with_ttl("s", "p", "v", "a", 1.0, 3600);
        assert!(kpak.expires_at > unix_now());
        assert!(!kpak.is_expired());
        assert!(kpak.time_to_expiry() > 0);
    }

    #[test]
    fn past_expiry_reports_expired() {
        let mut kpak = Kpak::with_ttl("s", "p", "v", "a", 1.0, 10);
        kpak.expires_at = unix_now() - 5;
        assert!(kpak.is_expired());
        assert_eq!(kpak.time_to_expiry(), -1);
    }

    #[test]
    fn json_roundtrip_preserves_all_fields() {
        let kpak = Kpak::with_ttl("server1", "status", "maintenance", "admin", 1.0, 120);
        let bytes = kpak.to_json().unwrap();
        let restored = Kpak::from_json(&bytes).unwrap();
        assert_eq!(restored, kpak);
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(Kpak::from_json(b"not json at all").is_err());
    }
}
