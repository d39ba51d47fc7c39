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

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

use core::fmt;

pub mod pb {
    pub mod v1 {
        tonic::include_proto!("sutra.v1");
    }

    pub use v1::*;
}

pub const PROTOCOL_SEMVER: &str = "1.0.0";

/// Mesh-wide cluster identifier advertised in gossip node metadata.
pub const CLUSTER_NAME: &str = "sutra-mesh";

/// Gossip envelope type tag carrying a serialized kpak.
pub const MSG_KPAK: &str = "kpak";

/// Peer liveness classification as encoded in `PeerInfo.state`.
///
/// The numeric values are part of the wire contract shared by agents and
/// clients; do not reorder without a protocol version bump.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Alive = 0,
    Suspect = 1,
    Dead = 2,
}

impl PeerState {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Alive => "alive",
            PeerState::Suspect => "suspect",
            PeerState::Dead => "dead",
        }
    }
}

impl TryFrom<i32> for PeerState {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PeerState::Alive),
            1 => Ok(PeerState::Suspect),
            2 => Ok(PeerState::Dead),
            other => Err(other),
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
