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

//! sutra-core
//!
//! Core building blocks of the Sūtra knowledge mesh:
//! - knowledge packets (kpaks) with content fingerprints and a trust order
//! - the reconciliation engine holding the believed kpak per subject+predicate
//! - the append-only write-ahead log used for crash recovery
//! - SWIM-style gossip membership and best-effort kpak dissemination
//! - node-local observability counters

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod engine;
pub mod error;
pub mod gossip;
pub mod kpak;
pub mod metrics;
pub mod wal;

pub use crate::error::{SutraError, SutraResult};
pub use crate::kpak::Kpak;
