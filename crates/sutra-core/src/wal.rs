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
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{SutraError, SutraResult};
use crate::kpak::Kpak;

/// Wal is the append-only write-ahead log that lets an agent's memory
/// survive restarts. One JSON record per LF-terminated line, fsynced on
/// every append. Records are self-contained lines so a future compactor can
/// rewrite the file and atomically rename it into place between appends.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

#[derive(Debug, Clone)]
pub struct WalStats {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl Wal {
    /// Opens (creating if needed) the log at `path`, including any missing
    /// parent directories.
    pub fn open(path: impl AsRef<Path>) -> SutraResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Wal {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Appends one kpak and forces it to disk before returning. Concurrent
    /// callers are serialized on the writer lock.
    pub fn append(&self, kpak: &Kpak) -> SutraResult<()> {
        let data = kpak.to_json()?;

        let mut guard = self.file.lock();
        let Some(file) = guard.as_mut() else {
            return Err(SutraError::InvalidState("wal is closed".to_string()));
        };

        file.write_all(&data)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads every kpak from the log in append order. Malformed lines are
    /// logged and skipped; a missing file yields an empty list.
    pub fn load(&self) -> SutraResult<Vec<Kpak>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut kpaks = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match Kpak::from_json(line.as_bytes()) {
                Ok(kpak) => kpaks.push(kpak),
                Err(err) => {
                    tracing::warn!(line = line_num + 1, error = %err, "skipping malformed wal line");
                }
            }
        }

        Ok(kpaks)
    }

    /// Closes the underlying file. Safe to call more than once.
    pub fn close(&self) -> SutraResult<()> {
        let mut guard = self.file.lock();
        if let Some(file) = guard.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> SutraResult<WalStats> {
        let meta = fs::metadata(&self.path)?;
        Ok(WalStats {
            path: self.path.clone(),
            size_bytes: meta.len(),
        })
    }
}
