// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};

use protocol::{ArchivedTraceArchive, ChunkData, TraceArchive, TraceProperties, ARCHIVE_VERSION};
use rkyv::util::AlignedVec;
use tracing::{debug, info};

use super::{Database, MemoryDatabase, ReadSession, ReadStats};
use crate::{Error, Result};

/// A trace stored as a single rkyv archive on disk. The file is validated and
/// loaded on open; reads are then served from memory.
pub struct ArchiveDatabase {
    path: PathBuf,
    inner: MemoryDatabase,
}

impl ArchiveDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)
            .map_err(|e| Error::Database(format!("reading {}: {}", path.display(), e)))?;

        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);

        let archived = rkyv::access::<ArchivedTraceArchive, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Database(format!("invalid archive {}: {}", path.display(), e)))?;
        let version = archived.version.to_native();
        if version != ARCHIVE_VERSION {
            return Err(Error::Database(format!(
                "archive version {} is not supported (expected {})",
                version, ARCHIVE_VERSION
            )));
        }
        let archive = rkyv::deserialize::<TraceArchive, rkyv::rancor::Error>(archived)
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(
            path = %path.display(),
            tracks = archive.tracks.len(),
            bytes = bytes.len(),
            "opened trace archive"
        );
        Ok(Self {
            path,
            inner: MemoryDatabase::new(archive),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> ReadStats {
        self.inner.stats()
    }
}

impl Database for ArchiveDatabase {
    fn read_trace_properties(&mut self) -> Result<ReadSession<TraceProperties>> {
        self.inner.read_trace_properties()
    }

    fn configure_read_window(&mut self, start: u64, end: u64) {
        self.inner.configure_read_window(start, end);
    }

    fn add_track_to_read_config(&mut self, track: u32) {
        self.inner.add_track_to_read_config(track);
    }

    fn reset_read_config(&mut self) {
        self.inner.reset_read_config();
    }

    fn read_chunk_per_track(&mut self) -> Result<ReadSession<Vec<ChunkData>>> {
        self.inner.read_chunk_per_track()
    }

    fn read_chunk_all_tracks(&mut self) -> Result<ReadSession<Vec<ChunkData>>> {
        self.inner.read_chunk_all_tracks()
    }

    fn close(&mut self) {
        debug!(path = %self.path.display(), "closing trace archive");
        self.inner.close();
    }
}

/// Writes `archive` to `path`, returning the number of bytes written.
pub fn write_archive(archive: &TraceArchive, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(archive)
        .map_err(|e| Error::Database(e.to_string()))?;
    fs::write(path, &bytes)
        .map_err(|e| Error::Database(format!("writing {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote trace archive");
    Ok(bytes.len())
}
