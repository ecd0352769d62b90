// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Storage engine wiring. Owns the three pools, the version
// registry, and the single writer lock as one process-wide value; hands out
// `VersionScope`s. No global statics or lazily-initialized singletons: a
// process embeds exactly one `Engine`, constructed once at startup, matching
// `StorageEngine::open`'s shape (one owned value threaded
// through the binary, not a `OnceCell`).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::{self, GraphModel};
use crate::config::StorageConfig;
use crate::error::StorageResult;
use crate::file_manager::FileManager;
use crate::ppool::PPool;
use crate::scope::{VersionRegistry, VersionScope};
use crate::upool::UPool;
use crate::vpool::VPool;

pub struct Engine {
    pub file_manager: Arc<FileManager>,
    pub vpool: Arc<VPool>,
    pub upool: Arc<UPool>,
    pub ppool: Arc<PPool>,
    pub model: GraphModel,
    registry: Arc<VersionRegistry>,
    last_stable_version: Arc<AtomicU64>,
    writer_lock: Arc<Mutex<()>>,
}

impl Engine {
    /// Opens `database` and validates its catalog, building the three pools
    /// at the sizes named in `config`.
    pub fn open(database: impl AsRef<Path>, config: StorageConfig) -> StorageResult<Self> {
        let config = config.validated()?;
        let file_manager = Arc::new(FileManager::new(database.as_ref())?);
        let model = catalog::read_model(&file_manager)?;

        let registry = Arc::new(VersionRegistry::new());
        let vpool = VPool::new(file_manager.clone(), registry.clone(), config.vp_slot_count())?;
        let upool = UPool::new(file_manager.clone(), config.up_slot_count())?;
        let ppool = PPool::new(file_manager.clone(), config.workers, config.pp_slots_per_worker())?;

        tracing::debug!(?model, vp_slots = config.vp_slot_count(), up_slots = config.up_slot_count(), "storage engine opened");

        Ok(Self {
            file_manager,
            vpool,
            upool,
            ppool,
            model,
            registry,
            last_stable_version: Arc::new(AtomicU64::new(0)),
            writer_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn last_stable_version(&self) -> u64 {
        self.last_stable_version.load(Ordering::SeqCst)
    }

    /// Opens a read-only scope pinned to the current `last_stable_version`.
    pub fn open_readonly_scope(&self) -> VersionScope {
        let start = self.last_stable_version();
        VersionScope::open_readonly(self.registry.clone(), self.last_stable_version.clone(), start)
    }

    /// Opens the single editable scope, blocking until the writer lock is
    /// free.
    pub fn open_editable_scope(&self) -> VersionScope {
        let start = self.last_stable_version();
        VersionScope::open_editable(self.registry.clone(), self.last_stable_version.clone(), self.writer_lock.clone(), start)
    }

    /// Flushes every dirty terminal page in the versioned and unversioned
    /// pools to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.vpool.flush()?;
        self.upool.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PAGE_SIZE;
    use byteorder::{ByteOrder, LittleEndian};

    fn seed_catalog(dir: &Path) {
        let fm = FileManager::new(dir).unwrap();
        let mut page = [0u8; PAGE_SIZE];
        LittleEndian::write_u64(&mut page[..8], catalog::QUAD_MODEL_ID);
        let file_id = fm.get_file_id("catalog.dat").unwrap();
        fm.append_page(file_id, &page).unwrap();
    }

    #[test]
    fn open_reads_catalog_and_builds_pools() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog(dir.path());

        let engine = Engine::open(dir.path(), StorageConfig::default()).unwrap();
        assert_eq!(engine.model, GraphModel::Quad);
        assert_eq!(engine.last_stable_version(), 0);
    }

    #[test]
    fn editable_scope_bumps_stable_version_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog(dir.path());
        let engine = Engine::open(dir.path(), StorageConfig::default()).unwrap();

        {
            let _scope = engine.open_editable_scope();
        }
        assert_eq!(engine.last_stable_version(), 1);

        let reader = engine.open_readonly_scope();
        assert_eq!(reader.snapshot(), 1);
    }

    #[test]
    fn rejects_directory_without_catalog() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Engine::open(dir.path(), StorageConfig::default()).is_err());
    }
}
