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

// Random Access Table: a positional array of fixed-arity
// records over a versioned file, implicit (no index page): record `p` lives
// at block `p / records_per_block`, slot `p % records_per_block`.
//
// Grounded on `vpool::VPool`'s read/edit split: appends probe the current
// last block read-only first, and only switch to `get_page_editable` when a
// new page version would actually be needed, avoiding an unnecessary new
// version when the current last page already has room.

use std::sync::Arc;

use crate::error::{StorageError, StorageResult};
use crate::page::{FileId, PAGE_SIZE};
use crate::scope::VersionScope;
use crate::vpool::VPool;

/// A fixed-arity positional table backed by one versioned file.
pub struct RandomAccessTable {
    vpool: Arc<VPool>,
    file_id: FileId,
    record_bytes: usize,
    records_per_block: usize,
}

impl RandomAccessTable {
    pub fn new(vpool: Arc<VPool>, file_id: FileId, record_bytes: usize) -> StorageResult<Self> {
        if record_bytes == 0 || record_bytes > PAGE_SIZE {
            return Err(StorageError::FatalConfiguration(format!(
                "record_bytes={record_bytes} must be in 1..={PAGE_SIZE}"
            )));
        }
        Ok(Self {
            vpool,
            file_id,
            record_bytes,
            records_per_block: PAGE_SIZE / record_bytes,
        })
    }

    fn locate(&self, position: u64) -> (u64, usize) {
        let per_block = self.records_per_block as u64;
        (position / per_block, (position % per_block) as usize * self.record_bytes)
    }

    /// Reads the record at `position` as it stood at `scope`'s snapshot.
    pub fn read(&self, position: u64, scope: &VersionScope, out: &mut [u8]) -> StorageResult<()> {
        debug_assert_eq!(out.len(), self.record_bytes);
        let (block, offset) = self.locate(position);
        let guard = self.vpool.get_page_readonly(self.file_id, block, scope)?;
        let mut page = [0u8; PAGE_SIZE];
        guard.read(&mut page)?;
        out.copy_from_slice(&page[offset..offset + self.record_bytes]);
        Ok(())
    }

    /// Overwrites the record at `position`, which must already exist.
    pub fn write(&self, position: u64, scope: &VersionScope, record: &[u8]) -> StorageResult<()> {
        debug_assert_eq!(record.len(), self.record_bytes);
        let (block, offset) = self.locate(position);
        let guard = self.vpool.get_page_editable(self.file_id, block, scope)?;
        let mut page = [0u8; PAGE_SIZE];
        guard.read(&mut page)?;
        page[offset..offset + self.record_bytes].copy_from_slice(record);
        guard.write(&page)?;
        Ok(())
    }

    /// Appends a record, returning its position. Probes the current last
    /// block read-only first; only takes an editable page when room exists
    /// there, otherwise appends a brand new block.
    pub fn append(&self, scope: &VersionScope, record: &[u8]) -> StorageResult<u64> {
        debug_assert_eq!(record.len(), self.record_bytes);
        let page_count = self.vpool.file_manager_page_count(self.file_id)?;

        if page_count == 0 {
            let guard = self.vpool.append_vpage(self.file_id, scope)?;
            let mut page = [0u8; PAGE_SIZE];
            page[..self.record_bytes].copy_from_slice(record);
            guard.write(&page)?;
            return Ok(0);
        }

        let last_block = page_count - 1;
        let probe = self.vpool.get_page_readonly(self.file_id, last_block, scope)?;
        let mut page = [0u8; PAGE_SIZE];
        probe.read(&mut page)?;
        let used = first_empty_slot(&page, self.record_bytes, self.records_per_block);
        drop(probe);

        match used {
            Some(slot) => {
                let guard = self.vpool.get_page_editable(self.file_id, last_block, scope)?;
                let mut page = [0u8; PAGE_SIZE];
                guard.read(&mut page)?;
                let offset = slot * self.record_bytes;
                page[offset..offset + self.record_bytes].copy_from_slice(record);
                guard.write(&page)?;
                Ok(last_block * self.records_per_block as u64 + slot as u64)
            }
            None => {
                let guard = self.vpool.append_vpage(self.file_id, scope)?;
                let mut page = [0u8; PAGE_SIZE];
                page[..self.record_bytes].copy_from_slice(record);
                guard.write(&page)?;
                Ok((last_block + 1) * self.records_per_block as u64)
            }
        }
    }
}

/// Finds the first all-zero record slot in `page`, used to tell whether the
/// last block still has room. A record of all zero bytes is indistinguishable
/// from an empty slot; callers that need that distinction track occupancy
/// out of band (e.g. a separate count record).
fn first_empty_slot(page: &[u8; PAGE_SIZE], record_bytes: usize, records_per_block: usize) -> Option<usize> {
    for slot in 0..records_per_block {
        let offset = slot * record_bytes;
        if page[offset..offset + record_bytes].iter().all(|&b| b == 0) {
            return Some(slot);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::FileManager;
    use crate::scope::VersionRegistry;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU64;

    fn setup() -> (RandomAccessTable, Arc<VersionRegistry>, Arc<Mutex<()>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let registry = Arc::new(VersionRegistry::new());
        let vpool = VPool::new(fm.clone(), registry.clone(), 16).unwrap();
        let file_id = fm.get_file_id("rat.dat").unwrap();
        let rat = RandomAccessTable::new(vpool, file_id, 16).unwrap();
        let writer_lock = Arc::new(Mutex::new(()));
        (rat, registry, writer_lock, dir)
    }

    fn editable(registry: &Arc<VersionRegistry>, writer_lock: &Arc<Mutex<()>>, version: u64) -> VersionScope {
        VersionScope::open_editable(registry.clone(), Arc::new(AtomicU64::new(version)), writer_lock.clone(), version)
    }

    #[test]
    fn append_and_read_within_one_block() {
        let (rat, registry, writer_lock, _dir) = setup();
        let scope = editable(&registry, &writer_lock, 0);

        let mut positions = Vec::new();
        for i in 0u8..10 {
            let mut record = [0u8; 16];
            record[0] = i + 1; // avoid all-zero records so occupancy detection holds
            positions.push(rat.append(&scope, &record).unwrap());
        }

        for (i, pos) in positions.into_iter().enumerate() {
            let mut out = [0u8; 16];
            rat.read(pos, &scope, &mut out).unwrap();
            assert_eq!(out[0], i as u8 + 1);
        }
    }

    #[test]
    fn append_spills_into_a_new_block() {
        let (rat, registry, writer_lock, _dir) = setup();
        let scope = editable(&registry, &writer_lock, 0);
        let per_block = PAGE_SIZE / 16;

        for i in 0..per_block + 1 {
            let mut record = [0u8; 16];
            record[0] = 1;
            let pos = rat.append(&scope, &record).unwrap();
            assert_eq!(pos, i as u64);
        }
    }
}
