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

// Private (temp) Page Pool: a flat array of
// `pool_per_worker * workers` slots, partitioned so each worker only ever
// touches its own partition.
//
// Partitions are thread-affine: each worker only ever touches its own
// partition, so in principle no synchronization is needed between them.
// Rust's aliasing rules still require some primitive to share a partition
// behind an `Arc` across threads, so each partition gets its own
// uncontended `parking_lot::Mutex`; under the thread-affinity discipline
// it never actually contends, so the cost is effectively the same as
// lock-free access. Clock eviction mirrors `upool` (no version chains here
// either).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::file_manager::FileManager;
use crate::page::{PageId, TmpFileId, PAGE_SIZE};

type SlotIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerId(pub u32);

struct PPageSlot {
    occupied: bool,
    page_id: PageId,
    pins: u32,
    dirty: bool,
    second_chance: bool,
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl PPageSlot {
    fn empty() -> Self {
        Self {
            occupied: false,
            page_id: PageId::UNASSIGNED,
            pins: 0,
            dirty: false,
            second_chance: false,
            bytes: Box::new([0u8; PAGE_SIZE]),
        }
    }
}

struct Partition {
    slots: Vec<PPageSlot>,
    map: HashMap<PageId, SlotIdx>,
    clock_hand: usize,
}

/// The private scratch pool: per-worker spill space for
/// sorts and joins.
pub struct PPool {
    file_manager: Arc<FileManager>,
    partitions: Vec<Mutex<Partition>>,
}

impl PPool {
    pub fn new(file_manager: Arc<FileManager>, workers: usize, slots_per_worker: usize) -> StorageResult<Arc<Self>> {
        if workers == 0 || slots_per_worker == 0 {
            return Err(StorageError::FatalConfiguration("private pool needs at least one worker and one slot each".into()));
        }
        let partitions = (0..workers)
            .map(|_| {
                Mutex::new(Partition {
                    slots: (0..slots_per_worker).map(|_| PPageSlot::empty()).collect(),
                    map: HashMap::new(),
                    clock_hand: 0,
                })
            })
            .collect();
        Ok(Arc::new(Self { file_manager, partitions }))
    }

    /// Allocates (or reuses) the temp file this worker writes spill pages into.
    pub fn tmp_file(&self, worker: WorkerId, name: &str) -> StorageResult<TmpFileId> {
        let file_id = self.file_manager.get_file_id(&format!("worker-{}-{name}", worker.0))?;
        Ok(TmpFileId { file_id, worker_position: worker.0 })
    }

    pub fn append_ppage(self: &Arc<Self>, tmp: TmpFileId) -> StorageResult<PPageGuard> {
        let partition_idx = tmp.worker_position as usize;
        let mut partition = self.partition(partition_idx)?.lock();
        let idx = Self::evict_or_alloc(&mut partition)?;
        let zeroed = [0u8; PAGE_SIZE];
        let page_number = self.file_manager.append_page(tmp.file_id, &zeroed)?;
        let page_id = PageId::new(tmp.file_id, page_number);
        {
            let slot = &mut partition.slots[idx];
            slot.occupied = true;
            slot.page_id = page_id;
            slot.dirty = true;
            slot.second_chance = false;
            slot.pins = 1;
            slot.bytes.fill(0);
        }
        partition.map.insert(page_id, idx);
        Ok(PPageGuard::new(Arc::downgrade(self), partition_idx, idx, page_id))
    }

    pub fn get_ppage(self: &Arc<Self>, tmp: TmpFileId, page_number: u64) -> StorageResult<PPageGuard> {
        let partition_idx = tmp.worker_position as usize;
        let page_id = PageId::new(tmp.file_id, page_number);
        let mut partition = self.partition(partition_idx)?.lock();

        let idx = match partition.map.get(&page_id).copied() {
            Some(idx) => idx,
            None => {
                let idx = Self::evict_or_alloc(&mut partition)?;
                {
                    let slot = &mut partition.slots[idx];
                    slot.occupied = true;
                    slot.page_id = page_id;
                    slot.dirty = false;
                    slot.second_chance = false;
                    slot.pins = 0;
                }
                self.file_manager.read_tmp_page(page_id, &mut partition.slots[idx].bytes)?;
                partition.map.insert(page_id, idx);
                idx
            }
        };

        partition.slots[idx].pins += 1;
        Ok(PPageGuard::new(Arc::downgrade(self), partition_idx, idx, page_id))
    }

    /// Clears every resident page belonging to `tmp` and erases its map entries.
    pub fn remove_tmp(&self, tmp: TmpFileId) -> StorageResult<()> {
        let partition_idx = tmp.worker_position as usize;
        let mut partition = self.partition(partition_idx)?.lock();
        let stale: Vec<PageId> = partition.map.keys().filter(|p| p.file_id == tmp.file_id).copied().collect();
        for page_id in stale {
            if let Some(idx) = partition.map.remove(&page_id) {
                let slot = &mut partition.slots[idx];
                slot.occupied = false;
                slot.page_id = PageId::UNASSIGNED;
                slot.dirty = false;
                slot.pins = 0;
                slot.second_chance = false;
            }
        }
        Ok(())
    }

    fn partition(&self, idx: usize) -> StorageResult<&Mutex<Partition>> {
        self.partitions
            .get(idx)
            .ok_or_else(|| StorageError::Integrity(format!("no private pool partition for worker position {idx}")))
    }

    fn unpin(&self, partition_idx: usize, slot_idx: SlotIdx) {
        if let Ok(partition) = self.partition(partition_idx) {
            let mut partition = partition.lock();
            if partition.slots[slot_idx].pins > 0 {
                partition.slots[slot_idx].pins -= 1;
            }
            partition.slots[slot_idx].second_chance = true;
        }
    }

    fn evict_or_alloc(partition: &mut Partition) -> StorageResult<SlotIdx> {
        if let Some(idx) = partition.slots.iter().position(|s| !s.occupied) {
            return Ok(idx);
        }

        let total = partition.slots.len();
        let mut swept = 0usize;
        loop {
            let idx = partition.clock_hand;
            partition.clock_hand = (partition.clock_hand + 1) % total;
            swept += 1;
            if swept > 2 * total + 1 {
                return Err(StorageError::VersionMismatch);
            }

            if partition.slots[idx].pins > 0 {
                continue;
            }
            if partition.slots[idx].second_chance {
                partition.slots[idx].second_chance = false;
                continue;
            }

            let page_id = partition.slots[idx].page_id;
            partition.map.remove(&page_id);
            let slot = &mut partition.slots[idx];
            slot.occupied = false;
            slot.page_id = PageId::UNASSIGNED;
            slot.dirty = false;
            slot.pins = 0;
            slot.second_chance = false;
            return Ok(idx);
        }
    }
}

pub struct PPageGuard {
    pool: Weak<PPool>,
    partition_idx: usize,
    slot_idx: SlotIdx,
    page_id: PageId,
}

impl PPageGuard {
    fn new(pool: Weak<PPool>, partition_idx: usize, slot_idx: SlotIdx, page_id: PageId) -> Self {
        Self { pool, partition_idx, slot_idx, page_id }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self, dst: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let pool = self.upgrade()?;
        let partition = pool.partition(self.partition_idx)?.lock();
        dst.copy_from_slice(partition.slots[self.slot_idx].bytes.as_ref());
        Ok(())
    }

    pub fn write(&self, src: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let pool = self.upgrade()?;
        let mut partition = pool.partition(self.partition_idx)?.lock();
        partition.slots[self.slot_idx].bytes.as_mut().copy_from_slice(src);
        partition.slots[self.slot_idx].dirty = true;
        Ok(())
    }

    fn upgrade(&self) -> StorageResult<Arc<PPool>> {
        self.pool
            .upgrade()
            .ok_or_else(|| StorageError::Integrity("private pool dropped while a page guard was outstanding".into()))
    }
}

impl Drop for PPageGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.unpin(self.partition_idx, self.slot_idx);
        }
    }
}
