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

// Unversioned Page Pool: same clock-eviction shape as the
// versioned pool, without chains: `PageId -> UPage` is one-to-one, so
// eviction never has to splice a linked list.
//
// Grounded directly on `buffer_manager::BufferPool`'s clock
// policy (`evict_clock`: skip pinned, clear-and-skip a set "second chance"
// bit, otherwise evict), simplified to a single resident version per page.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::file_manager::FileManager;
use crate::page::{FileId, PageId, PAGE_SIZE};
use crate::stats::PoolStats;

type SlotIdx = usize;

struct UPageSlot {
    occupied: bool,
    page_id: PageId,
    pins: u32,
    dirty: bool,
    second_chance: bool,
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl UPageSlot {
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

struct UPoolState {
    slots: Vec<UPageSlot>,
    up_map: HashMap<PageId, SlotIdx>,
    clock_hand: usize,
}

/// The unversioned buffer pool: string hash directory,
/// bucket pages, string blobs.
pub struct UPool {
    file_manager: Arc<FileManager>,
    state: Mutex<UPoolState>,
    stats: PoolStats,
}

impl UPool {
    pub fn new(file_manager: Arc<FileManager>, slot_count: usize) -> StorageResult<Arc<Self>> {
        if slot_count == 0 {
            return Err(StorageError::FatalConfiguration("unversioned pool needs at least one slot".into()));
        }
        let slots = (0..slot_count).map(|_| UPageSlot::empty()).collect();
        Ok(Arc::new(Self {
            file_manager,
            state: Mutex::new(UPoolState {
                slots,
                up_map: HashMap::new(),
                clock_hand: 0,
            }),
            stats: PoolStats::default(),
        }))
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn get_unversioned_page(self: &Arc<Self>, file_id: FileId, page_number: u64) -> StorageResult<UPageGuard> {
        let page_id = PageId::new(file_id, page_number);
        let mut state = self.state.lock();
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        let idx = match state.up_map.get(&page_id).copied() {
            Some(idx) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                idx
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                let idx = self.evict_or_alloc(&mut state)?;
                {
                    let slot = &mut state.slots[idx];
                    slot.occupied = true;
                    slot.page_id = page_id;
                    slot.dirty = false;
                    slot.second_chance = false;
                    slot.pins = 0;
                }
                self.file_manager.read_existing_page(page_id, &mut state.slots[idx].bytes)?;
                state.up_map.insert(page_id, idx);
                idx
            }
        };

        state.slots[idx].pins += 1;
        Ok(UPageGuard::new(Arc::downgrade(self), idx, page_id))
    }

    pub fn append_unversioned_page(self: &Arc<Self>, file_id: FileId) -> StorageResult<UPageGuard> {
        let mut state = self.state.lock();
        let idx = self.evict_or_alloc(&mut state)?;
        let zeroed = [0u8; PAGE_SIZE];
        let page_number = self.file_manager.append_page(file_id, &zeroed)?;
        let page_id = PageId::new(file_id, page_number);
        {
            let slot = &mut state.slots[idx];
            slot.occupied = true;
            slot.page_id = page_id;
            slot.dirty = true;
            slot.second_chance = false;
            slot.pins = 1;
            slot.bytes.fill(0);
        }
        state.up_map.insert(page_id, idx);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(UPageGuard::new(Arc::downgrade(self), idx, page_id))
    }

    pub fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        let dirty: Vec<SlotIdx> = state.slots.iter().enumerate().filter(|(_, s)| s.occupied && s.dirty).map(|(i, _)| i).collect();
        for idx in dirty {
            self.flush_slot(&mut state, idx)?;
        }
        Ok(())
    }

    fn unpin(&self, slot_idx: SlotIdx) {
        let mut state = self.state.lock();
        if state.slots[slot_idx].pins > 0 {
            state.slots[slot_idx].pins -= 1;
        }
        state.slots[slot_idx].second_chance = true;
    }

    fn flush_slot(&self, state: &mut UPoolState, idx: SlotIdx) -> StorageResult<()> {
        let page_id = state.slots[idx].page_id;
        self.file_manager.flush(page_id, &state.slots[idx].bytes)?;
        state.slots[idx].dirty = false;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn evict_or_alloc(&self, state: &mut UPoolState) -> StorageResult<SlotIdx> {
        if let Some(idx) = state.slots.iter().position(|s| !s.occupied) {
            return Ok(idx);
        }

        let total = state.slots.len();
        let mut swept = 0usize;
        loop {
            let idx = state.clock_hand;
            state.clock_hand = (state.clock_hand + 1) % total;
            swept += 1;
            if swept > 2 * total + 1 {
                tracing::error!("unversioned pool eviction found no reusable slot after a full sweep");
                return Err(StorageError::VersionMismatch);
            }

            if state.slots[idx].pins > 0 {
                continue;
            }
            if state.slots[idx].second_chance {
                state.slots[idx].second_chance = false;
                continue;
            }

            if state.slots[idx].dirty {
                self.flush_slot(state, idx)?;
            }
            let page_id = state.slots[idx].page_id;
            state.up_map.remove(&page_id);
            let slot = &mut state.slots[idx];
            slot.occupied = false;
            slot.page_id = PageId::UNASSIGNED;
            slot.dirty = false;
            slot.pins = 0;
            slot.second_chance = false;
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(idx);
        }
    }
}

pub struct UPageGuard {
    pool: Weak<UPool>,
    slot_idx: SlotIdx,
    page_id: PageId,
}

impl UPageGuard {
    fn new(pool: Weak<UPool>, slot_idx: SlotIdx, page_id: PageId) -> Self {
        Self { pool, slot_idx, page_id }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self, dst: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let pool = self.upgrade()?;
        let state = pool.state.lock();
        dst.copy_from_slice(state.slots[self.slot_idx].bytes.as_ref());
        Ok(())
    }

    pub fn write(&self, src: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let pool = self.upgrade()?;
        let mut state = pool.state.lock();
        state.slots[self.slot_idx].bytes.as_mut().copy_from_slice(src);
        state.slots[self.slot_idx].dirty = true;
        Ok(())
    }

    fn upgrade(&self) -> StorageResult<Arc<UPool>> {
        self.pool
            .upgrade()
            .ok_or_else(|| StorageError::Integrity("unversioned pool dropped while a page guard was outstanding".into()))
    }
}

impl Drop for UPageGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.unpin(self.slot_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(slot_count: usize) -> (Arc<UPool>, Arc<FileManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let upool = UPool::new(fm.clone(), slot_count).unwrap();
        (upool, fm, dir)
    }

    #[test]
    fn append_and_read_back() {
        let (upool, fm, _dir) = setup(2);
        let file_id = fm.get_file_id("u.dat").unwrap();
        let guard = upool.append_unversioned_page(file_id).unwrap();
        guard.write(&[0x7A; PAGE_SIZE]).unwrap();
        drop(guard);

        let guard = upool.get_unversioned_page(file_id, 0).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        guard.read(&mut buf).unwrap();
        assert_eq!(buf, [0x7A; PAGE_SIZE]);
    }

    #[test]
    fn stats_track_reads_hits_and_misses() {
        let (upool, fm, _dir) = setup(4);
        let file_id = fm.get_file_id("u.dat").unwrap();
        let guard = upool.append_unversioned_page(file_id).unwrap();
        let page_number = guard.page_id().page_number;
        drop(guard);

        upool.get_unversioned_page(file_id, page_number).unwrap(); // resident: a hit

        let snapshot = upool.stats().snapshot();
        assert_eq!(snapshot.reads, 1);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 0);
        assert!(upool.stats().hit_ratio() > 0.0);
    }

    #[test]
    fn eviction_flushes_dirty_pages() {
        let (upool, fm, _dir) = setup(1);
        let file_id = fm.get_file_id("u.dat").unwrap();

        {
            let guard = upool.append_unversioned_page(file_id).unwrap();
            guard.write(&[1u8; PAGE_SIZE]).unwrap();
        }
        {
            let guard = upool.append_unversioned_page(file_id).unwrap();
            guard.write(&[2u8; PAGE_SIZE]).unwrap();
        }

        let guard = upool.get_unversioned_page(file_id, 0).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        guard.read(&mut buf).unwrap();
        assert_eq!(buf, [1u8; PAGE_SIZE]);
    }
}
