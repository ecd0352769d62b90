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

// Versioned Page Pool: the MVCC buffer cache, a bounded arena
// of page slots, multiple versions per PageId linked in ascending order,
// clock-sweep eviction consulting the running-version registry.
//
// Grounded on `storage_engine::buffer_manager` for the
// eviction shape (clock hand, pin counts, a "second chance" survival bit,
// `PageGuard` releasing its pin on `Drop` via a `Weak` handle back to the
// pool) and on `mvcc::VersionChain`'s idea of "one PageId maps to several
// resident versions", but the chain itself is a doubly linked arena of
// slot indices, not a `BTreeMap<Timestamp, _>`, since eviction here must
// splice an arbitrary interior node out in O(1).

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::file_manager::FileManager;
use crate::page::{FileId, PageId, PAGE_SIZE};
use crate::scope::{VersionRegistry, VersionScope};
use crate::stats::PoolStats;

type SlotIdx = usize;

struct VPageSlot {
    occupied: bool,
    page_id: PageId,
    version_number: u64,
    pins: u32,
    dirty: bool,
    second_chance: bool,
    prev_version: Option<SlotIdx>,
    next_version: Option<SlotIdx>,
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl VPageSlot {
    fn empty() -> Self {
        Self {
            occupied: false,
            page_id: PageId::UNASSIGNED,
            version_number: 0,
            pins: 0,
            dirty: false,
            second_chance: false,
            prev_version: None,
            next_version: None,
            bytes: Box::new([0u8; PAGE_SIZE]),
        }
    }
}

struct VPoolState {
    slots: Vec<VPageSlot>,
    vp_map: HashMap<PageId, SlotIdx>,
    clock_hand: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PageMode {
    ReadOnly,
    Editable,
}

/// The versioned, MVCC-aware buffer pool.
pub struct VPool {
    file_manager: Arc<FileManager>,
    registry: Arc<VersionRegistry>,
    state: Mutex<VPoolState>,
    stats: PoolStats,
}

impl VPool {
    pub fn new(file_manager: Arc<FileManager>, registry: Arc<VersionRegistry>, slot_count: usize) -> StorageResult<Arc<Self>> {
        if slot_count == 0 {
            return Err(StorageError::FatalConfiguration("versioned pool needs at least one slot".into()));
        }
        let slots = (0..slot_count).map(|_| VPageSlot::empty()).collect();
        Ok(Arc::new(Self {
            file_manager,
            registry,
            state: Mutex::new(VPoolState {
                slots,
                vp_map: HashMap::new(),
                clock_hand: 0,
            }),
            stats: PoolStats::default(),
        }))
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Number of pages currently on disk for `file_id`, used by callers that
    /// need to probe table length without resolving a specific page version.
    pub fn file_manager_page_count(&self, file_id: FileId) -> StorageResult<u64> {
        self.file_manager.count_pages(file_id)
    }

    /// Lookup & visibility algorithm: the maximal resident
    /// version not exceeding `scope.snapshot()`.
    pub fn get_page_readonly(self: &Arc<Self>, file_id: FileId, page_number: u64, scope: &VersionScope) -> StorageResult<PageGuard> {
        let page_id = PageId::new(file_id, page_number);
        let snapshot = scope.snapshot();
        let mut state = self.state.lock();
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        let slot_idx = match state.vp_map.get(&page_id).copied() {
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                let idx = self.evict_or_alloc(&mut state)?;
                {
                    let slot = &mut state.slots[idx];
                    slot.occupied = true;
                    slot.page_id = page_id;
                    slot.version_number = snapshot;
                    slot.dirty = false;
                    slot.second_chance = false;
                    slot.pins = 0;
                    slot.prev_version = None;
                    slot.next_version = None;
                }
                self.file_manager.read_existing_page(page_id, &mut state.slots[idx].bytes)?;
                state.vp_map.insert(page_id, idx);
                idx
            }
            Some(head) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                let mut idx = head;
                while let Some(next) = state.slots[idx].next_version {
                    if state.slots[next].version_number <= snapshot {
                        idx = next;
                    } else {
                        break;
                    }
                }
                idx
            }
        };

        state.slots[slot_idx].pins += 1;
        let version_number = state.slots[slot_idx].version_number;
        Ok(PageGuard::new(Arc::downgrade(self), slot_idx, page_id, version_number, PageMode::ReadOnly))
    }

    /// Create-new-version algorithm. `scope` must be editable.
    pub fn get_page_editable(self: &Arc<Self>, file_id: FileId, page_number: u64, scope: &VersionScope) -> StorageResult<PageGuard> {
        debug_assert!(scope.is_editable, "get_page_editable requires an editable scope");
        let page_id = PageId::new(file_id, page_number);
        let mut state = self.state.lock();

        let result_idx = match state.vp_map.get(&page_id).copied() {
            None => {
                let old_idx = self.evict_or_alloc(&mut state)?;
                {
                    let slot = &mut state.slots[old_idx];
                    slot.occupied = true;
                    slot.page_id = page_id;
                    slot.version_number = scope.start_version;
                    slot.dirty = false;
                    slot.second_chance = false;
                    slot.pins = 1; // protect from the second alloc below
                    slot.prev_version = None;
                    slot.next_version = None;
                }
                self.file_manager.read_existing_page(page_id, &mut state.slots[old_idx].bytes)?;
                state.vp_map.insert(page_id, old_idx);

                let new_idx = self.evict_or_alloc(&mut state)?;
                let old_bytes = *state.slots[old_idx].bytes;
                {
                    let slot = &mut state.slots[new_idx];
                    slot.occupied = true;
                    slot.page_id = page_id;
                    slot.version_number = scope.result_version;
                    slot.dirty = true;
                    slot.second_chance = false;
                    slot.pins = 0;
                    slot.prev_version = Some(old_idx);
                    slot.next_version = None;
                    *slot.bytes = old_bytes;
                }
                state.slots[old_idx].next_version = Some(new_idx);
                state.slots[old_idx].pins = 0;
                scope.record_modification(page_id);
                new_idx
            }
            Some(head) => {
                let mut tail = head;
                while let Some(next) = state.slots[tail].next_version {
                    tail = next;
                }
                if state.slots[tail].version_number == scope.result_version {
                    tail
                } else {
                    state.slots[tail].pins += 1; // protect while allocating the new slot
                    let tail_bytes = *state.slots[tail].bytes;
                    let new_idx = self.evict_or_alloc(&mut state)?;
                    {
                        let slot = &mut state.slots[new_idx];
                        slot.occupied = true;
                        slot.page_id = page_id;
                        slot.version_number = scope.result_version;
                        slot.dirty = true;
                        slot.second_chance = false;
                        slot.pins = 0;
                        slot.prev_version = Some(tail);
                        slot.next_version = None;
                        *slot.bytes = tail_bytes;
                    }
                    state.slots[tail].next_version = Some(new_idx);
                    state.slots[tail].pins -= 1;
                    scope.record_modification(page_id);
                    new_idx
                }
            }
        };

        state.slots[result_idx].pins += 1;
        state.slots[result_idx].dirty = true;
        let version_number = state.slots[result_idx].version_number;
        Ok(PageGuard::new(Arc::downgrade(self), result_idx, page_id, version_number, PageMode::Editable))
    }

    /// Extends `file_id` with a brand new page at `scope.result_version`.
    pub fn append_vpage(self: &Arc<Self>, file_id: FileId, scope: &VersionScope) -> StorageResult<PageGuard> {
        debug_assert!(scope.is_editable, "append_vpage requires an editable scope");
        let mut state = self.state.lock();
        let idx = self.evict_or_alloc(&mut state)?;
        let zeroed = [0u8; PAGE_SIZE];
        let page_number = self.file_manager.append_page(file_id, &zeroed)?;
        let page_id = PageId::new(file_id, page_number);
        {
            let slot = &mut state.slots[idx];
            slot.occupied = true;
            slot.page_id = page_id;
            slot.version_number = scope.result_version;
            slot.dirty = true;
            slot.second_chance = false;
            slot.pins = 1;
            slot.prev_version = None;
            slot.next_version = None;
            slot.bytes.fill(0);
        }
        state.vp_map.insert(page_id, idx);
        scope.record_modification(page_id);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(PageGuard::new(Arc::downgrade(self), idx, page_id, scope.result_version, PageMode::Editable))
    }

    /// Drains every dirty terminal version to disk.
    pub fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        let dirty_tails: Vec<SlotIdx> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied && s.dirty && s.next_version.is_none())
            .map(|(i, _)| i)
            .collect();
        for idx in dirty_tails {
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

    fn flush_slot(&self, state: &mut VPoolState, idx: SlotIdx) -> StorageResult<()> {
        let page_id = state.slots[idx].page_id;
        self.file_manager.flush(page_id, &state.slots[idx].bytes)?;
        state.slots[idx].dirty = false;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free_slot(&self, state: &mut VPoolState, idx: SlotIdx) {
        let page_id = state.slots[idx].page_id;
        state.vp_map.remove(&page_id);
        let slot = &mut state.slots[idx];
        slot.occupied = false;
        slot.page_id = PageId::UNASSIGNED;
        slot.dirty = false;
        slot.pins = 0;
        slot.second_chance = false;
        slot.prev_version = None;
        slot.next_version = None;
    }

    /// Splices an interior-or-tail chain node out and evicts it, flushing
    /// and back-sweeping the `dirty` bit off its predecessors if it was a
    /// dirty tail.
    fn splice_and_evict(&self, state: &mut VPoolState, idx: SlotIdx) -> StorageResult<()> {
        let page_id = state.slots[idx].page_id;
        let prev = state.slots[idx].prev_version;
        let next = state.slots[idx].next_version;

        if let Some(p) = prev {
            state.slots[p].next_version = next;
        }
        if let Some(n) = next {
            state.slots[n].prev_version = prev;
        }

        if state.vp_map.get(&page_id).copied() == Some(idx) {
            match next {
                Some(n) => {
                    state.vp_map.insert(page_id, n);
                }
                None => {
                    state.vp_map.remove(&page_id);
                }
            }
        }

        if next.is_none() && state.slots[idx].dirty {
            self.flush_slot(state, idx)?;
            let mut cursor = prev;
            while let Some(p) = cursor {
                state.slots[p].dirty = false;
                cursor = state.slots[p].prev_version;
            }
        }

        let slot = &mut state.slots[idx];
        slot.occupied = false;
        slot.page_id = PageId::UNASSIGNED;
        slot.dirty = false;
        slot.pins = 0;
        slot.second_chance = false;
        slot.prev_version = None;
        slot.next_version = None;
        Ok(())
    }

    /// Returns a ready-to-use free slot index, evicting via clock sweep if
    /// the pool is full.
    fn evict_or_alloc(&self, state: &mut VPoolState) -> StorageResult<SlotIdx> {
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
                tracing::error!("versioned pool eviction found no reusable slot after a full sweep");
                return Err(StorageError::VersionMismatch);
            }

            if state.slots[idx].pins > 0 {
                continue;
            }
            if state.slots[idx].second_chance {
                state.slots[idx].second_chance = false;
                continue;
            }

            let is_singleton = state.slots[idx].prev_version.is_none() && state.slots[idx].next_version.is_none();
            if is_singleton {
                if state.slots[idx].dirty {
                    self.flush_slot(state, idx)?;
                }
                self.free_slot(state, idx);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                return Ok(idx);
            }

            if self.registry.is_live(state.slots[idx].version_number) {
                continue;
            }

            self.splice_and_evict(state, idx)?;
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(idx);
        }
    }
}

/// Owns a pin on a resident VPage slot; releases it on `Drop`.
pub struct PageGuard {
    pool: Weak<VPool>,
    slot_idx: SlotIdx,
    page_id: PageId,
    version_number: u64,
    mode: PageMode,
}

impl PageGuard {
    fn new(pool: Weak<VPool>, slot_idx: SlotIdx, page_id: PageId, version_number: u64, mode: PageMode) -> Self {
        Self { pool, slot_idx, page_id, version_number, mode }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn version_number(&self) -> u64 {
        self.version_number
    }

    /// True iff this page's resident version differs from the scope's
    /// write version; the caller would need `get_page_editable` again.
    pub fn needs_edit_version(&self, scope: &VersionScope) -> bool {
        self.version_number != scope.result_version
    }

    pub fn read(&self, dst: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let pool = self.upgrade()?;
        let state = pool.state.lock();
        dst.copy_from_slice(state.slots[self.slot_idx].bytes.as_ref());
        Ok(())
    }

    pub fn write(&self, src: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        debug_assert!(self.mode == PageMode::Editable, "cannot write through a readonly guard");
        let pool = self.upgrade()?;
        let mut state = pool.state.lock();
        state.slots[self.slot_idx].bytes.as_mut().copy_from_slice(src);
        state.slots[self.slot_idx].dirty = true;
        Ok(())
    }

    fn upgrade(&self) -> StorageResult<Arc<VPool>> {
        self.pool
            .upgrade()
            .ok_or_else(|| StorageError::Integrity("versioned pool dropped while a page guard was outstanding".into()))
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.unpin(self.slot_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn setup(slot_count: usize) -> (Arc<VPool>, Arc<FileManager>, Arc<VersionRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let registry = Arc::new(VersionRegistry::new());
        let vpool = VPool::new(fm.clone(), registry.clone(), slot_count).unwrap();
        (vpool, fm, registry, dir)
    }

    fn readonly_scope(registry: &Arc<VersionRegistry>, version: u64) -> VersionScope {
        VersionScope::open_readonly(registry.clone(), Arc::new(AtomicU64::new(version)), version)
    }

    fn editable_scope(registry: &Arc<VersionRegistry>, writer_lock: &Arc<Mutex<()>>, version: u64) -> VersionScope {
        VersionScope::open_editable(registry.clone(), Arc::new(AtomicU64::new(version)), writer_lock.clone(), version)
    }

    #[test]
    fn fresh_insert_read_back() {
        let (vpool, fm, registry, _dir) = setup(4);
        let writer_lock = Arc::new(Mutex::new(()));
        let file_id = fm.get_file_id("f0.dat").unwrap();

        {
            let scope = editable_scope(&registry, &writer_lock, 0);
            let guard = vpool.append_vpage(file_id, &scope).unwrap();
            guard.write(&[0xAB; PAGE_SIZE]).unwrap();
        }

        let scope = readonly_scope(&registry, 1);
        let guard = vpool.get_page_readonly(file_id, 0, &scope).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        guard.read(&mut buf).unwrap();
        assert_eq!(buf, [0xAB; PAGE_SIZE]);
    }

    #[test]
    fn eviction_does_not_lose_writes() {
        let (vpool, fm, registry, _dir) = setup(2);
        let file_id = fm.get_file_id("f.dat").unwrap();
        let writer_lock = Arc::new(Mutex::new(()));

        for i in 0u8..4 {
            let scope = editable_scope(&registry, &writer_lock, i as u64);
            let guard = vpool.append_vpage(file_id, &scope).unwrap();
            guard.write(&[i; PAGE_SIZE]).unwrap();
        }

        let scope = readonly_scope(&registry, 10);
        let guard = vpool.get_page_readonly(file_id, 0, &scope).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        guard.read(&mut buf).unwrap();
        assert_eq!(buf, [0u8; PAGE_SIZE]);
    }

    #[test]
    fn old_snapshot_stable_across_commit() {
        let (vpool, fm, registry, _dir) = setup(8);
        let file_id = fm.get_file_id("f.dat").unwrap();
        let writer_lock = Arc::new(Mutex::new(()));

        {
            let scope = editable_scope(&registry, &writer_lock, 0);
            let guard = vpool.append_vpage(file_id, &scope).unwrap();
            guard.write(&[0x11; PAGE_SIZE]).unwrap();
        }

        let reader = readonly_scope(&registry, 1);

        {
            let scope = editable_scope(&registry, &writer_lock, 1);
            let guard = vpool.get_page_editable(file_id, 0, &scope).unwrap();
            guard.write(&[0x22; PAGE_SIZE]).unwrap();
        }

        let guard = vpool.get_page_readonly(file_id, 0, &reader).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        guard.read(&mut buf).unwrap();
        assert_eq!(buf, [0x11; PAGE_SIZE]);
        drop(guard);
        drop(reader);

        let reader2 = readonly_scope(&registry, 2);
        let guard2 = vpool.get_page_readonly(file_id, 0, &reader2).unwrap();
        guard2.read(&mut buf).unwrap();
        assert_eq!(buf, [0x22; PAGE_SIZE]);
    }

    #[test]
    fn stats_track_reads_hits_and_misses() {
        let (vpool, fm, registry, _dir) = setup(4);
        let file_id = fm.get_file_id("f.dat").unwrap();
        let writer_lock = Arc::new(Mutex::new(()));

        {
            let scope = editable_scope(&registry, &writer_lock, 0);
            let guard = vpool.append_vpage(file_id, &scope).unwrap();
            guard.write(&[1u8; PAGE_SIZE]).unwrap();
        }

        let scope = readonly_scope(&registry, 1);
        vpool.get_page_readonly(file_id, 0, &scope).unwrap(); // fresh load: a miss
        vpool.get_page_readonly(file_id, 0, &scope).unwrap(); // resident: a hit

        let snapshot = vpool.stats().snapshot();
        assert_eq!(snapshot.reads, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hits, 1);
        assert!(vpool.stats().hit_ratio() > 0.0);
    }

    #[test]
    fn pins_block_eviction_until_unpinned() {
        let (vpool, fm, registry, _dir) = setup(1);
        let file_id = fm.get_file_id("f.dat").unwrap();
        let writer_lock = Arc::new(Mutex::new(()));
        let scope = editable_scope(&registry, &writer_lock, 0);
        let guard = vpool.append_vpage(file_id, &scope).unwrap();

        // Pool has exactly one slot and it's pinned: a second append must fail.
        let err = vpool.append_vpage(file_id, &scope);
        assert!(err.is_err());
        drop(guard);
    }
}
