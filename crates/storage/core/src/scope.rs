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

// Version scope lifecycle and the running-version registry.
//
// The registry is a plain mutex-guarded map, in the spirit of
// `mvcc::MVCCManager`'s bookkeeping maps, but the scope itself is new: that
// manager tracks transactions via a `TransactionSnapshot`/commit-timestamp
// table, while this tracks a single global `last_stable_version` counter and
// a single writer lock, matching this crate's simpler MVCC model (one
// editable scope at a time, not true multi-writer transactions).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use crate::page::PageId;

/// `version -> count of scopes that may still observe it`.
#[derive(Default)]
pub struct VersionRegistry {
    counts: Mutex<HashMap<u64, u64>>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, version: u64) {
        *self.counts.lock().entry(version).or_insert(0) += 1;
    }

    pub fn release(&self, version: u64) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&version);
            }
        }
    }

    /// A VP slot whose `version_number` is absent here is safe to recycle
    /// regardless of its position in the chain.
    pub fn is_live(&self, version: u64) -> bool {
        self.counts.lock().contains_key(&version)
    }
}

/// A query-lifetime handle to a specific visible version.
pub struct VersionScope {
    pub start_version: u64,
    pub result_version: u64,
    pub is_editable: bool,
    registry: Arc<VersionRegistry>,
    last_stable_version: Arc<AtomicU64>,
    modifications: Mutex<HashSet<PageId>>,
    _writer_guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl VersionScope {
    pub(crate) fn open_readonly(
        registry: Arc<VersionRegistry>,
        last_stable_version: Arc<AtomicU64>,
        start_version: u64,
    ) -> Self {
        registry.acquire(start_version);
        Self {
            start_version,
            result_version: start_version,
            is_editable: false,
            registry,
            last_stable_version,
            modifications: Mutex::new(HashSet::new()),
            _writer_guard: None,
        }
    }

    pub(crate) fn open_editable(
        registry: Arc<VersionRegistry>,
        last_stable_version: Arc<AtomicU64>,
        writer_lock: Arc<Mutex<()>>,
        start_version: u64,
    ) -> Self {
        let guard = writer_lock.lock_arc();
        let result_version = start_version + 1;
        registry.acquire(start_version);
        registry.acquire(result_version);
        Self {
            start_version,
            result_version,
            is_editable: true,
            registry,
            last_stable_version,
            modifications: Mutex::new(HashSet::new()),
            _writer_guard: Some(guard),
        }
    }

    /// The version ceiling readonly lookups within this scope must respect.
    pub fn snapshot(&self) -> u64 {
        self.start_version
    }

    pub fn record_modification(&self, page_id: PageId) {
        debug_assert!(self.is_editable, "only an editable scope records modifications");
        self.modifications.lock().insert(page_id);
    }

    pub fn modified_pages(&self) -> Vec<PageId> {
        self.modifications.lock().iter().copied().collect()
    }
}

impl Drop for VersionScope {
    fn drop(&mut self) {
        self.registry.release(self.start_version);
        if self.is_editable {
            self.registry.release(self.result_version);
            self.last_stable_version.fetch_add(1, Ordering::SeqCst);
            self.modifications.lock().clear();
        }
    }
}
