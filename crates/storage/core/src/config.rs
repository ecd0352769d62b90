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

// Buffer manager configuration.
//
// Styled after `StorageConfig`: a plain data struct with a
// `Default` impl and a validating constructor, rather than a builder.

use crate::error::{StorageError, StorageResult};
use crate::page::PAGE_SIZE;

#[derive(Debug, Clone, Copy)]
pub struct StorageConfig {
    /// Bytes dedicated to the versioned page pool. Slot count = this / PAGE_SIZE.
    pub vp_pool_bytes: u64,
    /// Bytes dedicated to the unversioned page pool.
    pub up_pool_bytes: u64,
    /// Bytes dedicated to each worker's private pool partition.
    pub pp_pool_bytes_per_worker: u64,
    /// Number of parallel worker threads (and thus PP partitions).
    pub workers: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vp_pool_bytes: 1 << 30,          // 1 GiB
            up_pool_bytes: 128 << 20,        // 128 MiB
            pp_pool_bytes_per_worker: 64 << 20, // 64 MiB
            workers: 4,
        }
    }
}

impl StorageConfig {
    /// Validates every size is a positive multiple of `PAGE_SIZE`; the
    /// constructor fails fatal otherwise.
    pub fn validated(self) -> StorageResult<Self> {
        for (name, bytes) in [
            ("vp_pool_bytes", self.vp_pool_bytes),
            ("up_pool_bytes", self.up_pool_bytes),
            ("pp_pool_bytes_per_worker", self.pp_pool_bytes_per_worker),
        ] {
            if bytes == 0 || bytes % PAGE_SIZE as u64 != 0 {
                return Err(StorageError::FatalConfiguration(format!(
                    "{name} must be a positive multiple of PAGE_SIZE ({PAGE_SIZE}), got {bytes}"
                )));
            }
        }
        if self.workers == 0 {
            return Err(StorageError::FatalConfiguration("workers must be > 0".to_string()));
        }
        Ok(self)
    }

    pub fn vp_slot_count(&self) -> usize {
        (self.vp_pool_bytes / PAGE_SIZE as u64) as usize
    }

    pub fn up_slot_count(&self) -> usize {
        (self.up_pool_bytes / PAGE_SIZE as u64) as usize
    }

    pub fn pp_slots_per_worker(&self) -> usize {
        (self.pp_pool_bytes_per_worker / PAGE_SIZE as u64) as usize
    }
}
