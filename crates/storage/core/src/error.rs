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

// Error taxonomy for the storage core.
//
// Mirrors the flat `thiserror` enum the rest of this codebase's storage
// engine uses: one error type, `#[error(...)]` messages, a `StorageResult`
// alias. Fatal conditions (configuration, integrity, version-mismatch under
// normal pool sizing) are still plain `Err` values here; only the binary
// entry point turns them into a process exit, so the library stays usable
// and testable.

use std::io;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Pool allocation failure, misconfigured sizes, unreadable catalog.
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),

    /// An internal invariant was violated (e.g. a missing map entry while
    /// walking a known-present version chain).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The OID codec could not inline a value; caller must allocate an
    /// extern id instead.
    #[error("value does not fit in the inline payload")]
    NotInlinable,

    /// Eviction could not find a reusable slot because every resident
    /// version is still live. Only reachable with an undersized pool.
    #[error("no evictable slot: pool is undersized for the current workload")]
    VersionMismatch,

    #[error(transparent)]
    Io(#[from] io::Error),
}
