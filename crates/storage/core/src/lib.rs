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

//! Storage core for a multi-model graph database: a versioned buffer
//! manager (MVCC over fixed-size pages), its unversioned and private
//! companion pools, an extendible on-disk string hash, the `ObjectId`
//! inlining codec, and the file manager and random access table that sit
//! underneath them.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod file_manager;
pub mod oid;
pub mod page;
pub mod ppool;
pub mod rat;
pub mod scope;
pub mod stats;
pub mod strings;
pub mod upool;
pub mod vpool;
pub mod xhash;

pub use config::StorageConfig;
pub use engine::Engine;
pub use error::{StorageError, StorageResult};
pub use page::{FileId, PageId, TmpFileId, PAGE_SIZE};
pub use ppool::{PPool, PPageGuard, WorkerId};
pub use rat::RandomAccessTable;
pub use scope::{VersionRegistry, VersionScope};
pub use stats::{PoolStats, PoolStatsSnapshot};
pub use strings::{StringId, StringManager};
pub use upool::{UPageGuard, UPool};
pub use vpool::{PageGuard, VPool};
pub use xhash::ExtendibleHash;
