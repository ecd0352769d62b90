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

// Shared page coordinates. `VPage`/`UPage`/`PPage` themselves live with the
// pool that owns them, since each pool's slot shape differs, but all three
// are addressed the same way.

/// Fixed page size in bytes (compile-time constant).
pub const PAGE_SIZE: usize = 4096;

/// Identifies a logical file known to the `FileManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    /// Marks a slot with no owning file.
    pub const UNASSIGNED: FileId = FileId(u32::MAX);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

/// `(FileId, page_number)` coordinates for any of the three pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub file_id: FileId,
    pub page_number: u64,
}

impl PageId {
    pub const UNASSIGNED: PageId = PageId {
        file_id: FileId::UNASSIGNED,
        page_number: 0,
    };

    pub fn new(file_id: FileId, page_number: u64) -> Self {
        Self { file_id, page_number }
    }
}

/// `(FileId, worker_position)`: a private temp file's owning worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TmpFileId {
    pub file_id: FileId,
    pub worker_position: u32,
}
