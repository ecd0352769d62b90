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

// String Manager. Appends
// string bytes into unversioned blob pages and returns an offset-based id;
// compares bytes at an offset against a caller buffer.
//
// Implemented at the boundary the extendible hash needs: one blob file,
// length-prefixed records, an id that packs `(page_number, offset)` into 44
// bits (grounded on `upool`'s page access, following the
// `file_format` convention of manual big-endian field packing over a fixed
// byte buffer rather than a serde derive).

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::page::{FileId, PAGE_SIZE};
use crate::upool::UPool;

const LEN_PREFIX_BYTES: usize = 2;
const OFFSET_BITS: u32 = 12; // log2(PAGE_SIZE)
const MAX_STRING_BYTES: usize = PAGE_SIZE - LEN_PREFIX_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringId(pub u64);

struct Cursor {
    page_number: u64,
    offset: usize,
    started: bool,
}

/// Owns one append-only blob file and hands out compact string ids.
pub struct StringManager {
    upool: Arc<UPool>,
    blob_file: FileId,
    cursor: Mutex<Cursor>,
}

impl StringManager {
    pub fn new(upool: Arc<UPool>, blob_file: FileId) -> Self {
        Self {
            upool,
            blob_file,
            cursor: Mutex::new(Cursor { page_number: 0, offset: 0, started: false }),
        }
    }

    /// Appends `bytes` as a length-prefixed record, returning its id.
    pub fn append(&self, bytes: &[u8]) -> StorageResult<StringId> {
        if bytes.len() > MAX_STRING_BYTES || bytes.len() > u16::MAX as usize {
            return Err(StorageError::FatalConfiguration("string exceeds single blob page capacity".into()));
        }

        let mut cursor = self.cursor.lock();
        let needed = LEN_PREFIX_BYTES + bytes.len();
        if !cursor.started || cursor.offset + needed > PAGE_SIZE {
            let guard = self.upool.append_unversioned_page(self.blob_file)?;
            cursor.page_number = guard.page_id().page_number;
            cursor.offset = 0;
            cursor.started = true;
        }

        let guard = self.upool.get_unversioned_page(self.blob_file, cursor.page_number)?;
        let mut page = [0u8; PAGE_SIZE];
        guard.read(&mut page)?;

        let start = cursor.offset;
        BigEndian::write_u16(&mut page[start..start + 2], bytes.len() as u16);
        page[start + 2..start + 2 + bytes.len()].copy_from_slice(bytes);
        guard.write(&page)?;

        let id = encode_id(cursor.page_number, start as u32);
        cursor.offset = start + needed;
        Ok(StringId(id))
    }

    pub fn fetch(&self, id: StringId) -> StorageResult<Vec<u8>> {
        let (page_number, offset) = decode_id(id.0);
        let guard = self.upool.get_unversioned_page(self.blob_file, page_number)?;
        let mut page = [0u8; PAGE_SIZE];
        guard.read(&mut page)?;
        let offset = offset as usize;
        let len = BigEndian::read_u16(&page[offset..offset + 2]) as usize;
        Ok(page[offset + 2..offset + 2 + len].to_vec())
    }

    pub fn bytes_eq(&self, buf: &[u8], id: StringId) -> StorageResult<bool> {
        Ok(self.fetch(id)? == buf)
    }
}

fn encode_id(page_number: u64, offset: u32) -> u64 {
    debug_assert!(offset < PAGE_SIZE as u32);
    ((page_number & 0xFFFF_FFFF) << OFFSET_BITS) | offset as u64
}

fn decode_id(id: u64) -> (u64, u32) {
    let offset = (id & ((1 << OFFSET_BITS) - 1)) as u32;
    let page_number = id >> OFFSET_BITS;
    (page_number, offset)
}
