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

// Extendible Strings Hash: an on-disk extendible hash over the
// unversioned pool mapping a 64-bit string hash to a compact string id.
//
// No direct analogue exists for the on-disk splitting scheme; grounded on
// `indices::hash_index` only for the general idea of a
// pluggable hash directory, and otherwise built directly from the
// described bucket layout (`key_count`, `local_depth`, parallel `arr1`/
// `arr2` arrays) using the same manual big-endian page packing as
// `strings::StringManager` and `file_format::PageHeader`. The insert/split
// algorithm is not fully specified in source; this implements the stated
// required behavior directly.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;

use crate::error::StorageResult;
use crate::oid::MASK_NOT_FOUND;
use crate::page::{FileId, PAGE_SIZE};
use crate::strings::{StringId, StringManager};
use crate::upool::UPool;

const BUCKET_HEADER_BYTES: usize = 8;
const BUCKET_ENTRY_BYTES: usize = 12; // 8 (arr1) + 4 (arr2)
const MASK52: u64 = (1u64 << 52) - 1;

struct HashState {
    global_depth: u32,
    directory: Vec<u64>,
}

/// On-disk extendible hash directory over unversioned bucket pages.
pub struct ExtendibleHash {
    upool: Arc<UPool>,
    strings: Arc<StringManager>,
    bucket_file: FileId,
    min_global_depth: u32,
    max_keys: usize,
    state: Mutex<HashState>,
}

impl ExtendibleHash {
    pub fn new(
        upool: Arc<UPool>,
        strings: Arc<StringManager>,
        bucket_file: FileId,
        min_global_depth: u32,
        max_keys: usize,
    ) -> StorageResult<Self> {
        if BUCKET_HEADER_BYTES + BUCKET_ENTRY_BYTES * max_keys > PAGE_SIZE {
            return Err(crate::error::StorageError::FatalConfiguration(format!(
                "max_keys={max_keys} does not fit in a single bucket page"
            )));
        }

        let directory_len = 1usize << min_global_depth;
        let mut directory = Vec::with_capacity(directory_len);
        let empty1 = vec![0u64; max_keys];
        let empty2 = vec![0u32; max_keys];
        for _ in 0..directory_len {
            let guard = upool.append_unversioned_page(bucket_file)?;
            let mut buf = [0u8; PAGE_SIZE];
            write_bucket(&mut buf, 0, 0, &empty1, &empty2);
            guard.write(&buf)?;
            directory.push(guard.page_id().page_number);
        }

        Ok(Self {
            upool,
            strings,
            bucket_file,
            min_global_depth,
            max_keys,
            state: Mutex::new(HashState { global_depth: min_global_depth, directory }),
        })
    }

    /// Lookup algorithm. Returns [`MASK_NOT_FOUND`] on a miss.
    pub fn get_id(&self, hash: u64, bytes: &[u8]) -> StorageResult<u64> {
        let bucket_page = {
            let state = self.state.lock();
            self.bucket_for(&state, hash)
        };
        self.lookup_in_bucket(bucket_page, hash, bytes)
    }

    /// Insert-or-lookup: looks up first, then inserts, splitting
    /// and retrying as many times as the bucket stays full.
    pub fn create_or_get_id(&self, hash: u64, bytes: &[u8]) -> StorageResult<u64> {
        loop {
            let existing = self.get_id(hash, bytes)?;
            if existing != MASK_NOT_FOUND {
                return Ok(existing);
            }

            let mut state = self.state.lock();
            let dir_index = self.dir_index(&state, hash);
            let bucket_page = state.directory[dir_index];

            let guard = self.upool.get_unversioned_page(self.bucket_file, bucket_page)?;
            let mut buf = [0u8; PAGE_SIZE];
            guard.read(&mut buf)?;
            let (key_count, local_depth, mut arr1, mut arr2) = read_bucket(&buf, self.max_keys);
            drop(guard);

            if (key_count as usize) < self.max_keys {
                let id = self.strings.append(bytes)?.0;
                let suffix = (hash >> self.min_global_depth) & MASK52;
                let slot = key_count as usize;
                arr1[slot] = ((id >> 32) << 52) | suffix;
                arr2[slot] = (id & 0xFFFF_FFFF) as u32;
                write_bucket(&mut buf, key_count + 1, local_depth, &arr1, &arr2);
                let guard = self.upool.get_unversioned_page(self.bucket_file, bucket_page)?;
                guard.write(&buf)?;
                return Ok(id);
            }

            self.split_bucket(&mut state, bucket_page, local_depth, key_count, arr1, arr2)?;
            // Loop retries lookup + insert against the (now split) directory.
        }
    }

    fn dir_index(&self, state: &HashState, hash: u64) -> usize {
        (hash & ((1u64 << state.global_depth) - 1)) as usize
    }

    fn bucket_for(&self, state: &HashState, hash: u64) -> u64 {
        state.directory[self.dir_index(state, hash)]
    }

    fn lookup_in_bucket(&self, bucket_page: u64, hash: u64, bytes: &[u8]) -> StorageResult<u64> {
        let guard = self.upool.get_unversioned_page(self.bucket_file, bucket_page)?;
        let mut buf = [0u8; PAGE_SIZE];
        guard.read(&mut buf)?;
        let (key_count, _local_depth, arr1, arr2) = read_bucket(&buf, self.max_keys);

        let suffix = (hash >> self.min_global_depth) & MASK52;
        for i in 0..key_count as usize {
            if (arr1[i] & MASK52) == suffix {
                let id = ((arr1[i] >> 52) << 32) | arr2[i] as u64;
                if self.strings.bytes_eq(bytes, StringId(id))? {
                    return Ok(id);
                }
            }
        }
        Ok(MASK_NOT_FOUND)
    }

    /// Splits a full bucket, doubling the directory first if the new local
    /// depth would exceed the current global depth.
    fn split_bucket(
        &self,
        state: &mut HashState,
        old_bucket_page: u64,
        local_depth: u32,
        key_count: u32,
        arr1: Vec<u64>,
        arr2: Vec<u32>,
    ) -> StorageResult<()> {
        let local_depth_new = local_depth + 1;

        if self.min_global_depth + local_depth_new > state.global_depth {
            let old_size = state.directory.len();
            let mut doubled = vec![0u64; old_size * 2];
            for i in 0..old_size {
                doubled[i] = state.directory[i];
                doubled[i + old_size] = state.directory[i];
            }
            state.directory = doubled;
            state.global_depth += 1;
        }

        let new_guard = self.upool.append_unversioned_page(self.bucket_file)?;
        let new_bucket_page = new_guard.page_id().page_number;

        let (old_count, old_arr1, old_arr2, new_count, new_arr1, new_arr2) =
            redistribute(&arr1, &arr2, key_count, self.max_keys, local_depth_new - 1);

        let mut old_buf = [0u8; PAGE_SIZE];
        write_bucket(&mut old_buf, old_count, local_depth_new, &old_arr1, &old_arr2);
        let old_guard = self.upool.get_unversioned_page(self.bucket_file, old_bucket_page)?;
        old_guard.write(&old_buf)?;

        let mut new_buf = [0u8; PAGE_SIZE];
        write_bucket(&mut new_buf, new_count, local_depth_new, &new_arr1, &new_arr2);
        new_guard.write(&new_buf)?;

        let abs_bit = self.min_global_depth + (local_depth_new - 1);
        for idx in 0..state.directory.len() {
            if state.directory[idx] == old_bucket_page && (idx as u64 >> abs_bit) & 1 == 1 {
                state.directory[idx] = new_bucket_page;
            }
        }

        Ok(())
    }
}

/// Redistributes bucket entries using bit `suffix_bit` of their cached hash
/// suffix: entries with the bit set move out.
fn redistribute(
    arr1: &[u64],
    arr2: &[u32],
    key_count: u32,
    max_keys: usize,
    suffix_bit: u32,
) -> (u32, Vec<u64>, Vec<u32>, u32, Vec<u64>, Vec<u32>) {
    let mut stay1 = vec![0u64; max_keys];
    let mut stay2 = vec![0u32; max_keys];
    let mut move1 = vec![0u64; max_keys];
    let mut move2 = vec![0u32; max_keys];
    let mut stay_count = 0u32;
    let mut move_count = 0u32;

    for i in 0..key_count as usize {
        let suffix = arr1[i] & MASK52;
        if (suffix >> suffix_bit) & 1 == 1 {
            move1[move_count as usize] = arr1[i];
            move2[move_count as usize] = arr2[i];
            move_count += 1;
        } else {
            stay1[stay_count as usize] = arr1[i];
            stay2[stay_count as usize] = arr2[i];
            stay_count += 1;
        }
    }

    (stay_count, stay1, stay2, move_count, move1, move2)
}

fn write_bucket(buf: &mut [u8; PAGE_SIZE], key_count: u32, local_depth: u32, arr1: &[u64], arr2: &[u32]) {
    BigEndian::write_u32(&mut buf[0..4], key_count);
    BigEndian::write_u32(&mut buf[4..8], local_depth);
    let mut off = BUCKET_HEADER_BYTES;
    for &v in arr1 {
        BigEndian::write_u64(&mut buf[off..off + 8], v);
        off += 8;
    }
    for &v in arr2 {
        BigEndian::write_u32(&mut buf[off..off + 4], v);
        off += 4;
    }
}

fn read_bucket(buf: &[u8; PAGE_SIZE], max_keys: usize) -> (u32, u32, Vec<u64>, Vec<u32>) {
    let key_count = BigEndian::read_u32(&buf[0..4]);
    let local_depth = BigEndian::read_u32(&buf[4..8]);
    let mut off = BUCKET_HEADER_BYTES;
    let mut arr1 = vec![0u64; max_keys];
    for slot in arr1.iter_mut() {
        *slot = BigEndian::read_u64(&buf[off..off + 8]);
        off += 8;
    }
    let mut arr2 = vec![0u32; max_keys];
    for slot in arr2.iter_mut() {
        *slot = BigEndian::read_u32(&buf[off..off + 4]);
        off += 4;
    }
    (key_count, local_depth, arr1, arr2)
}
