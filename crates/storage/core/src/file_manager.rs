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

// File Manager. Owns file handles, maps logical file names to
// file identifiers, reads/writes fixed-size pages from/to disk.
//
// Grounded on `storage_engine::file_format::FileFormat`'s approach
// (positional `seek` + `read_exact`/`write_all` against a `std::fs::File`),
// generalized from one hardcoded database file to many named files (data
// files, the string-hash directory, blob files, worker temp files) the way
// `fs::layout::LayoutConfig` names several directories/file types for the
// same storage engine.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::page::{FileId, PageId, PAGE_SIZE};

struct FileManagerInner {
    path_to_id: HashMap<PathBuf, FileId>,
    files: Vec<Mutex<File>>,
}

/// Owns every on-disk file the buffer pools address by `(FileId, page_number)`.
pub struct FileManager {
    base_dir: PathBuf,
    inner: RwLock<FileManagerInner>,
}

impl FileManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| StorageError::FatalConfiguration(format!("cannot create data directory: {e}")))?;
        Ok(Self {
            base_dir,
            inner: RwLock::new(FileManagerInner {
                path_to_id: HashMap::new(),
                files: Vec::new(),
            }),
        })
    }

    /// Create-if-missing mapping from a logical file name to a `FileId`.
    pub fn get_file_id(&self, name: &str) -> StorageResult<FileId> {
        let path = self.base_dir.join(name);

        if let Some(id) = self.inner.read().path_to_id.get(&path) {
            return Ok(*id);
        }

        let mut inner = self.inner.write();
        // Re-check: another thread may have raced us between the read and write lock.
        if let Some(id) = inner.path_to_id.get(&path) {
            return Ok(*id);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| StorageError::FatalConfiguration(format!("cannot open {}: {e}", path.display())))?;

        let id = FileId(inner.files.len() as u32);
        inner.files.push(Mutex::new(file));
        inner.path_to_id.insert(path, id);
        tracing::debug!(?id, name, "file manager registered file");
        Ok(id)
    }

    /// Number of whole `PAGE_SIZE` pages currently in the file.
    pub fn count_pages(&self, file_id: FileId) -> StorageResult<u64> {
        let inner = self.inner.read();
        let mut file = self.handle(&inner, file_id)?.lock();
        let len = file.metadata().map_err(StorageError::Io)?.len();
        Ok(len / PAGE_SIZE as u64)
    }

    /// Reads `PAGE_SIZE` bytes at `page_number * PAGE_SIZE`. A short read is
    /// an unrecoverable corruption.
    pub fn read_existing_page(&self, page_id: PageId, dst: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let inner = self.inner.read();
        let mut file = self.handle(&inner, page_id.file_id)?.lock();
        file.seek(SeekFrom::Start(page_id.page_number * PAGE_SIZE as u64)).map_err(StorageError::Io)?;
        file.read_exact(dst)
            .map_err(|e| StorageError::Integrity(format!("short read for page {page_id:?}: {e}")))
    }

    /// Like `read_existing_page`, but a missing file or a read past EOF is
    /// zero-filled instead of failing, used for worker temp files that may
    /// not have been extended to this position yet.
    pub fn read_tmp_page(&self, page_id: PageId, dst: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        dst.fill(0);
        let inner = self.inner.read();
        let mut file = self.handle(&inner, page_id.file_id)?.lock();
        let len = file.metadata().map_err(StorageError::Io)?.len();
        let offset = page_id.page_number * PAGE_SIZE as u64;
        if offset >= len {
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset)).map_err(StorageError::Io)?;
        let available = (len - offset).min(PAGE_SIZE as u64) as usize;
        file.read_exact(&mut dst[..available]).map_err(StorageError::Io)?;
        Ok(())
    }

    /// Appends `src` at the end of the file, returning the new 0-based page number.
    pub fn append_page(&self, file_id: FileId, src: &[u8; PAGE_SIZE]) -> StorageResult<u64> {
        let inner = self.inner.read();
        let mut file = self.handle(&inner, file_id)?.lock();
        let page_number = file.metadata().map_err(StorageError::Io)?.len() / PAGE_SIZE as u64;
        file.seek(SeekFrom::End(0)).map_err(StorageError::Io)?;
        file.write_all(src).map_err(StorageError::Io)?;
        Ok(page_number)
    }

    /// Positional write of a page already known to exist (flush of a dirty page).
    pub fn flush(&self, page_id: PageId, bytes: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let inner = self.inner.read();
        let mut file = self.handle(&inner, page_id.file_id)?.lock();
        let offset = page_id.page_number * PAGE_SIZE as u64;
        let len = file.metadata().map_err(StorageError::Io)?.len();
        if offset + PAGE_SIZE as u64 > len {
            file.set_len(offset + PAGE_SIZE as u64).map_err(StorageError::Io)?;
        }
        file.seek(SeekFrom::Start(offset)).map_err(StorageError::Io)?;
        file.write_all(bytes).map_err(StorageError::Io)
    }

    fn handle<'a>(&self, inner: &'a FileManagerInner, file_id: FileId) -> StorageResult<&'a Mutex<File>> {
        inner
            .files
            .get(file_id.0 as usize)
            .ok_or_else(|| StorageError::Integrity(format!("unknown file id {file_id:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let fid = fm.get_file_id("data.dat").unwrap();

        let mut src = [0xABu8; PAGE_SIZE];
        let page_number = fm.append_page(fid, &src).unwrap();
        assert_eq!(page_number, 0);

        let mut dst = [0u8; PAGE_SIZE];
        fm.read_existing_page(PageId::new(fid, 0), &mut dst).unwrap();
        assert_eq!(src, dst);

        src.fill(0x11);
        fm.flush(PageId::new(fid, 0), &src).unwrap();
        fm.read_existing_page(PageId::new(fid, 0), &mut dst).unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn get_file_id_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let a = fm.get_file_id("same.dat").unwrap();
        let b = fm.get_file_id("same.dat").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn read_tmp_page_zero_fills_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let fid = fm.get_file_id("tmp.dat").unwrap();
        let mut dst = [0xFFu8; PAGE_SIZE];
        fm.read_tmp_page(PageId::new(fid, 5), &mut dst).unwrap();
        assert_eq!(dst, [0u8; PAGE_SIZE]);
    }
}
