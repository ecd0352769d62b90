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

// Catalog bootstrap. The first 8 bytes of `catalog.dat` identify the
// graph model; anything else is a fatal configuration error.
//
// Grounded on `file_format::FileFormat::open`'s header check
// (read a fixed-width magic, reject on mismatch) adapted to the two model
// ids this crate recognizes instead of one fixed magic.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{StorageError, StorageResult};
use crate::file_manager::FileManager;
use crate::page::{PageId, PAGE_SIZE};

pub const QUAD_MODEL_ID: u64 = 1;
pub const RDF_MODEL_ID: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphModel {
    Quad,
    Rdf,
}

/// Reads and validates `catalog.dat`'s model identifier.
pub fn read_model(file_manager: &FileManager) -> StorageResult<GraphModel> {
    let file_id = file_manager.get_file_id("catalog.dat")?;
    let mut page = [0u8; PAGE_SIZE];
    file_manager.read_tmp_page(PageId::new(file_id, 0), &mut page)?;

    match LittleEndian::read_u64(&page[..8]) {
        QUAD_MODEL_ID => Ok(GraphModel::Quad),
        RDF_MODEL_ID => Ok(GraphModel::Rdf),
        _ => Err(StorageError::FatalConfiguration("Unknown model identifier".to_string())),
    }
}
