// End-to-end scenarios exercising the versioned, unversioned, and private
// pools together through the public engine surface, rather than each pool's
// own unit tests in isolation.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use mdb_storage_core::{
    catalog::QUAD_MODEL_ID, file_manager::FileManager, page::PAGE_SIZE, ppool::WorkerId, rat::RandomAccessTable,
    strings::StringManager, upool::UPool, xhash::ExtendibleHash, Engine, StorageConfig,
};

fn open_engine(dir: &std::path::Path, config: StorageConfig) -> Engine {
    let fm = FileManager::new(dir).unwrap();
    let mut page = [0u8; PAGE_SIZE];
    LittleEndian::write_u64(&mut page[..8], QUAD_MODEL_ID);
    let catalog = fm.get_file_id("catalog.dat").unwrap();
    fm.append_page(catalog, &page).unwrap();
    Engine::open(dir, config).unwrap()
}

#[test]
fn fresh_insert_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig { vp_pool_bytes: PAGE_SIZE as u64 * 4, ..StorageConfig::default() };
    let engine = open_engine(dir.path(), config);
    let file_id = engine.file_manager.get_file_id("f.dat").unwrap();

    {
        let scope = engine.open_editable_scope();
        let guard = engine.vpool.append_vpage(file_id, &scope).unwrap();
        guard.write(&[0xAB; PAGE_SIZE]).unwrap();
    }

    let reader = engine.open_readonly_scope();
    let guard = engine.vpool.get_page_readonly(file_id, 0, &reader).unwrap();
    let mut buf = [0u8; PAGE_SIZE];
    guard.read(&mut buf).unwrap();
    assert_eq!(buf, [0xAB; PAGE_SIZE]);
}

#[test]
fn eviction_does_not_lose_writes() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig { vp_pool_bytes: PAGE_SIZE as u64 * 2, ..StorageConfig::default() };
    let engine = open_engine(dir.path(), config);
    let file_id = engine.file_manager.get_file_id("f.dat").unwrap();

    for i in 0u8..4 {
        let scope = engine.open_editable_scope();
        let guard = engine.vpool.append_vpage(file_id, &scope).unwrap();
        guard.write(&[i; PAGE_SIZE]).unwrap();
    }

    let reader = engine.open_readonly_scope();
    let guard = engine.vpool.get_page_readonly(file_id, 0, &reader).unwrap();
    let mut buf = [0u8; PAGE_SIZE];
    guard.read(&mut buf).unwrap();
    assert_eq!(buf, [0u8; PAGE_SIZE]);
}

#[test]
fn old_snapshot_stable_across_commit() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), StorageConfig::default());
    let file_id = engine.file_manager.get_file_id("f.dat").unwrap();

    {
        let scope = engine.open_editable_scope();
        let guard = engine.vpool.append_vpage(file_id, &scope).unwrap();
        guard.write(&[0x11; PAGE_SIZE]).unwrap();
    }

    let reader = engine.open_readonly_scope();

    {
        let scope = engine.open_editable_scope();
        let guard = engine.vpool.get_page_editable(file_id, 0, &scope).unwrap();
        guard.write(&[0x22; PAGE_SIZE]).unwrap();
    }

    let mut buf = [0u8; PAGE_SIZE];
    let guard = engine.vpool.get_page_readonly(file_id, 0, &reader).unwrap();
    guard.read(&mut buf).unwrap();
    assert_eq!(buf, [0x11; PAGE_SIZE]);
    drop(guard);
    drop(reader);

    let reader2 = engine.open_readonly_scope();
    let guard2 = engine.vpool.get_page_readonly(file_id, 0, &reader2).unwrap();
    guard2.read(&mut buf).unwrap();
    assert_eq!(buf, [0x22; PAGE_SIZE]);
}

#[test]
fn extendible_hash_growth_under_1000_strings() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(42);

    let dir = tempfile::tempdir().unwrap();
    let fm = Arc::new(FileManager::new(dir.path()).unwrap());
    let upool = UPool::new(fm.clone(), 4096).unwrap();
    let bucket_file = fm.get_file_id("buckets.dat").unwrap();
    let blob_file = fm.get_file_id("blobs.dat").unwrap();
    let strings = Arc::new(StringManager::new(upool.clone(), blob_file));
    let hash = ExtendibleHash::new(upool, strings, bucket_file, 8, 4).unwrap();

    let mut inserted = Vec::new();
    for i in 0u64..1000 {
        let s = format!("value-{i}");
        let h: u64 = rng.r#gen();
        let id = hash.create_or_get_id(h, s.as_bytes()).unwrap();
        inserted.push((h, s, id));
    }

    for (h, s, id) in &inserted {
        assert_eq!(hash.get_id(*h, s.as_bytes()).unwrap(), *id);
        assert_eq!(hash.create_or_get_id(*h, s.as_bytes()).unwrap(), *id);
    }

    let missing_hash: u64 = rng.r#gen();
    assert_eq!(hash.get_id(missing_hash, b"never-inserted").unwrap(), mdb_storage_core::oid::MASK_NOT_FOUND);
}

#[test]
fn oid_int_packing_matches_boundary_values() {
    use mdb_storage_core::oid::{decode_int, inline_int};

    assert_eq!(decode_int(inline_int(-1).unwrap()), -1);

    let max = (1i64 << 56) - 1;
    assert_eq!(decode_int(inline_int(max).unwrap()), max);

    assert!(inline_int(1i64 << 56).is_err());
}

#[test]
fn private_pool_isolation_across_workers() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig { workers: 2, ..StorageConfig::default() };
    let engine = open_engine(dir.path(), config);

    let worker_a = WorkerId(0);
    let worker_b = WorkerId(1);
    let tmp_a = engine.ppool.tmp_file(worker_a, "spill").unwrap();
    let tmp_b = engine.ppool.tmp_file(worker_b, "spill").unwrap();

    for i in 0u8..10 {
        let guard = engine.ppool.append_ppage(tmp_a).unwrap();
        guard.write(&[i; PAGE_SIZE]).unwrap();
    }
    for i in 0u8..10 {
        let guard = engine.ppool.append_ppage(tmp_b).unwrap();
        guard.write(&[100 + i; PAGE_SIZE]).unwrap();
    }

    for i in 0u64..10 {
        let mut buf = [0u8; PAGE_SIZE];
        engine.ppool.get_ppage(tmp_a, i).unwrap().read(&mut buf).unwrap();
        assert_eq!(buf, [i as u8; PAGE_SIZE]);

        engine.ppool.get_ppage(tmp_b, i).unwrap().read(&mut buf).unwrap();
        assert_eq!(buf, [100 + i as u8; PAGE_SIZE]);
    }
}

#[test]
fn random_access_table_survives_a_full_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path(), StorageConfig::default());
    let file_id = engine.file_manager.get_file_id("rat.dat").unwrap();
    let rat = RandomAccessTable::new(engine.vpool.clone(), file_id, 32).unwrap();

    let scope = engine.open_editable_scope();
    let mut positions = Vec::new();
    for i in 0u8..64 {
        let mut record = [0u8; 32];
        record[0] = i + 1;
        positions.push(rat.append(&scope, &record).unwrap());
    }

    for (i, pos) in positions.into_iter().enumerate() {
        let mut out = [0u8; 32];
        rat.read(pos, &scope, &mut out).unwrap();
        assert_eq!(out[0], i as u8 + 1);
    }
}
