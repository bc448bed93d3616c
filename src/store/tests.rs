use super::*;
use crate::constants::KEY_LENGTH;
use crate::control::ControlCode;
use crate::key::{Key, XorDistance};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn test_config() -> StoreConfig {
    StoreConfig::default()
        .with_capacity(64 * 1024)
        .with_space_wait(Duration::from_millis(50))
        .with_failure_wait(Duration::from_secs(5))
}

fn key_at(first: u8) -> Key {
    let mut bytes = [0u8; KEY_LENGTH];
    bytes[0] = first;
    Key(bytes)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn store_entry(store: &DataStore, key: Key, data: &[u8]) {
    let mut writer = store.put(key, data.len() as u64, Storables::new(), false).unwrap();
    writer.write(data).unwrap();
    writer.close().unwrap();
    writer.commit().unwrap();
}

fn read_all(reader: &mut ReadHandle) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 7];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[test]
fn test_put_commit_get() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"scenario a");
    let data = payload(1000);

    let mut writer = store.put(key, 1000, Storables::new(), false).unwrap();
    writer.write(&data[..300]).unwrap();
    writer.write(&data[300..]).unwrap();
    writer.close().unwrap();
    writer.commit().unwrap();
    assert_eq!(writer.failure_code(), Some(ControlCode::Ok));

    let mut reader = store.get(&key).unwrap();
    assert_eq!(reader.length(), 1000);
    assert_eq!(read_all(&mut reader).unwrap(), data);
    assert_eq!(reader.length(), 0);
    assert_eq!(reader.failure_code(), ControlCode::Ok);
}

#[test]
fn test_short_write_fails() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"scenario b");

    let mut writer = store.put(key, 1000, Storables::new(), false).unwrap();
    writer.write(&payload(400)).unwrap();
    let err = writer.close().unwrap_err();
    assert!(matches!(
        err,
        StoreError::LengthMismatch {
            declared: 1000,
            written: 400
        }
    ));
    assert_eq!(writer.failure_code(), Some(ControlCode::CacheFailed));
    assert!(writer.is_rolled_back());
    assert!(matches!(writer.commit(), Err(StoreError::AlreadyRolledBack)));

    assert!(store.get(&key).is_none());
    assert_eq!(store.stats().buffers, 0);
    assert_eq!(store.stats().used, 0);
}

#[test]
fn test_overrun_fails_on_close() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"overrun");

    let mut writer = store.put(key, 10, Storables::new(), false).unwrap();
    writer.write(&payload(8)).unwrap();
    assert!(matches!(
        writer.write(&payload(4)),
        Err(StoreError::LengthMismatch { .. })
    ));
    writer.write(&payload(2)).unwrap();
    assert!(writer.close().is_err());
    assert_eq!(writer.failure_code(), Some(ControlCode::CacheFailed));
    assert!(!store.contains(&key));
}

#[test]
fn test_commit_before_close() {
    let store = DataStore::new(test_config());
    let mut writer = store
        .put(Key::for_content(b"open"), 4, Storables::new(), false)
        .unwrap();
    writer.write(b"data").unwrap();
    assert!(matches!(writer.commit(), Err(StoreError::NotClosed)));
    writer.close().unwrap();
    writer.commit().unwrap();
}

#[test]
fn test_double_commit() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"twice");

    let mut writer = store.put(key, 4, Storables::new(), false).unwrap();
    writer.write(b"data").unwrap();
    writer.close().unwrap();
    writer.commit().unwrap();
    assert!(matches!(writer.commit(), Err(StoreError::AlreadyCommitted)));
    assert!(matches!(writer.rollback(), Err(StoreError::AlreadyCommitted)));
    assert_eq!(store.stats().indexed, 1);

    // The second commit must not have dropped another reference: an open
    // reader keeps the buffer alive after the key is removed.
    let reader = store.get(&key).unwrap();
    assert!(store.remove(&key, false));
    assert_eq!(store.stats().buffers, 1);
    drop(reader);
    assert_eq!(store.stats().buffers, 0);
}

#[test]
fn test_invisible_until_commit() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"pending");

    let mut writer = store.put(key, 6, Storables::new(), false).unwrap();
    assert!(store.get(&key).is_none());
    writer.write(b"pend").unwrap();
    assert!(store.get(&key).is_none());
    writer.write(b"ng").unwrap();
    writer.close().unwrap();
    assert!(store.get(&key).is_none());
    assert!(!store.contains(&key));

    writer.commit().unwrap();
    let mut reader = store.get(&key).unwrap();
    assert_eq!(read_all(&mut reader).unwrap(), b"pendng");
}

#[test]
fn test_put_collision_precheck() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"taken");
    store_entry(&store, key, b"first");

    assert!(matches!(
        store.put(key, 5, Storables::new(), false),
        Err(StoreError::Collision(k)) if k == key
    ));
    assert_eq!(store.stats().buffers, 1);
}

#[test]
fn test_concurrent_put_collision() {
    let store = Arc::new(DataStore::new(test_config()));
    let key = Key::for_content(b"contended");
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2u8)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut writer = store.put(key, 3, Storables::new(), false).unwrap();
                writer.write(&[i; 3]).unwrap();
                writer.close().unwrap();
                barrier.wait();
                writer.commit()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let committed = results.iter().filter(|r| r.is_ok()).count();
    let collided = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::Collision(_))))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(collided, 1);

    let stats = store.stats();
    assert_eq!(stats.indexed, 1);
    assert_eq!(stats.buffers, 1);
}

#[test]
fn test_overwrite_replaces_entry() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"replace");
    store_entry(&store, key, b"old");

    let mut writer = store.put(key, 3, Storables::new(), true).unwrap();
    writer.write(b"new").unwrap();
    writer.close().unwrap();
    writer.commit().unwrap();

    let mut reader = store.get(&key).unwrap();
    assert_eq!(read_all(&mut reader).unwrap(), b"new");
    drop(reader);
    assert_eq!(store.stats().buffers, 1);
}

#[test]
fn test_reference_counting() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"shared");

    let mut writer = store.put(key, 8, Storables::new(), false).unwrap();
    let mut readers: Vec<_> = (0..3).map(|_| writer.reader().unwrap()).collect();
    writer.write(b"8 bytes!").unwrap();
    writer.close().unwrap();
    writer.rollback().unwrap();

    assert_eq!(store.stats().buffers, 1);
    while let Some(reader) = readers.pop() {
        assert_eq!(store.stats().buffers, 1);
        reader.close();
    }
    assert_eq!(store.stats().buffers, 0);
    assert_eq!(store.stats().used, 0);
}

#[test]
fn test_reference_counting_writer_last() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"writer last");

    let mut writer = store.put(key, 4, Storables::new(), false).unwrap();
    let readers: Vec<_> = (0..4).map(|_| writer.reader().unwrap()).collect();
    drop(readers);
    assert_eq!(store.stats().buffers, 1);

    writer.write(b"last").unwrap();
    writer.close().unwrap();
    writer.rollback().unwrap();
    assert_eq!(store.stats().buffers, 0);
}

#[test]
fn test_attached_reader_sees_failure() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"doomed");

    let mut writer = store.put(key, 20, Storables::new(), false).unwrap();
    let mut reader = writer.reader().unwrap();
    assert_eq!(reader.length(), 20);

    writer.write(&payload(10)).unwrap();
    let mut buf = [0u8; 10];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf.to_vec(), payload(10));

    writer.rollback().unwrap();
    assert!(matches!(
        reader.read(&mut buf),
        Err(StoreError::Failed(ControlCode::Aborted))
    ));
    assert_eq!(reader.failure_code(), ControlCode::Aborted);
}

#[test]
fn test_fail_sets_code() {
    let store = DataStore::new(test_config());
    let mut writer = store
        .put(Key::for_content(b"bad"), 4, Storables::new(), false)
        .unwrap();
    let reader = writer.reader().unwrap();
    writer.fail(ControlCode::BadData).unwrap();
    // The first code wins.
    writer.fail(ControlCode::Cancelled).unwrap();
    assert_eq!(reader.failure_code(), ControlCode::BadData);
}

#[test]
fn test_dropped_writer_cancels() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"dropped");

    let writer = store.put(key, 4, Storables::new(), false).unwrap();
    let reader = writer.reader().unwrap();
    drop(writer);

    assert_eq!(reader.failure_code(), ControlCode::Cancelled);
    drop(reader);
    assert_eq!(store.stats().buffers, 0);
}

#[test]
fn test_reader_streams_in_flight_write() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"streaming");
    let data = payload(4096);

    let mut writer = store.put(key, 4096, Storables::new(), false).unwrap();
    let mut reader = writer.reader().unwrap();

    let expected = data.clone();
    let consumer = thread::spawn(move || {
        let out = read_all(&mut reader);
        (out, reader.failure_code())
    });

    for chunk in data.chunks(512) {
        writer.write(chunk).unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    writer.close().unwrap();
    writer.commit().unwrap();

    let (out, code) = consumer.join().unwrap();
    assert_eq!(out.unwrap(), expected);
    assert_eq!(code, ControlCode::Ok);
}

#[test]
fn test_storables_prefix() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"with metadata");
    let storables = Storables::new()
        .with_part_size(1024)
        .with_field("mime", "text/plain");

    let mut writer = store.put(key, 5, storables.clone(), false).unwrap();
    writer.write(b"hello").unwrap();
    writer.close().unwrap();
    writer.commit().unwrap();

    let mut reader = store.get(&key).unwrap();
    assert_eq!(reader.storables().unwrap(), &storables);
    assert_eq!(reader.length(), 5);
    assert_eq!(
        reader.real_length(),
        storables.encoded_len() as u64 + 5
    );
    assert_eq!(read_all(&mut reader).unwrap(), b"hello");
}

#[test]
fn test_corrupt_metadata_deleted() {
    let config = test_config();
    let allocator = MemoryAllocator::new(&config);
    let store = DataStore::with_allocator(allocator.clone(), config);
    let key = Key::for_content(b"corrupt");

    let buffer = allocator.reserve(32).unwrap();
    buffer.write(&[0xaa; 32], Duration::from_secs(1)).unwrap();
    buffer.finish_write();
    buffer.set_failure(ControlCode::Ok);
    allocator.commit(buffer.id(), &key, false).unwrap();
    allocator.release(buffer.id());
    assert!(store.contains(&key));

    assert!(store.get(&key).is_none());
    assert!(!store.contains(&key));
    assert_eq!(store.stats().buffers, 0);
}

#[test]
fn test_lru_eviction() {
    let entry = Storables::new().encoded_len() as u64 + 100;
    let store = DataStore::new(test_config().with_capacity(entry * 3));
    let keys: Vec<Key> = (1..=4u8).map(key_at).collect();

    for key in &keys[..3] {
        store_entry(&store, *key, &payload(100));
    }
    // Touch the oldest so the second becomes the eviction candidate.
    drop(store.get(&keys[0]).unwrap());

    store_entry(&store, keys[3], &payload(100));
    assert!(store.contains(&keys[0]));
    assert!(!store.contains(&keys[1]));
    assert!(store.contains(&keys[2]));
    assert!(store.contains(&keys[3]));
}

#[test]
fn test_demote() {
    let entry = Storables::new().encoded_len() as u64 + 100;
    let store = DataStore::new(test_config().with_capacity(entry * 3));
    let keys: Vec<Key> = (1..=4u8).map(key_at).collect();

    for key in &keys[..3] {
        store_entry(&store, *key, &payload(100));
    }
    assert!(store.demote(&keys[2]));
    assert!(!store.demote(&keys[3]));

    store_entry(&store, keys[3], &payload(100));
    assert!(store.contains(&keys[0]));
    assert!(!store.contains(&keys[2]));
}

#[test]
fn test_evicted_entry_readable_while_open() {
    let entry = Storables::new().encoded_len() as u64 + 100;
    let store = DataStore::new(test_config().with_capacity(entry * 2));
    let first = key_at(1);
    store_entry(&store, first, &payload(100));
    store_entry(&store, key_at(2), &payload(100));

    let mut reader = store.get(&first).unwrap();
    store.demote(&first);
    store_entry(&store, key_at(3), &payload(100));
    assert!(!store.contains(&first));
    assert!(!store.contains(&key_at(2)));
    assert_eq!(store.stats().used, entry * 2);

    assert_eq!(read_all(&mut reader).unwrap(), payload(100));
    drop(reader);
    assert_eq!(store.stats().used, entry);
}

#[test]
fn test_no_space() {
    let store = DataStore::new(test_config().with_capacity(200));

    let _pending = store
        .put(key_at(1), 150, Storables::new(), false)
        .unwrap();
    assert!(matches!(
        store.put(key_at(2), 100, Storables::new(), false),
        Err(StoreError::NoSpace(_))
    ));
    assert!(matches!(
        store.put(key_at(3), 1000, Storables::new(), false),
        Err(StoreError::TooLarge { .. })
    ));
}

#[test]
fn test_remove_keep_if_used() {
    let store = DataStore::new(test_config());
    let key = Key::for_content(b"in use");
    store_entry(&store, key, b"busy");

    let reader = store.get(&key).unwrap();
    assert!(!store.remove(&key, true));
    assert!(store.contains(&key));
    drop(reader);

    assert!(store.remove(&key, true));
    assert!(!store.contains(&key));
    assert!(!store.remove(&key, false));
}

#[test]
fn test_find_closest_keys() {
    let store = DataStore::new(test_config());
    for first in [0x10, 0x20, 0x27, 0x30, 0x40] {
        store_entry(&store, key_at(first), b"x");
    }
    let target = key_at(0x27);

    let exclusive = store.find_closest_keys(&target, false, 3);
    assert_eq!(exclusive, vec![key_at(0x20), key_at(0x30), key_at(0x10)]);

    let inclusive = store.find_closest_keys(&target, true, 2);
    assert_eq!(inclusive, vec![key_at(0x27), key_at(0x20)]);

    let all = store.find_closest_keys(&target, true, 100);
    assert_eq!(all.len(), 5);
    assert_eq!(all[4], key_at(0x40));
}

#[test]
fn test_find_closest_keys_across_seam() {
    let store = DataStore::new(test_config());
    let mut below_top = [0xffu8; KEY_LENGTH];
    below_top[KEY_LENGTH - 1] = 0xfe;
    let below_top = Key(below_top);
    for key in [below_top, key_at(0x40), Key::MAX] {
        store_entry(&store, key, b"x");
    }

    // Both top keys are a few steps away from the bottom of the ring.
    let closest = store.find_closest_keys(&Key::MIN, false, 1);
    assert_eq!(closest, vec![Key::MAX]);

    let all = store.find_closest_keys(&Key::MIN, false, 10);
    assert_eq!(all, vec![Key::MAX, below_top, key_at(0x40)]);

    // From just below the top the walk wraps upward past the bottom.
    store_entry(&store, key_at(0x01), b"x");
    let closest = store.find_closest_keys(&below_top, false, 3);
    assert_eq!(closest, vec![Key::MAX, key_at(0x01), key_at(0x40)]);
}

#[test]
fn test_find_closest_keys_xor() {
    let store = DataStore::new(test_config()).with_closeness(Arc::new(XorDistance));
    for first in [0x01, 0x0e, 0x10] {
        store_entry(&store, key_at(first), b"x");
    }
    // 0x0f ^ 0x0e = 0x01, 0x0f ^ 0x10 = 0x1f, 0x0f ^ 0x01 = 0x0e
    let closest = store.find_closest_keys(&key_at(0x0f), false, 3);
    assert_eq!(closest, vec![key_at(0x0e), key_at(0x01), key_at(0x10)]);
}

#[test]
fn test_find_closest_keys_empty() {
    let store = DataStore::new(test_config());
    assert!(store.find_closest_keys(&key_at(1), true, 10).is_empty());
}

fn overflow_config() -> StoreConfig {
    test_config()
        .with_max_buffer_size(64)
        .with_overflow_size(32)
        .with_failure_wait(Duration::from_millis(200))
}

#[test]
fn test_overflow_streams_but_never_commits() {
    let store = DataStore::new(overflow_config());
    let key = Key::for_content(b"oversize");
    let data = payload(100);

    let mut writer = store.put(key, 100, Storables::new(), false).unwrap();
    assert_eq!(store.stats().used, 32);
    let mut reader = writer.reader().unwrap();

    let expected = data.clone();
    let consumer = thread::spawn(move || {
        let out = read_all(&mut reader);
        (out, reader.failure_code())
    });

    for chunk in data.chunks(10) {
        writer.write(chunk).unwrap();
    }
    writer.close().unwrap();
    assert!(matches!(writer.commit(), Err(StoreError::Overwritten)));

    let (out, code) = consumer.join().unwrap();
    assert_eq!(out.unwrap(), expected);
    assert_eq!(code, ControlCode::Ok);
    assert!(!store.contains(&key));
    assert_eq!(store.stats().buffers, 0);
}

#[test]
fn test_overflow_late_reader_overwritten() {
    let store = DataStore::new(overflow_config());
    let mut writer = store
        .put(Key::for_content(b"late"), 100, Storables::new(), false)
        .unwrap();
    writer.write(&payload(100)).unwrap();

    let mut late = writer.reader().unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(late.read(&mut buf), Err(StoreError::Overwritten)));
}

#[test]
fn test_overflow_stalled_writer() {
    let store = DataStore::new(overflow_config());
    let mut writer = store
        .put(Key::for_content(b"stalled"), 100, Storables::new(), false)
        .unwrap();
    let _idle = writer.reader().unwrap();

    assert!(matches!(
        writer.write(&payload(100)),
        Err(StoreError::Stalled)
    ));
}

#[test]
fn test_overflow_without_ring() {
    let store = DataStore::new(overflow_config().with_overflow_size(0));
    let result = store.put(Key::for_content(b"no ring"), 100, Storables::new(), false);
    assert!(matches!(result, Err(StoreError::NoSpace(_))));
    assert_eq!(store.stats().buffers, 0);
}

#[test]
fn test_storables_encoding() {
    let storables = Storables::framed()
        .with_field("name", "value")
        .with_field("empty", "");
    assert_eq!(storables.part_size(), crate::constants::DEFAULT_PART_SIZE);

    let encoded = storables.encode().unwrap();
    assert_eq!(encoded.len(), storables.encoded_len());
    assert_eq!(&encoded[..2], b"SB");

    let (decoded, len) = Storables::decode(&encoded).unwrap();
    assert_eq!(decoded, storables);
    assert_eq!(len, encoded.len());
    assert_eq!(decoded.get("name"), Some("value"));
    assert_eq!(decoded.fields().count(), 2);
}

#[test]
fn test_storables_rejects_corruption() {
    let encoded = Storables::new().with_field("k", "v").encode().unwrap();

    let mut bad_magic = encoded.to_vec();
    bad_magic[0] = b'X';
    assert!(matches!(
        Storables::decode(&bad_magic),
        Err(StoreError::CorruptMetadata(_))
    ));

    let mut bad_version = encoded.to_vec();
    bad_version[2] = 99;
    assert!(Storables::decode(&bad_version).is_err());

    assert!(Storables::decode(&encoded[..encoded.len() - 1]).is_err());

    let mut bad_utf8 = encoded.to_vec();
    let last = bad_utf8.len() - 1;
    bad_utf8[last] = 0xff;
    assert!(Storables::decode(&bad_utf8).is_err());
}
