//! End-to-end tests of the store facade: writes, reads, deletes, vacuum,
//! and file-range copies.

use silo_core::{CoreError, Store, StoreConfig, VacuumState, VolumeId, VolumeOptions};
use silo_needle::{Cookie, Needle, NeedleId};

fn open_store(dir: &std::path::Path) -> Store {
    Store::open(dir, StoreConfig::default()).unwrap()
}

#[test]
fn put_get_delete_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store
        .create_volume(VolumeId::new(1), "", VolumeOptions::default())
        .unwrap();

    let needle = Needle::new(NeedleId::new(10), b"store roundtrip".to_vec())
        .with_name("file.bin")
        .with_mime("application/octet-stream");
    let outcome = store.put(VolumeId::new(1), needle.clone()).unwrap();
    assert_eq!(outcome.offset % 8, 0);

    let read = store.get(VolumeId::new(1), NeedleId::new(10)).unwrap();
    assert_eq!(read.data, b"store roundtrip");
    assert_eq!(read.name, b"file.bin");

    let reclaimed = store.delete(VolumeId::new(1), NeedleId::new(10)).unwrap();
    assert!(reclaimed > 0);
    assert!(matches!(
        store.get(VolumeId::new(1), NeedleId::new(10)),
        Err(CoreError::NotFound { .. })
    ));
}

#[test]
fn unknown_volume_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    assert!(matches!(
        store.get(VolumeId::new(9), NeedleId::new(1)),
        Err(CoreError::VolumeNotFound(_))
    ));
    assert!(matches!(
        store.put(VolumeId::new(9), Needle::new(NeedleId::new(1), vec![1])),
        Err(CoreError::VolumeNotFound(_))
    ));
}

#[test]
fn cookie_verification() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store
        .create_volume(VolumeId::new(1), "", VolumeOptions::default())
        .unwrap();

    let needle = Needle::new(NeedleId::new(7), b"guarded".to_vec());
    let cookie = needle.cookie;
    store.put(VolumeId::new(1), needle).unwrap();

    assert!(store
        .get_verified(VolumeId::new(1), NeedleId::new(7), cookie)
        .is_ok());
    let wrong = Cookie::new(cookie.as_u64().wrapping_add(1));
    assert!(matches!(
        store.get_verified(VolumeId::new(1), NeedleId::new(7), wrong),
        Err(CoreError::CookieMismatch { .. })
    ));
}

#[test]
fn range_reads_slice_needle_data() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store
        .create_volume(VolumeId::new(1), "", VolumeOptions::default())
        .unwrap();
    store
        .put(
            VolumeId::new(1),
            Needle::new(NeedleId::new(3), (0u8..100).collect()),
        )
        .unwrap();

    let slice = store
        .get_range(VolumeId::new(1), NeedleId::new(3), 10, 5)
        .unwrap();
    assert_eq!(slice, vec![10, 11, 12, 13, 14]);

    assert!(matches!(
        store.get_range(VolumeId::new(1), NeedleId::new(3), 90, 20),
        Err(CoreError::InvalidOperation(_))
    ));
}

#[test]
fn vacuum_reclaims_deleted_space() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store
        .create_volume(VolumeId::new(2), "", VolumeOptions::default())
        .unwrap();

    // Three needles of 10, 20 and 30 bytes; the middle one gets deleted.
    for (id, len) in [(1u64, 10usize), (2, 20), (3, 30)] {
        store
            .put(
                VolumeId::new(2),
                Needle::new(NeedleId::new(id), vec![id as u8; len]),
            )
            .unwrap();
    }
    store.delete(VolumeId::new(2), NeedleId::new(2)).unwrap();
    let size_before = store.volume_status(VolumeId::new(2)).unwrap().size;

    assert!(store.start_vacuum(VolumeId::new(2), Some(0.01)).unwrap());
    assert_eq!(
        store.vacuum_state(VolumeId::new(2)).unwrap(),
        VacuumState::Compacting
    );
    let revision = store.commit_vacuum(VolumeId::new(2)).unwrap();
    assert_eq!(revision, 1);
    store.cleanup_vacuum(VolumeId::new(2)).unwrap();
    assert_eq!(
        store.vacuum_state(VolumeId::new(2)).unwrap(),
        VacuumState::Idle
    );

    // Remaining needles read back correctly, deleted one stays gone.
    assert_eq!(
        store.get(VolumeId::new(2), NeedleId::new(1)).unwrap().data,
        vec![1u8; 10]
    );
    assert_eq!(
        store.get(VolumeId::new(2), NeedleId::new(3)).unwrap().data,
        vec![3u8; 30]
    );
    assert!(matches!(
        store.get(VolumeId::new(2), NeedleId::new(2)),
        Err(CoreError::NotFound { .. })
    ));

    let status = store.volume_status(VolumeId::new(2)).unwrap();
    assert!(status.size < size_before);
    assert_eq!(status.compact_revision, 1);
}

#[test]
fn vacuum_skips_clean_volumes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store
        .create_volume(VolumeId::new(4), "", VolumeOptions::default())
        .unwrap();
    store
        .put(VolumeId::new(4), Needle::new(NeedleId::new(1), vec![0; 50]))
        .unwrap();
    assert!(!store.start_vacuum(VolumeId::new(4), None).unwrap());
    assert_eq!(
        store.vacuum_state(VolumeId::new(4)).unwrap(),
        VacuumState::Idle
    );
}

#[test]
fn volumes_survive_remount() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(dir.path());
        store
            .create_volume(VolumeId::new(5), "photos", VolumeOptions::default())
            .unwrap();
        store
            .put(
                VolumeId::new(5),
                Needle::new(NeedleId::new(77), b"persistent".to_vec()),
            )
            .unwrap();
        store.sync_volume(VolumeId::new(5)).unwrap();
    }

    let store = open_store(dir.path());
    store.load_volume(VolumeId::new(5), "photos").unwrap();
    assert_eq!(
        store.get(VolumeId::new(5), NeedleId::new(77)).unwrap().data,
        b"persistent"
    );
}

#[test]
fn deleted_index_is_rebuilt_on_remount() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(dir.path());
        store
            .create_volume(VolumeId::new(7), "photos", VolumeOptions::default())
            .unwrap();
        store
            .put(
                VolumeId::new(7),
                Needle::new(NeedleId::new(42), b"rebuild me".to_vec()),
            )
            .unwrap();
        store
            .put(
                VolumeId::new(7),
                Needle::new(NeedleId::new(43), b"short lived".to_vec()),
            )
            .unwrap();
        store.delete(VolumeId::new(7), NeedleId::new(43)).unwrap();
        store.sync_volume(VolumeId::new(7)).unwrap();
    }

    // The data log is the source of truth; losing the index must not lose
    // the needles.
    std::fs::remove_file(dir.path().join("photos_7.idx")).unwrap();

    let store = open_store(dir.path());
    store.load_volume(VolumeId::new(7), "photos").unwrap();
    assert_eq!(
        store.get(VolumeId::new(7), NeedleId::new(42)).unwrap().data,
        b"rebuild me"
    );
    assert!(matches!(
        store.get(VolumeId::new(7), NeedleId::new(43)),
        Err(CoreError::NotFound { .. })
    ));
    assert!(dir.path().join("photos_7.idx").exists());
}

#[test]
fn store_directory_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let _held = open_store(dir.path());
    assert!(matches!(
        Store::open(dir.path(), StoreConfig::default()),
        Err(CoreError::StoreLocked(_))
    ));
}

#[test]
fn copy_file_range_streams_the_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store
        .create_volume(VolumeId::new(6), "", VolumeOptions::default())
        .unwrap();
    for id in 1..=5u64 {
        store
            .put(
                VolumeId::new(6),
                Needle::new(NeedleId::new(id), vec![id as u8; 64]),
            )
            .unwrap();
    }
    store.sync_volume(VolumeId::new(6)).unwrap();

    let stream = store
        .copy_file_range(VolumeId::new(6), "", "dat", Some(0), 0, None)
        .unwrap();
    let mut copied = Vec::new();
    for chunk in stream {
        copied.extend_from_slice(&chunk.unwrap());
    }
    let on_disk = std::fs::read(dir.path().join("6.dat")).unwrap();
    assert_eq!(copied, on_disk);

    // A stale revision expectation is refused.
    assert!(matches!(
        store.copy_file_range(VolumeId::new(6), "", "dat", Some(3), 0, None),
        Err(CoreError::CompactRevisionMismatch {
            expected: 3,
            actual: 0,
            ..
        })
    ));
}

#[test]
fn destroy_volume_removes_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store
        .create_volume(VolumeId::new(8), "", VolumeOptions::default())
        .unwrap();
    store
        .put(VolumeId::new(8), Needle::new(NeedleId::new(1), vec![9; 16]))
        .unwrap();
    assert!(dir.path().join("8.dat").exists());

    store.destroy_volume(VolumeId::new(8)).unwrap();
    assert!(!dir.path().join("8.dat").exists());
    assert!(!dir.path().join("8.idx").exists());
    assert!(!store.has_volume(VolumeId::new(8)));
}
