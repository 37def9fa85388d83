mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{MockCryptoEngine, RecordingDecryptorProvider, RecordingKeyRequestManager};
use e2ee_core::{
    GroupSessionImporter, InMemoryDeviceStore, InboundGroupSessionHandle, MegolmSessionData,
    NoProgress, Result, MEGOLM_ALGORITHM,
};

fn record(index: usize) -> MegolmSessionData {
    MegolmSessionData {
        algorithm: MEGOLM_ALGORITHM.to_string(),
        room_id: Some(format!("!room{index}:example.org")),
        sender_key: Some(format!("sender-{index}")),
        session_id: Some(format!("session-{index}")),
        session_key: Some(format!("session-key-{index}")),
        sender_claimed_keys: Default::default(),
        forwarding_curve25519_key_chain: Vec::new(),
        untrusted: true,
    }
}

struct Fixture {
    engine: Arc<MockCryptoEngine>,
    store: Arc<InMemoryDeviceStore>,
    decryptors: Arc<RecordingDecryptorProvider>,
    key_requests: Arc<RecordingKeyRequestManager>,
    importer: GroupSessionImporter,
}

fn fixture() -> Fixture {
    let engine = Arc::new(MockCryptoEngine::with_own_keys());
    let store = Arc::new(InMemoryDeviceStore::new());
    let decryptors = Arc::new(RecordingDecryptorProvider::default());
    let key_requests = Arc::new(RecordingKeyRequestManager::default());
    let importer = GroupSessionImporter::new(
        engine.clone(),
        store.clone(),
        decryptors.clone(),
        key_requests.clone(),
    );
    Fixture {
        engine,
        store,
        decryptors,
        key_requests,
        importer,
    }
}

#[test]
fn test_empty_import_reports_zero_and_touches_nothing() -> Result<()> {
    let f = fixture();
    let (tx, rx) = crossbeam_channel::unbounded();

    let result = f.importer.import_sessions(&[], false, &tx)?;

    assert_eq!(result.total_offered, 0);
    assert_eq!(result.total_imported, 0);
    assert_eq!(f.engine.import_calls.load(Ordering::SeqCst), 0);
    let progress: Vec<u32> = rx.try_iter().collect();
    assert_eq!(progress, vec![0]);
    Ok(())
}

#[test]
fn test_offered_versus_imported_counts() -> Result<()> {
    let f = fixture();

    let mut unknown_algorithm = record(1);
    unknown_algorithm.algorithm = "m.megolm.v2".to_string();
    let mut missing_session_id = record(2);
    missing_session_id.session_id = None;
    let mut missing_room = record(3);
    missing_room.room_id = None;
    let good = record(4);

    let result = f.importer.import_sessions(
        &[unknown_algorithm, missing_session_id, missing_room, good],
        false,
        &NoProgress,
    )?;

    assert_eq!(result.total_offered, 4);
    assert_eq!(result.total_imported, 1);
    Ok(())
}

#[test]
fn test_import_cancels_requests_and_notifies_decryptor() -> Result<()> {
    let f = fixture();

    let result = f
        .importer
        .import_sessions(&[record(1), record(2)], false, &NoProgress)?;
    assert_eq!(result.total_imported, 2);

    let cancelled = f.key_requests.cancelled.lock().unwrap();
    assert_eq!(cancelled.len(), 2);
    assert_eq!(cancelled[0].algorithm, MEGOLM_ALGORITHM);
    assert_eq!(cancelled[0].room_id, "!room1:example.org");
    assert_eq!(cancelled[0].sender_key, "sender-1");
    assert_eq!(cancelled[0].session_id, "session-1");

    let notified = f.decryptors.decryptor.notified.lock().unwrap();
    assert_eq!(notified.len(), 2);
    assert_eq!(
        notified[1],
        (
            "!room2:example.org".to_string(),
            "sender-2".to_string(),
            "session-2".to_string()
        )
    );
    Ok(())
}

#[test]
fn test_engine_gets_one_bulk_call_with_importable_records_only() -> Result<()> {
    let f = fixture();

    let mut not_importable = record(1);
    not_importable.sender_key = None;

    f.importer
        .import_sessions(&[not_importable, record(2), record(3)], false, &NoProgress)?;

    assert_eq!(f.engine.import_calls.load(Ordering::SeqCst), 1);
    let bulk = f.engine.last_import.lock().unwrap();
    assert_eq!(bulk.len(), 2);
    assert_eq!(bulk[0].session_id.as_deref(), Some("session-2"));
    Ok(())
}

#[test]
fn test_from_backup_marks_exactly_this_batch() -> Result<()> {
    let f = fixture();

    f.importer
        .import_sessions(&[record(1)], true, &NoProgress)?;

    let marked = f.store.backed_up_sessions();
    assert_eq!(
        marked,
        vec![InboundGroupSessionHandle {
            room_id: "!room1:example.org".to_string(),
            sender_key: "sender-1".to_string(),
            session_id: "session-1".to_string(),
        }]
    );

    // A later non-backup import adds no marks.
    f.importer
        .import_sessions(&[record(2)], false, &NoProgress)?;
    assert_eq!(f.store.backed_up_sessions().len(), 1);
    Ok(())
}

#[test]
fn test_progress_is_monotone_without_duplicates() -> Result<()> {
    let f = fixture();
    let (tx, rx) = crossbeam_channel::unbounded();

    let records: Vec<MegolmSessionData> = (0..7).map(record).collect();
    f.importer.import_sessions(&records, false, &tx)?;

    let progress: Vec<u32> = rx.try_iter().collect();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    for pair in progress.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    // 7 records: every step changes the integer percentage.
    assert_eq!(progress, vec![0, 14, 29, 43, 57, 71, 86, 100]);
    Ok(())
}
