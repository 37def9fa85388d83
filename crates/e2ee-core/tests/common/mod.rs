#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use e2ee_core::{
    CryptoEngine, Device, Error, InboundGroupSessionHandle, KeyClaimClient, KeyRequestManager,
    MegolmSessionData, MigrationBatch, MigrationSink, OneTimeKeyClaim, Result, RoomDecryptor,
    RoomDecryptorProvider, RoomKeyRequestBody, UserDeviceMap, MEGOLM_ALGORITHM,
};

pub const ALICE: &str = "@alice:example.org";
pub const BOB: &str = "@bob:example.org";

/// Scriptable engine double. Sessions are plain uuid strings keyed by the
/// peer identity key; ciphertexts carry their inputs so tests can check what
/// was encrypted with which session.
#[derive(Default)]
pub struct MockCryptoEngine {
    pub identity_key: Option<String>,
    pub fingerprint_key: Option<String>,
    pub sessions: Mutex<HashMap<String, String>>,
    /// Session ids for which `encrypt` fails.
    pub broken_sessions: Mutex<Vec<String>>,
    pub created_sessions: AtomicUsize,
    pub import_calls: AtomicUsize,
    pub last_import: Mutex<Vec<MegolmSessionData>>,
}

impl MockCryptoEngine {
    pub fn with_own_keys() -> Self {
        Self {
            identity_key: Some("own-curve-key".to_string()),
            fingerprint_key: Some("own-ed-key".to_string()),
            ..Self::default()
        }
    }

    pub fn add_session(&self, identity_key: &str, session_id: &str) {
        self.sessions
            .lock()
            .unwrap()
            .insert(identity_key.to_string(), session_id.to_string());
    }

    pub fn break_session(&self, session_id: &str) {
        self.broken_sessions
            .lock()
            .unwrap()
            .push(session_id.to_string());
    }
}

impl CryptoEngine for MockCryptoEngine {
    fn own_identity_key(&self) -> Option<String> {
        self.identity_key.clone()
    }

    fn own_fingerprint_key(&self) -> Option<String> {
        self.fingerprint_key.clone()
    }

    fn session_id_for(&self, identity_key: &str) -> Option<String> {
        self.sessions.lock().unwrap().get(identity_key).cloned()
    }

    fn create_outbound_session(&self, identity_key: &str, one_time_key: &str) -> Result<String> {
        if one_time_key == "poison" {
            return Err(Error::Session("unusable one-time key".to_string()));
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .unwrap()
            .insert(identity_key.to_string(), session_id.clone());
        self.created_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(session_id)
    }

    fn verify_signature(
        &self,
        _fingerprint_key: &str,
        _canonical_json: &str,
        signature: &str,
    ) -> Result<()> {
        if signature.starts_with("bad") {
            return Err(Error::Signature("signature mismatch".to_string()));
        }
        Ok(())
    }

    fn encrypt(&self, session_id: &str, plaintext: &str) -> Result<String> {
        if self
            .broken_sessions
            .lock()
            .unwrap()
            .iter()
            .any(|broken| broken == session_id)
        {
            return Err(Error::Encryption("session wedged".to_string()));
        }
        Ok(format!("{session_id}|{plaintext}"))
    }

    fn import_group_sessions(
        &self,
        sessions: &[MegolmSessionData],
    ) -> Result<Vec<InboundGroupSessionHandle>> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_import.lock().unwrap() = sessions.to_vec();
        Ok(sessions
            .iter()
            .filter(|record| record.algorithm == MEGOLM_ALGORITHM)
            .filter_map(|record| {
                Some(InboundGroupSessionHandle {
                    room_id: record.room_id.clone()?,
                    sender_key: record.sender_key.clone()?,
                    session_id: record.session_id.clone()?,
                })
            })
            .collect())
    }
}

/// Claim client double with a scripted response and an optional number of
/// leading failures.
pub struct MockClaimClient {
    response: UserDeviceMap<OneTimeKeyClaim>,
    failures_left: AtomicU32,
    pub calls: AtomicU32,
}

impl MockClaimClient {
    pub fn new(response: UserDeviceMap<OneTimeKeyClaim>) -> Self {
        Self {
            response,
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing_first(response: UserDeviceMap<OneTimeKeyClaim>, failures: u32) -> Self {
        Self {
            response,
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl KeyClaimClient for MockClaimClient {
    async fn claim_one_time_keys(
        &self,
        _requests: &UserDeviceMap<String>,
    ) -> Result<UserDeviceMap<OneTimeKeyClaim>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Storage("simulated network failure".to_string()));
        }
        Ok(self.response.clone())
    }
}

/// Signs a claim the way a remote device would, good enough for the mock
/// engine's verification rule.
pub fn signed_claim(key: &str, device: &Device) -> OneTimeKeyClaim {
    OneTimeKeyClaim::new(format!("signed_curve25519:{}", device.device_id), key).with_signature(
        device.user_id.clone(),
        format!("ed25519:{}", device.device_id),
        "valid-signature",
    )
}

#[derive(Default)]
pub struct RecordingDecryptor {
    pub notified: Mutex<Vec<(String, String, String)>>,
}

impl RoomDecryptor for RecordingDecryptor {
    fn on_new_session(&self, room_id: &str, sender_key: &str, session_id: &str) -> Result<()> {
        self.notified.lock().unwrap().push((
            room_id.to_string(),
            sender_key.to_string(),
            session_id.to_string(),
        ));
        Ok(())
    }
}

/// Provider that only knows the megolm algorithm, like the real room store.
#[derive(Default)]
pub struct RecordingDecryptorProvider {
    pub decryptor: Arc<RecordingDecryptor>,
}

impl RoomDecryptorProvider for RecordingDecryptorProvider {
    fn get_or_create(&self, _room_id: &str, algorithm: &str) -> Option<Arc<dyn RoomDecryptor>> {
        (algorithm == MEGOLM_ALGORITHM).then(|| self.decryptor.clone() as Arc<dyn RoomDecryptor>)
    }
}

#[derive(Default)]
pub struct RecordingKeyRequestManager {
    pub cancelled: Mutex<Vec<RoomKeyRequestBody>>,
}

impl KeyRequestManager for RecordingKeyRequestManager {
    fn cancel_room_key_request(&self, request: RoomKeyRequestBody) -> Result<()> {
        self.cancelled.lock().unwrap().push(request);
        Ok(())
    }
}

/// Migration sink that keeps every delivered batch.
#[derive(Default)]
pub struct CollectingSink {
    pub batches: Mutex<Vec<MigrationBatch>>,
}

impl MigrationSink for CollectingSink {
    fn import_batch(&self, batch: MigrationBatch) -> Result<()> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}
