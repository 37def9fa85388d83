use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::canonical_json;

pub const OLM_ALGORITHM: &str = "m.olm.v1.curve25519-aes-sha2";
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.aes-sha2";

/// Key algorithm requested when claiming one-time keys.
pub const ONE_TIME_KEY_ALGORITHM: &str = "signed_curve25519";

/// Retry budget for the one-time key claim round trip.
pub const ONE_TIME_KEY_CLAIM_ATTEMPTS: u32 = 3;

/// Default chunk size for the legacy store migration.
pub const MIGRATION_CHUNK_SIZE: usize = 500;

/// Local and cross-signing verification flags for a device.
///
/// A device counts as verified when either flag is set; message-sending policy
/// is decided elsewhere, these flags only feed it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustLevel {
    pub cross_signing_verified: bool,
    pub locally_verified: bool,
}

impl TrustLevel {
    pub fn new(cross_signing_verified: bool, locally_verified: bool) -> Self {
        Self {
            cross_signing_verified,
            locally_verified,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.cross_signing_verified || self.locally_verified
    }
}

/// A remote client as observed via the device-list protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub user_id: String,
    pub device_id: String,
    #[serde(default)]
    pub algorithms: Vec<String>,
    /// Curve25519 key used for session establishment and as the ciphertext map key.
    pub identity_key: Option<String>,
    /// Ed25519 key used to verify signed one-time keys and payloads.
    pub fingerprint_key: Option<String>,
    #[serde(default)]
    pub trust_level: TrustLevel,
}

impl Device {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        identity_key: Option<String>,
        fingerprint_key: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            algorithms: vec![OLM_ALGORITHM.to_string(), MEGOLM_ALGORITHM.to_string()],
            identity_key,
            fingerprint_key,
            trust_level: TrustLevel::default(),
        }
    }
}

/// A signed one-time key claimed from a remote device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimeKeyClaim {
    /// Full key id, `<algorithm>:<opaque id>`.
    pub key_id: String,
    pub key: String,
    /// `signatures[user_id]["ed25519:<device_id>"] = signature`
    #[serde(default)]
    pub signatures: BTreeMap<String, BTreeMap<String, String>>,
}

impl OneTimeKeyClaim {
    pub fn new(key_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key: key.into(),
            signatures: BTreeMap::new(),
        }
    }

    pub fn with_signature(
        mut self,
        user_id: impl Into<String>,
        key_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        self.signatures
            .entry(user_id.into())
            .or_default()
            .insert(key_name.into(), signature.into());
        self
    }

    /// Algorithm part of the key id.
    pub fn algorithm(&self) -> &str {
        self.key_id.split(':').next().unwrap_or_default()
    }

    pub fn signature_for(&self, user_id: &str, key_name: &str) -> Option<&str> {
        self.signatures
            .get(user_id)
            .and_then(|keys| keys.get(key_name))
            .map(String::as_str)
    }

    /// The canonical form the signing device signed: the key material without
    /// the signatures themselves.
    pub fn signable_json(&self) -> String {
        canonical_json(&serde_json::json!({ "key": self.key }))
    }
}

/// Outcome of session establishment for one device.
#[derive(Debug, Clone)]
pub struct OlmSessionResult {
    pub device: Device,
    pub session_id: Option<String>,
}

/// The `m.room.encrypted` content produced by the message encrypter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub algorithm: String,
    pub sender_key: String,
    #[serde(rename = "ciphertext")]
    pub cipher_text: BTreeMap<String, String>,
}

/// One group session export record, as found in key backups and key files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MegolmSessionData {
    pub algorithm: String,
    pub room_id: Option<String>,
    pub sender_key: Option<String>,
    pub session_id: Option<String>,
    pub session_key: Option<String>,
    #[serde(default)]
    pub sender_claimed_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub forwarding_curve25519_key_chain: Vec<String>,
    /// True when the record arrived via export/backup rather than directly.
    #[serde(default)]
    pub untrusted: bool,
}

impl MegolmSessionData {
    pub fn is_importable(&self) -> bool {
        self.sender_key.is_some() && self.session_id.is_some()
    }
}

/// Handle for an inbound group session materialized by the engine bulk import.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InboundGroupSessionHandle {
    pub room_id: String,
    pub sender_key: String,
    pub session_id: String,
}

/// Body of a cancellable outstanding room key request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeyRequestBody {
    pub algorithm: String,
    pub room_id: String,
    pub sender_key: String,
    pub session_id: String,
}

/// Summary returned by the group session importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportResult {
    pub total_offered: usize,
    pub total_imported: usize,
}
