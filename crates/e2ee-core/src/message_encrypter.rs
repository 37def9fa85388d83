use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::engine::CryptoEngine;
use crate::types::{Device, EncryptedMessage, OLM_ALGORITHM};
use crate::utils::canonical_json;
use crate::{Error, Result};

/// Turns a cleartext payload into a per-device ciphertext envelope using
/// already-established pairwise sessions. Does not establish sessions itself;
/// run the session establisher first.
pub struct MessageEncrypter {
    engine: Arc<dyn CryptoEngine>,
    own_user_id: String,
    own_device_id: String,
}

impl MessageEncrypter {
    pub fn new(
        engine: Arc<dyn CryptoEngine>,
        own_user_id: impl Into<String>,
        own_device_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            own_user_id: own_user_id.into(),
            own_device_id: own_device_id.into(),
        }
    }

    /// Encrypt `payload_fields` for each target device with a session.
    ///
    /// Devices without a session (or without identity key) contribute no
    /// ciphertext entry and cause no error; a missing own identity is fatal
    /// since there is no meaningful envelope without a sender identity.
    pub fn encrypt_message(
        &self,
        payload_fields: &Map<String, Value>,
        devices: &[Device],
    ) -> Result<EncryptedMessage> {
        let sender_key = self
            .engine
            .own_identity_key()
            .ok_or(Error::MissingSenderIdentity)?;
        let own_fingerprint_key = self
            .engine
            .own_fingerprint_key()
            .ok_or(Error::MissingSenderIdentity)?;

        let mut payload = payload_fields.clone();
        payload.insert("sender".to_string(), Value::String(self.own_user_id.clone()));
        payload.insert(
            "sender_device".to_string(),
            Value::String(self.own_device_id.clone()),
        );
        // Include the ed25519 key so the recipient knows which device this
        // came from; combined with the signed device key list fetched
        // independently, it proves the curve25519 and ed25519 keys belong to
        // the same device. The curve25519 key is already in the olm headers.
        payload.insert("keys".to_string(), json!({ "ed25519": own_fingerprint_key }));

        let mut cipher_text = BTreeMap::new();
        let mut seen_identity_keys = HashSet::new();

        for device in devices {
            let Some(identity_key) = device.identity_key.as_deref() else {
                debug!(
                    user_id = %device.user_id,
                    device_id = %device.device_id,
                    "device has no identity key, skipping"
                );
                continue;
            };

            if !seen_identity_keys.insert(identity_key.to_string()) {
                continue;
            }

            let Some(session_id) = self.engine.session_id_for(identity_key) else {
                debug!(identity_key, "no session for device, skipping");
                continue;
            };

            let Some(fingerprint_key) = device.fingerprint_key.as_deref() else {
                warn!(
                    user_id = %device.user_id,
                    device_id = %device.device_id,
                    "device has no fingerprint key, skipping"
                );
                continue;
            };

            debug!(session_id = %session_id, identity_key, "using session for device");

            // The recipient stamp pins each ciphertext to one device so a
            // payload cannot be relayed to a different recipient.
            let mut device_payload = payload.clone();
            device_payload.insert(
                "recipient".to_string(),
                Value::String(device.user_id.clone()),
            );
            device_payload.insert(
                "recipient_keys".to_string(),
                json!({ "ed25519": fingerprint_key }),
            );

            // Canonicalize after the recipient stamp: each device must see its
            // own canonical payload.
            let plaintext = canonical_json(&Value::Object(device_payload));

            match self.engine.encrypt(&session_id, &plaintext) {
                Ok(ciphertext) => {
                    cipher_text.insert(identity_key.to_string(), ciphertext);
                }
                Err(e) => {
                    warn!(
                        user_id = %device.user_id,
                        device_id = %device.device_id,
                        error = %e,
                        "encryption failed for device, skipping its entry"
                    );
                }
            }
        }

        Ok(EncryptedMessage {
            algorithm: OLM_ALGORITHM.to_string(),
            sender_key,
            cipher_text,
        })
    }
}
