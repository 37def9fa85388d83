use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::device_map::UserDeviceMap;
use crate::engine::CryptoEngine;
use crate::ports::KeyClaimClient;
use crate::store::DeviceStore;
use crate::types::{
    Device, OlmSessionResult, OneTimeKeyClaim, ONE_TIME_KEY_ALGORITHM,
    ONE_TIME_KEY_CLAIM_ATTEMPTS,
};
use crate::{Error, Result};

/// Ensures a usable pairwise session exists for a set of target devices.
///
/// Sessions are created lazily and reused; re-establishment only happens when
/// `force` is set. Blocked devices are a caller concern, filter them out
/// before calling in here.
pub struct SessionEstablisher {
    engine: Arc<dyn CryptoEngine>,
    claim_client: Arc<dyn KeyClaimClient>,
    store: Arc<dyn DeviceStore>,
}

impl SessionEstablisher {
    pub fn new(
        engine: Arc<dyn CryptoEngine>,
        claim_client: Arc<dyn KeyClaimClient>,
        store: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            engine,
            claim_client,
            store,
        }
    }

    /// Ensure sessions for every known device of the given users, excluding
    /// our own device and devices that are already verified (sessions with
    /// verified devices are established lazily on demand).
    pub async fn ensure_sessions_for_users(
        &self,
        user_ids: &[String],
    ) -> Result<UserDeviceMap<OlmSessionResult>> {
        debug!(users = user_ids.len(), "ensuring sessions for users");

        let own_identity_key = self.engine.own_identity_key();
        let mut devices_by_user: HashMap<String, Vec<Device>> = HashMap::new();

        for user_id in user_ids {
            let targets = self
                .store
                .user_devices(user_id)?
                .into_iter()
                .filter(|device| {
                    if device.identity_key.is_some() && device.identity_key == own_identity_key {
                        // Don't bother setting up a session to ourselves.
                        return false;
                    }
                    !device.trust_level.is_verified()
                })
                .collect();
            devices_by_user.insert(user_id.clone(), targets);
        }

        self.ensure_sessions_for_devices(&devices_by_user, false).await
    }

    /// Ensure a pairwise session exists for every given device.
    ///
    /// The result maps every eligible target device to its device info and the
    /// session id, absent when no session could be established for it. With
    /// `force`, existing sessions are ignored and re-established.
    pub async fn ensure_sessions_for_devices(
        &self,
        devices_by_user: &HashMap<String, Vec<Device>>,
        force: bool,
    ) -> Result<UserDeviceMap<OlmSessionResult>> {
        let mut results: UserDeviceMap<OlmSessionResult> = UserDeviceMap::new();
        let mut devices_without_session: Vec<Device> = Vec::new();

        for (user_id, devices) in devices_by_user {
            for device in devices {
                let Some(identity_key) = device.identity_key.as_deref() else {
                    warn!(
                        user_id = %user_id,
                        device_id = %device.device_id,
                        "device has no identity key, cannot establish a session"
                    );
                    continue;
                };

                let session_id = if force {
                    None
                } else {
                    self.engine.session_id_for(identity_key)
                };

                if session_id.is_none() {
                    devices_without_session.push(device.clone());
                }

                results.set(
                    user_id,
                    &device.device_id,
                    OlmSessionResult {
                        device: device.clone(),
                        session_id,
                    },
                );
            }
        }

        if devices_without_session.is_empty() {
            return Ok(results);
        }

        let mut to_claim: UserDeviceMap<String> = UserDeviceMap::new();
        for device in &devices_without_session {
            to_claim.set(
                &device.user_id,
                &device.device_id,
                ONE_TIME_KEY_ALGORITHM.to_string(),
            );
        }

        // Known race: a concurrent caller can also observe "no session" for the
        // same device and claim its own key, leaving two valid sessions where
        // the most recently created one wins for new traffic. The peer can
        // decrypt either, so this self-heals; callers needing stronger
        // guarantees should serialize on a per-identity-key mutex.
        debug!(devices = to_claim.len(), "claiming one-time keys");

        let claimed = self.claim_one_time_keys_with_retry(&to_claim).await?;

        for device in &devices_without_session {
            let Some(claim) = claimed.get(&device.user_id, &device.device_id) else {
                debug!(
                    user_id = %device.user_id,
                    device_id = %device.device_id,
                    "no one-time key {} returned for device",
                    ONE_TIME_KEY_ALGORITHM
                );
                continue;
            };

            if claim.algorithm() != ONE_TIME_KEY_ALGORITHM {
                warn!(
                    user_id = %device.user_id,
                    device_id = %device.device_id,
                    algorithm = %claim.algorithm(),
                    "claimed key has wrong algorithm, discarding"
                );
                continue;
            }

            if let Some(session_id) = self.verify_key_and_start_session(claim, device) {
                if let Some(result) = results.get_mut(&device.user_id, &device.device_id) {
                    result.session_id = Some(session_id);
                }
            }
        }

        Ok(results)
    }

    async fn claim_one_time_keys_with_retry(
        &self,
        requests: &UserDeviceMap<String>,
    ) -> Result<UserDeviceMap<OneTimeKeyClaim>> {
        let mut last_error = String::new();

        for attempt in 1..=ONE_TIME_KEY_CLAIM_ATTEMPTS {
            match self.claim_client.claim_one_time_keys(requests).await {
                Ok(claimed) => return Ok(claimed),
                Err(e) => {
                    warn!(attempt, error = %e, "one-time key claim failed");
                    last_error = e.to_string();
                }
            }
        }

        // Keys claimed in earlier partial attempts are not rolled back; the
        // server reaps unused one-time keys.
        Err(Error::OneTimeKeyClaim {
            attempts: ONE_TIME_KEY_CLAIM_ATTEMPTS,
            reason: last_error,
        })
    }

    /// Verify the claimed key's signature against the device fingerprint key
    /// and derive a new session from it. Any failure leaves the device
    /// without a session, it is never escalated: one malicious or buggy
    /// device must not block the rest of the batch.
    fn verify_key_and_start_session(
        &self,
        claim: &OneTimeKeyClaim,
        device: &Device,
    ) -> Option<String> {
        let identity_key = device.identity_key.as_deref()?;

        let Some(fingerprint_key) = device.fingerprint_key.as_deref() else {
            warn!(
                user_id = %device.user_id,
                device_id = %device.device_id,
                "device has no fingerprint key, cannot verify one-time key"
            );
            return None;
        };

        let key_name = format!("ed25519:{}", device.device_id);
        let Some(signature) = claim.signature_for(&device.user_id, &key_name) else {
            warn!(
                user_id = %device.user_id,
                device_id = %device.device_id,
                "claimed one-time key carries no signature for the device"
            );
            return None;
        };

        if let Err(e) =
            self.engine
                .verify_signature(fingerprint_key, &claim.signable_json(), signature)
        {
            warn!(
                user_id = %device.user_id,
                device_id = %device.device_id,
                error = %e,
                "unable to verify signature on one-time key"
            );
            return None;
        }

        match self.engine.create_outbound_session(identity_key, &claim.key) {
            Ok(session_id) => {
                debug!(
                    user_id = %device.user_id,
                    device_id = %device.device_id,
                    session_id = %session_id,
                    "started new session"
                );
                Some(session_id)
            }
            Err(e) => {
                // Possibly a bad key.
                warn!(
                    user_id = %device.user_id,
                    device_id = %device.device_id,
                    error = %e,
                    "error starting session with device"
                );
                None
            }
        }
    }
}
