use std::sync::Arc;

use tracing::{debug, warn};

use crate::ports::KeysBackup;
use crate::store::DeviceStore;
use crate::types::TrustLevel;
use crate::Result;

/// Updates per-device verification state and triggers its security side
/// effects.
pub struct TrustManager {
    store: Arc<dyn DeviceStore>,
    backup: Arc<dyn KeysBackup>,
    own_user_id: String,
}

impl TrustManager {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        backup: Arc<dyn KeysBackup>,
        own_user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backup,
            own_user_id: own_user_id.into(),
        }
    }

    /// Set the trust level of a device. Unknown devices are a logged no-op.
    pub fn set_device_verification(
        &self,
        user_id: &str,
        device_id: &str,
        trust_level: TrustLevel,
    ) -> Result<()> {
        let Some(device) = self.store.device(user_id, device_id)? else {
            warn!(user_id, device_id, "cannot set verification of unknown device");
            return Ok(());
        };

        // Whether key backup is usable depends on a signature from a verified
        // device, so a verified-ness flip on one of our own devices can flip
        // backup eligibility. Evaluated independently of the persist below.
        if user_id == self.own_user_id
            && device.trust_level.is_verified() != trust_level.is_verified()
        {
            debug!(device_id, "own device verification flipped, re-checking key backup");
            self.backup.check_and_start();
        }

        if device.trust_level != trust_level {
            self.store.set_device_trust(user_id, device_id, trust_level)?;
        }

        Ok(())
    }
}
