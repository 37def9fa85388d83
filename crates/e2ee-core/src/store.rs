use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::device_map::UserDeviceMap;
use crate::types::{Device, InboundGroupSessionHandle, TrustLevel};
use crate::Result;

/// Persistent store for per-(user, device) state consumed and mutated by this
/// core. Devices are created by device-list sync and never deleted here.
pub trait DeviceStore: Send + Sync {
    fn device(&self, user_id: &str, device_id: &str) -> Result<Option<Device>>;

    fn user_devices(&self, user_id: &str) -> Result<Vec<Device>>;

    fn store_device(&self, device: Device) -> Result<()>;

    fn set_device_trust(
        &self,
        user_id: &str,
        device_id: &str,
        trust_level: TrustLevel,
    ) -> Result<()>;

    /// Flag inbound group sessions as present in the key backup. Only ever
    /// sets the flag, never clears it.
    fn mark_sessions_backed_up(&self, handles: &[InboundGroupSessionHandle]) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryDeviceStore {
    devices: Arc<Mutex<UserDeviceMap<Device>>>,
    backed_up: Arc<Mutex<BTreeSet<InboundGroupSessionHandle>>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_session_backed_up(&self, handle: &InboundGroupSessionHandle) -> bool {
        self.backed_up.lock().unwrap().contains(handle)
    }

    pub fn backed_up_sessions(&self) -> Vec<InboundGroupSessionHandle> {
        self.backed_up.lock().unwrap().iter().cloned().collect()
    }
}

impl DeviceStore for InMemoryDeviceStore {
    fn device(&self, user_id: &str, device_id: &str) -> Result<Option<Device>> {
        Ok(self.devices.lock().unwrap().get(user_id, device_id).cloned())
    }

    fn user_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        let devices = self.devices.lock().unwrap();
        Ok(devices
            .device_ids(user_id)
            .into_iter()
            .filter_map(|device_id| devices.get(user_id, device_id).cloned())
            .collect())
    }

    fn store_device(&self, device: Device) -> Result<()> {
        let user_id = device.user_id.clone();
        let device_id = device.device_id.clone();
        self.devices.lock().unwrap().set(&user_id, &device_id, device);
        Ok(())
    }

    fn set_device_trust(
        &self,
        user_id: &str,
        device_id: &str,
        trust_level: TrustLevel,
    ) -> Result<()> {
        if let Some(device) = self.devices.lock().unwrap().get_mut(user_id, device_id) {
            device.trust_level = trust_level;
        }
        Ok(())
    }

    fn mark_sessions_backed_up(&self, handles: &[InboundGroupSessionHandle]) -> Result<()> {
        let mut backed_up = self.backed_up.lock().unwrap();
        for handle in handles {
            backed_up.insert(handle.clone());
        }
        Ok(())
    }
}
