use std::collections::HashMap;

/// Two-level user → device → value map.
///
/// The outer map owns the inner maps; callers only get keyed access, so the
/// nesting invariant (no empty inner maps, no aliasing) stays enforceable here.
#[derive(Debug, Clone)]
pub struct UserDeviceMap<T> {
    map: HashMap<String, HashMap<String, T>>,
}

impl<T> Default for UserDeviceMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UserDeviceMap<T> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn set(&mut self, user_id: &str, device_id: &str, value: T) {
        self.map
            .entry(user_id.to_string())
            .or_default()
            .insert(device_id.to_string(), value);
    }

    pub fn get(&self, user_id: &str, device_id: &str) -> Option<&T> {
        self.map.get(user_id).and_then(|devices| devices.get(device_id))
    }

    pub fn get_mut(&mut self, user_id: &str, device_id: &str) -> Option<&mut T> {
        self.map
            .get_mut(user_id)
            .and_then(|devices| devices.get_mut(device_id))
    }

    pub fn remove(&mut self, user_id: &str, device_id: &str) -> Option<T> {
        let devices = self.map.get_mut(user_id)?;
        let removed = devices.remove(device_id);
        if devices.is_empty() {
            self.map.remove(user_id);
        }
        removed
    }

    pub fn user_ids(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn device_ids(&self, user_id: &str) -> Vec<&String> {
        self.map
            .get(user_id)
            .map(|devices| devices.keys().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String, &T)> {
        self.map.iter().flat_map(|(user_id, devices)| {
            devices
                .iter()
                .map(move |(device_id, value)| (user_id, device_id, value))
        })
    }

    /// Total number of (user, device) entries.
    pub fn len(&self) -> usize {
        self.map.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
