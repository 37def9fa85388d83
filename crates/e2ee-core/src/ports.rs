//! Boundary contracts for the external collaborators of this core.
//!
//! Everything here is a narrow trait so tests (and alternative transports) can
//! substitute recording stubs without pulling in a scheduler or a network
//! stack.

use async_trait::async_trait;

use crate::device_map::UserDeviceMap;
use crate::types::{OneTimeKeyClaim, RoomKeyRequestBody};
use crate::Result;

/// Claims one one-time key per requested (user, device) pair.
///
/// Each call claims fresh keys; the caller owns retry policy.
#[async_trait]
pub trait KeyClaimClient: Send + Sync {
    /// `requests` maps (user, device) to the requested key algorithm.
    async fn claim_one_time_keys(
        &self,
        requests: &UserDeviceMap<String>,
    ) -> Result<UserDeviceMap<OneTimeKeyClaim>>;
}

/// A per-room decryptor capable of re-attempting decryption once a group
/// session becomes available.
pub trait RoomDecryptor: Send + Sync {
    fn on_new_session(&self, room_id: &str, sender_key: &str, session_id: &str) -> Result<()>;
}

pub trait RoomDecryptorProvider: Send + Sync {
    /// Returns `None` when no decryptor exists for the algorithm.
    fn get_or_create(&self, room_id: &str, algorithm: &str)
        -> Option<std::sync::Arc<dyn RoomDecryptor>>;
}

/// Manages outstanding room key requests.
pub trait KeyRequestManager: Send + Sync {
    fn cancel_room_key_request(&self, request: RoomKeyRequestBody) -> Result<()>;
}

/// Fire-and-forget trigger to re-evaluate whether key backup can (re)start.
pub trait KeysBackup: Send + Sync {
    fn check_and_start(&self);
}

/// Fire-and-forget progress notifications, 0–100.
///
/// Implementations must not block the producing loop; slow receivers should
/// buffer (the channel implementation below) or drop.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, percent: u32);
}

impl ProgressListener for crossbeam_channel::Sender<u32> {
    fn on_progress(&self, percent: u32) {
        let _ = self.send(percent);
    }
}

/// Listener for callers that do not care about progress.
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_progress(&self, _percent: u32) {}
}
