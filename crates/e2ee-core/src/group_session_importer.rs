use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::CryptoEngine;
use crate::ports::{KeyRequestManager, ProgressListener, RoomDecryptorProvider};
use crate::store::DeviceStore;
use crate::types::{ImportResult, MegolmSessionData, RoomKeyRequestBody};
use crate::Result;

/// Bulk-imports group-decryption session material and reconciles it with
/// pending decryption state and outstanding key requests.
pub struct GroupSessionImporter {
    engine: Arc<dyn CryptoEngine>,
    store: Arc<dyn DeviceStore>,
    decryptors: Arc<dyn RoomDecryptorProvider>,
    key_requests: Arc<dyn KeyRequestManager>,
}

impl GroupSessionImporter {
    pub fn new(
        engine: Arc<dyn CryptoEngine>,
        store: Arc<dyn DeviceStore>,
        decryptors: Arc<dyn RoomDecryptorProvider>,
        key_requests: Arc<dyn KeyRequestManager>,
    ) -> Self {
        Self {
            engine,
            store,
            decryptors,
            key_requests,
        }
    }

    /// Import a batch of group session export records.
    ///
    /// `from_backup` must be true only when the records come from a backup
    /// restore; it marks exactly the sessions materialized by this call as
    /// backed up, never anything else. Progress is reported as coalesced
    /// integer percentages, fire-and-forget.
    pub fn import_sessions(
        &self,
        records: &[MegolmSessionData],
        from_backup: bool,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResult> {
        let total_offered = records.len();
        progress.on_progress(0);

        if total_offered == 0 {
            return Ok(ImportResult {
                total_offered: 0,
                total_imported: 0,
            });
        }

        // One bulk call for the expensive cryptographic step; the per-record
        // loop below is bookkeeping only.
        let importable: Vec<MegolmSessionData> = records
            .iter()
            .filter(|record| record.is_importable())
            .cloned()
            .collect();
        let handles = self.engine.import_group_sessions(&importable)?;

        let mut total_imported = 0;
        let mut last_progress = 0;

        for (index, record) in records.iter().enumerate() {
            if self.process_record(record) {
                total_imported += 1;
            }

            let percent = (100.0 * (index + 1) as f64 / total_offered as f64).round() as u32;
            if percent != last_progress {
                last_progress = percent;
                progress.on_progress(percent);
            }
        }

        if from_backup {
            self.store.mark_sessions_backed_up(&handles)?;
        }

        debug!(total_offered, total_imported, "group session import done");

        Ok(ImportResult {
            total_offered,
            total_imported,
        })
    }

    /// Returns whether the record counts as imported.
    fn process_record(&self, record: &MegolmSessionData) -> bool {
        let (Some(sender_key), Some(session_id)) =
            (record.sender_key.as_deref(), record.session_id.as_deref())
        else {
            warn!("group session record misses sender key or session id, skipping");
            return false;
        };

        let Some(room_id) = record.room_id.as_deref() else {
            warn!(session_id, "group session record misses room id, skipping");
            return false;
        };

        let Some(decryptor) = self.decryptors.get_or_create(room_id, &record.algorithm) else {
            warn!(
                room_id,
                algorithm = %record.algorithm,
                "no room decryptor for algorithm, skipping record"
            );
            return false;
        };

        debug!(room_id, sender_key, session_id, "imported group session");

        // The material just arrived, so any outstanding request for it is moot.
        let request = RoomKeyRequestBody {
            algorithm: record.algorithm.clone(),
            room_id: room_id.to_string(),
            sender_key: sender_key.to_string(),
            session_id: session_id.to_string(),
        };
        if let Err(e) = self.key_requests.cancel_room_key_request(request) {
            warn!(error = %e, session_id, "failed to cancel outstanding room key request");
        }

        // Have another go at decrypting events sent with this session.
        if let Err(e) = decryptor.on_new_session(room_id, sender_key, session_id) {
            warn!(error = %e, room_id, session_id, "retrying pending decryptions failed");
        }

        true
    }
}
