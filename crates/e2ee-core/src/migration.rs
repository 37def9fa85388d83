//! One-shot transplant of all E2EE secret state from a legacy store into a
//! neutral, chunked transfer format consumable by a replacement crypto engine.
//!
//! The extraction never materializes the full dataset: tracked users,
//! pairwise sessions and inbound group sessions are streamed in fixed-size
//! chunks, each batch carrying a copy of the account material so a consumer
//! holding any single batch already has the account.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pickle::pickle;
use crate::types::MIGRATION_CHUNK_SIZE;
use crate::{Error, Result};

/// Number of signed one-time keys the legacy stack had uploaded before it
/// stopped counting; the replacement engine only needs a plausible floor.
const UPLOADED_SIGNED_KEY_COUNT: i64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickledAccount {
    pub user_id: String,
    pub device_id: String,
    pub pickle: String,
    /// Whether the device keys were ever uploaded.
    pub shared: bool,
    pub uploaded_signed_key_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickledSession {
    pub pickle: String,
    pub sender_key: String,
    pub created_using_fallback_key: bool,
    pub creation_time: String,
    pub last_use_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickledInboundGroupSession {
    pub pickle: String,
    pub sender_key: String,
    pub signing_key: BTreeMap<String, String>,
    pub room_id: String,
    pub forwarding_chains: Vec<String>,
    pub imported: bool,
    pub backed_up: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSigningKeyExport {
    pub master_key: Option<String>,
    pub self_signing_key: Option<String>,
    pub user_signing_key: Option<String>,
}

/// One independently-valid transfer unit. The account-bearing fields are
/// present in every batch; at most one of the chunk lists is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationBatch {
    pub account: PickledAccount,
    /// Hex encoding of the transport pickle key all secrets in this transfer
    /// are re-encrypted under. Never a long-term key.
    pub pickle_key: String,
    pub cross_signing: CrossSigningKeyExport,
    pub backup_version: Option<String>,
    pub backup_recovery_key: Option<String>,
    #[serde(default)]
    pub tracked_users: Vec<String>,
    #[serde(default)]
    pub sessions: Vec<PickledSession>,
    #[serde(default)]
    pub inbound_group_sessions: Vec<PickledInboundGroupSession>,
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub chunk_size: usize,
    /// Group sessions are the most expensive part; they can be skipped here
    /// and migrated lazily on demand instead.
    pub migrate_group_sessions: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: MIGRATION_CHUNK_SIZE,
            migrate_group_sessions: true,
        }
    }
}

/// Capability interface over a legacy store, small enough that both a
/// whole-record representation and a field-by-field walker can implement it.
/// Implementations surface their internal failures as [`Error::Extraction`].
pub trait LegacyCryptoSource {
    /// Whether the store holds a metadata record with account key material.
    fn has_existing_data(&self) -> Result<bool>;

    /// Extract the account/meta record as the base of every batch, with the
    /// account secret re-pickled under `pickle_key`.
    fn account(&self, pickle_key: &[u8; 32]) -> Result<MigrationBatch>;

    fn tracked_users_chunked(
        &self,
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<String>) -> Result<()>,
    ) -> Result<()>;

    fn sessions_chunked(
        &self,
        pickle_key: &[u8; 32],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<PickledSession>) -> Result<()>,
    ) -> Result<()>;

    fn group_sessions_chunked(
        &self,
        pickle_key: &[u8; 32],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<PickledInboundGroupSession>) -> Result<()>,
    ) -> Result<()>;
}

/// Destination of the transfer. Must tolerate the overlapping account data
/// repeated in every batch.
pub trait MigrationSink: Send + Sync {
    fn import_batch(&self, batch: MigrationBatch) -> Result<()>;
}

/// Fire-and-forget notification after each emitted batch.
pub trait MigrationProgress: Send + Sync {
    fn on_batch(&self, batches_emitted: usize);
}

impl MigrationProgress for crossbeam_channel::Sender<usize> {
    fn on_batch(&self, batches_emitted: usize) {
        let _ = self.send(batches_emitted);
    }
}

pub struct SilentMigrationProgress;

impl MigrationProgress for SilentMigrationProgress {
    fn on_batch(&self, _batches_emitted: usize) {}
}

/// Run the migration. An empty legacy store is "nothing to migrate", not an
/// error; batches already delivered before a failure are not retracted.
pub fn migrate_legacy_store(
    source: &dyn LegacyCryptoSource,
    sink: &dyn MigrationSink,
    config: &MigrationConfig,
    progress: &dyn MigrationProgress,
) -> Result<()> {
    if !source.has_existing_data()? {
        info!("legacy store has no crypto data, nothing to migrate");
        return Ok(());
    }

    // Transport key for this transfer only; it never leaves the migration.
    let pickle_key: [u8; 32] = rand::random();

    let base = source.account(&pickle_key)?;
    info!(
        user_id = %base.account.user_id,
        device_id = %base.account.device_id,
        has_msk = base.cross_signing.master_key.is_some(),
        has_backup_key = base.backup_recovery_key.is_some(),
        "migrating legacy crypto store"
    );

    let mut batches_emitted = 0usize;

    // Leading account-only batch: a consumer that sees nothing else already
    // holds the account.
    sink.import_batch(base.clone())?;
    batches_emitted += 1;
    progress.on_batch(batches_emitted);

    source.tracked_users_chunked(config.chunk_size, &mut |chunk| {
        debug!(users = chunk.len(), "migrating tracked user chunk");
        let mut batch = base.clone();
        batch.tracked_users = chunk;
        sink.import_batch(batch)?;
        batches_emitted += 1;
        progress.on_batch(batches_emitted);
        Ok(())
    })?;

    source.sessions_chunked(&pickle_key, config.chunk_size, &mut |chunk| {
        debug!(sessions = chunk.len(), "migrating pairwise session chunk");
        let mut batch = base.clone();
        batch.sessions = chunk;
        sink.import_batch(batch)?;
        batches_emitted += 1;
        progress.on_batch(batches_emitted);
        Ok(())
    })?;

    if config.migrate_group_sessions {
        source.group_sessions_chunked(&pickle_key, config.chunk_size, &mut |chunk| {
            debug!(sessions = chunk.len(), "migrating inbound group session chunk");
            let mut batch = base.clone();
            batch.inbound_group_sessions = chunk;
            sink.import_batch(batch)?;
            batches_emitted += 1;
            progress.on_batch(batches_emitted);
            Ok(())
        })?;
    }

    info!(batches_emitted, "legacy store migration finished");
    Ok(())
}

// ---------------------------------------------------------------------------
// Legacy record shapes shared by both source representations.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LegacyMetadata {
    pub user_id: String,
    pub device_id: String,
    /// Serialized account secret, absent when the store was never initialized.
    pub olm_account: Option<Vec<u8>>,
    pub master_key: Option<String>,
    pub self_signing_key: Option<String>,
    pub user_signing_key: Option<String>,
    pub backup_version: Option<String>,
    pub backup_recovery_key: Option<String>,
    pub device_keys_uploaded: bool,
}

#[derive(Debug, Clone)]
pub struct LegacyOlmSession {
    pub session_data: Vec<u8>,
    pub device_key: String,
    pub last_received_message_ts: u64,
}

#[derive(Debug, Clone)]
pub struct LegacyInboundGroupSession {
    pub session_data: Vec<u8>,
    pub room_id: Option<String>,
    pub sender_key: Option<String>,
    pub keys_claimed: BTreeMap<String, String>,
    pub forwarding_chain: Vec<String>,
    pub trusted: bool,
    pub backed_up: bool,
}

fn base_batch(metadata: &LegacyMetadata, pickle_key: &[u8; 32]) -> Result<MigrationBatch> {
    let olm_account = metadata
        .olm_account
        .as_deref()
        .ok_or_else(|| Error::Extraction("no account material in legacy store".to_string()))?;

    let account_pickle =
        pickle(pickle_key, olm_account).map_err(|e| Error::Extraction(e.to_string()))?;

    Ok(MigrationBatch {
        account: PickledAccount {
            user_id: metadata.user_id.clone(),
            device_id: metadata.device_id.clone(),
            pickle: account_pickle,
            shared: metadata.device_keys_uploaded,
            uploaded_signed_key_count: UPLOADED_SIGNED_KEY_COUNT,
        },
        pickle_key: hex::encode(pickle_key),
        cross_signing: CrossSigningKeyExport {
            master_key: metadata.master_key.clone(),
            self_signing_key: metadata.self_signing_key.clone(),
            user_signing_key: metadata.user_signing_key.clone(),
        },
        backup_version: metadata.backup_version.clone(),
        backup_recovery_key: metadata.backup_recovery_key.clone(),
        tracked_users: Vec::new(),
        sessions: Vec::new(),
        inbound_group_sessions: Vec::new(),
    })
}

fn pickled_session(session: &LegacyOlmSession, pickle_key: &[u8; 32]) -> Result<PickledSession> {
    let session_pickle =
        pickle(pickle_key, &session.session_data).map_err(|e| Error::Extraction(e.to_string()))?;
    Ok(PickledSession {
        pickle: session_pickle,
        sender_key: session.device_key.clone(),
        created_using_fallback_key: false,
        creation_time: session.last_received_message_ts.to_string(),
        last_use_time: session.last_received_message_ts.to_string(),
    })
}

fn pickled_group_session(
    session: &LegacyInboundGroupSession,
    pickle_key: &[u8; 32],
) -> Result<Option<PickledInboundGroupSession>> {
    let Some(sender_key) = session.sender_key.as_deref() else {
        warn!("failed to migrate group session, no sender key");
        return Ok(None);
    };
    let Some(room_id) = session.room_id.as_deref() else {
        warn!("failed to migrate group session, no room id");
        return Ok(None);
    };

    let session_pickle =
        pickle(pickle_key, &session.session_data).map_err(|e| Error::Extraction(e.to_string()))?;

    Ok(Some(PickledInboundGroupSession {
        pickle: session_pickle,
        sender_key: sender_key.to_string(),
        signing_key: session.keys_claimed.clone(),
        room_id: room_id.to_string(),
        forwarding_chains: session.forwarding_chain.clone(),
        imported: !session.trusted,
        backed_up: session.backed_up,
    }))
}

// ---------------------------------------------------------------------------
// Representation 1: whole records at hand.
// ---------------------------------------------------------------------------

/// Legacy store representation that can materialize whole records at once.
#[derive(Debug, Clone, Default)]
pub struct MaterializedLegacyStore {
    pub metadata: Option<LegacyMetadata>,
    pub tracked_users: Vec<String>,
    pub sessions: Vec<LegacyOlmSession>,
    pub group_sessions: Vec<LegacyInboundGroupSession>,
}

impl MaterializedLegacyStore {
    fn is_empty(&self) -> bool {
        self.metadata.is_none()
            && self.tracked_users.is_empty()
            && self.sessions.is_empty()
            && self.group_sessions.is_empty()
    }
}

impl LegacyCryptoSource for MaterializedLegacyStore {
    fn has_existing_data(&self) -> Result<bool> {
        Ok(!self.is_empty()
            && self
                .metadata
                .as_ref()
                .is_some_and(|metadata| metadata.olm_account.is_some()))
    }

    fn account(&self, pickle_key: &[u8; 32]) -> Result<MigrationBatch> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| Error::Extraction("no metadata record in legacy store".to_string()))?;
        base_batch(metadata, pickle_key)
    }

    fn tracked_users_chunked(
        &self,
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<String>) -> Result<()>,
    ) -> Result<()> {
        for chunk in self.tracked_users.chunks(chunk_size) {
            on_chunk(chunk.to_vec())?;
        }
        Ok(())
    }

    fn sessions_chunked(
        &self,
        pickle_key: &[u8; 32],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<PickledSession>) -> Result<()>,
    ) -> Result<()> {
        for chunk in self.sessions.chunks(chunk_size) {
            let export = chunk
                .iter()
                .map(|session| pickled_session(session, pickle_key))
                .collect::<Result<Vec<_>>>()?;
            on_chunk(export)?;
        }
        Ok(())
    }

    fn group_sessions_chunked(
        &self,
        pickle_key: &[u8; 32],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<PickledInboundGroupSession>) -> Result<()>,
    ) -> Result<()> {
        for chunk in self.group_sessions.chunks(chunk_size) {
            let mut export = Vec::with_capacity(chunk.len());
            for session in chunk {
                if let Some(pickled) = pickled_group_session(session, pickle_key)? {
                    export.push(pickled);
                }
            }
            on_chunk(export)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Representation 2: row walker, one record decoded at a time.
// ---------------------------------------------------------------------------

pub mod legacy_fields {
    pub const TABLE_METADATA: &str = "CryptoMetadata";
    pub const TABLE_USER: &str = "User";
    pub const TABLE_OLM_SESSION: &str = "OlmSession";
    pub const TABLE_INBOUND_GROUP_SESSION: &str = "OlmInboundGroupSession";

    pub const USER_ID: &str = "userId";
    pub const DEVICE_ID: &str = "deviceId";
    pub const OLM_ACCOUNT_DATA: &str = "olmAccountData";
    pub const X_SIGN_MASTER_PRIVATE_KEY: &str = "xSignMasterPrivateKey";
    pub const X_SIGN_SELF_SIGNED_PRIVATE_KEY: &str = "xSignSelfSignedPrivateKey";
    pub const X_SIGN_USER_PRIVATE_KEY: &str = "xSignUserPrivateKey";
    pub const BACKUP_VERSION: &str = "backupVersion";
    pub const KEY_BACKUP_RECOVERY_KEY: &str = "keyBackupRecoveryKey";
    pub const DEVICE_KEYS_SENT_TO_SERVER: &str = "deviceKeysSentToServer";

    pub const OLM_SESSION_DATA: &str = "olmSessionData";
    pub const DEVICE_KEY: &str = "deviceKey";
    pub const LAST_RECEIVED_MESSAGE_TS: &str = "lastReceivedMessageTs";

    pub const SERIALIZED_GROUP_SESSION: &str = "serializedOlmInboundGroupSession";
    pub const ROOM_ID: &str = "roomId";
    pub const SENDER_KEY: &str = "senderKey";
    pub const KEYS_CLAIMED_JSON: &str = "keysClaimedJson";
    pub const FORWARDING_CHAIN_JSON: &str = "forwardingCurve25519KeyChainJson";
    pub const TRUSTED: &str = "trusted";
    pub const BACKED_UP: &str = "backedUp";
}

/// One raw row of the legacy store: a table name plus stringly-typed fields
/// (binary values base64-encoded). This is what a store too large to
/// materialize hands out.
#[derive(Debug, Clone)]
pub struct LegacyRow {
    pub table: String,
    pub fields: BTreeMap<String, String>,
}

impl LegacyRow {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn get_required(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::Extraction(format!("row misses required field {name}")))
    }

    fn get_bool(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }

    fn get_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        use base64::Engine as _;
        match self.get(name) {
            None => Ok(None),
            Some(value) => base64::engine::general_purpose::STANDARD
                .decode(value)
                .map(Some)
                .map_err(|e| Error::Extraction(format!("undecodable field {name}: {e}"))),
        }
    }
}

/// Legacy store representation that must be walked row by row, without ever
/// materializing full objects.
#[derive(Debug, Clone, Default)]
pub struct StreamingLegacyStore {
    rows: Vec<LegacyRow>,
}

impl StreamingLegacyStore {
    pub fn new(rows: Vec<LegacyRow>) -> Self {
        Self { rows }
    }

    fn rows_of(&self, table: &'static str) -> impl Iterator<Item = &LegacyRow> {
        self.rows.iter().filter(move |row| row.table == table)
    }
}

impl LegacyCryptoSource for StreamingLegacyStore {
    fn has_existing_data(&self) -> Result<bool> {
        Ok(self
            .rows_of(legacy_fields::TABLE_METADATA)
            .any(|row| row.get(legacy_fields::OLM_ACCOUNT_DATA).is_some()))
    }

    fn account(&self, pickle_key: &[u8; 32]) -> Result<MigrationBatch> {
        let row = self
            .rows_of(legacy_fields::TABLE_METADATA)
            .next()
            .ok_or_else(|| Error::Extraction("no metadata record in legacy store".to_string()))?;

        let metadata = LegacyMetadata {
            user_id: row.get_required(legacy_fields::USER_ID)?.to_string(),
            device_id: row.get_required(legacy_fields::DEVICE_ID)?.to_string(),
            olm_account: row.get_bytes(legacy_fields::OLM_ACCOUNT_DATA)?,
            master_key: row
                .get(legacy_fields::X_SIGN_MASTER_PRIVATE_KEY)
                .map(str::to_string),
            self_signing_key: row
                .get(legacy_fields::X_SIGN_SELF_SIGNED_PRIVATE_KEY)
                .map(str::to_string),
            user_signing_key: row
                .get(legacy_fields::X_SIGN_USER_PRIVATE_KEY)
                .map(str::to_string),
            backup_version: row.get(legacy_fields::BACKUP_VERSION).map(str::to_string),
            backup_recovery_key: row
                .get(legacy_fields::KEY_BACKUP_RECOVERY_KEY)
                .map(str::to_string),
            device_keys_uploaded: row.get_bool(legacy_fields::DEVICE_KEYS_SENT_TO_SERVER),
        };

        base_batch(&metadata, pickle_key)
    }

    fn tracked_users_chunked(
        &self,
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<String>) -> Result<()>,
    ) -> Result<()> {
        let mut chunk: Vec<String> = Vec::new();
        for row in self.rows_of(legacy_fields::TABLE_USER) {
            chunk.push(row.get_required(legacy_fields::USER_ID)?.to_string());
            if chunk.len() >= chunk_size {
                on_chunk(std::mem::take(&mut chunk))?;
            }
        }
        if !chunk.is_empty() {
            on_chunk(chunk)?;
        }
        Ok(())
    }

    fn sessions_chunked(
        &self,
        pickle_key: &[u8; 32],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<PickledSession>) -> Result<()>,
    ) -> Result<()> {
        let mut chunk: Vec<PickledSession> = Vec::new();
        for row in self.rows_of(legacy_fields::TABLE_OLM_SESSION) {
            let session = LegacyOlmSession {
                session_data: row
                    .get_bytes(legacy_fields::OLM_SESSION_DATA)?
                    .ok_or_else(|| Error::Extraction("session row without data".to_string()))?,
                device_key: row.get_required(legacy_fields::DEVICE_KEY)?.to_string(),
                last_received_message_ts: row
                    .get(legacy_fields::LAST_RECEIVED_MESSAGE_TS)
                    .and_then(|ts| ts.parse().ok())
                    .unwrap_or_default(),
            };
            chunk.push(pickled_session(&session, pickle_key)?);
            if chunk.len() >= chunk_size {
                on_chunk(std::mem::take(&mut chunk))?;
            }
        }
        if !chunk.is_empty() {
            on_chunk(chunk)?;
        }
        Ok(())
    }

    fn group_sessions_chunked(
        &self,
        pickle_key: &[u8; 32],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<PickledInboundGroupSession>) -> Result<()>,
    ) -> Result<()> {
        let mut chunk: Vec<PickledInboundGroupSession> = Vec::new();
        for row in self.rows_of(legacy_fields::TABLE_INBOUND_GROUP_SESSION) {
            let keys_claimed = match row.get(legacy_fields::KEYS_CLAIMED_JSON) {
                Some(json) => serde_json::from_str(json)
                    .map_err(|e| Error::Extraction(format!("undecodable claimed keys: {e}")))?,
                None => BTreeMap::new(),
            };
            let forwarding_chain = match row.get(legacy_fields::FORWARDING_CHAIN_JSON) {
                Some(json) => serde_json::from_str(json)
                    .map_err(|e| Error::Extraction(format!("undecodable forwarding chain: {e}")))?,
                None => Vec::new(),
            };

            let session = LegacyInboundGroupSession {
                session_data: row
                    .get_bytes(legacy_fields::SERIALIZED_GROUP_SESSION)?
                    .ok_or_else(|| {
                        Error::Extraction("group session row without data".to_string())
                    })?,
                room_id: row.get(legacy_fields::ROOM_ID).map(str::to_string),
                sender_key: row.get(legacy_fields::SENDER_KEY).map(str::to_string),
                keys_claimed,
                forwarding_chain,
                trusted: row.get_bool(legacy_fields::TRUSTED),
                backed_up: row.get_bool(legacy_fields::BACKED_UP),
            };

            if let Some(pickled) = pickled_group_session(&session, pickle_key)? {
                chunk.push(pickled);
            }
            if chunk.len() >= chunk_size {
                on_chunk(std::mem::take(&mut chunk))?;
            }
        }
        if !chunk.is_empty() {
            on_chunk(chunk)?;
        }
        Ok(())
    }
}
