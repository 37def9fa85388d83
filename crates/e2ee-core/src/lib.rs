//! Session and trust management core of an end-to-end encrypted messaging
//! client.
//!
//! The crate covers the protocol bookkeeping between a cryptographic engine
//! and the transport: establishing pairwise sessions against claimed one-time
//! keys, producing per-device encrypted envelopes, bulk-importing group
//! session material, reacting to device trust changes, and migrating secrets
//! out of a legacy store. The engine, the network and persistence are all
//! behind traits; see [`CryptoEngine`], [`ports`] and [`store`].

pub mod device_map;
pub mod engine;
pub mod error;
pub mod group_session_importer;
pub mod message_encrypter;
pub mod migration;
pub mod pickle;
pub mod ports;
pub mod session_establisher;
pub mod store;
pub mod trust_manager;
pub mod types;
pub mod utils;

pub use device_map::UserDeviceMap;
pub use engine::CryptoEngine;
pub use error::{Error, Result};
pub use group_session_importer::GroupSessionImporter;
pub use message_encrypter::MessageEncrypter;
pub use migration::{
    migrate_legacy_store, LegacyCryptoSource, MaterializedLegacyStore, MigrationBatch,
    MigrationConfig, MigrationProgress, MigrationSink, SilentMigrationProgress,
    StreamingLegacyStore,
};
pub use ports::{
    KeyClaimClient, KeyRequestManager, KeysBackup, NoProgress, ProgressListener, RoomDecryptor,
    RoomDecryptorProvider,
};
pub use session_establisher::SessionEstablisher;
pub use store::{DeviceStore, InMemoryDeviceStore};
pub use trust_manager::TrustManager;
pub use types::{
    Device, EncryptedMessage, ImportResult, InboundGroupSessionHandle, MegolmSessionData,
    OlmSessionResult, OneTimeKeyClaim, RoomKeyRequestBody, TrustLevel, MEGOLM_ALGORITHM,
    MIGRATION_CHUNK_SIZE, OLM_ALGORITHM, ONE_TIME_KEY_ALGORITHM, ONE_TIME_KEY_CLAIM_ATTEMPTS,
};
