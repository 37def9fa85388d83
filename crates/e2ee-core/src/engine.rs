//! Contract for the underlying cryptographic engine.
//!
//! The engine owns the actual key material and the primitive operations over
//! it; this core only does the protocol bookkeeping around it. At most one
//! *active* pairwise session per peer identity key is tracked here; the
//! engine may retain older sessions for decryption, but `session_id_for`
//! always answers with the session new encryption should target.

use crate::types::{InboundGroupSessionHandle, MegolmSessionData};
use crate::Result;

pub trait CryptoEngine: Send + Sync {
    /// Our own curve25519 identity key, if the account is initialized.
    fn own_identity_key(&self) -> Option<String>;

    /// Our own ed25519 fingerprint key, if the account is initialized.
    fn own_fingerprint_key(&self) -> Option<String>;

    /// Id of the active pairwise session for a peer identity key.
    fn session_id_for(&self, identity_key: &str) -> Option<String>;

    /// Derive a new pairwise session from a claimed one-time key. The new
    /// session becomes the active one for `identity_key`.
    fn create_outbound_session(&self, identity_key: &str, one_time_key: &str) -> Result<String>;

    /// Verify an ed25519 signature over a canonical JSON string. Errors on
    /// any mismatch; the caller decides whether that is fatal.
    fn verify_signature(
        &self,
        fingerprint_key: &str,
        canonical_json: &str,
        signature: &str,
    ) -> Result<()>;

    fn encrypt(&self, session_id: &str, plaintext: &str) -> Result<String>;

    /// Bulk-import inbound group session material. This is the expensive
    /// cryptographic step of a key import, so it is one call for the whole
    /// batch, not one per record. Returns handles for the sessions that were
    /// actually materialized.
    fn import_group_sessions(
        &self,
        sessions: &[MegolmSessionData],
    ) -> Result<Vec<InboundGroupSessionHandle>>;
}
