use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("One-time key claim failed after {attempts} attempts: {reason}")]
    OneTimeKeyClaim { attempts: u32, reason: String },

    #[error("Own device keys are not available")]
    MissingSenderIdentity,

    #[error("Signature verification failed: {0}")]
    Signature(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Migration extraction failed: {0}")]
    Extraction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
