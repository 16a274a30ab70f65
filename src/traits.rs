//! Storage driver and codec contracts.

use crate::error::SessionResult;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// Session attribute set, as held in memory and as persisted.
pub type Attributes = HashMap<String, serde_json::Value>;

/// Exact length of a session identifier.
pub const SESSION_ID_LENGTH: usize = 32;

const SESSION_ID_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Durable key→payload store for session records.
///
/// Implementations must be safe to share across request tasks. Sessions
/// treat read failures as "no prior data"; write and destroy failures are
/// surfaced to the caller.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Read the payload stored for a session ID.
    ///
    /// Returns `Ok(None)` when no record exists, or when the record has
    /// already expired for drivers that can tell.
    async fn read(&self, id: &str) -> SessionResult<Option<String>>;

    /// Write the payload for a session ID, replacing any existing record.
    async fn write(&self, id: &str, payload: String) -> SessionResult<()>;

    /// Delete the record for a session ID. Deleting a missing record is
    /// not an error.
    async fn destroy(&self, id: &str) -> SessionResult<()>;

    /// Best-effort deletion of records older than `max_age`.
    async fn sweep(&self, max_age: Duration) -> SessionResult<()>;

    /// Release backend resources.
    async fn close(&self) -> SessionResult<()>;
}

/// Authenticated encoder/decoder for the persisted attribute set.
///
/// `name` is the session namespace and is bound into the authentication
/// context: a payload encoded under one name must not decode under
/// another. Decoding fails closed on tampering.
pub trait Codec: Send + Sync {
    /// Encode the attribute set to a storable payload.
    fn encode(&self, name: &str, attributes: &Attributes) -> SessionResult<String>;

    /// Decode and authenticate a stored payload.
    fn decode(&self, name: &str, payload: &str) -> SessionResult<Attributes>;
}

/// Generate a new session ID: 32 characters drawn from the URL-safe
/// alphanumeric alphabet.
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    (0..SESSION_ID_LENGTH)
        .map(|_| SESSION_ID_ALPHABET[rng.random_range(0..SESSION_ID_ALPHABET.len())] as char)
        .collect()
}

/// Check whether a token is acceptable as a session ID.
///
/// The ID doubles as a storage key (a file name for the file driver), so
/// a cookie value is only accepted with the exact expected length and
/// alphabet.
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LENGTH && id.bytes().all(|b| b.is_ascii_alphanumeric())
}
