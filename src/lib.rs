//! Server-side session storage with pluggable drivers.
//!
//! Satchel keeps per-client key/value state across HTTP requests. A
//! session is identified by an opaque 32-character token carried in a
//! cookie, persisted through a storage driver as an authenticated
//! payload, and protected against concurrent-request corruption by a
//! merge-on-save protocol: each request records its own writes and
//! deletes, and `save` replays only those deltas on top of the backend's
//! current record under a per-session lock. Two concurrent requests for
//! the same session that touch disjoint keys both survive.
//!
//! # Features
//!
//! - **Pluggable storage** - file and in-memory drivers included; any
//!   backend implementing [`SessionDriver`] plugs in
//! - **Authenticated payloads** - HMAC-SHA256 signed records via
//!   [`SignedCodec`]; tampered or expired payloads degrade to a fresh
//!   session instead of failing the request
//! - **Concurrency-safe saves** - per-session-ID locking with a
//!   reference-counted registry that stays bounded under churn
//! - **Flash data** - attributes that live for exactly one extra request
//! - **Background sweeping** - expired records are garbage-collected per
//!   driver on a configurable interval
//!
//! # Examples
//!
//! ```
//! use satchel::{MemoryDriver, SessionConfig, SessionManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), satchel::SessionError> {
//!     let config = SessionConfig::new("0123456789abcdef0123456789abcdef")?;
//!     let manager = SessionManager::new(config);
//!     manager.register_driver("default", Arc::new(MemoryDriver::new()))?;
//!
//!     // One request: load, mutate, save, release.
//!     let mut session = manager.build_session("session", None)?;
//!     session.start().await;
//!     session.put("user_id", 123)?;
//!     session.flash("notice", "profile saved")?;
//!     session.save().await?;
//!
//!     // The ID is the cookie value for the response.
//!     let cookie_value = session.id().to_string();
//!     manager.release_session(session);
//!
//!     // A later request for the same cookie sees the state.
//!     let mut session = manager.build_session("session", None)?;
//!     session.set_id(&cookie_value);
//!     session.start().await;
//!     assert_eq!(session.get::<i64>("user_id"), Some(123));
//!     manager.release_session(session);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## File-backed sessions
//!
//! ```no_run
//! use satchel::{SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), satchel::SessionError> {
//!     let config = SessionConfig::new("0123456789abcdef0123456789abcdef")?
//!         .with_storage_path("/var/lib/myapp/sessions");
//!
//!     // Registers a file driver under "default" and starts its sweeper.
//!     let manager = SessionManager::with_default_driver(config).await?;
//!
//!     let mut session = manager.build_session("session", None)?;
//!     session.start().await;
//!     session.put("theme", "dark")?;
//!     session.save().await?;
//!     manager.release_session(session);
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod file_driver;
pub mod manager;
pub mod memory_driver;
pub mod session;
pub mod traits;

pub use codec::SignedCodec;
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use file_driver::FileDriver;
pub use manager::{DEFAULT_DRIVER, SessionLockGuard, SessionManager};
pub use memory_driver::MemoryDriver;
pub use session::Session;
pub use traits::{Attributes, Codec, SessionDriver, generate_session_id, is_valid_session_id};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::codec::SignedCodec;
    pub use crate::config::SessionConfig;
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::file_driver::FileDriver;
    pub use crate::manager::{DEFAULT_DRIVER, SessionManager};
    pub use crate::memory_driver::MemoryDriver;
    pub use crate::session::Session;
    pub use crate::traits::{Attributes, Codec, SessionDriver, generate_session_id};
}
