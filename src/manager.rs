//! Session manager: driver registry, per-ID lock registry, session pool,
//! and sweep scheduling.

use crate::codec::SignedCodec;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::file_driver::FileDriver;
use crate::session::Session;
use crate::traits::{Codec, SessionDriver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Name of the fallback driver used when none is specified.
pub const DEFAULT_DRIVER: &str = "default";

/// Per-session-ID exclusive locks.
///
/// Entries are created on first acquisition and removed when the last
/// holder or waiter is gone, so the map's size tracks currently-contended
/// session IDs rather than every ID ever seen.
pub(crate) struct SessionLocks {
    entries: Mutex<HashMap<String, LockEntry>>,
}

struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    // holders plus queued waiters; the entry is removed at zero
    refs: usize,
}

impl SessionLocks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire the exclusive lock for a session ID.
    ///
    /// The refcount is bumped before awaiting the mutex, so the entry
    /// cannot be removed while this caller is queued behind the holder.
    pub(crate) async fn acquire(registry: &Arc<Self>, id: &str) -> SessionLockGuard {
        let mutex = {
            let mut entries = registry.entries.lock().unwrap();
            let entry = entries.entry(id.to_string()).or_insert_with(|| LockEntry {
                mutex: Arc::new(tokio::sync::Mutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.mutex)
        };

        let guard = mutex.lock_owned().await;

        SessionLockGuard {
            registry: Arc::clone(registry),
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    fn release(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(id);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Holds the exclusive lock for one session ID; released on drop.
pub struct SessionLockGuard {
    registry: Arc<SessionLocks>,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        // Release the mutex before the refcount, so a queued waiter takes
        // over the existing entry instead of racing its removal.
        drop(self.guard.take());
        self.registry.release(&self.id);
    }
}

/// Bounded reuse pool of session instances.
///
/// Instances are reset before being pooled, so a reused session carries
/// no attributes, deltas, or backend bindings from a previous request.
struct SessionPool {
    idle: Mutex<Vec<Session>>,
    max_idle: usize,
}

impl SessionPool {
    fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    fn acquire(&self) -> Session {
        self.idle.lock().unwrap().pop().unwrap_or_else(Session::new)
    }

    fn release(&self, mut session: Session) {
        session.reset();
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.max_idle {
            idle.push(session);
        }
    }
}

/// Owns the codec, the driver registry, the lock registry, and the
/// session pool, and schedules sweeps for every registered driver.
///
/// Created once at startup and shared for the life of the process.
///
/// # Examples
///
/// ```
/// use satchel::{MemoryDriver, SessionConfig, SessionManager};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), satchel::SessionError> {
///     let config = SessionConfig::new("0123456789abcdef0123456789abcdef")?;
///     let manager = SessionManager::new(config);
///     manager.register_driver("default", Arc::new(MemoryDriver::new()))?;
///
///     let mut session = manager.build_session("session", None)?;
///     session.start().await;
///     session.put("user_id", 123)?;
///     session.save().await?;
///     manager.release_session(session);
///     Ok(())
/// }
/// ```
pub struct SessionManager {
    config: SessionConfig,
    codec: Arc<dyn Codec>,
    drivers: RwLock<HashMap<String, Arc<dyn SessionDriver>>>,
    locks: Arc<SessionLocks>,
    pool: SessionPool,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager with the default signed codec and no drivers.
    pub fn new(config: SessionConfig) -> Self {
        let codec: Arc<dyn Codec> = Arc::new(SignedCodec::new(
            config.key.clone().into_bytes(),
            config.lifetime,
        ));
        Self::with_codec(config, codec)
    }

    /// Create a manager with a custom payload codec.
    pub fn with_codec(config: SessionConfig, codec: Arc<dyn Codec>) -> Self {
        Self {
            pool: SessionPool::new(config.max_idle_sessions),
            config,
            codec,
            drivers: RwLock::new(HashMap::new()),
            locks: SessionLocks::new(),
            sweepers: Mutex::new(Vec::new()),
        }
    }

    /// Create a manager with a file driver registered as `"default"`,
    /// rooted at the configured storage path.
    pub async fn with_default_driver(config: SessionConfig) -> SessionResult<Self> {
        let driver = FileDriver::new(config.storage_path.clone(), config.lifetime).await?;
        let manager = Self::new(config);
        manager.register_driver(DEFAULT_DRIVER, Arc::new(driver))?;
        Ok(manager)
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a storage driver and start its sweep schedule.
    ///
    /// Driver names are claimed permanently; re-registering one is an
    /// error. Must be called from within a Tokio runtime.
    pub fn register_driver(
        &self,
        name: &str,
        driver: Arc<dyn SessionDriver>,
    ) -> SessionResult<()> {
        {
            let mut drivers = self.drivers.write().unwrap();
            if drivers.contains_key(name) {
                return Err(SessionError::DriverAlreadyRegistered(name.to_string()));
            }
            drivers.insert(name.to_string(), Arc::clone(&driver));
        }

        info!(driver = name, "registered session driver");

        let handle = self.spawn_sweeper(name.to_string(), driver);
        self.sweepers.lock().unwrap().push(handle);
        Ok(())
    }

    /// Build a session bound to the named driver, or to `"default"` when
    /// no name is given.
    ///
    /// No ID is assigned and nothing is loaded; callers adopt a cookie
    /// value via [`Session::set_id`] and then call [`Session::start`].
    pub fn build_session(&self, name: &str, driver: Option<&str>) -> SessionResult<Session> {
        let driver = self.driver(driver)?;
        let mut session = self.pool.acquire();
        session.bind(name, driver, Arc::clone(&self.codec), Arc::clone(&self.locks));
        Ok(session)
    }

    /// Check out a bare session instance from the pool.
    pub fn acquire_session(&self) -> Session {
        self.pool.acquire()
    }

    /// Reset a session and return it to the pool.
    pub fn release_session(&self, session: Session) {
        self.pool.release(session);
    }

    /// Acquire the exclusive per-ID lock; dropping the guard releases it.
    pub async fn lock_session(&self, id: &str) -> SessionLockGuard {
        SessionLocks::acquire(&self.locks, id).await
    }

    /// Number of session IDs with a live lock entry (holders or waiters).
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Abort sweep schedules and close every registered driver.
    ///
    /// Close failures are logged, not propagated; shutdown always
    /// completes.
    pub async fn shutdown(&self) {
        for handle in self.sweepers.lock().unwrap().drain(..) {
            handle.abort();
        }

        let drivers: Vec<(String, Arc<dyn SessionDriver>)> = {
            let drivers = self.drivers.read().unwrap();
            drivers
                .iter()
                .map(|(name, driver)| (name.clone(), Arc::clone(driver)))
                .collect()
        };
        for (name, driver) in drivers {
            if let Err(err) = driver.close().await {
                warn!(driver = %name, error = %err, "session driver close failed");
            }
        }
    }

    fn driver(&self, name: Option<&str>) -> SessionResult<Arc<dyn SessionDriver>> {
        let drivers = self.drivers.read().unwrap();
        match name {
            Some(name) => drivers
                .get(name)
                .cloned()
                .ok_or_else(|| SessionError::DriverNotFound(name.to_string())),
            None => drivers
                .get(DEFAULT_DRIVER)
                .cloned()
                .ok_or(SessionError::DriverNotSpecified),
        }
    }

    fn spawn_sweeper(&self, name: String, driver: Arc<dyn SessionDriver>) -> JoinHandle<()> {
        let lifetime = self.config.lifetime;
        // tokio::time::interval panics on a zero period
        let gc_interval = self.config.gc_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gc_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately; the first sweep should
            // run one full interval after registration
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(err) = driver.sweep(lifetime).await {
                    warn!(driver = %name, error = %err, "session sweep failed");
                }
            }
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for handle in self.sweepers.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_driver::MemoryDriver;
    use crate::traits::generate_session_id;

    fn test_config() -> SessionConfig {
        SessionConfig::new("0123456789abcdef0123456789abcdef")
            .unwrap()
            .with_gc_interval(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_register_driver_rejects_duplicates() {
        let manager = SessionManager::new(test_config());

        manager
            .register_driver("mock", Arc::new(MemoryDriver::new()))
            .unwrap();
        let result = manager.register_driver("mock", Arc::new(MemoryDriver::new()));

        assert!(matches!(
            result,
            Err(SessionError::DriverAlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_build_session_unknown_driver() {
        let manager = SessionManager::new(test_config());

        let result = manager.build_session("session", Some("nope"));
        assert!(matches!(result, Err(SessionError::DriverNotFound(_))));
    }

    #[tokio::test]
    async fn test_build_session_without_default_driver() {
        let manager = SessionManager::new(test_config());

        let result = manager.build_session("session", None);
        assert!(matches!(result, Err(SessionError::DriverNotSpecified)));
    }

    #[tokio::test]
    async fn test_build_session_falls_back_to_default() {
        let manager = SessionManager::new(test_config());
        manager
            .register_driver(DEFAULT_DRIVER, Arc::new(MemoryDriver::new()))
            .unwrap();

        let session = manager.build_session("session", None).unwrap();
        assert_eq!(session.name(), "session");
        manager.release_session(session);
    }

    #[tokio::test]
    async fn test_released_session_is_reused_pristine() {
        let manager = SessionManager::new(test_config());
        manager
            .register_driver("mock", Arc::new(MemoryDriver::new()))
            .unwrap();

        let mut session = manager.build_session("session", Some("mock")).unwrap();
        session.set_id(&generate_session_id());
        session.put("leak", "nope").unwrap();
        manager.release_session(session);

        let reused = manager.build_session("session", Some("mock")).unwrap();
        assert!(reused.id().is_empty());
        assert!(reused.all().is_empty());
        assert!(!reused.is_dirty());
        manager.release_session(reused);
    }

    #[tokio::test]
    async fn test_lock_entries_are_removed_after_release() {
        let manager = SessionManager::new(test_config());
        let id = generate_session_id();

        let guard = manager.lock_session(&id).await;
        assert_eq!(manager.lock_count(), 1);

        drop(guard);
        assert_eq!(manager.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_entry_survives_queued_waiter() {
        let manager = Arc::new(SessionManager::new(test_config()));
        let id = generate_session_id();

        let guard = manager.lock_session(&id).await;

        let waiter = {
            let manager = Arc::clone(&manager);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = manager.lock_session(&id).await;
            })
        };

        // let the waiter queue up behind the held lock
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.lock_count(), 1);

        drop(guard);
        waiter.await.unwrap();

        assert_eq!(manager.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_locks_for_different_ids_are_independent() {
        let manager = SessionManager::new(test_config());

        let a = manager.lock_session(&generate_session_id()).await;
        let b = manager.lock_session(&generate_session_id()).await;

        assert_eq!(manager.lock_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(manager.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_sweepers() {
        let manager = SessionManager::new(test_config());
        manager
            .register_driver("mock", Arc::new(MemoryDriver::new()))
            .unwrap();

        manager.shutdown().await;
        assert!(manager.sweepers.lock().unwrap().is_empty());
    }
}
