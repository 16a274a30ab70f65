//! Session lifecycle: attribute access, request deltas, flash data, and
//! the merge-on-save persistence protocol.

use crate::error::{SessionError, SessionResult};
use crate::manager::SessionLocks;
use crate::traits::{Attributes, Codec, SessionDriver, generate_session_id, is_valid_session_id};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Reserved attribute key listing flash keys visible through the next
/// request.
const FLASH_NEW_KEY: &str = "_flash.new";

/// Reserved attribute key listing flash keys visible in the current
/// request only.
const FLASH_OLD_KEY: &str = "_flash.old";

/// One client session, borrowed from the manager's pool for the duration
/// of a request.
///
/// Mutations are tracked as request-scoped deltas (`puts` and `forgets`)
/// on top of the loaded attribute set. [`Session::save`] re-reads the
/// backend under a per-ID lock and replays only this request's deltas, so
/// concurrent requests for the same session that touch disjoint keys both
/// survive.
pub struct Session {
    id: String,
    name: String,
    attributes: Attributes,
    puts: HashMap<String, Value>,
    forgets: HashSet<String>,
    started: bool,
    dirty: bool,
    flushed: bool,
    driver: Option<Arc<dyn SessionDriver>>,
    codec: Option<Arc<dyn Codec>>,
    locks: Option<Arc<SessionLocks>>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            attributes: Attributes::new(),
            puts: HashMap::new(),
            forgets: HashSet::new(),
            started: false,
            dirty: false,
            flushed: false,
            driver: None,
            codec: None,
            locks: None,
        }
    }

    pub(crate) fn bind(
        &mut self,
        name: &str,
        driver: Arc<dyn SessionDriver>,
        codec: Arc<dyn Codec>,
        locks: Arc<SessionLocks>,
    ) {
        self.name = name.to_string();
        self.driver = Some(driver);
        self.codec = Some(codec);
        self.locks = Some(locks);
    }

    // ========== Identity ==========

    /// The session ID; doubles as the cookie value and the storage key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adopt a session ID, typically from a request cookie.
    ///
    /// A token that fails validation is replaced with a freshly generated
    /// ID, so tampered cookie values never reach the storage backend.
    pub fn set_id(&mut self, id: &str) {
        self.id = if is_valid_session_id(id) {
            id.to_string()
        } else {
            generate_session_id()
        };
    }

    /// The session name (namespace / cookie name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the session name.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Whether `start` has been called since the last save.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the session has unpersisted mutations.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ========== Attribute access ==========

    /// Get a typed attribute value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Get a typed attribute value, or a default when absent.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get an attribute's raw value.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// The full attribute set.
    pub fn all(&self) -> &Attributes {
        &self.attributes
    }

    /// The subset of attributes under the given keys.
    pub fn only(&self, keys: &[&str]) -> Attributes {
        keys.iter()
            .filter_map(|key| {
                self.attributes
                    .get(*key)
                    .map(|value| ((*key).to_string(), value.clone()))
            })
            .collect()
    }

    /// Whether the key is present with a non-null value.
    pub fn has(&self, key: &str) -> bool {
        self.attributes.get(key).is_some_and(|value| !value.is_null())
    }

    /// Whether the key is present at all, null included.
    pub fn exists(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Negation of [`Session::exists`].
    pub fn missing(&self, key: &str) -> bool {
        !self.exists(key)
    }

    // ========== Mutation ==========

    /// Set an attribute, recording it in this request's write delta.
    pub fn put<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        let value =
            serde_json::to_value(value).map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.put_value(key, value);
        Ok(())
    }

    /// Remove attributes, recording each key in this request's delete
    /// delta.
    pub fn forget(&mut self, keys: &[&str]) {
        for key in keys {
            self.attributes.remove(*key);
            self.puts.remove(*key);
            self.forgets.insert((*key).to_string());
        }
        self.dirty = true;
    }

    /// Remove and return an attribute's raw value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.puts.remove(key);
        self.forgets.insert(key.to_string());
        self.dirty = true;
        self.attributes.remove(key)
    }

    /// Get and remove a typed attribute value.
    pub fn pull<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        self.remove(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Get and remove a typed attribute value, or a default when absent.
    pub fn pull_or<T: DeserializeOwned>(&mut self, key: &str, default: T) -> T {
        self.pull(key).unwrap_or(default)
    }

    /// Clear all attributes and deltas; the next save is a full overwrite
    /// instead of a merge.
    pub fn flush(&mut self) {
        self.attributes.clear();
        self.puts.clear();
        self.forgets.clear();
        self.flushed = true;
        self.dirty = true;
    }

    fn put_value(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value.clone());
        self.puts.insert(key.to_string(), value);
        self.forgets.remove(key);
        self.dirty = true;
    }

    // ========== Flash data ==========

    /// Set an attribute that stays visible through the next request.
    pub fn flash<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        self.put(key, value)?;

        let mut fresh = self.flash_keys(FLASH_NEW_KEY);
        fresh.push(key.to_string());
        self.put_flash_keys(FLASH_NEW_KEY, fresh);

        self.remove_from_old_flash_data(&[key.to_string()]);
        Ok(())
    }

    /// Set an attribute visible in the current request only.
    pub fn now<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        self.put(key, value)?;

        let mut aged = self.flash_keys(FLASH_OLD_KEY);
        aged.push(key.to_string());
        self.put_flash_keys(FLASH_OLD_KEY, aged);
        Ok(())
    }

    /// Keep every current flash key alive for one more request.
    pub fn reflash(&mut self) {
        let aged = self.flash_keys(FLASH_OLD_KEY);
        self.merge_new_flashes(&aged);
        self.put_flash_keys(FLASH_OLD_KEY, Vec::new());
    }

    /// Keep the given flash keys alive for one more request.
    pub fn keep(&mut self, keys: &[&str]) {
        let keys: Vec<String> = keys.iter().map(|key| (*key).to_string()).collect();
        self.merge_new_flashes(&keys);
        self.remove_from_old_flash_data(&keys);
    }

    /// Expire the current request's flash keys and age the next-request
    /// set into their place. Runs at the start of every save.
    fn age_flash_data(&mut self) {
        let aged = self.flash_keys(FLASH_OLD_KEY);
        let fresh = self.flash_keys(FLASH_NEW_KEY);

        if aged.is_empty() && fresh.is_empty() {
            return;
        }

        if !aged.is_empty() {
            let keys: Vec<&str> = aged.iter().map(String::as_str).collect();
            self.forget(&keys);
        }

        self.put_flash_keys(FLASH_OLD_KEY, fresh);
        self.put_flash_keys(FLASH_NEW_KEY, Vec::new());
    }

    fn merge_new_flashes(&mut self, keys: &[String]) {
        let mut fresh = self.flash_keys(FLASH_NEW_KEY);
        for key in keys {
            if !fresh.contains(key) {
                fresh.push(key.clone());
            }
        }
        self.put_flash_keys(FLASH_NEW_KEY, fresh);
    }

    fn remove_from_old_flash_data(&mut self, keys: &[String]) {
        let mut aged = self.flash_keys(FLASH_OLD_KEY);
        aged.retain(|existing| !keys.contains(existing));
        self.put_flash_keys(FLASH_OLD_KEY, aged);
    }

    fn flash_keys(&self, bucket: &str) -> Vec<String> {
        match self.attributes.get(bucket) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn put_flash_keys(&mut self, bucket: &str, keys: Vec<String>) {
        self.put_value(
            bucket,
            Value::Array(keys.into_iter().map(Value::String).collect()),
        );
    }

    // ========== Lifecycle ==========

    /// Load the session's persisted attributes and mark it started.
    ///
    /// A missing, unreadable, or undecodable record yields an empty
    /// session; corruption never fails the request. Deltas buffered
    /// before `start` survive it.
    pub async fn start(&mut self) -> bool {
        if self.id.is_empty() {
            self.id = generate_session_id();
        }
        self.load().await;
        self.started = true;
        self.started
    }

    /// Persist this request's changes.
    ///
    /// Flash data is aged first; an untouched session is then a no-op.
    /// Otherwise, under the per-ID lock, the backend's current record is
    /// re-read and this request's deltas are replayed on top, so keys this
    /// request never touched keep whatever concurrent requests wrote.
    /// After a flush or regenerate the in-memory attribute set is written
    /// as-is. On failure `dirty` stays set, so the save may be retried.
    pub async fn save(&mut self) -> SessionResult<()> {
        self.age_flash_data();

        if !self.dirty {
            return Ok(());
        }

        // Held for the read-merge-write cycle only, not the whole request.
        let _lock = match &self.locks {
            Some(locks) => Some(SessionLocks::acquire(locks, &self.id).await),
            None => None,
        };

        let finalized = if self.flushed {
            self.attributes.clone()
        } else {
            let mut latest = self.read_from_driver().await.unwrap_or_default();
            for key in &self.forgets {
                latest.remove(key);
            }
            for (key, value) in &self.puts {
                latest.insert(key.clone(), value.clone());
            }
            latest
        };

        let payload = self.codec()?.encode(&self.name, &finalized)?;
        self.driver()?.write(&self.id, payload).await?;

        self.dirty = false;
        self.started = false;
        Ok(())
    }

    /// Assign a new session ID, optionally destroying the record stored
    /// under the old one.
    pub async fn regenerate(&mut self, destroy: bool) -> SessionResult<()> {
        self.migrate(destroy).await
    }

    /// Clear all attributes and rotate the session ID, destroying the old
    /// record.
    pub async fn invalidate(&mut self) -> SessionResult<()> {
        self.flush();
        self.migrate(true).await
    }

    async fn migrate(&mut self, destroy: bool) -> SessionResult<()> {
        if destroy {
            self.driver()?.destroy(&self.id).await?;
        }

        // The ID changed, so the next save overwrites instead of merging.
        self.id = generate_session_id();
        self.dirty = true;
        self.flushed = true;
        Ok(())
    }

    /// Restore pristine pool state; invoked by the manager on release.
    pub(crate) fn reset(&mut self) {
        self.id.clear();
        self.name.clear();
        self.attributes.clear();
        self.puts.clear();
        self.forgets.clear();
        self.started = false;
        self.dirty = false;
        self.flushed = false;
        self.driver = None;
        self.codec = None;
        self.locks = None;
    }

    async fn load(&mut self) {
        if let Some(data) = self.read_from_driver().await {
            self.attributes.extend(data);
        }
    }

    async fn read_from_driver(&self) -> Option<Attributes> {
        let driver = self.driver.as_ref()?;
        let codec = self.codec.as_ref()?;

        let payload = driver.read(&self.id).await.ok().flatten()?;

        match codec.decode(&self.name, &payload) {
            Ok(attributes) => Some(attributes),
            Err(err) => {
                debug!(id = %self.id, error = %err, "discarding undecodable session payload");
                None
            }
        }
    }

    fn driver(&self) -> SessionResult<&Arc<dyn SessionDriver>> {
        self.driver.as_ref().ok_or(SessionError::DriverNotSpecified)
    }

    fn codec(&self) -> SessionResult<&Arc<dyn Codec>> {
        self.codec
            .as_ref()
            .ok_or_else(|| SessionError::Codec("no codec bound".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SESSION_ID_LENGTH;
    use serde_json::json;

    #[test]
    fn test_put_get_round_trip() {
        let mut session = Session::new();

        session.put("user_id", 123).unwrap();
        session.put("name", "alice").unwrap();

        assert_eq!(session.get::<i64>("user_id"), Some(123));
        assert_eq!(session.get::<String>("name"), Some("alice".to_string()));
        assert_eq!(session.get::<i64>("missing"), None);
        assert_eq!(session.get_or("missing", 7), 7);
        assert!(session.is_dirty());
    }

    #[test]
    fn test_has_exists_missing() {
        let mut session = Session::new();
        session.put("set", 1).unwrap();
        session.put("null", Value::Null).unwrap();

        assert!(session.has("set"));
        assert!(!session.has("null"));
        assert!(session.exists("null"));
        assert!(session.missing("absent"));
    }

    #[test]
    fn test_only_filters_keys() {
        let mut session = Session::new();
        session.put("a", 1).unwrap();
        session.put("b", 2).unwrap();

        let subset = session.only(&["a", "absent"]);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_put_clears_pending_forget() {
        let mut session = Session::new();

        session.forget(&["key"]);
        assert!(session.forgets.contains("key"));

        session.put("key", 1).unwrap();
        assert!(!session.forgets.contains("key"));
        assert!(session.puts.contains_key("key"));
    }

    #[test]
    fn test_forget_clears_pending_put() {
        let mut session = Session::new();

        session.put("key", 1).unwrap();
        session.forget(&["key"]);

        assert!(!session.puts.contains_key("key"));
        assert!(session.forgets.contains("key"));
        assert!(session.missing("key"));
    }

    #[test]
    fn test_pull_removes_and_returns() {
        let mut session = Session::new();
        session.put("key", "value").unwrap();

        assert_eq!(session.pull::<String>("key"), Some("value".to_string()));
        assert!(session.missing("key"));
        assert!(session.forgets.contains("key"));
        assert_eq!(session.pull_or("key", 9), 9);
    }

    #[test]
    fn test_flush_clears_everything() {
        let mut session = Session::new();
        session.put("a", 1).unwrap();
        session.forget(&["b"]);

        session.flush();

        assert!(session.all().is_empty());
        assert!(session.puts.is_empty());
        assert!(session.forgets.is_empty());
        assert!(session.flushed);
        assert!(session.dirty);
    }

    #[test]
    fn test_set_id_accepts_valid_token() {
        let mut session = Session::new();
        let id = generate_session_id();

        session.set_id(&id);
        assert_eq!(session.id(), id);
    }

    #[test]
    fn test_set_id_replaces_malformed_token() {
        let mut session = Session::new();
        let too_long = "x".repeat(SESSION_ID_LENGTH + 1);

        for bad in ["", "short", too_long.as_str(), "../../../../etc/passwd0123456789"] {
            session.set_id(bad);
            assert_ne!(session.id(), bad);
            assert!(is_valid_session_id(session.id()));
        }
    }

    #[test]
    fn test_flash_marks_next_request() {
        let mut session = Session::new();
        session.flash("notice", "saved").unwrap();

        assert!(session.has("notice"));
        assert_eq!(session.flash_keys(FLASH_NEW_KEY), vec!["notice"]);
        assert!(session.flash_keys(FLASH_OLD_KEY).is_empty());
    }

    #[test]
    fn test_now_marks_current_request() {
        let mut session = Session::new();
        session.now("notice", "transient").unwrap();

        assert!(session.has("notice"));
        assert_eq!(session.flash_keys(FLASH_OLD_KEY), vec!["notice"]);
    }

    #[test]
    fn test_age_expires_old_and_shifts_new() {
        let mut session = Session::new();
        session.now("gone", 1).unwrap();
        session.flash("kept", 2).unwrap();

        session.age_flash_data();

        assert!(session.missing("gone"));
        assert!(session.has("kept"));
        assert_eq!(session.flash_keys(FLASH_OLD_KEY), vec!["kept"]);
        assert!(session.flash_keys(FLASH_NEW_KEY).is_empty());

        session.age_flash_data();
        assert!(session.missing("kept"));
    }

    #[test]
    fn test_keep_rescues_aged_flash() {
        let mut session = Session::new();
        session.flash("notice", 1).unwrap();
        session.age_flash_data();

        session.keep(&["notice"]);
        session.age_flash_data();

        assert!(session.has("notice"));
    }

    #[test]
    fn test_reflash_rescues_all_aged_flash() {
        let mut session = Session::new();
        session.flash("a", 1).unwrap();
        session.flash("b", 2).unwrap();
        session.age_flash_data();

        session.reflash();
        session.age_flash_data();

        assert!(session.has("a"));
        assert!(session.has("b"));
    }

    #[test]
    fn test_age_is_noop_without_flash_data() {
        let mut session = Session::new();
        session.put("plain", 1).unwrap();
        session.dirty = false;

        session.age_flash_data();

        assert!(!session.is_dirty());
        assert!(session.missing(FLASH_NEW_KEY));
        assert!(session.missing(FLASH_OLD_KEY));
    }

    #[test]
    fn test_reset_restores_pristine_state() {
        let mut session = Session::new();
        session.set_id(&generate_session_id());
        session.set_name("session");
        session.put("key", 1).unwrap();
        session.forget(&["other"]);
        session.started = true;

        session.reset();

        assert!(session.id().is_empty());
        assert!(session.name().is_empty());
        assert!(session.all().is_empty());
        assert!(session.puts.is_empty());
        assert!(session.forgets.is_empty());
        assert!(!session.is_started());
        assert!(!session.is_dirty());
        assert!(!session.flushed);
        assert!(session.driver.is_none());
        assert!(session.codec.is_none());
        assert!(session.locks.is_none());
    }
}
