//! The keyspace module
//! Typed key -> entry mapping with lazy expiration.
//!
//! All state lives in a [`Store`] behind one reader/writer lock owned by
//! [`Keyspace`]. Callers that need several operations to run without
//! interleaving (a committed transaction) take the write guard once and call
//! the `Store` methods directly; everyone else uses the self-locking
//! wrappers on `Keyspace`.
//!
//! Every accessor other than `delete` first checks the entry's deadline and deletes it if it has
//! passed, so even reads need the exclusive lock. The one exception is
//! [`Store::snapshot_vectors`], which skips expired entries instead of
//! removing them and can therefore run under the shared lock.

use crate::clock::{Clock, SystemClock};
use crate::error::WrongKind;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Expiries beyond this are clamped so deadline arithmetic cannot overflow.
const MAX_EXPIRY_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// The kind of an entry. Fixed for the lifetime of the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Scalar,
    FieldMap,
    Vector,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Scalar(String),
    FieldMap(BTreeMap<String, String>),
    Vector(Vec<f32>),
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Scalar(_) => Kind::Scalar,
            Payload::FieldMap(_) => Kind::FieldMap,
            Payload::Vector(_) => Kind::Vector,
        }
    }
}

/// One keyspace slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    payload: Payload,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(payload: Payload) -> Self {
        Entry { payload, expires_at: None }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }

    pub fn has_expiry(&self) -> bool {
        self.expires_at.is_some()
    }

    /// An entry is gone from the deadline instant onwards.
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// Result of a time-to-live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    Remaining(Duration),
}

impl Ttl {
    /// Wire form: -2 missing, -1 no expiry, else whole seconds left
    /// (truncated toward zero).
    pub fn as_secs(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::Remaining(left) => left.as_secs() as i64,
        }
    }
}

/// The unlocked mapping. Only reachable through a [`Keyspace`] guard.
pub struct Store {
    entries: HashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl Store {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Store { entries: HashMap::new(), clock }
    }

    /// Looks up `key`, evicting it first if its deadline has passed.
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let now = self.clock.now();
        if self.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    /// Like [`live_entry`](Store::live_entry) but fails with `WrongKind` if
    /// the key holds something other than a field map.
    fn live_field_map(&mut self, key: &str) -> Result<Option<&mut BTreeMap<String, String>>, WrongKind> {
        match self.live_entry(key) {
            None => Ok(None),
            Some(Entry { payload: Payload::FieldMap(fields), .. }) => Ok(Some(fields)),
            Some(_) => Err(WrongKind),
        }
    }

    /// Kind of the live entry at `key`, if any.
    pub fn kind_of(&mut self, key: &str) -> Option<Kind> {
        self.live_entry(key).map(|entry| entry.kind())
    }

    /// Stores a scalar, replacing whatever was there and clearing any expiry.
    pub fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), Entry::new(Payload::Scalar(value)));
    }

    /// Stores a vector, replacing whatever was there and clearing any expiry.
    pub fn set_vector(&mut self, key: &str, vector: Vec<f32>) {
        self.entries.insert(key.to_string(), Entry::new(Payload::Vector(vector)));
    }

    /// Returns the scalar at `key`. Absent, expired and non-scalar keys all
    /// read as `None`.
    pub fn get(&mut self, key: &str) -> Option<String> {
        match self.live_entry(key) {
            Some(Entry { payload: Payload::Scalar(value), .. }) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn get_vector(&mut self, key: &str) -> Option<Vec<f32>> {
        match self.live_entry(key) {
            Some(Entry { payload: Payload::Vector(vector), .. }) => Some(vector.clone()),
            _ => None,
        }
    }

    /// Removes `key` whatever its expiry state. Returns whether it was
    /// present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Sets the deadline of `key` to now + `seconds`, overwriting any previous
    /// one. A non-positive value expires the key immediately.
    pub fn expire(&mut self, key: &str, seconds: i64) -> bool {
        let now = self.clock.now();
        let Some(entry) = self.live_entry(key) else {
            return false;
        };

        let secs = seconds.max(0) as u64;
        entry.expires_at = Some(now + Duration::from_secs(secs.min(MAX_EXPIRY_SECS)));
        true
    }

    pub fn ttl(&mut self, key: &str) -> Ttl {
        let now = self.clock.now();
        match self.live_entry(key) {
            None => Ttl::Missing,
            Some(Entry { expires_at: None, .. }) => Ttl::Persistent,
            Some(Entry { expires_at: Some(deadline), .. }) => {
                Ttl::Remaining(deadline.saturating_duration_since(now))
            }
        }
    }

    /// Inserts or overwrites fields, creating the map if needed. Returns the
    /// number of fields that did not exist before.
    pub fn hset(&mut self, key: &str, fields: &[(String, String)]) -> Result<usize, WrongKind> {
        let now = self.clock.now();
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Payload::FieldMap(BTreeMap::new())));
        if entry.is_expired(now) {
            *entry = Entry::new(Payload::FieldMap(BTreeMap::new()));
        }
        let Payload::FieldMap(map) = &mut entry.payload else {
            return Err(WrongKind);
        };

        let mut added = 0;
        for (field, value) in fields {
            if map.insert(field.clone(), value.clone()).is_none() {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, WrongKind> {
        Ok(self.live_field_map(key)?.and_then(|map| map.get(field).cloned()))
    }

    /// Removes the given fields. An absent key removes nothing.
    pub fn hdel(&mut self, key: &str, fields: &[String]) -> Result<usize, WrongKind> {
        let Some(map) = self.live_field_map(key)? else {
            return Ok(0);
        };

        Ok(fields.iter().filter(|field| map.remove(field.as_str()).is_some()).count())
    }

    /// Returns a copy of every field. `Ok(None)` means the key is absent,
    /// which is distinct from a present map with no fields.
    pub fn hgetall(&mut self, key: &str) -> Result<Option<BTreeMap<String, String>>, WrongKind> {
        Ok(self.live_field_map(key)?.map(|map| map.clone()))
    }

    pub fn hexists(&mut self, key: &str, field: &str) -> Result<bool, WrongKind> {
        Ok(self.live_field_map(key)?.is_some_and(|map| map.contains_key(field)))
    }

    pub fn hlen(&mut self, key: &str) -> Result<usize, WrongKind> {
        Ok(self.live_field_map(key)?.map_or(0, |map| map.len()))
    }

    /// Deep copy of all live vector entries. Never evicts; entries whose
    /// deadline has passed are left out.
    pub fn snapshot_vectors(&self) -> HashMap<String, Vec<f32>> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .filter_map(|(key, entry)| match &entry.payload {
                Payload::Vector(vector) => Some((key.clone(), vector.clone())),
                _ => None,
            })
            .collect()
    }

    /// Deep copy of all live entries, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }
}

/// Shared, lock-guarded keyspace.
pub struct Keyspace {
    store: RwLock<Store>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Keyspace { store: RwLock::new(Store::new(clock)) }
    }

    /// Takes the exclusive section. Held across a whole transaction commit.
    pub fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write()
    }

    /// Takes the shared section. Only non-evicting reads are available.
    pub fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read()
    }

    pub fn set(&self, key: &str, value: String) {
        self.write().set(key, value)
    }

    pub fn set_vector(&self, key: &str, vector: Vec<f32>) {
        self.write().set_vector(key, vector)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.write().get(key)
    }

    pub fn get_vector(&self, key: &str) -> Option<Vec<f32>> {
        self.write().get_vector(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.write().delete(key)
    }

    pub fn expire(&self, key: &str, seconds: i64) -> bool {
        self.write().expire(key, seconds)
    }

    pub fn ttl(&self, key: &str) -> Ttl {
        self.write().ttl(key)
    }

    pub fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<usize, WrongKind> {
        self.write().hset(key, fields)
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>, WrongKind> {
        self.write().hget(key, field)
    }

    pub fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, WrongKind> {
        self.write().hdel(key, fields)
    }

    pub fn hgetall(&self, key: &str) -> Result<Option<BTreeMap<String, String>>, WrongKind> {
        self.write().hgetall(key)
    }

    pub fn hexists(&self, key: &str, field: &str) -> Result<bool, WrongKind> {
        self.write().hexists(key, field)
    }

    pub fn hlen(&self, key: &str) -> Result<usize, WrongKind> {
        self.write().hlen(key)
    }

    pub fn snapshot_vectors(&self) -> HashMap<String, Vec<f32>> {
        self.read().snapshot_vectors()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        self.read().snapshot()
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}
