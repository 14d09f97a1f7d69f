//! # Record Sets
//!
//! Typed, lock-disciplined access to the entity sets behind a [`RecordStore`].
//!
//! Reads never fail: a missing, empty or malformed set loads as empty.
//! Every read-modify-write goes through [`Records::lock`], which holds one
//! mutex per entity set for the duration of the local mutation only. Callers
//! must not await network I/O while holding a [`Locked`] guard.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AppError, Result};
use crate::models::{
    BannedRecord, Candidate, GroupId, KeyGrant, KeyRequest, Reviewer, SuspectGroup, UserId,
};
use crate::traits::RecordStore;

/// The independently persisted collections.
///
/// Declaration order is the lock acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntitySet {
    Pending,
    Banned,
    SuspectGroups,
    Reviewers,
    KeyRequests,
    KeyGrants,
    ActionLog,
}

impl EntitySet {
    pub const ALL: [EntitySet; 7] = [
        EntitySet::Pending,
        EntitySet::Banned,
        EntitySet::SuspectGroups,
        EntitySet::Reviewers,
        EntitySet::KeyRequests,
        EntitySet::KeyGrants,
        EntitySet::ActionLog,
    ];

    /// Stable persisted name of the set.
    pub fn name(self) -> &'static str {
        match self {
            EntitySet::Pending => "pendingUsers",
            EntitySet::Banned => "bannedUsers",
            EntitySet::SuspectGroups => "suspectGroups",
            EntitySet::Reviewers => "reviewers",
            EntitySet::KeyRequests => "apiKeyRequests",
            EntitySet::KeyGrants => "apiKeys",
            EntitySet::ActionLog => "logs",
        }
    }
}

/// A record with a uniqueness key inside its set.
pub trait Keyed {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> Self::Key;
}

impl Keyed for Candidate {
    type Key = UserId;
    fn key(&self) -> UserId {
        self.user_id
    }
}

impl Keyed for BannedRecord {
    type Key = UserId;
    fn key(&self) -> UserId {
        self.candidate.user_id
    }
}

impl Keyed for SuspectGroup {
    type Key = GroupId;
    fn key(&self) -> GroupId {
        self.group_id
    }
}

impl Keyed for Reviewer {
    type Key = String;
    fn key(&self) -> String {
        self.passcode.clone()
    }
}

impl Keyed for KeyRequest {
    type Key = uuid::Uuid;
    fn key(&self) -> uuid::Uuid {
        self.id
    }
}

impl Keyed for KeyGrant {
    type Key = String;
    fn key(&self) -> String {
        self.token.clone()
    }
}

/// Insertion-ordered collection with a uniqueness index on [`Keyed::key`].
#[derive(Debug, Clone)]
pub struct RecordSet<T: Keyed> {
    entries: IndexMap<T::Key, T>,
}

impl<T: Keyed> Default for RecordSet<T> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<T: Keyed> RecordSet<T> {
    /// Builds the index. On duplicate keys the first occurrence wins.
    pub fn from_records(records: Vec<T>) -> Self {
        let mut set = Self::default();
        for record in records {
            set.insert(record);
        }
        set
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &T::Key) -> Option<&mut T> {
        self.entries.get_mut(key)
    }

    /// Appends the record unless its key is already present. Never overwrites.
    pub fn insert(&mut self, record: T) -> bool {
        let key = record.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, record);
        true
    }

    /// Removes by key, keeping the order of the remaining records.
    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        self.entries.shift_remove(key)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|_, record| keep(record));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn into_records(self) -> Vec<T> {
        self.entries.into_values().collect()
    }
}

fn decode<T: DeserializeOwned>(set: EntitySet, bytes: Option<Vec<u8>>) -> Vec<T> {
    let Some(bytes) = bytes else {
        return Vec::new();
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Vec::new();
    }
    match serde_json::from_slice(&bytes) {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!(set = set.name(), error = %err, "malformed record set, treating as empty");
            Vec::new()
        }
    }
}

/// Typed, per-set serialized access to a [`RecordStore`].
pub struct Records {
    store: Arc<dyn RecordStore>,
    locks: HashMap<EntitySet, Arc<Mutex<()>>>,
}

impl Records {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let locks = EntitySet::ALL
            .iter()
            .map(|set| (*set, Arc::new(Mutex::new(()))))
            .collect();
        Self { store, locks }
    }

    /// Unlocked snapshot of a set, for read-only queries.
    pub async fn load<T: DeserializeOwned>(&self, set: EntitySet) -> Vec<T> {
        decode(set, self.store.read(set).await)
    }

    /// Unlocked keyed snapshot of a set.
    pub async fn load_keyed<T: Keyed + DeserializeOwned>(&self, set: EntitySet) -> RecordSet<T> {
        RecordSet::from_records(self.load(set).await)
    }

    /// Acquires the locks of every listed set, in declaration order.
    pub async fn lock(&self, sets: &[EntitySet]) -> Locked<'_> {
        let mut wanted = sets.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut guards = Vec::with_capacity(wanted.len());
        for set in wanted {
            // Every variant is registered in `new`.
            let lock = Arc::clone(&self.locks[&set]);
            guards.push((set, lock.lock_owned().await));
        }
        Locked {
            records: self,
            guards,
        }
    }

    /// Locked load, extend and save of an append-only set.
    pub async fn append<T>(&self, set: EntitySet, items: Vec<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        if items.is_empty() {
            return Ok(());
        }
        let locked = self.lock(&[set]).await;
        let mut records: Vec<T> = locked.load(set).await?;
        records.extend(items);
        locked.save(set, &records).await
    }
}

/// Proof that the listed sets are held. Dropping it releases them.
pub struct Locked<'a> {
    records: &'a Records,
    guards: Vec<(EntitySet, OwnedMutexGuard<()>)>,
}

impl Locked<'_> {
    fn ensure_held(&self, set: EntitySet) -> Result<()> {
        if self.guards.iter().any(|(held, _)| *held == set) {
            Ok(())
        } else {
            Err(AppError::Internal(format!("record set {} is not locked", set.name())))
        }
    }

    pub async fn load<T: DeserializeOwned>(&self, set: EntitySet) -> Result<Vec<T>> {
        self.ensure_held(set)?;
        Ok(self.records.load(set).await)
    }

    pub async fn load_keyed<T: Keyed + DeserializeOwned>(
        &self,
        set: EntitySet,
    ) -> Result<RecordSet<T>> {
        self.ensure_held(set)?;
        Ok(self.records.load_keyed(set).await)
    }

    pub async fn save<T: Serialize>(&self, set: EntitySet, records: &[T]) -> Result<()> {
        self.ensure_held(set)?;
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|err| AppError::Internal(format!("encode {}: {err}", set.name())))?;
        self.records
            .store
            .write(set, bytes)
            .await
            .map_err(AppError::internal)
    }

    pub async fn save_keyed<T: Keyed + Serialize>(
        &self,
        set: EntitySet,
        records: &RecordSet<T>,
    ) -> Result<()> {
        let ordered: Vec<&T> = records.iter().collect();
        self.save(set, &ordered).await
    }
}
