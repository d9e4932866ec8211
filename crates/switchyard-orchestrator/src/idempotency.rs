use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// A key's binding to the job it created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyEntry {
    pub job_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Idempotency key → job table.
///
/// Within its TTL a key always resolves to the same job id. Reads do not
/// consume the entry or extend its lifetime.
#[derive(Debug)]
pub struct IdempotencyTable {
    entries: HashMap<String, IdempotencyEntry>,
    ttl: chrono::Duration,
}

impl IdempotencyTable {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Live job id bound to `key`. An expired entry is dropped on the way.
    pub fn lookup(&mut self, key: &str, now: DateTime<Utc>) -> Option<Uuid> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.job_id),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Bind `key` to `job_id` for one TTL starting at `now`.
    pub fn insert(&mut self, key: impl Into<String>, job_id: Uuid, now: DateTime<Utc>) {
        self.entries.insert(
            key.into(),
            IdempotencyEntry {
                job_id,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> Option<IdempotencyEntry> {
        self.entries.remove(key)
    }

    /// Drop entries that are expired or whose job no longer exists.
    /// Returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>, job_exists: impl Fn(&Uuid) -> bool) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.expires_at > now && job_exists(&entry.job_id));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
