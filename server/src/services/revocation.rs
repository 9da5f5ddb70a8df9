//! Token revocation set
//!
//! The authoritative store is a database table (one row per revoked jti
//! with its expiry). When the database is unreachable the store degrades
//! to an in-memory map so revocations issued during an outage still take
//! effect on this process; the map self-prunes expired entries on every
//! access. A revoked id stays revoked until its original expiry, after
//! which the token is dead anyway.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::warn;

use crate::db::DbPool;
use crate::schema::revoked_tokens;

#[derive(Debug, Insertable)]
#[diesel(table_name = revoked_tokens)]
struct NewRevokedToken<'a> {
    jti: &'a str,
    expires_at: DateTime<Utc>,
}

/// In-memory fallback set. Expired entries are dropped on every call.
#[derive(Default)]
pub struct MemoryRevocations {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryRevocations {
    pub fn insert(&self, jti: &str, expires_at: DateTime<Utc>) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Utc::now();
        entries.retain(|_, exp| *exp > now);
        entries.insert(jti.to_string(), expires_at);
    }

    pub fn contains(&self, jti: &str) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Utc::now();
        entries.retain(|_, exp| *exp > now);
        entries.contains_key(jti)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

pub struct RevocationStore {
    pool: DbPool,
    memory: MemoryRevocations,
}

impl RevocationStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            memory: MemoryRevocations::default(),
        }
    }

    /// Record `jti` as revoked until `expires_at`. Falls back to the
    /// in-memory set when the database write fails.
    pub fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) {
        let db_result = self.pool.get().map_err(|e| e.to_string()).and_then(|mut conn| {
            diesel::insert_into(revoked_tokens::table)
                .values(&NewRevokedToken { jti, expires_at })
                .on_conflict(revoked_tokens::jti)
                .do_nothing()
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        });

        if let Err(err) = db_result {
            warn!(%jti, error = %err, "Revocation write failed, using in-memory fallback");
            self.memory.insert(jti, expires_at);
        }
    }

    /// Whether `jti` is revoked and still within its expiry. Reads prefer
    /// the database; the fallback set only answers when it is down.
    pub fn is_revoked(&self, jti: &str) -> bool {
        let db_result = self.pool.get().map_err(|e| e.to_string()).and_then(|mut conn| {
            diesel::select(diesel::dsl::exists(
                revoked_tokens::table
                    .filter(revoked_tokens::jti.eq(jti))
                    .filter(revoked_tokens::expires_at.gt(Utc::now())),
            ))
            .get_result::<bool>(&mut conn)
            .map_err(|e| e.to_string())
        });

        match db_result {
            Ok(revoked) => revoked,
            Err(err) => {
                warn!(%jti, error = %err, "Revocation read failed, checking in-memory fallback");
                self.memory.contains(jti)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fallback_remembers_unexpired_entries() {
        let memory = MemoryRevocations::default();
        memory.insert("jti-1", Utc::now() + Duration::hours(1));
        assert!(memory.contains("jti-1"));
        assert!(!memory.contains("jti-2"));
    }

    #[test]
    fn fallback_prunes_expired_entries_on_access() {
        let memory = MemoryRevocations::default();
        memory.insert("stale", Utc::now() - Duration::seconds(1));
        memory.insert("fresh", Utc::now() + Duration::hours(1));

        assert!(!memory.contains("stale"));
        // The expired entry is gone entirely, not just hidden.
        assert_eq!(memory.len(), 1);
    }
}
