//! Idempotency ledger for on-chain check-ins
//!
//! Guarantees at most one recording attempt per (wallet, challenge, date).
//! `claim` is an atomic conditional insert: of several concurrent callers for
//! the same key exactly one gets [`ClaimOutcome::Claimed`]. The `claimed_at`
//! a caller claimed with fences its later `complete`/`release`, so an owner
//! whose claim was taken over cannot touch the new owner's record.

use bson::doc;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{CheckInDoc, CheckInKey, CheckInStatus, CHECK_IN_COLLECTION};
use crate::types::{AgentError, Result};

/// Result of an unconditional-looking insert that never overwrites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Result of trying to take ownership of a check-in key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Caller owns the key and must `complete` or `release` it
    Claimed,
    /// A finished record exists
    AlreadyRecorded { tx_hash: Option<String> },
    /// Another live request holds the key
    InFlight,
}

/// Whether a claim taken at `claimed_at` is old enough to be taken over
pub fn is_stale(claimed_at: DateTime<Utc>, now: DateTime<Utc>, stale_after: Duration) -> bool {
    (now - claimed_at)
        .to_std()
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}

/// Per-(wallet, challenge, date) record store
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether any record (pending or recorded) exists for the key
    async fn exists(&self, key: &CheckInKey) -> Result<bool>;

    /// The record for a key
    async fn find(&self, key: &CheckInKey) -> Result<Option<CheckInDoc>>;

    /// Insert a record unless one already exists for its key
    async fn insert(&self, record: CheckInDoc) -> Result<InsertOutcome>;

    /// Atomically take ownership of a key ahead of a chain submission
    async fn claim(
        &self,
        key: &CheckInKey,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<ClaimOutcome>;

    /// Promote the claim taken at `claimed_at` to a recorded check-in.
    /// Fails with `NotFound` when that claim no longer owns the key.
    async fn complete(
        &self,
        key: &CheckInKey,
        claimed_at: DateTime<Utc>,
        tx_hash: &str,
    ) -> Result<()>;

    /// Drop the pending claim taken at `claimed_at` so a later request may
    /// retry. Recorded check-ins and newer claims are never removed.
    async fn release(&self, key: &CheckInKey, claimed_at: DateTime<Utc>) -> Result<()>;
}

// =============================================================================
// MongoDB implementation
// =============================================================================

/// MongoDB-backed record store; atomicity comes from the compound unique index
pub struct MongoRecordStore {
    collection: MongoCollection<CheckInDoc>,
}

impl MongoRecordStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let collection = mongo.collection::<CheckInDoc>(CHECK_IN_COLLECTION).await?;
        Ok(Self { collection })
    }

    /// Compare-and-swap a stale pending claim over to a new owner
    async fn take_over(
        &self,
        key: &CheckInKey,
        previous: &CheckInDoc,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut filter = key.filter();
        filter.insert("status", "pending");
        filter.insert(
            "claimed_at",
            bson::DateTime::from_chrono(previous.claimed_at),
        );

        let result = self
            .collection
            .update_one(
                filter,
                doc! {
                    "$set": {
                        "claimed_at": bson::DateTime::from_chrono(now),
                        "metadata.updated_at": bson::DateTime::now(),
                    }
                },
            )
            .await?;

        Ok(result.modified_count == 1)
    }
}

#[async_trait::async_trait]
impl RecordStore for MongoRecordStore {
    async fn exists(&self, key: &CheckInKey) -> Result<bool> {
        Ok(self.find(key).await?.is_some())
    }

    async fn find(&self, key: &CheckInKey) -> Result<Option<CheckInDoc>> {
        self.collection.find_one(key.filter()).await
    }

    async fn insert(&self, record: CheckInDoc) -> Result<InsertOutcome> {
        match self.collection.insert_one(record).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(AgentError::Duplicate(_)) => Ok(InsertOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn claim(
        &self,
        key: &CheckInKey,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<ClaimOutcome> {
        if self.insert(CheckInDoc::pending(key, now)).await? == InsertOutcome::Inserted {
            debug!(key = %key, "Check-in claimed");
            return Ok(ClaimOutcome::Claimed);
        }

        let Some(existing) = self.find(key).await? else {
            // Released between our insert and read; let the caller report it
            // as in flight rather than loop.
            return Ok(ClaimOutcome::InFlight);
        };

        if existing.is_recorded() {
            return Ok(ClaimOutcome::AlreadyRecorded {
                tx_hash: existing.tx_hash,
            });
        }

        if is_stale(existing.claimed_at, now, stale_after) && self.take_over(key, &existing, now).await? {
            warn!(key = %key, claimed_at = %existing.claimed_at, "Took over stale check-in claim");
            return Ok(ClaimOutcome::Claimed);
        }

        Ok(ClaimOutcome::InFlight)
    }

    async fn complete(
        &self,
        key: &CheckInKey,
        claimed_at: DateTime<Utc>,
        tx_hash: &str,
    ) -> Result<()> {
        let mut filter = key.filter();
        filter.insert("claimed_at", bson::DateTime::from_chrono(claimed_at));

        let result = self
            .collection
            .update_one(
                filter,
                doc! {
                    "$set": {
                        "status": "recorded",
                        "tx_hash": tx_hash,
                        "metadata.updated_at": bson::DateTime::now(),
                    }
                },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(AgentError::NotFound(format!("No check-in claim for {}", key)));
        }
        Ok(())
    }

    async fn release(&self, key: &CheckInKey, claimed_at: DateTime<Utc>) -> Result<()> {
        let mut filter = key.filter();
        filter.insert("status", "pending");
        filter.insert("claimed_at", bson::DateTime::from_chrono(claimed_at));
        self.collection.delete_one(filter).await?;
        Ok(())
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory record store; the map's entry lock gives per-key atomicity
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<CheckInKey, CheckInDoc>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, pending ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of recorded (not pending) check-ins
    pub fn recorded_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_recorded()).count()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn exists(&self, key: &CheckInKey) -> Result<bool> {
        Ok(self.records.contains_key(key))
    }

    async fn find(&self, key: &CheckInKey) -> Result<Option<CheckInDoc>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn insert(&self, record: CheckInDoc) -> Result<InsertOutcome> {
        let key = record
            .key()
            .ok_or_else(|| AgentError::BadRequest(format!("Invalid date {}", record.check_in_date)))?;

        match self.records.entry(key) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn claim(
        &self,
        key: &CheckInKey,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<ClaimOutcome> {
        match self.records.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(CheckInDoc::pending(key, now));
                Ok(ClaimOutcome::Claimed)
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.is_recorded() {
                    return Ok(ClaimOutcome::AlreadyRecorded {
                        tx_hash: existing.tx_hash.clone(),
                    });
                }
                if is_stale(existing.claimed_at, now, stale_after) {
                    warn!(key = %key, "Took over stale check-in claim");
                    existing.claimed_at = now;
                    existing.metadata.touch();
                    return Ok(ClaimOutcome::Claimed);
                }
                Ok(ClaimOutcome::InFlight)
            }
        }
    }

    async fn complete(
        &self,
        key: &CheckInKey,
        claimed_at: DateTime<Utc>,
        tx_hash: &str,
    ) -> Result<()> {
        let mut record = self
            .records
            .get_mut(key)
            .filter(|record| record.claimed_at == claimed_at)
            .ok_or_else(|| AgentError::NotFound(format!("No check-in claim for {}", key)))?;
        record.status = CheckInStatus::Recorded;
        record.tx_hash = Some(tx_hash.to_string());
        record.metadata.touch();
        Ok(())
    }

    async fn release(&self, key: &CheckInKey, claimed_at: DateTime<Utc>) -> Result<()> {
        self.records.remove_if(key, |_, record| {
            record.status == CheckInStatus::Pending && record.claimed_at == claimed_at
        });
        Ok(())
    }
}
