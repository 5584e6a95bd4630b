//! Daily check-in record schema
//!
//! At most one document exists per (wallet, challenge, date). The compound
//! unique index is what makes a recording claim atomic.

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::Metadata;
use crate::db::mongo::{IntoIndexes, MutMetadata};

/// Collection name for daily check-ins
pub const CHECK_IN_COLLECTION: &str = "daily_check_ins";

/// Date format used for the `check_in_date` field
pub const CHECK_IN_DATE_FORMAT: &str = "%Y-%m-%d";

/// Idempotency key of a check-in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckInKey {
    pub wallet_address: String,
    pub challenge_id: i64,
    /// Calendar date in the configured reference timezone
    pub date: NaiveDate,
}

impl CheckInKey {
    pub fn new(wallet_address: impl Into<String>, challenge_id: i64, date: NaiveDate) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            challenge_id,
            date,
        }
    }

    /// Date rendered as stored
    pub fn date_string(&self) -> String {
        self.date.format(CHECK_IN_DATE_FORMAT).to_string()
    }

    /// Filter matching exactly this key
    pub fn filter(&self) -> Document {
        doc! {
            "wallet_address": &self.wallet_address,
            "challenge_id": self.challenge_id,
            "check_in_date": self.date_string(),
        }
    }
}

impl std::fmt::Display for CheckInKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.wallet_address,
            self.challenge_id,
            self.date_string()
        )
    }
}

/// Lifecycle of a check-in record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckInStatus {
    /// A submission is in flight; the owner holds the key
    #[default]
    Pending,
    /// The chain accepted the completion
    Recorded,
}

/// Persisted check-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub wallet_address: String,

    pub challenge_id: i64,

    /// `YYYY-MM-DD` in the reference timezone
    pub check_in_date: String,

    #[serde(default)]
    pub status: CheckInStatus,

    /// When the current owner claimed the key
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub claimed_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl CheckInDoc {
    /// A fresh claim on `key`
    pub fn pending(key: &CheckInKey, claimed_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            metadata: Metadata::new(),
            wallet_address: key.wallet_address.clone(),
            challenge_id: key.challenge_id,
            check_in_date: key.date_string(),
            status: CheckInStatus::Pending,
            claimed_at,
            tx_hash: None,
        }
    }

    /// A finished record carrying its transaction hash
    pub fn recorded(key: &CheckInKey, tx_hash: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: CheckInStatus::Recorded,
            tx_hash: Some(tx_hash.into()),
            ..Self::pending(key, at)
        }
    }

    /// Key this document belongs to, if its date parses
    pub fn key(&self) -> Option<CheckInKey> {
        NaiveDate::parse_from_str(&self.check_in_date, CHECK_IN_DATE_FORMAT)
            .ok()
            .map(|date| CheckInKey::new(self.wallet_address.clone(), self.challenge_id, date))
    }

    pub fn is_recorded(&self) -> bool {
        self.status == CheckInStatus::Recorded
    }
}

impl IntoIndexes for CheckInDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "wallet_address": 1, "challenge_id": 1, "check_in_date": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("wallet_challenge_date_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for CheckInDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
