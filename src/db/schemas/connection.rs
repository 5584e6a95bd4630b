//! GitHub connection schema
//!
//! One document per wallet address, written by the OAuth callback and read by
//! the check-in path.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::metadata::Metadata;
use crate::db::mongo::{IntoIndexes, MutMetadata};

/// Collection name for wallet ↔ GitHub connections
pub const CONNECTION_COLLECTION: &str = "github_connections";

/// A wallet's linked GitHub account
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Wallet address (identity key)
    pub wallet_address: String,

    /// Numeric GitHub user id
    #[serde(default)]
    pub github_id: i64,

    /// GitHub login
    pub github_username: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_avatar_url: Option<String>,

    /// OAuth access token used for authenticated feed reads
    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub token_type: String,

    #[serde(default)]
    pub scope: String,
}

impl ConnectionDoc {
    /// Bearer credential for feed reads; `None` when no token was stored
    pub fn credential(&self) -> Option<&str> {
        if self.access_token.is_empty() {
            None
        } else {
            Some(self.access_token.as_str())
        }
    }
}

impl IntoIndexes for ConnectionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "wallet_address": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("wallet_address_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "github_username": 1 },
                Some(
                    IndexOptions::builder()
                        .name("github_username_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ConnectionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
