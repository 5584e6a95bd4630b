//! Connection store
//!
//! Wallet → GitHub connection lookups, backed by MongoDB in production and a
//! concurrent map in development mode and tests.

use bson::{doc, DateTime};
use dashmap::DashMap;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{ConnectionDoc, Metadata, CONNECTION_COLLECTION};
use crate::types::Result;

/// Read/write access to wallet connections
#[async_trait::async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Connection for a wallet, if the wallet has linked GitHub
    async fn get_by_wallet(&self, wallet_address: &str) -> Result<Option<ConnectionDoc>>;

    /// Create or replace the connection for `connection.wallet_address`
    async fn upsert(&self, connection: ConnectionDoc) -> Result<()>;
}

/// MongoDB-backed connection store
pub struct MongoConnectionStore {
    collection: MongoCollection<ConnectionDoc>,
}

impl MongoConnectionStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let collection = mongo
            .collection::<ConnectionDoc>(CONNECTION_COLLECTION)
            .await?;
        Ok(Self { collection })
    }
}

#[async_trait::async_trait]
impl ConnectionStore for MongoConnectionStore {
    async fn get_by_wallet(&self, wallet_address: &str) -> Result<Option<ConnectionDoc>> {
        self.collection
            .find_one(doc! { "wallet_address": wallet_address })
            .await
    }

    async fn upsert(&self, connection: ConnectionDoc) -> Result<()> {
        let now = DateTime::now();
        self.collection
            .upsert_one(
                doc! { "wallet_address": &connection.wallet_address },
                doc! {
                    "$set": {
                        "github_id": connection.github_id,
                        "github_username": &connection.github_username,
                        "github_avatar_url": connection.github_avatar_url.clone(),
                        "access_token": &connection.access_token,
                        "token_type": &connection.token_type,
                        "scope": &connection.scope,
                        "metadata.is_deleted": false,
                        "metadata.updated_at": now,
                    },
                    "$setOnInsert": {
                        "metadata.created_at": now,
                    },
                },
            )
            .await?;
        Ok(())
    }
}

/// In-memory connection store
#[derive(Default)]
pub struct MemoryConnectionStore {
    connections: DashMap<String, ConnectionDoc>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[async_trait::async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get_by_wallet(&self, wallet_address: &str) -> Result<Option<ConnectionDoc>> {
        Ok(self
            .connections
            .get(wallet_address)
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, mut connection: ConnectionDoc) -> Result<()> {
        let key = connection.wallet_address.clone();
        match self.connections.get_mut(&key) {
            Some(mut existing) => {
                connection.id = existing.id;
                connection.metadata = existing.metadata.clone();
                connection.metadata.touch();
                *existing = connection;
            }
            None => {
                connection.metadata = Metadata::new();
                self.connections.insert(key, connection);
            }
        }
        Ok(())
    }
}
