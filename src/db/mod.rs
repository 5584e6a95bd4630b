//! Persistence: MongoDB wrapper, schemas and the two stores the check-in
//! core depends on.

pub mod connections;
pub mod mongo;
pub mod records;
pub mod schemas;

pub use connections::{ConnectionStore, MemoryConnectionStore, MongoConnectionStore};
pub use mongo::{MongoClient, MongoCollection};
pub use records::{ClaimOutcome, InsertOutcome, MemoryRecordStore, MongoRecordStore, RecordStore};
