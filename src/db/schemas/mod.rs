//! Database schemas
//!
//! MongoDB document structures for GitHub connections and daily check-ins.

mod check_in;
mod connection;
mod metadata;

pub use check_in::{
    CheckInDoc, CheckInKey, CheckInStatus, CHECK_IN_COLLECTION, CHECK_IN_DATE_FORMAT,
};
pub use connection::{ConnectionDoc, CONNECTION_COLLECTION};
pub use metadata::Metadata;
