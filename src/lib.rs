//! Check-in agent - daily GitHub activity verification with on-chain recording
//!
//! A wallet links a GitHub account through OAuth. Each day the wallet can ask
//! the agent to check in: the agent scans the account's public event feed for
//! a push made since local midnight and, when a challenge is named, records
//! the completed day on the challenge contract exactly once.
//!
//! ## Modules
//!
//! - **services**: check-in orchestration, activity feed, chain recorder, OAuth
//! - **db**: MongoDB connection and check-in stores with in-memory fallbacks
//! - **routes** / **server**: hyper HTTP surface under `/agent/github`

pub mod config;
pub mod db;
pub mod logging;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AgentError, Result};
