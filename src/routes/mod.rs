//! HTTP routes for the check-in agent

pub mod github;
pub mod health;

pub use github::{handle_github_request, GITHUB_ROUTE_PREFIX};
pub use health::{health_check, version_info};
