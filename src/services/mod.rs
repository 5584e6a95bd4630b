//! Services layer for the check-in agent
//!
//! Business logic and the outbound collaborators it drives.
//!
//! ## Services
//!
//! - **CheckIn**: the orchestrator that turns a check request into an outcome
//! - **ActivityFeed**: budgeted scan of a user's GitHub event feed
//! - **Chain**: Ethereum JSON-RPC recorder for completed days
//! - **GitHubOAuth**: authorization URL, code exchange and profile lookup
//! - **Day**: the reference-timezone calendar day and its clock

pub mod activity_feed;
pub mod chain;
pub mod check_in;
pub mod day;
pub mod github_oauth;

pub use activity_feed::{
    ActivityEvent, ActivityFeed, EventPager, FeedConfig, FeedError, GitHubActivityFeed,
    GitHubEventPager,
};
pub use chain::{
    ChainError, ChainRecorder, DisabledChainRecorder, JsonRpcChainRecorder, TxHash,
};
pub use check_in::{CheckInConfig, CheckInOutcome, CheckInResponse, CheckInService};
pub use day::{CheckInDay, Clock, FixedClock, SystemClock};
pub use github_oauth::{GitHubOAuthService, GitHubProfile, OAuthError, OAuthService, TokenBundle};
