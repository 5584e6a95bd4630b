//! Configuration for the check-in agent
//!
//! CLI arguments and environment variable handling using clap.

use chrono::FixedOffset;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::logging::LogFormat;

/// Check-in agent - verifies daily GitHub activity and records it on-chain
#[derive(Parser, Debug, Clone)]
#[command(name = "checkin-agent")]
#[command(about = "Daily activity verification with idempotent on-chain recording")]
pub struct Args {
    /// Unique node identifier for this agent instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory stores when MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "checkin_agent")]
    pub mongodb_db: String,

    /// GitHub OAuth configuration
    #[command(flatten)]
    pub github: GitHubArgs,

    /// Chain recorder configuration
    #[command(flatten)]
    pub chain: ChainArgs,

    /// Frontend base URL the OAuth callback redirects back to
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:5173")]
    pub frontend_url: String,

    /// UTC offset of the reference timezone that defines a check-in day
    /// (e.g. "+08:00"). Used for both the activity window and the record date.
    #[arg(long, env = "CHECKIN_UTC_OFFSET", default_value = "+08:00", value_parser = parse_utc_offset)]
    pub checkin_utc_offset: FixedOffset,

    /// Timeout for each outbound HTTP request in milliseconds
    #[arg(long, env = "HTTP_TIMEOUT_MS", default_value = "10000")]
    pub http_timeout_ms: u64,

    /// Timeout for a whole activity feed scan in milliseconds
    #[arg(long, env = "FEED_TIMEOUT_MS", default_value = "15000")]
    pub feed_timeout_ms: u64,

    /// Events requested per feed page
    #[arg(long, env = "FEED_PAGE_SIZE", default_value = "100")]
    pub feed_page_size: u32,

    /// Maximum feed pages inspected per check
    #[arg(long, env = "FEED_MAX_PAGES", default_value = "3")]
    pub feed_max_pages: u32,

    /// Maximum feed events inspected per check
    #[arg(long, env = "FEED_MAX_EVENTS", default_value = "300")]
    pub feed_max_events: usize,

    /// Seconds after which an unfinished recording claim may be taken over
    #[arg(long, env = "CLAIM_STALE_SECS", default_value = "300")]
    pub claim_stale_secs: u64,
}

/// GitHub OAuth app configuration
#[derive(Parser, Debug, Clone)]
pub struct GitHubArgs {
    /// OAuth app client ID
    #[arg(long, env = "GITHUB_CLIENT_ID")]
    pub github_client_id: Option<String>,

    /// OAuth app client secret
    #[arg(long, env = "GITHUB_CLIENT_SECRET")]
    pub github_client_secret: Option<String>,

    /// Callback URL registered with the OAuth app
    #[arg(
        long,
        env = "GITHUB_REDIRECT_URI",
        default_value = "http://localhost:8080/agent/github/callback"
    )]
    pub github_redirect_uri: String,

    /// Requested OAuth scope
    #[arg(long, env = "GITHUB_SCOPE", default_value = "read:user")]
    pub github_scope: String,

    /// GitHub web base URL (authorize and token endpoints)
    #[arg(long, env = "GITHUB_OAUTH_URL", default_value = "https://github.com")]
    pub github_oauth_url: String,

    /// GitHub REST API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,
}

/// Ethereum JSON-RPC recorder configuration
#[derive(Parser, Debug, Clone)]
pub struct ChainArgs {
    /// JSON-RPC endpoint of a node or signing proxy holding the operator key.
    /// When unset, recording is disabled and every attempt fails softly.
    #[arg(long, env = "CHAIN_RPC_URL")]
    pub chain_rpc_url: Option<String>,

    /// Challenge contract address
    #[arg(long, env = "CHAIN_CONTRACT_ADDRESS")]
    pub chain_contract_address: Option<String>,

    /// Operator account that sends the transactions
    #[arg(long, env = "CHAIN_FROM_ADDRESS")]
    pub chain_from_address: Option<String>,

    /// Timeout for a whole recording (submission and receipt) in milliseconds
    #[arg(long, env = "CHAIN_TIMEOUT_MS", default_value = "60000")]
    pub chain_timeout_ms: u64,

    /// Interval between receipt polls in milliseconds
    #[arg(long, env = "CHAIN_RECEIPT_POLL_MS", default_value = "2000")]
    pub chain_receipt_poll_ms: u64,

    /// Maximum receipt polls before giving up
    #[arg(long, env = "CHAIN_RECEIPT_MAX_POLLS", default_value = "20")]
    pub chain_receipt_max_polls: u32,
}

/// Parse a UTC offset such as "+08:00", "-0530", "Z" or "UTC"
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }

    let (sign, rest) = match value.chars().next() {
        Some('+') => (1, &value[1..]),
        Some('-') => (-1, &value[1..]),
        _ => return Err(format!("offset must start with '+' or '-': {}", value)),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("offset must look like +HH:MM: {}", value));
    }

    let hours: i32 = digits[..2].parse().map_err(|_| format!("bad hours in {}", value))?;
    let minutes: i32 = digits[2..].parse().map_err(|_| format!("bad minutes in {}", value))?;
    if hours > 14 || minutes > 59 {
        return Err(format!("offset out of range: {}", value));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("offset out of range: {}", value))
}

impl Args {
    /// Per-request HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Whole-scan feed timeout
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    /// Whole-submission chain timeout
    pub fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.chain.chain_timeout_ms)
    }

    /// Age after which a pending claim is considered abandoned
    pub fn claim_stale_after(&self) -> Duration {
        Duration::from_secs(self.claim_stale_secs)
    }

    /// Whether the chain recorder has everything it needs
    pub fn chain_enabled(&self) -> bool {
        self.chain.chain_rpc_url.is_some()
            && self.chain.chain_contract_address.is_some()
            && self.chain.chain_from_address.is_some()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode
            && (self.github.github_client_id.is_none() || self.github.github_client_secret.is_none())
        {
            return Err(
                "GITHUB_CLIENT_ID and GITHUB_CLIENT_SECRET are required in production mode"
                    .to_string(),
            );
        }

        if self.feed_page_size == 0 || self.feed_page_size > 100 {
            return Err("FEED_PAGE_SIZE must be between 1 and 100".to_string());
        }

        if self.feed_max_pages == 0 || self.feed_max_events == 0 {
            return Err("FEED_MAX_PAGES and FEED_MAX_EVENTS must be positive".to_string());
        }

        // A live claim must never look stale to a concurrent request
        let claim_window_ms = self.chain.chain_timeout_ms.saturating_add(self.feed_timeout_ms);
        if self.claim_stale_secs.saturating_mul(1000) <= claim_window_ms {
            return Err(format!(
                "CLAIM_STALE_SECS ({}s) must exceed CHAIN_TIMEOUT_MS + FEED_TIMEOUT_MS ({}ms)",
                self.claim_stale_secs, claim_window_ms
            ));
        }

        let chain = &self.chain;
        let chain_fields = [
            chain.chain_rpc_url.is_some(),
            chain.chain_contract_address.is_some(),
            chain.chain_from_address.is_some(),
        ];
        if chain_fields.iter().any(|set| *set) && !chain_fields.iter().all(|set| *set) {
            return Err(
                "CHAIN_RPC_URL, CHAIN_CONTRACT_ADDRESS and CHAIN_FROM_ADDRESS must be set together"
                    .to_string(),
            );
        }

        Ok(())
    }
}
