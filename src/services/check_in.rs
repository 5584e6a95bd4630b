//! Check-in orchestration
//!
//! Decides whether a wallet clocked in today and, when a challenge is named,
//! records the day on-chain at most once.
//!
//! ```text
//! not connected ──────────────────────────────► not_connected
//! connected ─► feed: no push today ───────────► no_activity
//!            └► push today ─► no challenge ───► clocked_in
//!                           └► challenge ─► recorded already ──► already_recorded
//!                                         ├► claim lost ───────► already_recorded
//!                                         ├► store error ──────► ledger_unavailable
//!                                         └► claimed ─► chain ok ──► recorded
//!                                                     └► chain err ─► recording_failed
//! ```
//!
//! The feed check is authoritative and repeatable; the chain write is not.
//! A failed write releases its claim so the next request for the same day
//! can try again. A landed write is marked recorded with a few retries, since
//! a claim left pending is eventually taken over and submitted again.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::activity_feed::ActivityFeed;
use super::chain::{ChainRecorder, TxHash};
use super::day::{CheckInDay, Clock};
use crate::db::records::{ClaimOutcome, RecordStore};
use crate::db::schemas::CheckInKey;
use crate::db::ConnectionStore;
use crate::types::AgentError;

/// Attempts at marking a landed transaction recorded
const COMPLETE_ATTEMPTS: u32 = 3;

/// Pause between those attempts
const COMPLETE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct CheckInConfig {
    /// Reference timezone that defines a check-in day
    pub timezone: FixedOffset,
    /// Age after which an unfinished claim may be taken over
    pub claim_stale_after: Duration,
}

impl Default for CheckInConfig {
    fn default() -> Self {
        Self {
            timezone: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
            claim_stale_after: Duration::from_secs(300),
        }
    }
}

/// Terminal state of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInOutcome {
    NotConnected,
    ConnectionUnavailable,
    NoActivity {
        username: String,
    },
    ClockedIn {
        username: String,
    },
    AlreadyRecorded {
        username: String,
        tx_hash: Option<TxHash>,
    },
    Recorded {
        username: String,
        tx_hash: TxHash,
    },
    RecordingFailed {
        username: String,
        reason: String,
    },
    LedgerUnavailable {
        username: String,
    },
}

impl CheckInOutcome {
    /// Machine-readable outcome code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::ConnectionUnavailable => "connection_unavailable",
            Self::NoActivity { .. } => "no_activity",
            Self::ClockedIn { .. } => "clocked_in",
            Self::AlreadyRecorded { .. } => "already_recorded",
            Self::Recorded { .. } => "recorded",
            Self::RecordingFailed { .. } => "recording_failed",
            Self::LedgerUnavailable { .. } => "ledger_unavailable",
        }
    }

    /// Whether today's activity was confirmed
    pub fn clocked_in(&self) -> Option<bool> {
        match self {
            Self::NotConnected | Self::ConnectionUnavailable => None,
            Self::NoActivity { .. } => Some(false),
            _ => Some(true),
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::NotConnected | Self::ConnectionUnavailable => None,
            Self::NoActivity { username }
            | Self::ClockedIn { username }
            | Self::AlreadyRecorded { username, .. }
            | Self::Recorded { username, .. }
            | Self::RecordingFailed { username, .. }
            | Self::LedgerUnavailable { username } => Some(username),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotConnected => "GitHub connection required".to_string(),
            Self::ConnectionUnavailable => {
                "Connection lookup failed, please try again later".to_string()
            }
            Self::NoActivity { .. } => "No GitHub push found today".to_string(),
            Self::ClockedIn { .. } => "Clocked in: GitHub push found today".to_string(),
            Self::AlreadyRecorded { .. } => {
                "Clocked in: today's check-in is already recorded".to_string()
            }
            Self::Recorded { .. } => "Clocked in and recorded on-chain".to_string(),
            Self::RecordingFailed { reason, .. } => {
                format!("activity confirmed, recording failed: {}", reason)
            }
            Self::LedgerUnavailable { .. } => {
                "Clocked in, but the check-in ledger is unavailable".to_string()
            }
        }
    }

    pub fn into_response(self) -> CheckInResponse {
        let tx_hash = match &self {
            Self::Recorded { tx_hash, .. } => Some(tx_hash.clone()),
            _ => None,
        };

        CheckInResponse {
            success: self.clocked_in().is_some(),
            clocked_in: self.clocked_in(),
            message: self.message(),
            tx_hash,
            github_username: self.username().map(str::to_string),
            code: self.code(),
        }
    }
}

/// JSON body of the check endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clocked_in: Option<bool>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_username: Option<String>,
    pub code: &'static str,
}

/// The check-in orchestrator
pub struct CheckInService {
    connections: Arc<dyn ConnectionStore>,
    feed: Arc<dyn ActivityFeed>,
    records: Arc<dyn RecordStore>,
    chain: Arc<dyn ChainRecorder>,
    clock: Arc<dyn Clock>,
    config: CheckInConfig,
}

impl CheckInService {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        feed: Arc<dyn ActivityFeed>,
        records: Arc<dyn RecordStore>,
        chain: Arc<dyn ChainRecorder>,
        clock: Arc<dyn Clock>,
        config: CheckInConfig,
    ) -> Self {
        Self {
            connections,
            feed,
            records,
            chain,
            clock,
            config,
        }
    }

    /// Today in the reference timezone
    pub fn today(&self) -> CheckInDay {
        CheckInDay::for_instant(self.clock.now(), self.config.timezone)
    }

    /// Run one check for `wallet_address`, optionally recording `challenge_id`
    pub async fn check(&self, wallet_address: &str, challenge_id: Option<i64>) -> CheckInOutcome {
        let connection = match self.connections.get_by_wallet(wallet_address).await {
            Ok(Some(connection)) => connection,
            Ok(None) => return CheckInOutcome::NotConnected,
            Err(e) => {
                error!(wallet = %wallet_address, error = %e, "Connection lookup failed");
                return CheckInOutcome::ConnectionUnavailable;
            }
        };

        let username = connection.github_username.clone();
        let day = self.today();

        let active = self
            .feed
            .has_qualifying_activity(&username, connection.credential(), &day)
            .await;
        if !active {
            debug!(wallet = %wallet_address, username = %username, date = %day.date, "No activity today");
            return CheckInOutcome::NoActivity { username };
        }

        let Some(challenge_id) = challenge_id else {
            return CheckInOutcome::ClockedIn { username };
        };

        let key = CheckInKey::new(wallet_address, challenge_id, day.date);
        self.record(key, username).await
    }

    async fn record(&self, key: CheckInKey, username: String) -> CheckInOutcome {
        match self.records.find(&key).await {
            Ok(Some(existing)) if existing.is_recorded() => {
                debug!(key = %key, "Check-in already recorded");
                return CheckInOutcome::AlreadyRecorded {
                    username,
                    tx_hash: existing.tx_hash,
                };
            }
            Ok(_) => {}
            Err(e) => {
                error!(key = %key, error = %e, "Check-in ledger lookup failed");
                return CheckInOutcome::LedgerUnavailable { username };
            }
        }

        let now = self.clock.now();
        match self.records.claim(&key, now, self.config.claim_stale_after).await {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyRecorded { tx_hash }) => {
                return CheckInOutcome::AlreadyRecorded { username, tx_hash };
            }
            Ok(ClaimOutcome::InFlight) => {
                debug!(key = %key, "Check-in already being recorded");
                return CheckInOutcome::AlreadyRecorded {
                    username,
                    tx_hash: None,
                };
            }
            Err(e) => {
                error!(key = %key, error = %e, "Check-in claim failed");
                return CheckInOutcome::LedgerUnavailable { username };
            }
        }

        match self
            .chain
            .record_completion(&key.wallet_address, key.challenge_id)
            .await
        {
            Ok(tx_hash) => {
                self.mark_recorded(&key, now, &tx_hash).await;
                info!(key = %key, tx_hash = %tx_hash, "Check-in recorded");
                CheckInOutcome::Recorded { username, tx_hash }
            }
            Err(e) => {
                if let Err(release_err) = self.records.release(&key, now).await {
                    error!(key = %key, error = %release_err, "Failed to release check-in claim");
                }
                warn!(key = %key, error = %e, "Check-in recording failed");
                CheckInOutcome::RecordingFailed {
                    username,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Mark the claim taken at `claimed_at` recorded; the transaction has landed
    async fn mark_recorded(&self, key: &CheckInKey, claimed_at: DateTime<Utc>, tx_hash: &str) {
        for attempt in 1..=COMPLETE_ATTEMPTS {
            match self.records.complete(key, claimed_at, tx_hash).await {
                Ok(()) => return,
                Err(AgentError::NotFound(_)) => {
                    error!(key = %key, tx_hash = %tx_hash, "Check-in claim was taken over before it was marked recorded");
                    return;
                }
                Err(e) if attempt < COMPLETE_ATTEMPTS => {
                    warn!(key = %key, attempt, error = %e, "Retrying check-in completion");
                    tokio::time::sleep(COMPLETE_RETRY_DELAY).await;
                }
                Err(e) => {
                    // Left pending; a later request takes it over once stale
                    error!(key = %key, tx_hash = %tx_hash, error = %e, "Failed to mark check-in recorded");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::records::{InsertOutcome, MemoryRecordStore};
    use crate::db::schemas::{CheckInDoc, ConnectionDoc};
    use crate::db::MemoryConnectionStore;
    use crate::services::activity_feed::{
        ActivityEvent, EventPager, FeedConfig, FeedError, GitHubActivityFeed,
    };
    use crate::services::chain::ChainError;
    use crate::services::day::FixedClock;
    use crate::types::{AgentError, Result};
    use chrono::{DateTime, NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const WALLET: &str = "0xA1";

    struct MockFeed {
        active: bool,
        calls: AtomicUsize,
        days: Mutex<Vec<CheckInDay>>,
    }

    impl MockFeed {
        fn new(active: bool) -> Arc<Self> {
            Arc::new(Self {
                active,
                calls: AtomicUsize::new(0),
                days: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ActivityFeed for MockFeed {
        async fn has_qualifying_activity(
            &self,
            _username: &str,
            _credential: Option<&str>,
            day: &CheckInDay,
        ) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.days.lock().unwrap().push(*day);
            self.active
        }
    }

    struct MockChain {
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockChain {
        fn ok() -> Arc<Self> {
            Self::build(false, Duration::ZERO)
        }

        fn failing() -> Arc<Self> {
            Self::build(true, Duration::ZERO)
        }

        fn slow() -> Arc<Self> {
            Self::build(false, Duration::from_millis(50))
        }

        fn build(fail: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ChainRecorder for MockChain {
        async fn record_completion(
            &self,
            _wallet_address: &str,
            _challenge_id: i64,
        ) -> std::result::Result<TxHash, ChainError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                Err(ChainError::Rpc {
                    code: -32000,
                    message: "insufficient funds for gas".to_string(),
                })
            } else {
                Ok(format!("0x{:064x}", n + 1))
            }
        }
    }

    /// Record store that counts calls and can be made to fail
    #[derive(Default)]
    struct CountingRecords {
        inner: MemoryRecordStore,
        calls: AtomicUsize,
        broken: bool,
        /// `complete` calls that fail before one succeeds
        complete_failures: AtomicUsize,
    }

    impl CountingRecords {
        fn failing_complete(times: usize) -> Arc<Self> {
            Arc::new(Self {
                complete_failures: AtomicUsize::new(times),
                ..Default::default()
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                broken: true,
                ..Default::default()
            })
        }

        fn touch(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                Err(AgentError::Database("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl RecordStore for CountingRecords {
        async fn exists(&self, key: &CheckInKey) -> Result<bool> {
            self.touch()?;
            self.inner.exists(key).await
        }

        async fn find(&self, key: &CheckInKey) -> Result<Option<CheckInDoc>> {
            self.touch()?;
            self.inner.find(key).await
        }

        async fn insert(&self, record: CheckInDoc) -> Result<InsertOutcome> {
            self.touch()?;
            self.inner.insert(record).await
        }

        async fn claim(
            &self,
            key: &CheckInKey,
            now: DateTime<Utc>,
            stale_after: Duration,
        ) -> Result<ClaimOutcome> {
            self.touch()?;
            self.inner.claim(key, now, stale_after).await
        }

        async fn complete(
            &self,
            key: &CheckInKey,
            claimed_at: DateTime<Utc>,
            tx_hash: &str,
        ) -> Result<()> {
            self.touch()?;
            let failing = self
                .complete_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AgentError::Database("write concern timeout".into()));
            }
            self.inner.complete(key, claimed_at, tx_hash).await
        }

        async fn release(&self, key: &CheckInKey, claimed_at: DateTime<Utc>) -> Result<()> {
            self.touch()?;
            self.inner.release(key, claimed_at).await
        }
    }

    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    async fn connected() -> Arc<MemoryConnectionStore> {
        let store = Arc::new(MemoryConnectionStore::new());
        store
            .upsert(ConnectionDoc {
                wallet_address: WALLET.to_string(),
                github_username: "octocat".to_string(),
                access_token: "gho_token".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
    }

    fn service(
        connections: Arc<dyn ConnectionStore>,
        feed: Arc<dyn ActivityFeed>,
        records: Arc<dyn RecordStore>,
        chain: Arc<dyn ChainRecorder>,
        now: DateTime<Utc>,
    ) -> CheckInService {
        CheckInService::new(
            connections,
            feed,
            records,
            chain,
            Arc::new(FixedClock(now)),
            CheckInConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_unconnected_wallet_touches_nothing() {
        let feed = MockFeed::new(true);
        let records = Arc::new(CountingRecords::default());
        let chain = MockChain::ok();
        let svc = service(
            Arc::new(MemoryConnectionStore::new()),
            feed.clone(),
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        );

        let outcome = svc.check(WALLET, Some(7)).await;

        assert_eq!(outcome, CheckInOutcome::NotConnected);
        let response = outcome.into_response();
        assert!(!response.success);
        assert!(response.message.contains("connection required"));
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
        assert_eq!(records.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_activity_skips_ledger() {
        let records = Arc::new(CountingRecords::default());
        let chain = MockChain::ok();
        let svc = service(
            connected().await,
            MockFeed::new(false),
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        );

        let outcome = svc.check(WALLET, Some(7)).await;

        assert_eq!(outcome.code(), "no_activity");
        let response = outcome.into_response();
        assert!(response.success);
        assert_eq!(response.clocked_in, Some(false));
        assert_eq!(response.github_username.as_deref(), Some("octocat"));
        assert_eq!(records.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.calls(), 0);
    }

    #[tokio::test]
    async fn test_activity_without_challenge_only_clocks_in() {
        let records = Arc::new(CountingRecords::default());
        let chain = MockChain::ok();
        let svc = service(
            connected().await,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        );

        let outcome = svc.check(WALLET, None).await;

        assert_eq!(outcome.code(), "clocked_in");
        assert_eq!(outcome.clocked_in(), Some(true));
        assert_eq!(records.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_check_is_already_recorded() {
        let records = Arc::new(MemoryRecordStore::new());
        let chain = MockChain::ok();
        let svc = service(
            connected().await,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        );

        let first = svc.check(WALLET, Some(7)).await;
        let second = svc.check(WALLET, Some(7)).await;

        assert_eq!(first.code(), "recorded");
        let first = first.into_response();
        assert!(first.tx_hash.is_some());

        assert_eq!(second.code(), "already_recorded");
        let second = second.into_response();
        assert!(second.message.contains("already recorded"));
        assert_eq!(second.clocked_in, Some(true));
        assert!(second.tx_hash.is_none());

        assert_eq!(chain.calls(), 1);
        assert_eq!(records.recorded_count(), 1);
    }

    #[tokio::test]
    async fn test_chain_failure_leaves_no_record_and_retries() {
        let records = Arc::new(MemoryRecordStore::new());
        let connections = connected().await;
        let failing = MockChain::failing();
        let svc = service(
            connections.clone(),
            MockFeed::new(true),
            records.clone(),
            failing.clone(),
            utc(5, 11, 0),
        );

        let outcome = svc.check(WALLET, Some(7)).await;
        assert_eq!(outcome.code(), "recording_failed");
        let response = outcome.into_response();
        assert!(response.success);
        assert_eq!(response.clocked_in, Some(true));
        assert!(response
            .message
            .starts_with("activity confirmed, recording failed:"));
        assert!(response.tx_hash.is_none());
        assert!(records.is_empty());

        // Later the same day, with a healthy chain, the retry goes through
        let chain = MockChain::ok();
        let svc = service(
            connections,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 14, 0),
        );
        assert_eq!(svc.check(WALLET, Some(7)).await.code(), "recorded");
        assert_eq!(chain.calls(), 1);
        assert_eq!(records.recorded_count(), 1);
    }

    #[tokio::test]
    async fn test_ledger_outage_skips_submission() {
        let chain = MockChain::ok();
        let svc = service(
            connected().await,
            MockFeed::new(true),
            CountingRecords::broken(),
            chain.clone(),
            utc(5, 11, 0),
        );

        let response = svc.check(WALLET, Some(7)).await.into_response();

        assert_eq!(response.code, "ledger_unavailable");
        assert!(response.success);
        assert_eq!(response.clocked_in, Some(true));
        assert_eq!(chain.calls(), 0);
    }

    #[tokio::test]
    async fn test_same_reference_day_shares_one_record() {
        // 2024-01-04T16:30Z and 2024-01-05T15:00Z are both 2024-01-05 at +08:00
        let records = Arc::new(MemoryRecordStore::new());
        let connections = connected().await;
        let chain = MockChain::ok();

        let early = service(
            connections.clone(),
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(4, 16, 30),
        );
        let late = service(
            connections,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 15, 0),
        );

        assert_eq!(early.today().date, jan(5));
        assert_eq!(late.today().date, jan(5));
        assert_eq!(early.check(WALLET, Some(7)).await.code(), "recorded");
        assert_eq!(late.check(WALLET, Some(7)).await.code(), "already_recorded");
        assert_eq!(chain.calls(), 1);

        let key = CheckInKey::new(WALLET, 7, jan(5));
        assert!(records.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_feed_and_record_share_the_day() {
        let feed = MockFeed::new(true);
        let records = Arc::new(MemoryRecordStore::new());
        let svc = service(
            connected().await,
            feed.clone(),
            records.clone(),
            MockChain::ok(),
            utc(5, 11, 0),
        );

        svc.check(WALLET, Some(7)).await;

        let days = feed.days.lock().unwrap().clone();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, jan(5));
        assert_eq!(days[0].start_utc, utc(4, 16, 0));
        assert!(records
            .exists(&CheckInKey::new(WALLET, 7, days[0].date))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_checks_submit_once() {
        let records = Arc::new(MemoryRecordStore::new());
        let chain = MockChain::slow();
        let svc = Arc::new(service(
            connected().await,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move { svc.check(WALLET, Some(7)).await }));
        }

        let mut recorded = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap().code() {
                "recorded" => recorded += 1,
                "already_recorded" => already += 1,
                other => panic!("unexpected outcome {}", other),
            }
        }

        assert_eq!(recorded, 1);
        assert_eq!(already, 7);
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_claim_is_retried() {
        let records = Arc::new(MemoryRecordStore::new());
        let key = CheckInKey::new(WALLET, 7, jan(5));
        // A request that crashed mid-submission at 09:00
        records
            .claim(&key, utc(5, 1, 0), Duration::from_secs(300))
            .await
            .unwrap();

        let chain = MockChain::ok();
        let svc = service(
            connected().await,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        );

        assert_eq!(svc.check(WALLET, Some(7)).await.code(), "recorded");
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test]
    async fn test_completion_is_retried_after_landed_transaction() {
        let records = CountingRecords::failing_complete(2);
        let chain = MockChain::ok();
        let svc = service(
            connected().await,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        );

        assert_eq!(svc.check(WALLET, Some(7)).await.code(), "recorded");
        assert_eq!(records.inner.recorded_count(), 1);

        // Much later the same day the claim would be stale if left pending
        let later = service(
            connected().await,
            MockFeed::new(true),
            records.clone(),
            chain.clone(),
            utc(5, 15, 0),
        );
        assert_eq!(later.check(WALLET, Some(7)).await.code(), "already_recorded");
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test]
    async fn test_superseded_owner_keeps_hands_off_new_claim() {
        let records = Arc::new(MemoryRecordStore::new());
        let key = CheckInKey::new(WALLET, 7, jan(5));
        let svc = Arc::new(service(
            connected().await,
            MockFeed::new(true),
            records.clone(),
            MockChain::build(true, Duration::from_millis(100)),
            utc(5, 10, 0),
        ));

        let stalled = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.check(WALLET, Some(7)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Another request takes the claim over while the first is still submitting
        assert_eq!(
            records
                .claim(&key, utc(5, 11, 0), Duration::from_secs(300))
                .await
                .unwrap(),
            ClaimOutcome::Claimed
        );

        assert_eq!(stalled.await.unwrap().code(), "recording_failed");
        let live = records.find(&key).await.unwrap().unwrap();
        assert!(!live.is_recorded());
        assert_eq!(live.claimed_at, utc(5, 11, 0));
    }

    /// Serves one fixed page of events
    struct StaticPager(Vec<ActivityEvent>);

    #[async_trait::async_trait]
    impl EventPager for StaticPager {
        async fn fetch_page(
            &self,
            _username: &str,
            _credential: Option<&str>,
            page: u32,
            _per_page: u32,
        ) -> std::result::Result<Vec<ActivityEvent>, FeedError> {
            Ok(if page == 1 { self.0.clone() } else { Vec::new() })
        }
    }

    #[tokio::test]
    async fn test_push_on_reference_day_is_recorded_once() {
        // Wallet 0xA1, challenge 7, push at 2024-01-05T10:00Z,
        // day start 2024-01-05T00:00+08:00
        let feed = Arc::new(GitHubActivityFeed::new(
            Arc::new(StaticPager(vec![ActivityEvent::new("PushEvent", utc(5, 10, 0))])),
            FeedConfig::default(),
        ));
        let records = Arc::new(MemoryRecordStore::new());
        let chain = MockChain::ok();
        let svc = service(
            connected().await,
            feed,
            records.clone(),
            chain.clone(),
            utc(5, 11, 0),
        );

        let first = svc.check(WALLET, Some(7)).await.into_response();
        assert!(first.success);
        assert_eq!(first.clocked_in, Some(true));
        assert_eq!(first.code, "recorded");
        let tx_hash = first.tx_hash.clone().unwrap();

        let stored = records
            .find(&CheckInKey::new(WALLET, 7, jan(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.check_in_date, "2024-01-05");
        assert_eq!(stored.tx_hash.as_deref(), Some(tx_hash.as_str()));

        let second = svc.check(WALLET, Some(7)).await.into_response();
        assert_eq!(second.code, "already_recorded");
        assert_eq!(chain.calls(), 1);
    }

    #[test]
    fn test_response_json_shape() {
        let json = serde_json::to_value(
            CheckInOutcome::Recorded {
                username: "octocat".into(),
                tx_hash: "0xabc".into(),
            }
            .into_response(),
        )
        .unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["clockedIn"], true);
        assert_eq!(json["txHash"], "0xabc");
        assert_eq!(json["githubUsername"], "octocat");
        assert_eq!(json["code"], "recorded");

        let json = serde_json::to_value(CheckInOutcome::NotConnected.into_response()).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("clockedIn").is_none());
        assert!(json.get("githubUsername").is_none());
    }
}
