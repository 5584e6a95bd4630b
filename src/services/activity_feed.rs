//! Activity feed client
//!
//! Decides whether a GitHub user pushed anything during the current check-in
//! day. The public events feed is newest-first, so the scan walks it lazily
//! page by page and stops at the first event older than the day start.
//!
//! Every failure (network, auth, rate limit, malformed body, timeout) is
//! logged and reported as "no activity": the check can always be retried,
//! while a false positive would be recorded permanently.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::day::CheckInDay;

/// Event type that counts as daily activity
pub const QUALIFYING_EVENT_TYPE: &str = "PushEvent";

/// GitHub's page size ceiling for the events API
pub const MAX_PAGE_SIZE: u32 = 100;

/// One entry of a user's event feed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(kind: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            created_at,
        }
    }

    pub fn is_qualifying(&self) -> bool {
        self.kind == QUALIFYING_EVENT_TYPE
    }
}

/// Why a feed page could not be read
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),

    #[error("credential rejected")]
    Unauthorized,

    #[error("rate limited (reset at {reset:?})")]
    RateLimited { reset: Option<i64> },

    #[error("user not found: {0}")]
    NotFound(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed feed: {0}")]
    Parse(String),

    #[error("feed scan timed out")]
    Timeout,
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Fetches single pages of a user's event feed
#[async_trait::async_trait]
pub trait EventPager: Send + Sync {
    /// Page `page` (1-based) of the feed, newest first. An empty page means
    /// the feed is exhausted.
    async fn fetch_page(
        &self,
        username: &str,
        credential: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ActivityEvent>, FeedError>;
}

/// Events API pager over reqwest
pub struct GitHubEventPager {
    api_url: String,
    http_client: reqwest::Client,
}

impl GitHubEventPager {
    pub fn new(api_url: impl Into<String>, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("checkin-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    fn events_url(&self, username: &str) -> String {
        format!(
            "{}/users/{}/events",
            self.api_url,
            urlencoding::encode(username)
        )
    }
}

/// Map a non-success status to a feed error
fn status_error(status: StatusCode, headers: &HeaderMap, username: &str) -> FeedError {
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());

    match status {
        StatusCode::TOO_MANY_REQUESTS => FeedError::RateLimited { reset },
        StatusCode::FORBIDDEN if remaining == Some(0) => FeedError::RateLimited { reset },
        StatusCode::UNAUTHORIZED => FeedError::Unauthorized,
        StatusCode::NOT_FOUND => FeedError::NotFound(username.to_string()),
        other => FeedError::Status(other.as_u16()),
    }
}

#[async_trait::async_trait]
impl EventPager for GitHubEventPager {
    async fn fetch_page(
        &self,
        username: &str,
        credential: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ActivityEvent>, FeedError> {
        let mut request = self
            .http_client
            .get(self.events_url(username))
            .query(&[("per_page", per_page), ("page", page)])
            .header(ACCEPT, "application/vnd.github+json");

        // No credential means an anonymous request for public events
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers(), username));
        }

        let events: Vec<ActivityEvent> = response.json().await?;
        debug!(username = %username, page, count = events.len(), "Fetched event page");
        Ok(events)
    }
}

/// Scan limits for one check
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub page_size: u32,
    pub max_pages: u32,
    pub max_events: usize,
    /// Whole-scan timeout
    pub scan_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_pages: 3,
            max_events: 300,
            scan_timeout: Duration::from_secs(15),
        }
    }
}

/// Answers "did this user act today?"
#[async_trait::async_trait]
pub trait ActivityFeed: Send + Sync {
    /// True only if a qualifying event exists at or after `day.start_utc`.
    /// Never fails; errors are logged and read as false.
    async fn has_qualifying_activity(
        &self,
        username: &str,
        credential: Option<&str>,
        day: &CheckInDay,
    ) -> bool;
}

/// Budgeted, lazily paginated scan of a GitHub event feed
pub struct GitHubActivityFeed {
    pager: Arc<dyn EventPager>,
    config: FeedConfig,
}

impl GitHubActivityFeed {
    pub fn new(pager: Arc<dyn EventPager>, config: FeedConfig) -> Self {
        Self { pager, config }
    }

    /// Events newest first, fetched one page at a time as the consumer pulls.
    /// Ends on an empty or short page, or when the page/event budget runs out.
    fn events<'a>(
        &'a self,
        username: &'a str,
        credential: Option<&'a str>,
    ) -> impl Stream<Item = Result<ActivityEvent, FeedError>> + Send + 'a {
        let page_size = self.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let max_pages = self.config.max_pages;
        let pager = &self.pager;

        stream::try_unfold(Some(1u32), move |next_page| async move {
            let Some(page) = next_page.filter(|page| *page <= max_pages) else {
                return Ok::<_, FeedError>(None);
            };

            let events = pager.fetch_page(username, credential, page, page_size).await?;
            if events.is_empty() {
                return Ok(None);
            }

            let next = if (events.len() as u32) < page_size {
                None
            } else {
                Some(page + 1)
            };
            Ok(Some((stream::iter(events.into_iter().map(Ok::<_, FeedError>)), next)))
        })
        .try_flatten()
        .take(self.config.max_events)
    }

    async fn scan(
        &self,
        username: &str,
        credential: Option<&str>,
        day: &CheckInDay,
    ) -> Result<bool, FeedError> {
        let mut events = Box::pin(self.events(username, credential));
        let mut inspected = 0usize;

        while let Some(event) = events.try_next().await? {
            inspected += 1;
            if !day.includes(event.created_at) {
                debug!(username = %username, inspected, "Reached events before day start");
                return Ok(false);
            }
            if event.is_qualifying() {
                debug!(username = %username, inspected, at = %event.created_at, "Found qualifying event");
                return Ok(true);
            }
        }

        debug!(username = %username, inspected, "Feed exhausted without qualifying event");
        Ok(false)
    }
}

#[async_trait::async_trait]
impl ActivityFeed for GitHubActivityFeed {
    async fn has_qualifying_activity(
        &self,
        username: &str,
        credential: Option<&str>,
        day: &CheckInDay,
    ) -> bool {
        let result = tokio::time::timeout(
            self.config.scan_timeout,
            self.scan(username, credential, day),
        )
        .await
        .unwrap_or(Err(FeedError::Timeout));

        match result {
            Ok(found) => found,
            Err(e) => {
                warn!(username = %username, error = %e, "Activity feed check failed, treating as no activity");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use std::sync::Mutex;

    /// Serves canned pages and records which pages were requested
    struct MockPager {
        pages: Vec<Result<Vec<ActivityEvent>, FeedError>>,
        requested: Mutex<Vec<(u32, Option<String>)>>,
    }

    impl MockPager {
        fn new(pages: Vec<Vec<ActivityEvent>>) -> Arc<Self> {
            Self::with_results(pages.into_iter().map(Ok).collect())
        }

        fn with_results(pages: Vec<Result<Vec<ActivityEvent>, FeedError>>) -> Arc<Self> {
            Arc::new(Self {
                pages,
                requested: Mutex::new(Vec::new()),
            })
        }

        fn requested_pages(&self) -> Vec<u32> {
            self.requested.lock().unwrap().iter().map(|(p, _)| *p).collect()
        }
    }

    #[async_trait::async_trait]
    impl EventPager for MockPager {
        async fn fetch_page(
            &self,
            _username: &str,
            credential: Option<&str>,
            page: u32,
            _per_page: u32,
        ) -> Result<Vec<ActivityEvent>, FeedError> {
            self.requested
                .lock()
                .unwrap()
                .push((page, credential.map(str::to_string)));
            match self.pages.get(page as usize - 1) {
                Some(Ok(events)) => Ok(events.clone()),
                Some(Err(FeedError::Unauthorized)) => Err(FeedError::Unauthorized),
                Some(Err(e)) => Err(FeedError::Network(e.to_string())),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Never answers within any reasonable timeout
    struct StalledPager;

    #[async_trait::async_trait]
    impl EventPager for StalledPager {
        async fn fetch_page(
            &self,
            _username: &str,
            _credential: Option<&str>,
            _page: u32,
            _per_page: u32,
        ) -> Result<Vec<ActivityEvent>, FeedError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn day() -> CheckInDay {
        CheckInDay::for_date(
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            FixedOffset::east_opt(8 * 3600).unwrap(),
        )
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn feed(pager: Arc<dyn EventPager>, page_size: u32) -> GitHubActivityFeed {
        GitHubActivityFeed::new(
            pager,
            FeedConfig {
                page_size,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_push_after_day_start_qualifies() {
        // Push at 2024-01-05T10:00Z against a 2024-01-05T00:00+08:00 threshold
        let pager = MockPager::new(vec![vec![ActivityEvent::new("PushEvent", at(5, 10))]]);
        let feed = feed(pager.clone(), 100);

        assert!(feed.has_qualifying_activity("octocat", None, &day()).await);
    }

    #[tokio::test]
    async fn test_events_before_threshold_do_not_qualify() {
        let pager = MockPager::new(vec![vec![
            ActivityEvent::new("PushEvent", at(4, 15)),
            ActivityEvent::new("PushEvent", at(3, 12)),
        ]]);
        let feed = feed(pager, 100);

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
    }

    #[tokio::test]
    async fn test_non_push_events_today_do_not_qualify() {
        let pager = MockPager::new(vec![vec![
            ActivityEvent::new("WatchEvent", at(5, 9)),
            ActivityEvent::new("IssuesEvent", at(5, 1)),
        ]]);
        let feed = feed(pager, 100);

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
    }

    #[tokio::test]
    async fn test_empty_feed_is_no_activity() {
        let pager = MockPager::new(vec![]);
        let feed = feed(pager.clone(), 100);

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
        assert_eq!(pager.requested_pages(), vec![1]);
    }

    #[tokio::test]
    async fn test_scan_stops_at_first_old_event() {
        // Page 1 ends with an event from yesterday; the push on page 2 is
        // older still and must never be fetched.
        let pager = MockPager::new(vec![
            vec![
                ActivityEvent::new("WatchEvent", at(5, 2)),
                ActivityEvent::new("WatchEvent", at(4, 10)),
            ],
            vec![ActivityEvent::new("PushEvent", at(5, 1))],
        ]);
        let feed = feed(pager.clone(), 2);

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
        assert_eq!(pager.requested_pages(), vec![1]);
    }

    #[tokio::test]
    async fn test_scan_continues_onto_next_page() {
        let pager = MockPager::new(vec![
            vec![
                ActivityEvent::new("WatchEvent", at(5, 8)),
                ActivityEvent::new("IssuesEvent", at(5, 7)),
            ],
            vec![ActivityEvent::new("PushEvent", at(5, 6))],
        ]);
        let feed = feed(pager.clone(), 2);

        assert!(feed.has_qualifying_activity("octocat", Some("gho_x"), &day()).await);
        assert_eq!(pager.requested_pages(), vec![1, 2]);
        let requested = pager.requested.lock().unwrap();
        assert!(requested.iter().all(|(_, c)| c.as_deref() == Some("gho_x")));
    }

    #[tokio::test]
    async fn test_short_page_ends_feed() {
        let pager = MockPager::new(vec![vec![ActivityEvent::new("WatchEvent", at(5, 8))]]);
        let feed = feed(pager.clone(), 2);

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
        assert_eq!(pager.requested_pages(), vec![1]);
    }

    #[tokio::test]
    async fn test_page_budget_limits_scan() {
        let busy_page = || vec![ActivityEvent::new("WatchEvent", at(5, 9))];
        let pager = MockPager::new(vec![
            busy_page(),
            busy_page(),
            vec![ActivityEvent::new("PushEvent", at(5, 8))],
        ]);
        let feed = GitHubActivityFeed::new(
            pager.clone(),
            FeedConfig {
                page_size: 1,
                max_pages: 2,
                ..Default::default()
            },
        );

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
        assert_eq!(pager.requested_pages(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_event_budget_limits_scan() {
        let pager = MockPager::new(vec![vec![
            ActivityEvent::new("WatchEvent", at(5, 9)),
            ActivityEvent::new("WatchEvent", at(5, 8)),
            ActivityEvent::new("PushEvent", at(5, 7)),
        ]]);
        let feed = GitHubActivityFeed::new(
            pager,
            FeedConfig {
                max_events: 2,
                ..Default::default()
            },
        );

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
    }

    #[tokio::test]
    async fn test_fetch_error_fails_closed() {
        let pager = MockPager::with_results(vec![Err(FeedError::Unauthorized)]);
        let feed = feed(pager, 100);

        assert!(!feed.has_qualifying_activity("octocat", Some("revoked"), &day()).await);
    }

    #[tokio::test]
    async fn test_error_after_qualifying_event_is_not_reached() {
        let pager = MockPager::with_results(vec![
            Ok(vec![ActivityEvent::new("PushEvent", at(5, 3))]),
            Err(FeedError::Status(500)),
        ]);
        let feed = feed(pager, 1);

        assert!(feed.has_qualifying_activity("octocat", None, &day()).await);
    }

    #[tokio::test]
    async fn test_stalled_feed_times_out_as_no_activity() {
        let feed = GitHubActivityFeed::new(
            Arc::new(StalledPager),
            FeedConfig {
                scan_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        assert!(!feed.has_qualifying_activity("octocat", None, &day()).await);
    }

    #[test]
    fn test_event_deserializes_from_github_payload() {
        let json = r#"{
            "id": "1",
            "type": "PushEvent",
            "actor": {"login": "octocat"},
            "created_at": "2024-01-05T10:00:00Z"
        }"#;
        let event: ActivityEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_qualifying());
        assert_eq!(event.created_at, at(5, 10));
    }

    #[test]
    fn test_rate_limit_status_mapping() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1704450000".parse().unwrap());

        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, &headers, "octocat"),
            FeedError::RateLimited { reset: Some(1704450000) }
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, &HeaderMap::new(), "octocat"),
            FeedError::Status(403)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, &HeaderMap::new(), "octocat"),
            FeedError::Unauthorized
        ));
    }

    #[test]
    fn test_events_url_encodes_username() {
        let pager = GitHubEventPager::new("https://api.github.com/", Duration::from_secs(1));
        assert_eq!(
            pager.events_url("octo cat"),
            "https://api.github.com/users/octo%20cat/events"
        );
    }
}
