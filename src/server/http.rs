//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::db::{
    ConnectionStore, MemoryConnectionStore, MemoryRecordStore, MongoClient, MongoConnectionStore,
    MongoRecordStore, RecordStore,
};
use crate::routes;
use crate::services::{
    ChainRecorder, CheckInConfig, CheckInService, DisabledChainRecorder, FeedConfig,
    GitHubActivityFeed, GitHubEventPager, GitHubOAuthService, JsonRpcChainRecorder, OAuthService,
    SystemClock,
};
use crate::types::AgentError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Present when the stores are MongoDB-backed
    pub mongo: Option<MongoClient>,
    /// Wallet ↔ GitHub connections, written by the OAuth callback
    pub connections: Arc<dyn ConnectionStore>,
    pub oauth: Arc<dyn OAuthService>,
    pub check_in: Arc<CheckInService>,
}

impl AppState {
    /// Create AppState with in-memory stores (dev mode, tests)
    pub fn new(args: Args) -> Self {
        let connections: Arc<dyn ConnectionStore> = Arc::new(MemoryConnectionStore::new());
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        Self::build(args, None, connections, records)
    }

    /// Create AppState with MongoDB-backed stores
    pub async fn with_mongo(args: Args, mongo: MongoClient) -> Result<Self, AgentError> {
        let connections: Arc<dyn ConnectionStore> =
            Arc::new(MongoConnectionStore::new(&mongo).await?);
        let records: Arc<dyn RecordStore> = Arc::new(MongoRecordStore::new(&mongo).await?);
        Ok(Self::build(args, Some(mongo), connections, records))
    }

    fn build(
        args: Args,
        mongo: Option<MongoClient>,
        connections: Arc<dyn ConnectionStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        let oauth: Arc<dyn OAuthService> =
            Arc::new(GitHubOAuthService::new(&args.github, args.http_timeout()));

        let pager = Arc::new(GitHubEventPager::new(
            args.github.github_api_url.clone(),
            args.http_timeout(),
        ));
        let feed = Arc::new(GitHubActivityFeed::new(
            pager,
            FeedConfig {
                page_size: args.feed_page_size,
                max_pages: args.feed_max_pages,
                max_events: args.feed_max_events,
                scan_timeout: args.feed_timeout(),
            },
        ));

        let chain: Arc<dyn ChainRecorder> =
            match JsonRpcChainRecorder::from_args(&args.chain, args.http_timeout()) {
                Some(recorder) => Arc::new(recorder),
                None => Arc::new(DisabledChainRecorder),
            };

        let check_in = Arc::new(CheckInService::new(
            Arc::clone(&connections),
            feed,
            records,
            chain,
            Arc::new(SystemClock),
            CheckInConfig {
                timezone: args.checkin_utc_offset,
                claim_stale_after: args.claim_stale_after(),
            },
        ));

        Self {
            args,
            mongo,
            connections,
            oauth,
            check_in,
        }
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), AgentError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Check-in agent listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - OAuth app may be unconfigured");
    }
    if !state.args.chain_enabled() {
        warn!("Chain recording disabled - checks with a challenge will report recording_failed");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    Ok(dispatch(state, &method, &path, query.as_deref()).await)
}

/// Route a request by method and path
async fn dispatch(
    state: Arc<AppState>,
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> Response<BoxBody> {
    if let Some(response) =
        routes::handle_github_request(method, path, query, Arc::clone(&state)).await
    {
        return response;
    }

    match (method, path) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            to_boxed(routes::health_check(state))
        }
        (&Method::GET, "/version") => to_boxed(routes::version_info()),
        (&Method::OPTIONS, _) => to_boxed(preflight_response()),
        _ => to_boxed(not_found_response(path)),
    }
}

fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "Check-in endpoints live under /agent/github"
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
