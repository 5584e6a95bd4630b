//! HTTP routes for the GitHub check-in flow
//!
//! - GET /agent/github/auth     - Redirect to GitHub to link a wallet
//! - GET /agent/github/callback - OAuth callback, stores the connection
//! - GET /agent/github/status   - Whether a wallet has linked GitHub
//! - GET /agent/github/check    - Verify today's activity, optionally record it

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::schemas::ConnectionDoc;
use crate::server::AppState;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Path prefix of every route in this module
pub const GITHUB_ROUTE_PREFIX: &str = "/agent/github";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletQuery {
    #[serde(default)]
    wallet_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckQuery {
    #[serde(default)]
    wallet_address: Option<String>,
    #[serde(default)]
    challenge_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_avatar_url: Option<String>,
}

// =============================================================================
// Helpers
// =============================================================================

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

fn error_response(status: StatusCode, message: impl Into<String>, code: &str) -> Response<BoxBody> {
    json_response(
        status,
        &ErrorResponse {
            error: message.into(),
            code: Some(code.to_string()),
        },
    )
}

fn redirect(location: &str) -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .header("Cache-Control", "no-store")
        .body(empty_body())
        .unwrap()
}

fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

fn parse_query<'a, T: Deserialize<'a>>(query: Option<&'a str>) -> Result<T, Response<BoxBody>> {
    serde_urlencoded::from_str(query.unwrap_or("")).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid query string: {}", e),
            "bad_query",
        )
    })
}

/// Wallet addresses are case-insensitive hex; store and compare them lowercased
fn normalize_wallet(wallet: Option<String>) -> Option<String> {
    wallet
        .map(|w| w.trim().to_ascii_lowercase())
        .filter(|w| !w.is_empty())
}

fn missing_wallet() -> Response<BoxBody> {
    error_response(
        StatusCode::BAD_REQUEST,
        "walletAddress is required",
        "missing_wallet",
    )
}

/// Frontend dashboard URL carrying the connect result
fn dashboard_url(frontend_url: &str, result: Result<&str, &str>) -> String {
    let base = frontend_url.trim_end_matches('/');
    match result {
        Ok(login) => format!(
            "{}/dashboard?github_connected=true&github_user={}",
            base,
            urlencoding::encode(login)
        ),
        Err(kind) => format!(
            "{}/dashboard?github_connected=false&error={}",
            base,
            urlencoding::encode(kind)
        ),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /agent/github/auth?walletAddress=...
async fn handle_auth(query: Option<&str>, state: Arc<AppState>) -> Response<BoxBody> {
    let params: WalletQuery = match parse_query(query) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let Some(wallet) = normalize_wallet(params.wallet_address) else {
        return missing_wallet();
    };

    match state.oauth.authorization_url(&wallet) {
        Ok(url) => {
            info!(wallet = %wallet, "Redirecting to GitHub authorization");
            redirect(&url)
        }
        Err(e) => {
            warn!(error = %e, "Cannot start GitHub authorization");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string(), e.kind())
        }
    }
}

/// GET /agent/github/callback?code=...&state=<wallet>
async fn handle_callback(query: Option<&str>, state: Arc<AppState>) -> Response<BoxBody> {
    let frontend = state.args.frontend_url.as_str();
    let params: CallbackQuery = match parse_query(query) {
        Ok(p) => p,
        Err(_) => return redirect(&dashboard_url(frontend, Err("bad_query"))),
    };

    if let Some(error) = params.error {
        warn!(error = %error, "GitHub authorization was not granted");
        return redirect(&dashboard_url(frontend, Err("access_denied")));
    }

    let (Some(code), Some(wallet)) = (
        params.code.filter(|c| !c.is_empty()),
        normalize_wallet(params.state),
    ) else {
        return redirect(&dashboard_url(frontend, Err("missing_code")));
    };

    let token = match state.oauth.exchange_code_for_token(&code).await {
        Ok(token) => token,
        Err(e) => {
            warn!(wallet = %wallet, error = %e, "GitHub code exchange failed");
            return redirect(&dashboard_url(frontend, Err(e.kind())));
        }
    };

    let profile = match state.oauth.get_user_profile(&token.access_token).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!(wallet = %wallet, error = %e, "GitHub profile fetch failed");
            return redirect(&dashboard_url(frontend, Err(e.kind())));
        }
    };

    let connection = ConnectionDoc {
        wallet_address: wallet.clone(),
        github_id: profile.id,
        github_username: profile.login.clone(),
        github_avatar_url: profile.avatar_url,
        access_token: token.access_token,
        token_type: token.token_type,
        scope: token.scope,
        ..Default::default()
    };

    if let Err(e) = state.connections.upsert(connection).await {
        warn!(wallet = %wallet, error = %e, "Failed to store GitHub connection");
        return redirect(&dashboard_url(frontend, Err("storage")));
    }

    info!(wallet = %wallet, github_user = %profile.login, "GitHub account connected");
    redirect(&dashboard_url(frontend, Ok(&profile.login)))
}

/// GET /agent/github/status?walletAddress=...
async fn handle_status(query: Option<&str>, state: Arc<AppState>) -> Response<BoxBody> {
    let params: WalletQuery = match parse_query(query) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let Some(wallet) = normalize_wallet(params.wallet_address) else {
        return missing_wallet();
    };

    match state.connections.get_by_wallet(&wallet).await {
        Ok(connection) => json_response(
            StatusCode::OK,
            &StatusResponse {
                connected: connection.is_some(),
                github_username: connection.as_ref().map(|c| c.github_username.clone()),
                github_avatar_url: connection.and_then(|c| c.github_avatar_url),
            },
        ),
        Err(e) => {
            warn!(wallet = %wallet, error = %e, "Connection lookup failed");
            let (status, message) = e.into_status_code_and_body();
            error_response(status, message, "store_unavailable")
        }
    }
}

/// GET /agent/github/check?walletAddress=...&challengeId=...
async fn handle_check(query: Option<&str>, state: Arc<AppState>) -> Response<BoxBody> {
    let params: CheckQuery = match parse_query(query) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let Some(wallet) = normalize_wallet(params.wallet_address) else {
        return missing_wallet();
    };

    let challenge_id = match params.challenge_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) if id >= 0 => Some(id),
            _ => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("challengeId must be a non-negative integer: {}", raw),
                    "bad_challenge_id",
                )
            }
        },
    };

    let outcome = state.check_in.check(&wallet, challenge_id).await;
    info!(wallet = %wallet, challenge_id = ?challenge_id, code = outcome.code(), "Check-in evaluated");
    json_response(StatusCode::OK, &outcome.into_response())
}

// =============================================================================
// Router
// =============================================================================

/// Route `/agent/github/*`; `None` for paths outside the prefix
pub async fn handle_github_request(
    method: &Method,
    path: &str,
    query: Option<&str>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    if !path.starts_with(GITHUB_ROUTE_PREFIX) {
        return None;
    }

    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let response = match (method, path) {
        (&Method::GET, "/agent/github/auth") => handle_auth(query, state).await,
        (&Method::GET, "/agent/github/callback") => handle_callback(query, state).await,
        (&Method::GET, "/agent/github/status") => handle_status(query, state).await,
        (&Method::GET, "/agent/github/check") => handle_check(query, state).await,

        (_, "/agent/github/auth")
        | (_, "/agent/github/callback")
        | (_, "/agent/github/status")
        | (_, "/agent/github/check") => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &ErrorResponse {
                error: "Method not allowed".into(),
                code: None,
            },
        ),

        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "GitHub endpoint not found".into(),
                code: None,
            },
        ),
    };

    Some(response)
}
