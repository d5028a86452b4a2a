//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection. Requests are
//! buffered (bodies are small JSON documents) and handed to [`dispatch`],
//! which does the routing and never fails: every error becomes a JSON
//! response with the mapped status.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{resolve_actor, JwtValidator};
use crate::config::Args;
use crate::ledger::Ledger;
use crate::logging::AuditLogger;
use crate::routes::{self, json_response};
use crate::services::{
    CoinExchange, PaymentAuthorizer, ReviewAggregator, SettlementEngine, WalletQueryService,
};
use crate::types::{LedgerError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub ledger: Ledger,
    pub settlement: SettlementEngine,
    pub reviews: ReviewAggregator,
    pub exchange: CoinExchange,
    pub wallet: WalletQueryService,
    pub jwt: JwtValidator,
    pub audit: AuditLogger,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services over one ledger
    pub fn new(
        args: Args,
        ledger: Ledger,
        authorizer: Arc<dyn PaymentAuthorizer>,
        audit: AuditLogger,
    ) -> Result<Self> {
        let secret = args
            .jwt_secret()
            .ok_or_else(|| LedgerError::Config("JWT_SECRET is required".into()))?;
        let jwt = JwtValidator::new(secret, args.jwt_expiry_seconds)?;

        Ok(Self {
            settlement: SettlementEngine::new(ledger.clone(), audit.clone()),
            reviews: ReviewAggregator::new(ledger.clone(), audit.clone()),
            exchange: CoinExchange::new(
                ledger.clone(),
                authorizer,
                audit.clone(),
                &args.payment_currency,
            ),
            wallet: WalletQueryService::new(ledger.clone()),
            args,
            ledger,
            jwt,
            audit,
            started_at: Instant::now(),
        })
    }

    /// Account the request acts as
    pub fn actor(&self, headers: &HeaderMap) -> Result<String> {
        resolve_actor(headers, &self.jwt, self.args.dev_mode)
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Ledger listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - default secrets and X-Actor-Id accepted");
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
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(to_boxed(preflight_response()));
    }

    let declared_len = req
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > MAX_BODY_BYTES) {
        return Ok(to_boxed(payload_too_large_response()));
    }

    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            debug!("[{}] rejected body: {}", addr, err);
            return Ok(to_boxed(payload_too_large_response()));
        }
    };

    let response = dispatch(
        &state,
        &method,
        &path,
        query.as_deref(),
        &parts.headers,
        body,
    )
    .await;

    Ok(to_boxed(with_cors(response)))
}

/// Route one buffered request
pub async fn dispatch(
    state: &AppState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let result = match (method, segments.as_slice()) {
        (&Method::GET, ["health"] | ["healthz"]) => Ok(routes::health_check(state)),
        (&Method::GET, ["ready"] | ["readyz"]) => Ok(routes::readiness_check(state).await),
        (&Method::GET, ["version"]) => Ok(routes::version_info()),

        // Public reads
        (&Method::GET, ["api", "v1", "leaderboard"]) => routes::leaderboard(state, query).await,
        (&Method::GET, ["api", "v1", "mentors", mentor_id, "reviews"]) => {
            routes::mentor_reviews(state, mentor_id, query).await
        }

        (_, ["api", "v1", rest @ ..]) => match state.actor(headers) {
            Ok(actor) => route_api(state, method, rest, query, &actor, &body).await,
            Err(err) => Err(err),
        },

        _ => return not_found_response(path),
    };

    result.unwrap_or_else(|err| {
        if !err.is_idempotent_conflict() && err.status_code().is_server_error() {
            error!(method = %method, path, error = %err, "Request failed");
        } else {
            debug!(method = %method, path, error = %err, "Request rejected");
        }
        routes::error_response(err)
    })
}

/// Authenticated `/api/v1` routes
async fn route_api(
    state: &AppState,
    method: &Method,
    segments: &[&str],
    query: Option<&str>,
    actor: &str,
    body: &Bytes,
) -> Result<Response<Full<Bytes>>> {
    match (method, segments) {
        (&Method::POST, ["accounts"]) => routes::open_account(state, actor, body).await,
        (&Method::GET, ["wallet"]) => routes::wallet_summary(state, actor).await,
        (&Method::GET, ["wallet", "transactions"]) => {
            routes::wallet_transactions(state, actor, query).await
        }

        (&Method::POST, ["sessions"]) => routes::request_session(state, actor, body).await,
        (&Method::GET, ["sessions"]) => routes::list_sessions(state, actor).await,
        (&Method::GET, ["sessions", id]) => routes::get_session(state, actor, id).await,
        (&Method::POST, ["sessions", id, "respond"]) => {
            routes::respond_to_request(state, actor, id, body).await
        }
        (&Method::POST, ["sessions", id, "link"]) => {
            routes::attach_meeting_link(state, actor, id, body).await
        }
        (&Method::POST, ["sessions", id, "complete"]) => {
            routes::mark_complete(state, actor, id).await
        }
        (&Method::POST, ["sessions", id, "review"]) => {
            routes::submit_review(state, actor, id, body).await
        }

        (&Method::POST, ["payments", "orders"]) => {
            routes::create_order(state, actor, body).await
        }
        (&Method::POST, ["payments", "verify"]) => {
            routes::verify_payment(state, actor, body).await
        }
        (&Method::POST, ["sales"]) => routes::create_sale(state, actor, body).await,
        (&Method::GET, ["admin", "audit"]) => routes::audit_trail(state, actor, query).await,
        (&Method::POST, ["admin", "sales", id, "paid"]) => {
            routes::mark_sale_paid(state, actor, id).await
        }

        _ => Err(LedgerError::NotFound(format!(
            "No route for {} /api/v1/{}",
            method,
            segments.join("/")
        ))),
    }
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

fn with_cors(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    response.headers_mut().insert(
        hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        hyper::header::HeaderValue::from_static("*"),
    );
    response
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        hyper::header::HeaderValue::from_static("*"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_HEADERS,
        hyper::header::HeaderValue::from_static("*"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_METHODS,
        hyper::header::HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    response
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "error": "not_found",
            "message": format!("No route for {}", path),
        }),
    )
}

fn payload_too_large_response() -> Response<Full<Bytes>> {
    with_cors(json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &serde_json::json!({
            "error": "validation_error",
            "message": format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
        }),
    ))
}
