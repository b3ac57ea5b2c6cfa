//! Server lifecycle (spec.md §4.6): port-selection bind loop, CORS/preflight,
//! rate limiting, request logging, route assembly, identity refresher,
//! idempotent shutdown.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::PORT_CANDIDATES;
use crate::handlers;
use crate::middleware::eckrypto::EcKryptoState;
use crate::middleware::{dt4a, eckrypto, presence};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no candidate port could be bound: {0:?}")]
    NoPortAvailable(Vec<u16>),
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Owns the bound listener and the shutdown signal. Not `Clone`; `interrupt`
/// is obtained up front via [`Server::interrupt_handle`] before `run`
/// consumes the server (spec.md §9 "everything is owned by the Server value").
pub struct Server {
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state, shutdown: CancellationToken::new() }
    }

    /// A cheap, cloneable handle whose `interrupt()` is idempotent and never
    /// blocks regardless of how many callers invoke it concurrently (spec.md
    /// §4.6, testable property 4) — `CancellationToken::cancel` already has
    /// exactly that contract.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(self.shutdown.clone())
    }

    /// Try each candidate port in order; the first successful bind wins
    /// (spec.md §4.6 "Bind", testable property 5).
    async fn bind() -> Result<tokio::net::TcpListener, ServerError> {
        for &port in PORT_CANDIDATES.iter() {
            match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    tracing::info!(port, "bound loopback listener");
                    return Ok(listener);
                }
                Err(err) => {
                    tracing::debug!(port, error = %err, "candidate port unavailable");
                }
            }
        }
        Err(ServerError::NoPortAvailable(PORT_CANDIDATES.to_vec()))
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let listener = Self::bind().await?;

        crate::identity::spawn_refresher(self.state.identity.clone(), self.state.querier.clone());

        let app = build_router(self.state.clone());
        let shutdown = self.shutdown.clone();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

/// Cloneable interrupt trigger (spec.md §4.6 "Interrupt(err) must be
/// idempotent and must never block when called concurrently multiple
/// times").
#[derive(Clone)]
pub struct InterruptHandle(CancellationToken);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.cancel();
    }
}

/// `EcKryptoMiddleware` always rebuilds the inner request with method `POST`
/// regardless of the outer request's method (spec.md §4.4 step 6), so every
/// route here must accept `POST` even though each handler is documented
/// elsewhere by its conceptual method (spec.md §6).
fn inner_mux() -> Router<Arc<AppState>> {
    Router::new()
        .route("/id", any(handlers::id::handle))
        .route("/acceleratecontrol", any(handlers::accelerate::handle))
        .route("/query", any(handlers::query::handle))
        .route("/scheduledquery", any(handlers::scheduled_query::handle))
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    let authenticated_mux = inner_mux()
        .layer(axum::middleware::from_fn_with_state(state.clone(), presence::hook))
        .with_state(state.clone());

    let ec_state = EcKryptoState { app: state.clone(), authenticated_mux };
    let eckrypto_router: Router = Router::new()
        .route("/v0/cmd", any(eckrypto::handle))
        .route("/v1/cmd", any(eckrypto::handle))
        .with_state(ec_state);

    let dt4a_router: Router = Router::new()
        .route("/dt4a", any(dt4a::handle))
        .route("/v3/dt4a", any(dt4a::handle))
        .with_state(state.clone());

    let ping_router: Router = Router::new().route("/ping", get(handlers::ping::handle));

    let limiter: Arc<GlobalRateLimiter> = Arc::new(RateLimiter::direct(
        Quota::per_second(NonZeroU32::new(state.config.rate_limit_per_sec.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(state.config.rate_limit_burst.max(1)).unwrap()),
    ));

    ping_router
        .merge(eckrypto_router)
        .merge(dt4a_router)
        .layer(axum::middleware::from_fn_with_state(limiter, rate_limit))
        .layer(build_cors_layer(&state.config.origin_allowlist, &state.config.origin_allowed_suffixes))
        .layer(TraceLayer::new_for_http())
}

/// CORS/preflight, including `Access-Control-Allow-Private-Network: true`
/// (spec.md §4.6, §6 headers).
fn build_cors_layer(allowlist: &[String], brand_suffixes: &[String]) -> CorsLayer {
    let allowlist = allowlist.to_vec();
    let brand_suffixes = brand_suffixes.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _parts| {
            origin
                .to_str()
                .map(|s| crate::origin::is_allowlisted(s, &allowlist, &brand_suffixes))
                .unwrap_or(false)
        }))
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_private_network(true)
}

/// Token-bucket rate limiting (spec.md §4.6 "5/s, burst 10; on deny, 429 with
/// text body").
async fn rate_limit(State(limiter): State<Arc<GlobalRateLimiter>>, request: Request, next: Next) -> Response {
    if limiter.check().is_err() {
        return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    }
    next.run(request).await
}
