//! Loopback listener for breach signals from the browser extension.
//!
//! The extension posts to `/devtools-detected` when its pages see developer
//! tools open. Browsers send a CORS preflight first, so `OPTIONS` is answered
//! on every path.

use crate::error::{GuardError, GuardResult};
use axum::{
    Router,
    extract::State,
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use vecna_license::{FatalAction, TamperReason};

/// Port the extension expects.
pub const DEFAULT_SIGNAL_PORT: u16 = 31337;

/// Loopback address for a port.
#[must_use]
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

async fn devtools_detected(State(fatal): State<Arc<dyn FatalAction>>) -> StatusCode {
    error!("Extension reported open developer tools");
    // Respond before the defense runs; it may end the process.
    tokio::spawn(async move {
        fatal.trigger(TamperReason::DevTools).await;
    });
    StatusCode::OK
}

fn preflight() -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
        .into_response()
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        preflight()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Builds the listener's router.
pub fn build_router(fatal: Arc<dyn FatalAction>) -> Router {
    Router::new()
        .route(
            "/devtools-detected",
            post(devtools_detected).fallback(fallback),
        )
        .fallback(fallback)
        .with_state(fatal)
}

/// Serves on `127.0.0.1:port` until `stop` flips.
pub async fn serve_signal_listener(
    port: u16,
    fatal: Arc<dyn FatalAction>,
    mut stop: watch::Receiver<bool>,
) -> GuardResult<()> {
    let addr = loopback(port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| GuardError::Bind { addr, source })?;
    info!("Signal listener on {}", addr);

    axum::serve(listener, build_router(fatal))
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await?;
    Ok(())
}
