use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_server::tls_rustls::RustlsConfig;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::Error;
use crate::admission::handler::{AdmissionHandler, MUTATE_PATH};

/// `/` answers liveness probes, `/mutate` takes admission reviews and every
/// other path is passed to the admission handler to be rejected there.
pub fn router(handler: Arc<AdmissionHandler>) -> Router {
    Router::new()
        .route("/", get(health).post(health))
        .route(MUTATE_PATH, post(mutate))
        .fallback(mutate)
        .with_state(handler)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn mutate(
    State(handler): State<Arc<AdmissionHandler>>,
    uri: Uri,
    body: Bytes,
) -> Response {
    match handler.handle(uri.path(), &body).await {
        Ok(review) => ([(header::CONTENT_TYPE, "application/json")], review).into_response(),
        Err(err) => {
            warn!({ path = uri.path(), err = %err }, "rejecting admission request");
            err.into_response()
        }
    }
}

/// Serves `router` over TLS only, there is no plaintext listener.
pub async fn serve(
    addr: SocketAddr,
    cert: &Path,
    key: &Path,
    router: Router,
) -> Result<(), Error> {
    let tls = RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| format!("failed to load TLS certificate {cert:?} and key {key:?}"))?;

    info!({ addr = %addr }, "service started");

    axum_server::bind_rustls(addr, tls)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
