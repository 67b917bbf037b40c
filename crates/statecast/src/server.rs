//! HTTP server
//!
//! Serves the current snapshot as JSON. Handlers only read through the
//! presenter and never wait on the ingestion worker.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use statecast_core::{Snapshot, SnapshotPresenter};

/// Route serving the snapshot
pub const DATA_ROUTE: &str = "/api/data";

async fn get_data(State(presenter): State<SnapshotPresenter>) -> Json<Snapshot> {
    Json(presenter.get())
}

/// Build the axum application router
///
/// Separated from `run_server` to enable testing without TCP binding.
pub(crate) fn build_app(presenter: SnapshotPresenter) -> Router {
    Router::new()
        .route(DATA_ROUTE, get(get_data))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(presenter)
}

/// Run the HTTP server until `cancel` fires
pub async fn run_server(
    host: &str,
    port: u16,
    presenter: SnapshotPresenter,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = build_app(presenter);

    let listener = TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "statecast server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
