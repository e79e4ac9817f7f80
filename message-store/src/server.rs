use axum::routing::get;
use axum::Router;
use health::HealthRegistry;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

pub async fn management_index() -> &'static str {
    "message store management"
}

/// Serves `_readiness`, `_liveness` and `metrics`, separate from the API
/// listener.
pub fn management_router(health: HealthRegistry) -> Router {
    let recorder_handle = setup_metrics_recorder();
    Router::new()
        .route("/", get(management_index))
        .route("/_readiness", get(management_index))
        .route(
            "/_liveness",
            get(move || std::future::ready(health.status())),
        )
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
}

/// Binds and serves a router until the cancellation token fires.
pub async fn serve(
    router: Router,
    bind: String,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("listening on {}", bind);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
