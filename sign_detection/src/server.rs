use crate::{
    config::Config, inference_service::InferenceService, routes::api_routes,
    storage::STATIC_ROUTE, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

#[derive(Clone)]
pub struct SharedState {
    pub inference_service: Arc<InferenceService>,
    pub metrics: Arc<Metrics>,
}

/// Application routes plus the static directory holding annotated images.
pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    let static_files = ServeDir::new(state.inference_service.store().static_dir());

    Router::new()
        .merge(api_routes())
        .nest_service(STATIC_ROUTE, static_files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(
        inference_service: Arc<InferenceService>,
        metrics: Arc<Metrics>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState {
            inference_service,
            metrics,
        };

        let router =
            build_router(app_state, config.server.max_upload_bytes).layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok::<_, anyhow::Error>(())
        });

        Ok(server_handle)
    }
}
