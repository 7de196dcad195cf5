use crate::{
    annotate::Annotator,
    config::Config,
    inference_service::InferenceService,
    labels::LabelMap,
    ort_service::OrtModelService,
    server::HttpServer,
    storage::OutputStore,
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let labels = match LabelMap::new(config.labels.as_ref()) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::error!("Failed to load labels: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let store = OutputStore::new(&config.output, &config.server.public_base_url)?;
    let annotator = Annotator::new(&config.annotation)?;

    let inference_service = Arc::new(InferenceService::new(
        model_service,
        labels,
        annotator,
        store,
        config.detection.confidence_threshold,
    ));
    let metrics = Arc::new(Metrics::new()?);

    let server = HttpServer::new(inference_service, metrics, &config).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server_handle = server.run(shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
