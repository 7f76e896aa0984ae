use crate::{
    catalog::DiseaseCatalog,
    classifier::Classifier,
    config::{Config, Validatable},
    labels::LabelMapper,
    model_service::ModelService,
    ort_service::OrtModelService,
    pipeline::InferencePipeline,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};

pub struct SharedState<M: ModelService> {
    pub pipeline: Arc<InferencePipeline<M>>,
    pub metrics: Arc<Metrics>,
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

pub fn build_router<M: ModelService>(
    state: SharedState<M>,
    max_upload_bytes: usize,
    cors_allow_any_origin: bool,
) -> Router {
    let router = Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(HttpMetricsLayerBuilder::new().build());

    if cors_allow_any_origin {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        pipeline: InferencePipeline<M>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let state = SharedState {
            pipeline: Arc::new(pipeline),
            metrics: Arc::new(Metrics::new()?),
        };
        let router = build_router(
            state,
            config.server.max_upload_bytes,
            config.server.cors_allow_any_origin,
        );

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            })
            .await?;

        Ok(())
    }
}

/// A model that fails to load leaves the server up with predictions
/// answering "model unavailable".
fn load_classifier(config: &Config, num_classes: usize) -> Classifier<OrtModelService> {
    if let Err(e) = config.model.validate() {
        tracing::warn!("Model unavailable: {}", e);
        return Classifier::unavailable(e);
    }

    match OrtModelService::new(&config.model) {
        Ok(service) => Classifier::ready(service, num_classes),
        Err(e) => {
            tracing::error!(
                "Failed to load model from {:?}: {}",
                config.model.get_path(),
                e
            );
            Classifier::unavailable(e.to_string())
        }
    }
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let mapper = LabelMapper::from_file(&config.labels.get_path())?;
    let catalog = DiseaseCatalog::from_file(&config.catalog.get_path())?;
    tracing::info!(
        "Loaded {} class labels and {} catalog records",
        mapper.num_classes(),
        catalog.len()
    );

    let classifier = load_classifier(&config, mapper.num_classes());
    let pipeline = InferencePipeline::new(
        classifier,
        mapper,
        catalog,
        config.model.get_inference_timeout(),
    );

    let server = HttpServer::new(pipeline, &config).await?;
    server.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
