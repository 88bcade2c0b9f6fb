use std::{num::NonZeroUsize, sync::Arc};

use api_router::{api_routes, api_state::ApiState};
use axum::Router;
use common::{error::AppError, utils::config::AppConfig};
use retrieval_pipeline::{DenseIndex, DenseIndexOptions, QueryCache, RetrievalBackend, SearchGateway};
use tracing::info;

use crate::{args::ServeArgs, commands::ServePlan};

/// Listener settings after applying flags over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cache_size: NonZeroUsize,
    pub checkpoint: Option<String>,
}

impl ServerSettings {
    pub fn resolve(args: &ServeArgs, config: &AppConfig) -> Result<Self, AppError> {
        let cache_size = args.cache_size.unwrap_or(config.cache_size);
        let cache_size = NonZeroUsize::new(cache_size).ok_or_else(|| {
            AppError::Validation("--cache-size must be at least 1".to_string())
        })?;

        Ok(Self {
            host: args.host.clone().unwrap_or_else(|| config.http_host.clone()),
            port: args.port.unwrap_or(config.http_port),
            cache_size,
            checkpoint: args.checkpoint.clone().or_else(|| config.checkpoint.clone()),
        })
    }
}

pub fn build_router(gateway: Arc<SearchGateway>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .with_state(ApiState::new(gateway))
}

/// Open the index, wrap it in a cached gateway and serve until shutdown.
pub async fn serve(
    plan: ServePlan,
    settings: ServerSettings,
    config: &AppConfig,
) -> Result<(), AppError> {
    let backend = DenseIndex::open(
        &plan.index_root,
        &plan.index_name,
        plan.collection_path.as_deref(),
        DenseIndexOptions {
            checkpoint: settings.checkpoint.clone(),
            embedding_cache_dir: Some(config.fastembed_cache_dir()),
        },
    )
    .await?;
    let backend: Arc<dyn RetrievalBackend> = Arc::new(backend);

    let gateway = Arc::new(SearchGateway::new(
        backend,
        QueryCache::new(settings.cache_size),
    ));
    let app = build_router(gateway);

    info!(
        index = %plan.index_name,
        index_root = %plan.index_root.display(),
        collection = ?plan.collection_path,
        "Serving index"
    );

    let serve_address = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&serve_address).await?;
    info!("Starting server listening on {serve_address}");
    axum::serve(listener, app).await?;
    Ok(())
}
