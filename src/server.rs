//! HTTP server assembly: router, middleware, and the bind/serve loop (§6).

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::{
    self, cache_clear, cache_info, generate, health, rag_delete_collection, rag_health,
    rag_list_collections, rag_manage,
};
use crate::config::ServiceConfig;

pub struct WebServer {
    config: ServiceConfig,
    state: Arc<api::AppState>,
}

impl WebServer {
    pub fn new(config: ServiceConfig) -> Self {
        let state = Arc::new(api::AppState::new(config.clone()));
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
            ])
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health))
            .route("/v1/generate", post(generate))
            .route("/v1/rag/manage", post(rag_manage))
            .route("/v1/rag/health", post(rag_health))
            .route("/v1/rag/collections", post(rag_list_collections))
            .route("/v1/rag/collections/{name}", delete(rag_delete_collection))
            .route("/v1/cache/info", get(cache_info))
            .route("/v1/cache/clear", delete(cache_clear))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    pub async fn start(self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.http.bind_addr, self.config.http.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "listening");
        axum::serve(listener, self.router()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        let server = WebServer::new(ServiceConfig::default());
        let _router = server.router();
    }
}
