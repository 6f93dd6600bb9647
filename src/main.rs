// Módulos de la aplicación
mod analysis;
mod api;
mod app_state;
mod auth;
mod bias_parser;
mod config;
mod history;
mod ingest;
mod llm;
mod neo4j_client;
mod normalize;
mod profile;
mod record;
mod store;

use crate::app_state::AppState;
use crate::profile::LocalObjectStore;
use crate::store::Neo4jStore;
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;
    info!(
        provider = ?cfg.llm_provider,
        model = %cfg.llm_chat_model,
        timeout = ?cfg.analysis_timeout,
        "Configuración cargada"
    );

    // 3. Conectar a Neo4j y asegurar esquemas
    let graph = Arc::new(neo4j_client::connect_from_config(&cfg).await?);
    neo4j_client::ensure_schema(&graph).await?;
    let store = Arc::new(Neo4jStore::new(graph.clone()));

    // 4. Colaboradores externos: LLM y almacenamiento de fotos
    let generator = Arc::new(llm::LlmManager::from_config(&cfg));
    let objects = Arc::new(LocalObjectStore::new(cfg.photo_dir.clone()));
    tokio::fs::create_dir_all(objects.root()).await?;

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        graph,
        generator,
        analyses: store.clone(),
        profiles: store,
        objects: objects.clone(),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de fotos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .nest_service(profile::PUBLIC_PREFIX, ServeDir::new(objects.root()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
