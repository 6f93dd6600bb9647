use crate::config::AppConfig;
use anyhow::{anyhow, Context, Result};
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

const BOLT_SCHEMES: [&str; 6] = ["bolt", "bolt+s", "bolt+ssc", "neo4j", "neo4j+s", "neo4j+ssc"];
const DEFAULT_BOLT_PORT: u16 = 7687;

/// `host:puerto` para el driver a partir de `NEO4J_URI`.
fn bolt_address(uri: &str) -> Result<String> {
    let url = Url::parse(uri).with_context(|| format!("NEO4J_URI inválida: '{uri}'"))?;
    if !BOLT_SCHEMES.contains(&url.scheme()) {
        return Err(anyhow!(
            "Esquema '{}' no soportado en NEO4J_URI (se espera bolt:// o neo4j://)",
            url.scheme()
        ));
    }
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(DEFAULT_BOLT_PORT);
    Ok(format!("{host}:{port}"))
}

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let addr = bolt_address(&cfg.neo4j_uri)?;

    info!(user = %cfg.neo4j_user, "Conectando a Neo4j en {addr} para el historial de análisis...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password)
        .await
        .with_context(|| format!("No se pudo conectar a Neo4j en {addr}"))?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints e índices para las etiquetas usadas en el grafo:
/// :User y :Analysis
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // User.id único
        "CREATE CONSTRAINT user_id IF NOT EXISTS
         FOR (u:User)
         REQUIRE u.id IS UNIQUE",
        // Analysis.id único
        "CREATE CONSTRAINT analysis_id IF NOT EXISTS
         FOR (a:Analysis)
         REQUIRE a.id IS UNIQUE",
        // El historial siempre se filtra por propietario
        "CREATE INDEX analysis_owner IF NOT EXISTS
         FOR (a:Analysis)
         ON (a.ownerId)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints e índices creados).");
    Ok(())
}
