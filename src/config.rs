//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + análisis).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,

    /// Tiempo máximo para las dos llamadas de generación de un análisis.
    pub analysis_timeout: Duration,
    /// Tamaño máximo (en caracteres) del texto enviado al modelo.
    pub max_document_chars: usize,
    /// Raíz del almacenamiento local de fotos de perfil.
    pub photo_dir: PathBuf,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());

        let analysis_timeout = Duration::from_secs(parse_var("ANALYSIS_TIMEOUT_SECS", 120)?);
        let max_document_chars = parse_var("MAX_DOCUMENT_CHARS", 100_000)?;
        let photo_dir = PathBuf::from(env::var("PHOTO_DIR").unwrap_or_else(|_| "storage".to_string()));

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_chat_model,
            analysis_timeout,
            max_document_chars,
            photo_dir,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}
