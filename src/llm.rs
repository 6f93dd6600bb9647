//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Están implementados OpenAI y Gemini; Ollama queda preparado para el futuro.

use async_trait::async_trait;
use rig::completion::Prompt;
use thiserror::Error;
use tracing::debug;

use crate::config::{AppConfig, LlmProvider};

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Error de transporte, cuota o respuesta del proveedor.
    #[error("error del proveedor LLM: {0}")]
    Provider(String),

    #[error("proveedor LLM {0:?} aún no implementado para generación")]
    Unsupported(LlmProvider),
}

/// Endpoint de generación de texto: un prompt entra, un texto sale.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        }
    }

    fn model_name(&self, fallback: &'static str) -> &str {
        if self.chat_model.is_empty() {
            fallback
        } else {
            self.chat_model.as_str()
        }
    }

    async fn generate_with_openai(&self, prompt: &str) -> Result<String, GenerationError> {
        use rig::providers::openai;
        // Traits para Client::from_env() y client.agent(...)
        use rig::client::{CompletionClient as _, ProviderClient as _};

        // Lee OPENAI_API_KEY del entorno
        let client = openai::Client::from_env();
        let agent = client.agent(self.model_name("gpt-4o-mini")).build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))
    }

    async fn generate_with_gemini(&self, prompt: &str) -> Result<String, GenerationError> {
        use rig::providers::gemini;
        use rig::client::{CompletionClient as _, ProviderClient as _};

        // Lee GEMINI_API_KEY del entorno
        let client = gemini::Client::from_env();
        let agent = client.agent(self.model_name("gemini-2.0-flash")).build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))
    }
}

#[async_trait]
impl TextGenerator for LlmManager {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        debug!(provider = ?self.provider, chars = prompt.len(), "Enviando prompt al LLM");
        match self.provider {
            LlmProvider::OpenAI => self.generate_with_openai(prompt).await,
            LlmProvider::Gemini => self.generate_with_gemini(prompt).await,
            ref other => Err(GenerationError::Unsupported(other.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ollama_is_reported_as_unsupported() {
        let manager = LlmManager {
            provider: LlmProvider::Ollama,
            chat_model: String::new(),
        };
        let err = manager.generate("hola").await.unwrap_err();
        assert!(matches!(err, GenerationError::Unsupported(LlmProvider::Ollama)));
    }

    #[test]
    fn empty_model_falls_back_to_provider_default() {
        let manager = LlmManager {
            provider: LlmProvider::Gemini,
            chat_model: String::new(),
        };
        assert_eq!(manager.model_name("gemini-2.0-flash"), "gemini-2.0-flash");
    }
}
