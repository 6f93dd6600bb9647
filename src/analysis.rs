//! Orquestación del análisis de un documento.
//!
//! Flujo:
//!   1. Comprueba la identidad del usuario (sin identidad no hay llamadas al LLM).
//!   2. Valida el texto del documento (vacío o demasiado grande).
//!   3. Lanza en paralelo el resumen y la detección de sesgos, con timeout.
//!   4. Normaliza ambos textos, parsea el informe y construye el registro.
//!   5. Persiste el registro; si falla, el error lo devuelve para reintentar.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::try_join;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    auth::IdentityProvider,
    bias_parser::{parse_bias_report, BiasReport},
    llm::{GenerationError, TextGenerator},
    normalize::normalize,
    record::{average_confidence, build_record, AnalysisRecord, DocumentMeta},
    store::{AnalysisStore, StoreError},
};

const BIAS_PROMPT_TEMPLATE: &str = r#"
Analyze this legal document for potential biases. For each bias found:
1. Identify the type of bias
2. Quote the specific text
3. Calculate confidence score (0-100%)
4. Suggest neutral alternatives

Format as:
Type: [bias type]
Text: "[quoted text]"
Confidence: [X]%
Alternative: [suggestion]

Text to analyze: "#;

pub fn summary_prompt(text: &str) -> String {
    format!("Summarize this legal document: {text}")
}

pub fn bias_prompt(text: &str) -> String {
    format!("{}{text}", BIAS_PROMPT_TEMPLATE.trim_start())
}

/// Cuál de las dos generaciones falló.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationTask {
    Summary,
    BiasDetection,
}

impl fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Summary => write!(f, "resumen"),
            Self::BiasDetection => write!(f, "detección de sesgos"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("se requiere un usuario autenticado para analizar documentos")]
    AuthRequired,

    #[error("el documento no contiene texto")]
    EmptyDocument,

    #[error("el documento tiene {chars} caracteres y el máximo es {max}")]
    DocumentTooLarge { chars: usize, max: usize },

    #[error("falló la generación de {task}: {source}")]
    Generation {
        task: GenerationTask,
        #[source]
        source: GenerationError,
    },

    #[error("el LLM no respondió en {0:?}")]
    Timeout(Duration),

    /// El análisis se generó pero no se pudo guardar; `record` permite reintentar.
    #[error("no se pudo guardar el análisis: {source}")]
    Persistence {
        record: Box<AnalysisRecord>,
        #[source]
        source: StoreError,
    },
}

/// Estados por los que pasa una ejecución de `Analyzer::analyze`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Requesting,
    Processing,
    Persisted,
    Failed,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub timeout: Duration,
    pub max_document_chars: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_document_chars: 100_000,
        }
    }
}

/// Resultado de un análisis persistido.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Registro guardado, con `id` asignado.
    pub record: AnalysisRecord,
    pub report: BiasReport,
}

/// Coordina identidad, generación y almacenamiento para un análisis.
pub struct Analyzer {
    identity: Arc<dyn IdentityProvider>,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn AnalysisStore>,
    settings: AnalysisSettings,
    state: Mutex<AnalysisState>,
}

impl Analyzer {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn AnalysisStore>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            identity,
            generator,
            store,
            settings,
            state: Mutex::new(AnalysisState::Idle),
        }
    }

    pub fn state(&self) -> AnalysisState {
        *self.state.lock().unwrap()
    }

    fn transition(&self, next: AnalysisState, file_name: &str) {
        let mut state = self.state.lock().unwrap();
        info!(from = ?*state, to = ?next, file = file_name, "Transición del análisis");
        *state = next;
    }

    /// Analiza el texto de un documento y persiste el resultado.
    pub async fn analyze(
        &self,
        document_text: &str,
        meta: DocumentMeta,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let file_name = meta.file_name.clone();

        // 1) Identidad: sin usuario no se hace ninguna llamada
        let Some(user) = self.identity.current_user() else {
            warn!("Análisis de '{file_name}' rechazado: no hay usuario autenticado");
            self.transition(AnalysisState::Rejected, &file_name);
            return Err(AnalysisError::AuthRequired);
        };

        // 2) Validación del documento
        if let Err(err) = self.validate(document_text) {
            warn!("Análisis de '{file_name}' rechazado: {err}");
            self.transition(AnalysisState::Rejected, &file_name);
            return Err(err);
        }

        // 3) Resumen y sesgos en paralelo; ambos deben terminar
        self.transition(AnalysisState::Requesting, &file_name);
        let (raw_summary, raw_bias) = match self.request_both(document_text).await {
            Ok(pair) => pair,
            Err(err) => {
                error!("Análisis de '{file_name}' fallido: {err}");
                self.transition(AnalysisState::Failed, &file_name);
                return Err(err);
            }
        };

        // 4) Post-procesado
        self.transition(AnalysisState::Processing, &file_name);
        let summary_text = normalize(&raw_summary);
        let bias_text = normalize(&raw_bias);
        let report = parse_bias_report(&bias_text);
        let record = build_record(
            &report.findings,
            summary_text,
            bias_text,
            meta,
            &user.uid,
        );

        // 5) Persistencia
        let record = self.persist(record).await?;
        info!(
            "Análisis de '{}' completado: {} sesgos, confianza media {:.1}%",
            record.file_name, record.bias_count, record.bias_confidence
        );
        Ok(AnalysisOutcome { record, report })
    }

    /// Guarda un registro ya generado. Sirve también para reintentar tras un
    /// `AnalysisError::Persistence` sin volver a llamar al LLM.
    ///
    /// `bias_count` y `bias_confidence` se recalculan siempre desde
    /// `bias_report_text`; los valores que traiga el registro no se guardan.
    pub async fn persist(&self, mut record: AnalysisRecord) -> Result<AnalysisRecord, AnalysisError> {
        let file_name = record.file_name.clone();
        if self.identity.current_user().is_none() {
            self.transition(AnalysisState::Rejected, &file_name);
            return Err(AnalysisError::AuthRequired);
        }

        let report = parse_bias_report(&record.bias_report_text);
        let bias_count = report.findings.len();
        let bias_confidence = average_confidence(&report.findings);
        if record.bias_count != bias_count || record.bias_confidence != bias_confidence {
            warn!(
                "Agregados de '{file_name}' inconsistentes ({} / {}); se recalculan ({bias_count} / {bias_confidence})",
                record.bias_count, record.bias_confidence
            );
        }
        record.bias_count = bias_count;
        record.bias_confidence = bias_confidence;

        match self.store.insert(&record).await {
            Ok(id) => {
                record.id = Some(id);
                self.transition(AnalysisState::Persisted, &file_name);
                Ok(record)
            }
            Err(source) => {
                error!("No se pudo guardar el análisis de '{file_name}': {source}");
                self.transition(AnalysisState::Failed, &file_name);
                Err(AnalysisError::Persistence {
                    record: Box::new(record),
                    source,
                })
            }
        }
    }

    fn validate(&self, document_text: &str) -> Result<(), AnalysisError> {
        if document_text.trim().is_empty() {
            return Err(AnalysisError::EmptyDocument);
        }
        let chars = document_text.chars().count();
        if chars > self.settings.max_document_chars {
            return Err(AnalysisError::DocumentTooLarge {
                chars,
                max: self.settings.max_document_chars,
            });
        }
        Ok(())
    }

    /// Si se descarta este future, las dos peticiones en curso se cancelan con él.
    async fn request_both(&self, document_text: &str) -> Result<(String, String), AnalysisError> {
        let summary_prompt = summary_prompt(document_text);
        let bias_prompt = bias_prompt(document_text);

        let summary = async {
            self.generator
                .generate(&summary_prompt)
                .await
                .map_err(|source| AnalysisError::Generation {
                    task: GenerationTask::Summary,
                    source,
                })
        };
        let bias = async {
            self.generator
                .generate(&bias_prompt)
                .await
                .map_err(|source| AnalysisError::Generation {
                    task: GenerationTask::BiasDetection,
                    source,
                })
        };

        tokio::time::timeout(self.settings.timeout, try_join(summary, bias))
            .await
            .map_err(|_| AnalysisError::Timeout(self.settings.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{HeaderIdentity, UserIdentity};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    struct SignedIn;

    impl IdentityProvider for SignedIn {
        fn current_user(&self) -> Option<UserIdentity> {
            Some(UserIdentity {
                uid: "user-1".to_string(),
                email: None,
            })
        }
    }

    /// Responde según el prompt y cuenta las llamadas.
    #[derive(Default)]
    struct ScriptedGenerator {
        calls: AtomicUsize,
        summary: Option<String>,
        bias: Option<String>,
        delay: Option<Duration>,
    }

    impl ScriptedGenerator {
        fn ok(summary: &str, bias: &str) -> Self {
            Self {
                summary: Some(summary.to_string()),
                bias: Some(bias.to_string()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let answer = if prompt.starts_with("Summarize") {
                &self.summary
            } else {
                &self.bias
            };
            answer
                .clone()
                .ok_or_else(|| GenerationError::Provider("quota exceeded".to_string()))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl AnalysisStore for FailingStore {
        async fn insert(&self, _record: &AnalysisRecord) -> Result<String, StoreError> {
            Err(StoreError::Other("database unavailable".to_string()))
        }

        async fn query_by_owner(&self, _owner_id: &str) -> Result<Vec<AnalysisRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn meta() -> DocumentMeta {
        DocumentMeta {
            file_name: "contrato.txt".to_string(),
            file_type: "txt".to_string(),
            file_size: 64,
            last_modified: Utc::now(),
        }
    }

    const BIAS_RESPONSE: &str = "Type: Gender Bias\nText: \"he will decide\"\nConfidence: 82%\nAlternative: they will decide\n";

    fn analyzer(
        identity: Arc<dyn IdentityProvider>,
        generator: Arc<ScriptedGenerator>,
        store: Arc<dyn AnalysisStore>,
    ) -> Analyzer {
        Analyzer::new(identity, generator, store, AnalysisSettings::default())
    }

    #[tokio::test]
    async fn successful_run_persists_one_record() {
        let generator = Arc::new(ScriptedGenerator::ok("## Summary\n**Lease** terms", BIAS_RESPONSE));
        let store = Arc::new(MemoryStore::default());
        let analyzer = analyzer(Arc::new(SignedIn), generator.clone(), store.clone());

        let outcome = assert_ok!(analyzer.analyze("The tenant shall pay.", meta()).await);

        assert_eq!(generator.calls(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(analyzer.state(), AnalysisState::Persisted);
        assert!(outcome.record.id.is_some());
        assert_eq!(outcome.record.owner_id, "user-1");
        assert_eq!(outcome.record.summary_text, "Summary:\n\nLease terms");
        assert_eq!(outcome.record.bias_count, 1);
        assert_eq!(outcome.record.bias_confidence, 82.0);
        assert_eq!(outcome.report.findings[0].confidence, 82);
        assert_eq!(outcome.record.bias_report_text, outcome.report.display_text);
    }

    #[tokio::test]
    async fn empty_bias_response_gives_zero_confidence() {
        let generator = Arc::new(ScriptedGenerator::ok("summary", ""));
        let store = Arc::new(MemoryStore::default());
        let analyzer = analyzer(Arc::new(SignedIn), generator, store);

        let outcome = assert_ok!(analyzer.analyze("text", meta()).await);
        assert!(outcome.report.findings.is_empty());
        assert_eq!(outcome.record.bias_count, 0);
        assert_eq!(outcome.record.bias_confidence, 0.0);
        assert_eq!(outcome.report.display_text, normalize(""));
    }

    #[tokio::test]
    async fn missing_identity_rejects_without_network_calls() {
        let generator = Arc::new(ScriptedGenerator::ok("s", BIAS_RESPONSE));
        let store = Arc::new(MemoryStore::default());
        let analyzer = analyzer(Arc::new(HeaderIdentity::default()), generator.clone(), store.clone());

        let err = assert_err!(analyzer.analyze("text", meta()).await);
        assert!(matches!(err, AnalysisError::AuthRequired));
        assert_eq!(generator.calls(), 0);
        assert_eq!(store.len(), 0);
        assert_eq!(analyzer.state(), AnalysisState::Rejected);
    }

    #[tokio::test]
    async fn bias_failure_fails_whole_run() {
        let generator = Arc::new(ScriptedGenerator {
            summary: Some("summary".to_string()),
            bias: None,
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::default());
        let analyzer = analyzer(Arc::new(SignedIn), generator.clone(), store.clone());

        let err = assert_err!(analyzer.analyze("text", meta()).await);
        assert!(matches!(
            err,
            AnalysisError::Generation {
                task: GenerationTask::BiasDetection,
                ..
            }
        ));
        assert_eq!(store.len(), 0);
        assert_eq!(analyzer.state(), AnalysisState::Failed);
    }

    #[tokio::test]
    async fn empty_and_oversized_documents_are_rejected_locally() {
        let generator = Arc::new(ScriptedGenerator::ok("s", "b"));
        let store = Arc::new(MemoryStore::default());
        let analyzer = Analyzer::new(
            Arc::new(SignedIn),
            generator.clone(),
            store,
            AnalysisSettings {
                max_document_chars: 10,
                ..Default::default()
            },
        );

        let err = assert_err!(analyzer.analyze("  \n ", meta()).await);
        assert!(matches!(err, AnalysisError::EmptyDocument));

        let err = assert_err!(analyzer.analyze("ñandú ñandú ñandú", meta()).await);
        assert!(matches!(
            err,
            AnalysisError::DocumentTooLarge { chars: 17, max: 10 }
        ));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let generator = Arc::new(ScriptedGenerator {
            summary: Some("s".to_string()),
            bias: Some("b".to_string()),
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::default());
        let analyzer = Analyzer::new(
            Arc::new(SignedIn),
            generator,
            store.clone(),
            AnalysisSettings {
                timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let err = assert_err!(analyzer.analyze("text", meta()).await);
        assert!(matches!(err, AnalysisError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(store.len(), 0);
        assert_eq!(analyzer.state(), AnalysisState::Failed);
    }

    #[tokio::test]
    async fn storage_failure_keeps_record_for_retry() {
        let generator = Arc::new(ScriptedGenerator::ok("summary", BIAS_RESPONSE));
        let failing = analyzer(Arc::new(SignedIn), generator.clone(), Arc::new(FailingStore));

        let err = assert_err!(failing.analyze("text", meta()).await);
        let AnalysisError::Persistence { record, .. } = err else {
            panic!("se esperaba un fallo de persistencia");
        };
        assert_eq!(record.bias_count, 1);
        assert_eq!(failing.state(), AnalysisState::Failed);

        // El reintento no vuelve a llamar al LLM
        let store = Arc::new(MemoryStore::default());
        let retry = analyzer(Arc::new(SignedIn), generator.clone(), store.clone());
        let saved = assert_ok!(retry.persist(*record).await);
        assert!(saved.id.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(generator.calls(), 2);
        assert_eq!(retry.state(), AnalysisState::Persisted);
    }

    #[tokio::test]
    async fn persist_recomputes_aggregates_from_report_text() {
        let generator = Arc::new(ScriptedGenerator::default());
        let store = Arc::new(MemoryStore::default());
        let analyzer = analyzer(Arc::new(SignedIn), generator.clone(), store.clone());

        let tampered = AnalysisRecord {
            id: None,
            owner_id: "user-1".to_string(),
            file_name: "contrato.txt".to_string(),
            file_type: "txt".to_string(),
            file_size: 64,
            last_modified: Utc::now(),
            summary_text: "summary".to_string(),
            bias_report_text: "Sin sesgos relevantes.".to_string(),
            bias_count: 0,
            bias_confidence: 500.0,
            created_at: Utc::now(),
        };
        let saved = assert_ok!(analyzer.persist(tampered.clone()).await);
        assert_eq!(saved.bias_count, 0);
        assert_eq!(saved.bias_confidence, 0.0);

        let inflated = AnalysisRecord {
            bias_report_text: normalize(BIAS_RESPONSE),
            bias_count: 7,
            bias_confidence: 3.0,
            ..tampered
        };
        let saved = assert_ok!(analyzer.persist(inflated).await);
        assert_eq!(saved.bias_count, 1);
        assert_eq!(saved.bias_confidence, 82.0);

        let stored = assert_ok!(store.query_by_owner("user-1").await);
        assert!(stored.iter().all(|r| (0.0..=100.0).contains(&r.bias_confidence)));
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn prompts_embed_document_text() {
        assert_eq!(summary_prompt("X"), "Summarize this legal document: X");
        let prompt = bias_prompt("Y");
        assert!(prompt.starts_with("Analyze this legal document for potential biases."));
        assert!(prompt.ends_with("Text to analyze: Y"));
    }
}
