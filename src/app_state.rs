use std::sync::{Arc, Mutex};
use neo4rs::Graph;
use tokio::sync::oneshot;
use crate::{
    analysis::{AnalysisSettings, Analyzer},
    auth::IdentityProvider,
    config::AppConfig,
    llm::TextGenerator,
    profile::{ObjectStore, ProfileStore},
    store::AnalysisStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub graph: Arc<Graph>,
    pub generator: Arc<dyn TextGenerator>,
    pub analyses: Arc<dyn AnalysisStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Un `Analyzer` por petición, con la identidad de quien la lanza.
    pub fn analyzer(&self, identity: Arc<dyn IdentityProvider>) -> Analyzer {
        Analyzer::new(
            identity,
            self.generator.clone(),
            self.analyses.clone(),
            AnalysisSettings {
                timeout: self.config.analysis_timeout,
                max_document_chars: self.config.max_document_chars,
            },
        )
    }
}
