//! Persistencia de análisis y perfiles.
//!
//! `Neo4jStore` guarda el grafo `(:User)-[:RAN]->(:Analysis)`; las propiedades
//! de `:Analysis` usan los mismos nombres que la serialización de
//! `AnalysisRecord`.

#[cfg(test)]
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Row};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::bias_parser::count_findings;
use crate::profile::{ProfileStore, UserProfile};
use crate::record::AnalysisRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ruta de objeto inválida: '{0}'")]
    InvalidPath(String),

    #[error("falta el campo '{0}' en el resultado")]
    MissingField(&'static str),

    #[error("{0}")]
    Other(String),
}

/// Colección de análisis persistidos.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Inserta el registro y devuelve su identificador.
    async fn insert(&self, record: &AnalysisRecord) -> Result<String, StoreError>;

    /// Registros de un propietario, del más reciente al más antiguo.
    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<AnalysisRecord>, StoreError>;
}

// ---------------------------------------------------------------------
// NEO4J
// ---------------------------------------------------------------------

#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl AnalysisStore for Neo4jStore {
    async fn insert(&self, record: &AnalysisRecord) -> Result<String, StoreError> {
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.graph
            .run(
                query(
                    "MERGE (u:User {id: $ownerId})
                     CREATE (a:Analysis {
                         id: $id, ownerId: $ownerId, fileName: $fileName, fileType: $fileType,
                         fileSize: $fileSize, lastModified: $lastModified,
                         summaryText: $summaryText, biasReportText: $biasReportText,
                         biasCount: $biasCount, biasConfidence: $biasConfidence,
                         createdAt: $createdAt
                     })
                     MERGE (u)-[:RAN]->(a)",
                )
                .param("id", id.clone())
                .param("ownerId", record.owner_id.clone())
                .param("fileName", record.file_name.clone())
                .param("fileType", record.file_type.clone())
                .param("fileSize", record.file_size as i64)
                .param("lastModified", timestamp(&record.last_modified))
                .param("summaryText", record.summary_text.clone())
                .param("biasReportText", record.bias_report_text.clone())
                .param("biasCount", record.bias_count as i64)
                .param("biasConfidence", record.bias_confidence)
                .param("createdAt", timestamp(&record.created_at)),
            )
            .await?;

        info!("Análisis {id} guardado para el usuario {}", record.owner_id);
        Ok(id)
    }

    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<AnalysisRecord>, StoreError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (a:Analysis {ownerId: $ownerId})
                     RETURN a.id AS id, a.ownerId AS ownerId, a.fileName AS fileName,
                            a.fileType AS fileType, a.fileSize AS fileSize,
                            a.lastModified AS lastModified,
                            a.summaryText AS summaryText, a.biasReportText AS biasReportText,
                            a.biasCount AS biasCount, a.biasConfidence AS biasConfidence,
                            a.createdAt AS createdAt
                     ORDER BY a.createdAt DESC",
                )
                .param("ownerId", owner_id.to_string()),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = cursor.next().await? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }
}

fn record_from_row(row: &Row) -> Result<AnalysisRecord, StoreError> {
    let text = |field: &'static str| row.get::<String>(field).ok_or(StoreError::MissingField(field));
    let int = |field: &'static str| row.get::<i64>(field).ok_or(StoreError::MissingField(field));

    let bias_report_text = row.get::<String>("biasReportText").unwrap_or_default();
    // Registros antiguos sin biasCount: se recuenta con el mismo parser.
    let bias_count = match row.get::<i64>("biasCount") {
        Some(count) => count.max(0) as usize,
        None => count_findings(&bias_report_text),
    };

    Ok(AnalysisRecord {
        id: row.get::<String>("id"),
        owner_id: text("ownerId")?,
        file_name: text("fileName")?,
        file_type: row.get::<String>("fileType").unwrap_or_else(|| "unknown".to_string()),
        file_size: int("fileSize")?.max(0) as u64,
        last_modified: parse_timestamp(&text("lastModified")?, "lastModified")?,
        summary_text: row.get::<String>("summaryText").unwrap_or_default(),
        bias_report_text,
        bias_count,
        bias_confidence: row.get::<f64>("biasConfidence").unwrap_or(0.0),
        created_at: parse_timestamp(&text("createdAt")?, "createdAt")?,
    })
}

/// Las fechas se guardan como RFC 3339 en UTC con ancho fijo, así que
/// ordenar por la cadena equivale a ordenar por fecha.
fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, field: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Other(format!("fecha inválida en '{field}': {e}")))
}

#[async_trait]
impl ProfileStore for Neo4jStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (u:User {id: $id})
                     RETURN u.id AS id, u.displayName AS displayName, u.email AS email,
                            u.role AS role, u.photoURL AS photoURL,
                            u.updatedAt AS updatedAt",
                )
                .param("id", user_id.to_string()),
            )
            .await?;

        let Some(row) = cursor.next().await? else {
            return Ok(None);
        };

        let updated_at = match row.get::<String>("updatedAt") {
            Some(raw) => Some(parse_timestamp(&raw, "updatedAt")?),
            None => None,
        };
        Ok(Some(UserProfile {
            id: user_id.to_string(),
            display_name: row.get::<String>("displayName").unwrap_or_default(),
            email: row.get::<String>("email").filter(|e| !e.is_empty()),
            role: row.get::<String>("role").unwrap_or_else(|| "user".to_string()),
            photo_url: row.get::<String>("photoURL"),
            updated_at,
        }))
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.graph
            .run(
                query(
                    "MERGE (u:User {id: $id})
                     SET u.displayName = $displayName, u.email = $email, u.role = $role,
                         u.updatedAt = $updatedAt",
                )
                .param("id", profile.id.clone())
                .param("displayName", profile.display_name.clone())
                .param("email", profile.email.clone().unwrap_or_default())
                .param("role", profile.role.clone())
                .param("updatedAt", timestamp(&Utc::now())),
            )
            .await?;
        Ok(())
    }

    async fn set_photo_url(&self, user_id: &str, url: &str) -> Result<(), StoreError> {
        self.graph
            .run(
                query("MERGE (u:User {id: $id}) SET u.photoURL = $url, u.updatedAt = $updatedAt")
                    .param("id", user_id.to_string())
                    .param("url", url.to_string())
                    .param("updatedAt", timestamp(&Utc::now())),
            )
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// MEMORIA
// ---------------------------------------------------------------------

/// Almacén en memoria para los tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    analyses: Mutex<Vec<AnalysisRecord>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn len(&self) -> usize {
        self.analyses.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn insert(&self, record: &AnalysisRecord) -> Result<String, StoreError> {
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stored = record.clone();
        stored.id = Some(id.clone());
        self.analyses.lock().unwrap().push(stored);
        Ok(id)
    }

    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<AnalysisRecord>, StoreError> {
        let mut records: Vec<_> = self
            .analyses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        let photo_url = profiles.get(&profile.id).and_then(|p| p.photo_url.clone());
        let mut updated = profile.clone();
        updated.photo_url = updated.photo_url.or(photo_url);
        updated.updated_at = Some(Utc::now());
        profiles.insert(profile.id.clone(), updated);
        Ok(())
    }

    async fn set_photo_url(&self, user_id: &str, url: &str) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::placeholder(user_id, None));
        profile.photo_url = Some(url.to_string());
        profile.updated_at = Some(Utc::now());
        Ok(())
    }
}
