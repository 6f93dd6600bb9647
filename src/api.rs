use std::collections::BTreeMap;
use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use neo4rs::query;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

use crate::{
    analysis::AnalysisError,
    app_state::AppState,
    auth::{HeaderIdentity, IdentityProvider, UserIdentity},
    bias_parser::BiasFinding,
    history::{self, DashboardStats, HistoryEntry},
    ingest::{self, IngestError},
    profile::{self, UserProfile},
    record::AnalysisRecord,
    store::StoreError,
};

/// Límite de tamaño para documentos y fotos subidos.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingView {
    #[serde(flatten)]
    finding: BiasFinding,
    severity: &'static str,
    icon: &'static str,
}

impl From<BiasFinding> for FindingView {
    fn from(finding: BiasFinding) -> Self {
        Self {
            severity: finding.category.severity(),
            icon: finding.category.icon(),
            finding,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    record: AnalysisRecord,
    findings: Vec<FindingView>,
    by_category: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    display_name: String,
    role: Option<String>,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    profile: UserProfile,
    stats: DashboardStats,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze_handler))
        .route("/api/analyses/retry", post(retry_persist_handler))
        .route("/api/history", get(history_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/profile", get(get_profile_handler).put(update_profile_handler))
        .route("/api/profile/photo", put(upload_photo_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn require_user(headers: &HeaderMap) -> Result<UserIdentity, ApiError> {
    HeaderIdentity::from_headers(headers)
        .current_user()
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Inicie sesión para continuar."))
}

fn store_error(err: StoreError) -> ApiError {
    error!("Error de almacenamiento: {}", err);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error de almacenamiento: {}", err),
    )
}

fn ingest_error(err: IngestError) -> ApiError {
    let status = match err {
        IngestError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        IngestError::InvalidUtf8 | IngestError::Pdf(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    api_error(status, err.to_string())
}

fn analysis_error(err: AnalysisError) -> ApiError {
    match err {
        AnalysisError::AuthRequired => api_error(StatusCode::UNAUTHORIZED, err.to_string()),
        AnalysisError::EmptyDocument | AnalysisError::DocumentTooLarge { .. } => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        AnalysisError::Generation { .. } => api_error(StatusCode::BAD_GATEWAY, err.to_string()),
        AnalysisError::Timeout(_) => api_error(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        // El cliente recibe el registro generado para reintentar sólo el guardado.
        AnalysisError::Persistence { record, source } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": format!("No se pudo guardar el análisis: {}", source),
                "retryable": true,
                "record": *record,
            })),
        ),
    }
}

// --- Handlers de Análisis ---

#[axum::debug_handler]
async fn analyze_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AnalyzeResponse>), ApiError> {
    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Multipart inválido: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "document.txt".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Error leyendo el fichero: {}", e)))?;
        upload = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Falta el campo 'file' con el documento.",
        ));
    };

    let document = ingest::extract_document(&file_name, &bytes).map_err(ingest_error)?;
    info!(mime = ?document.mime_type, "Analizando '{}'", file_name);

    let analyzer = state.analyzer(Arc::new(HeaderIdentity::from_headers(&headers)));
    let outcome = analyzer
        .analyze(&document.text, document.meta)
        .await
        .map_err(|e| {
            warn!(state = ?analyzer.state(), "Análisis de '{}' no completado", file_name);
            analysis_error(e)
        })?;

    let by_category = outcome.report.by_category();
    Ok((
        StatusCode::CREATED,
        Json(AnalyzeResponse {
            record: outcome.record,
            findings: outcome.report.findings.into_iter().map(FindingView::from).collect(),
            by_category,
        }),
    ))
}

#[axum::debug_handler]
async fn retry_persist_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(record): Json<AnalysisRecord>,
) -> Result<(StatusCode, Json<AnalysisRecord>), ApiError> {
    let user = require_user(&headers)?;
    if record.owner_id != user.uid {
        warn!("El usuario {} intentó guardar un análisis de {}", user.uid, record.owner_id);
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "El análisis pertenece a otro usuario.",
        ));
    }

    let analyzer = state.analyzer(Arc::new(HeaderIdentity::from_headers(&headers)));
    let saved = analyzer.persist(record).await.map_err(analysis_error)?;
    Ok((StatusCode::CREATED, Json(saved)))
}

// --- Historial y Panel ---

#[axum::debug_handler]
async fn history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let user = require_user(&headers)?;
    let entries = history::list_history(state.analyses.as_ref(), &user.uid)
        .await
        .map_err(store_error)?;
    Ok(Json(entries))
}

#[axum::debug_handler]
async fn dashboard_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardStats>, ApiError> {
    let user = require_user(&headers)?;
    let entries = history::list_history(state.analyses.as_ref(), &user.uid)
        .await
        .map_err(store_error)?;
    Ok(Json(history::dashboard_stats(&entries)))
}

// --- Perfil ---

#[axum::debug_handler]
async fn get_profile_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = require_user(&headers)?;
    let profile = state
        .profiles
        .get_profile(&user.uid)
        .await
        .map_err(store_error)?
        .unwrap_or_else(|| UserProfile::placeholder(&user.uid, user.email.clone()));
    let entries = history::list_history(state.analyses.as_ref(), &user.uid)
        .await
        .map_err(store_error)?;

    Ok(Json(ProfileResponse {
        profile,
        stats: history::dashboard_stats(&entries),
    }))
}

#[axum::debug_handler]
async fn update_profile_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ProfilePayload>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = require_user(&headers)?;
    let display_name = payload.display_name.trim();
    if display_name.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "El nombre no puede estar vacío.",
        ));
    }

    let current = state
        .profiles
        .get_profile(&user.uid)
        .await
        .map_err(store_error)?
        .unwrap_or_else(|| UserProfile::placeholder(&user.uid, user.email.clone()));
    let profile = UserProfile {
        display_name: display_name.to_string(),
        role: payload.role.unwrap_or(current.role.clone()),
        email: user.email.or(current.email.clone()),
        ..current
    };
    state
        .profiles
        .upsert_profile(&profile)
        .await
        .map_err(store_error)?;
    Ok(Json(profile))
}

#[axum::debug_handler]
async fn upload_photo_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = require_user(&headers)?;
    let url = profile::upload_profile_photo(
        state.objects.as_ref(),
        state.profiles.as_ref(),
        &user.uid,
        &body,
    )
    .await
    .map_err(|e| match e {
        StoreError::InvalidPath(_) | StoreError::Other(_) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        other => store_error(other),
    })?;

    info!("Foto de perfil actualizada para {}", user.uid);
    Ok(Json(json!({ "photoURL": url })))
}

// --- Salud y Apagado ---

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let browser_url = match Url::parse(&state.config.neo4j_uri) {
        Ok(mut url) => {
            let _ = url.set_scheme("http");
            let _ = url.set_port(Some(7474));
            url.to_string()
        }
        Err(_) => "http://localhost:7474".to_string(),
    };

    match state.graph.run(query("RETURN 1")).await {
        Ok(_) => Ok(Json(json!({ "status": "ok", "browser_url": browser_url }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
