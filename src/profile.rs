//! Perfiles de usuario y almacenamiento de la foto de perfil.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::StoreError;

/// Prefijo público bajo el que se sirven los objetos guardados.
pub const PUBLIC_PREFIX: &str = "/photos";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: String,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Perfil mínimo para un usuario que aún no tiene registro propio.
    pub fn placeholder(id: &str, email: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            display_name: email.clone().unwrap_or_else(|| id.to_string()),
            email,
            role: "user".to_string(),
            photo_url: None,
            updated_at: None,
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;
    async fn set_photo_url(&self, user_id: &str, url: &str) -> Result<(), StoreError>;
}

/// Almacenamiento de objetos: guarda bytes en una ruta y devuelve su URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError>;
}

/// Objetos guardados en disco bajo `root`, servidos en `PUBLIC_PREFIX`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let relative = Path::new(path);
        let is_safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !is_safe {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;

        info!("Objeto guardado en {} ({} bytes)", target.display(), bytes.len());
        Ok(format!("{PUBLIC_PREFIX}/{path}"))
    }
}

/// Ruta de la foto de perfil de un usuario.
pub fn profile_photo_path(user_id: &str) -> String {
    format!("profilePhotos/{user_id}/profile.jpg")
}

/// Sube la foto y actualiza la URL en el perfil del usuario.
pub async fn upload_profile_photo(
    objects: &dyn ObjectStore,
    profiles: &dyn ProfileStore,
    user_id: &str,
    bytes: &[u8],
) -> Result<String, StoreError> {
    if bytes.is_empty() {
        return Err(StoreError::Other("la imagen está vacía".to_string()));
    }
    let url = objects.put(&profile_photo_path(user_id), bytes).await?;
    profiles.set_photo_url(user_id, &url).await?;
    Ok(url)
}
