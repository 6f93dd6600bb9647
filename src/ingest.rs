//! Extracción del texto de un documento subido por el usuario.
//! Se aceptan ficheros de texto plano y PDF.

use std::path::Path;

use chrono::Utc;
use mime_guess::MimeGuess;
use thiserror::Error;
use tracing::{info, warn};

use crate::record::DocumentMeta;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("tipo de fichero no soportado: '.{0}'")]
    UnsupportedType(String),

    #[error("el fichero no es texto UTF-8 válido")]
    InvalidUtf8,

    #[error("no se pudo extraer texto del PDF: {0}")]
    Pdf(String),
}

/// Documento listo para analizar.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub meta: DocumentMeta,
    pub mime_type: Option<String>,
}

/// Extrae el texto según la extensión y captura los metadatos del fichero.
pub fn extract_document(file_name: &str, bytes: &[u8]) -> Result<ExtractedDocument, IngestError> {
    let path = Path::new(file_name);
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();

    let text = match extension.as_str() {
        "pdf" => pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            warn!("No se pudo extraer texto del PDF {}: {}", file_name, e);
            IngestError::Pdf(e.to_string())
        })?,
        "txt" | "md" => String::from_utf8(bytes.to_vec()).map_err(|_| {
            warn!("Fichero no-UTF8: {}", file_name);
            IngestError::InvalidUtf8
        })?,
        other => return Err(IngestError::UnsupportedType(other.to_string())),
    };

    let mime_type = MimeGuess::from_path(path).first().map(|m| m.to_string());
    info!(
        "Documento '{}' recibido ({} bytes, {:?}, {} caracteres de texto)",
        file_name,
        bytes.len(),
        mime_type,
        text.chars().count()
    );

    Ok(ExtractedDocument {
        text,
        meta: DocumentMeta {
            file_name: file_name.to_string(),
            file_type: extension,
            file_size: bytes.len() as u64,
            last_modified: Utc::now(),
        },
        mime_type,
    })
}
