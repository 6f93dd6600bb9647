//! Parser del informe de sesgos devuelto por el LLM.
//!
//! Gramática (sobre el texto ya normalizado):
//!   - Cada aparición de `Type:` abre un bloque que se extiende hasta el
//!     siguiente `Type:` o el final del texto.
//!   - `Type:`        → resto de la línea (categoría).
//!   - `Text:`        → contenido del primer par de comillas dobles.
//!   - `Confidence:`  → entero inicial del resto de la línea (`82.5%` → 82).
//!   - `Alternative:` → resto de la línea.
//!
//! Un bloque nunca se descarta: los campos ausentes o mal formados toman
//! valores por defecto (confianza 0, categoría no reconocida).

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use tracing::debug;

const TYPE_MARKER: &str = "Type:";
const TEXT_MARKER: &str = "Text:";
const CONFIDENCE_MARKER: &str = "Confidence:";
const ALTERNATIVE_MARKER: &str = "Alternative:";

/// Etiqueta usada cuando un bloque no trae valor en `Type:`.
pub const UNRECOGNIZED_LABEL: &str = "alert-circle";

/// Categorías de sesgo conocidas, más las etiquetas libres que devuelva el modelo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiasCategory {
    Gender,
    Racial,
    Age,
    Socioeconomic,
    Language,
    Unrecognized(String),
}

impl BiasCategory {
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        match label.to_lowercase().as_str() {
            "gender bias" => Self::Gender,
            "racial bias" => Self::Racial,
            "age discrimination" => Self::Age,
            "socioeconomic bias" => Self::Socioeconomic,
            "language bias" => Self::Language,
            "" => Self::Unrecognized(UNRECOGNIZED_LABEL.to_string()),
            _ => Self::Unrecognized(label.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Gender => "Gender Bias",
            Self::Racial => "Racial Bias",
            Self::Age => "Age Discrimination",
            Self::Socioeconomic => "Socioeconomic Bias",
            Self::Language => "Language Bias",
            Self::Unrecognized(label) => label,
        }
    }

    pub fn severity(&self) -> &'static str {
        match self {
            Self::Gender | Self::Racial => "high",
            Self::Age | Self::Socioeconomic | Self::Language => "medium",
            Self::Unrecognized(_) => "low",
        }
    }

    /// Nombre del icono con el que el cliente muestra la categoría.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Gender => "gender-male-female",
            Self::Racial => "account-group",
            Self::Age => "account-clock",
            Self::Socioeconomic => "cash",
            Self::Language => "text",
            Self::Unrecognized(_) => "alert-circle",
        }
    }
}

impl Serialize for BiasCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Un sesgo detectado en el documento.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasFinding {
    pub category: BiasCategory,
    pub quoted_text: String,
    /// Porcentaje entre 0 y 100.
    pub confidence: u8,
    pub alternative: String,
}

impl BiasFinding {
    fn details(&self) -> String {
        let mut details = String::new();
        if !self.quoted_text.is_empty() {
            details.push_str(&format!("\"{}\" ", self.quoted_text));
        }
        details.push_str(&format!("({}%)", self.confidence));
        if !self.alternative.is_empty() {
            details.push_str(&format!(" → {}", self.alternative));
        }
        details
    }
}

/// Resultado de parsear el informe de sesgos.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasReport {
    pub findings: Vec<BiasFinding>,
    pub display_text: String,
}

impl BiasReport {
    /// Agrupa los detalles de cada hallazgo por la etiqueta de su categoría.
    pub fn by_category(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for finding in &self.findings {
            grouped
                .entry(finding.category.label().to_string())
                .or_default()
                .push(finding.details());
        }
        grouped
    }
}

/// Parsea el texto normalizado del informe de sesgos.
pub fn parse_bias_report(normalized: &str) -> BiasReport {
    let findings = split_blocks(normalized)
        .into_iter()
        .map(parse_block)
        .collect();

    BiasReport {
        findings,
        display_text: normalized.to_string(),
    }
}

/// Número de hallazgos que produciría `parse_bias_report` para este texto.
pub fn count_findings(text: &str) -> usize {
    split_blocks(text).len()
}

/// Devuelve el contenido de cada bloque, justo después de su `Type:`.
fn split_blocks(text: &str) -> Vec<&str> {
    let starts: Vec<usize> = text
        .match_indices(TYPE_MARKER)
        .map(|(idx, _)| idx + TYPE_MARKER.len())
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts
                .get(i + 1)
                .map(|next| next - TYPE_MARKER.len())
                .unwrap_or(text.len());
            &text[start..end]
        })
        .collect()
}

fn parse_block(block: &str) -> BiasFinding {
    let category = BiasCategory::from_label(first_line(block));
    let quoted_text = field_after(block, TEXT_MARKER)
        .and_then(quoted)
        .unwrap_or_default();
    let confidence = field_after(block, CONFIDENCE_MARKER)
        .and_then(percentage)
        .unwrap_or_else(|| {
            debug!("Bloque de sesgo sin confianza válida; se usa 0.");
            0
        });
    let alternative = field_after(block, ALTERNATIVE_MARKER)
        .map(|rest| first_line(rest).to_string())
        .unwrap_or_default();

    if matches!(&category, BiasCategory::Unrecognized(label) if label == UNRECOGNIZED_LABEL) {
        debug!("Bloque de sesgo sin tipo; se clasifica como no reconocido.");
    }

    BiasFinding {
        category,
        quoted_text,
        confidence,
        alternative,
    }
}

fn field_after<'a>(block: &'a str, marker: &str) -> Option<&'a str> {
    block.find(marker).map(|idx| &block[idx + marker.len()..])
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// Texto entre el primer par de comillas dobles (rectas o tipográficas).
fn quoted(rest: &str) -> Option<String> {
    let line_end = rest.find("\n\n").unwrap_or(rest.len());
    let scope = &rest[..line_end];
    for (open, close) in [('"', '"'), ('“', '”')] {
        if let Some(start) = scope.find(open) {
            let after = &scope[start + open.len_utf8()..];
            if let Some(end) = after.find(close) {
                return Some(after[..end].to_string());
            }
        }
    }
    None
}

/// Entero con el que empieza el valor, acotado a 0..=100. Lo que siga a los
/// dígitos (decimales, espacios, `%`) se ignora.
fn percentage(rest: &str) -> Option<u8> {
    let value = first_line(rest);
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let value: u32 = value[..digits_end].parse().ok()?;
    Some(value.min(100) as u8)
}
