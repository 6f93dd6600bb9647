//! Agregación de hallazgos y construcción del registro persistible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bias_parser::BiasFinding;

/// Metadatos del documento capturados al subirlo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Un análisis persistido de un documento.
///
/// Los nombres de campo serializados son el esquema ya almacenado;
/// no deben cambiarse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub owner_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
    pub summary_text: String,
    pub bias_report_text: String,
    pub bias_count: usize,
    pub bias_confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Media aritmética de las confianzas; 0 si no hay hallazgos.
pub fn average_confidence(findings: &[BiasFinding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    let total: u32 = findings.iter().map(|f| u32::from(f.confidence)).sum();
    f64::from(total) / findings.len() as f64
}

/// Número de palabras separadas por espacios. Un texto vacío cuenta 0.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Construye el registro a partir de los hallazgos y los textos normalizados.
/// `created_at` se fija aquí: marca la persistencia, no la selección del fichero.
pub fn build_record(
    findings: &[BiasFinding],
    summary_text: String,
    bias_report_text: String,
    meta: DocumentMeta,
    owner_id: &str,
) -> AnalysisRecord {
    AnalysisRecord {
        id: None,
        owner_id: owner_id.to_string(),
        file_name: meta.file_name,
        file_type: meta.file_type,
        file_size: meta.file_size,
        last_modified: meta.last_modified,
        summary_text,
        bias_report_text,
        bias_count: findings.len(),
        bias_confidence: average_confidence(findings),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias_parser::BiasCategory;
    use chrono::TimeZone;

    fn finding(confidence: u8) -> BiasFinding {
        BiasFinding {
            category: BiasCategory::Gender,
            quoted_text: String::new(),
            confidence,
            alternative: String::new(),
        }
    }

    fn meta() -> DocumentMeta {
        DocumentMeta {
            file_name: "contrato.txt".to_string(),
            file_type: "txt".to_string(),
            file_size: 2048,
            last_modified: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn average_is_zero_without_findings() {
        assert_eq!(average_confidence(&[]), 0.0);
    }

    #[test]
    fn average_is_unrounded_arithmetic_mean() {
        let findings = [finding(82), finding(40), finding(0)];
        assert!((average_confidence(&findings) - 40.666_666).abs() < 1e-4);
        assert_eq!(average_confidence(&[finding(100), finding(100)]), 100.0);
    }

    #[test]
    fn word_count_guards_empty_text() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("   \n"), 0);
        assert_eq!(word_count("a b  c"), 3);
    }

    #[test]
    fn build_record_keeps_invariants() {
        let before = Utc::now();
        let record = build_record(&[], "resumen".into(), "sin sesgos".into(), meta(), "user-1");
        assert_eq!(record.bias_count, 0);
        assert_eq!(record.bias_confidence, 0.0);
        assert!(record.created_at >= before);
        assert_ne!(record.created_at, record.last_modified);

        let record = build_record(
            &[finding(82), finding(18)],
            "resumen".into(),
            "informe".into(),
            meta(),
            "user-1",
        );
        assert_eq!(record.owner_id, "user-1");
        assert_eq!(record.file_name, "contrato.txt");
        assert_eq!(record.bias_count, 2);
        assert_eq!(record.bias_confidence, 50.0);
        assert!(record.id.is_none());
    }

    #[test]
    fn serializes_with_stored_field_names() {
        let record = build_record(&[finding(82)], "s".into(), "b".into(), meta(), "u");
        let value = serde_json::to_value(&record).unwrap();
        for key in [
            "ownerId",
            "fileName",
            "fileType",
            "fileSize",
            "lastModified",
            "summaryText",
            "biasReportText",
            "biasCount",
            "biasConfidence",
            "createdAt",
        ] {
            assert!(value.get(key).is_some(), "falta el campo {key}");
        }
        assert!(value.get("id").is_none());
    }
}
