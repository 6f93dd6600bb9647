//! Historial de análisis de un usuario y estadísticas del panel.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::{word_count, AnalysisRecord};
use crate::store::{AnalysisStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStats {
    pub bias_count: usize,
    pub word_count: usize,
    pub analysis_length: usize,
}

/// Una fila del historial.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Option<String>,
    pub file_name: String,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
    pub summary_text: String,
    pub bias_report_text: String,
    pub bias_confidence: f64,
    pub stats: EntryStats,
}

impl From<AnalysisRecord> for HistoryEntry {
    fn from(record: AnalysisRecord) -> Self {
        // El recuento de sesgos es el que calculó el parser al crear el registro.
        let stats = EntryStats {
            bias_count: record.bias_count,
            word_count: word_count(&record.summary_text),
            analysis_length: record.summary_text.chars().count(),
        };
        Self {
            id: record.id,
            file_name: record.file_name,
            file_type: record.file_type,
            created_at: record.created_at,
            summary_text: record.summary_text,
            bias_report_text: record.bias_report_text,
            bias_confidence: record.bias_confidence,
            stats,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_analyses: usize,
    pub total_biases: usize,
    pub total_words: usize,
    pub last_analysis: Option<DateTime<Utc>>,
}

/// Historial del usuario, del análisis más reciente al más antiguo.
pub async fn list_history(
    store: &dyn AnalysisStore,
    owner_id: &str,
) -> Result<Vec<HistoryEntry>, StoreError> {
    let mut entries: Vec<HistoryEntry> = store
        .query_by_owner(owner_id)
        .await?
        .into_iter()
        .map(HistoryEntry::from)
        .collect();
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(entries)
}

pub fn dashboard_stats(entries: &[HistoryEntry]) -> DashboardStats {
    DashboardStats {
        total_analyses: entries.len(),
        total_biases: entries.iter().map(|e| e.stats.bias_count).sum(),
        total_words: entries.iter().map(|e| e.stats.word_count).sum(),
        last_analysis: entries.iter().map(|e| e.created_at).max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn record(owner: &str, hours: i64, summary: &str, bias_count: usize) -> AnalysisRecord {
        let base = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        AnalysisRecord {
            id: None,
            owner_id: owner.to_string(),
            file_name: format!("doc-{hours}.pdf"),
            file_type: "pdf".to_string(),
            file_size: 100,
            last_modified: base,
            summary_text: summary.to_string(),
            bias_report_text: String::new(),
            bias_count,
            bias_confidence: if bias_count == 0 { 0.0 } else { 50.0 },
            created_at: base + Duration::hours(hours),
        }
    }

    #[tokio::test]
    async fn history_is_newest_first_and_scoped_to_owner() {
        let store = MemoryStore::default();
        store.insert(&record("ana", 1, "uno dos", 1)).await.unwrap();
        store.insert(&record("ana", 3, "tres", 0)).await.unwrap();
        store.insert(&record("otro", 2, "x", 4)).await.unwrap();

        let history = list_history(&store, "ana").await.unwrap();
        let names: Vec<_> = history.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["doc-3.pdf", "doc-1.pdf"]);
        assert_eq!(history[1].stats.word_count, 2);
        assert_eq!(history[1].stats.analysis_length, 7);
    }

    #[test]
    fn dashboard_totals() {
        let entries: Vec<HistoryEntry> = vec![
            record("ana", 1, "a b  c", 2).into(),
            record("ana", 5, "", 0).into(),
            record("ana", 2, "d", 3).into(),
        ];
        let stats = dashboard_stats(&entries);
        assert_eq!(stats.total_analyses, 3);
        assert_eq!(stats.total_biases, 5);
        assert_eq!(stats.total_words, 4);
        assert_eq!(stats.last_analysis, Some(entries[1].created_at));
    }

    #[test]
    fn empty_history_has_empty_dashboard() {
        assert_eq!(dashboard_stats(&[]), DashboardStats::default());
    }
}
