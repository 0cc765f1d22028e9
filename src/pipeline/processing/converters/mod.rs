//! Source-format converters: one raw datum in, zero or more canonical scores out.

pub mod batch_manual;
pub mod eamusement_iidx_csv;
pub mod fervidex;
pub mod kai_iidx;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::app::ports::{CatalogLookup, SongQuery};
use crate::common::error::StoreError;
use crate::domain::{Chart, DryScore, Game, ImportContext, ImportType, Song};

pub use batch_manual::BatchManualConverter;
pub use eamusement_iidx_csv::EamusementIidxCsvConverter;
pub use fervidex::FervidexConverter;
pub use kai_iidx::KaiIidxConverter;

/// A converted score together with the chart and song it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionSuccess {
    pub dry_score: DryScore,
    pub chart: Chart,
    pub song: Song,
}

/// Why a single datum did not convert.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConverterFailure {
    /// The chart or song could not be resolved. The datum is kept as an orphan.
    #[error("{message}")]
    DataNotFound {
        message: String,
        data: Value,
        context: Value,
    },

    /// Scoring fields out of domain.
    #[error("{message}")]
    InvalidDatapoint {
        message: String,
        field: Option<String>,
    },

    #[error("score already exists")]
    AlreadyExists,

    #[error("skipped: {0}")]
    SkipIntentionally(String),

    /// Unexpected failure. The detail is logged, never reported.
    #[error("internal converter failure: {0}")]
    Internal(String),
}

impl ConverterFailure {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConverterFailure::InvalidDatapoint {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(message: impl Into<String>, field: &str) -> Self {
        ConverterFailure::InvalidDatapoint {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn not_found(message: impl Into<String>, data: &Value, ctx: &ImportContext) -> Self {
        ConverterFailure::DataNotFound {
            message: message.into(),
            data: data.clone(),
            context: serde_json::to_value(ctx).unwrap_or(Value::Null),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        ConverterFailure::SkipIntentionally(reason.into())
    }
}

impl From<StoreError> for ConverterFailure {
    fn from(e: StoreError) -> Self {
        ConverterFailure::Internal(format!("catalog lookup failed: {}", e))
    }
}

pub type ConversionResult = Result<ConversionSuccess, ConverterFailure>;

/// Pair a resolved chart with its song. A dangling song reference is a catalog bug.
pub(crate) async fn song_for_chart(
    catalog: &dyn CatalogLookup,
    game: Game,
    chart: Chart,
) -> Result<(Chart, Song), ConverterFailure> {
    match catalog.find_song(game, SongQuery::Id(chart.song_id)).await? {
        Some(song) => Ok((chart, song)),
        None => Err(ConverterFailure::Internal(format!(
            "chart {} references song {} which does not exist",
            chart.chart_id, chart.song_id
        ))),
    }
}

/// Converts one raw datum. Implementations only read from the catalog.
#[async_trait]
pub trait ScoreConverter: Send + Sync {
    async fn convert(
        &self,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> Vec<ConversionResult>;
}

/// Registry of converters keyed by import type
pub struct ConverterRegistry {
    converters: HashMap<ImportType, Arc<dyn ScoreConverter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConverterRegistry {
    /// Create a registry holding every built-in converter
    pub fn new() -> Self {
        let mut converters: HashMap<ImportType, Arc<dyn ScoreConverter>> = HashMap::new();

        let manual: Arc<dyn ScoreConverter> = Arc::new(BatchManualConverter::new());
        let kai: Arc<dyn ScoreConverter> = Arc::new(KaiIidxConverter::new());

        converters.insert(ImportType::FileBatchManual, manual.clone());
        converters.insert(ImportType::IrDirectManual, manual);
        converters.insert(
            ImportType::FileEamusementIidxCsv,
            Arc::new(EamusementIidxCsvConverter::new()),
        );
        converters.insert(ImportType::IrFervidex, Arc::new(FervidexConverter::new()));
        converters.insert(ImportType::ApiFloIidx, kai.clone());
        converters.insert(ImportType::ApiEagIidx, kai);

        Self { converters }
    }

    pub fn register(&mut self, import_type: ImportType, converter: Arc<dyn ScoreConverter>) {
        self.converters.insert(import_type, converter);
    }

    pub fn get(&self, import_type: ImportType) -> Option<Arc<dyn ScoreConverter>> {
        self.converters.get(&import_type).cloned()
    }

    pub fn list_import_types(&self) -> Vec<ImportType> {
        self.converters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_import_type() {
        let registry = ConverterRegistry::new();
        for it in ImportType::ALL {
            assert!(registry.get(it).is_some(), "no converter for {}", it);
        }
        assert_eq!(registry.list_import_types().len(), ImportType::ALL.len());
    }
}
