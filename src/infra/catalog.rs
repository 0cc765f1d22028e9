use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::app::ports::{CatalogLookup, ChartQuery, SongQuery};
use crate::common::error::{Result, StoreError};
use crate::domain::{Chart, Game, Playtype, Song};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogSeed {
    #[serde(default)]
    songs: Vec<Song>,
    #[serde(default)]
    charts: Vec<Chart>,
    #[serde(default)]
    reference_scores: HashMap<String, Vec<f64>>,
}

/// Catalog held in memory, optionally seeded from a JSON file of
/// `{songs, charts, referenceScores}`.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    songs: Vec<Song>,
    charts: Vec<Chart>,
    reference_scores: HashMap<String, Vec<f64>>,
}

impl InMemoryCatalog {
    pub fn new(songs: Vec<Song>, charts: Vec<Chart>) -> Self {
        Self {
            songs,
            charts,
            reference_scores: HashMap::new(),
        }
    }

    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let seed: CatalogSeed = serde_json::from_str(&raw)?;
        info!(
            "📚 Loaded catalog seed: {} songs, {} charts",
            seed.songs.len(),
            seed.charts.len()
        );
        Ok(Self {
            songs: seed.songs,
            charts: seed.charts,
            reference_scores: seed.reference_scores,
        })
    }

    pub fn set_reference_scores(&mut self, chart_id: &str, scores: Vec<f64>) {
        self.reference_scores.insert(chart_id.to_string(), scores);
    }

    /// With a version, the chart must be in that version. Without one, the
    /// primary chart wins.
    fn version_matches(chart: &Chart, version: Option<&str>) -> bool {
        match version {
            Some(v) => chart.versions.iter().any(|cv| cv == v),
            None => chart.is_primary,
        }
    }
}

#[async_trait]
impl CatalogLookup for InMemoryCatalog {
    async fn find_chart(
        &self,
        game: Game,
        playtype: Playtype,
        query: ChartQuery<'_>,
    ) -> std::result::Result<Option<Chart>, StoreError> {
        let found = self
            .charts
            .iter()
            .filter(|c| c.game == game && c.playtype == playtype)
            .find(|c| match &query {
                ChartQuery::InGameId {
                    in_game_id,
                    difficulty,
                    version,
                } => {
                    c.in_game_id == Some(*in_game_id)
                        && c.difficulty == *difficulty
                        && Self::version_matches(c, *version)
                }
                ChartQuery::SongDifficulty {
                    song_id,
                    difficulty,
                    version,
                } => {
                    c.song_id == *song_id
                        && c.difficulty == *difficulty
                        && Self::version_matches(c, *version)
                }
                ChartQuery::Hash(hash) => c
                    .hash
                    .as_deref()
                    .map(|h| h.eq_ignore_ascii_case(hash))
                    .unwrap_or(false),
            });
        Ok(found.cloned())
    }

    async fn find_song(&self, game: Game, query: SongQuery<'_>) -> std::result::Result<Option<Song>, StoreError> {
        let found = self.songs.iter().filter(|s| s.game == game).find(|s| match &query {
            SongQuery::Id(id) => s.id == *id,
            SongQuery::Title(title) => {
                let wanted = title.to_lowercase();
                s.title.to_lowercase() == wanted
                    || s.alt_titles.iter().any(|t| t.to_lowercase() == wanted)
            }
        });
        Ok(found.cloned())
    }

    async fn find_chart_by_id(&self, game: Game, chart_id: &str) -> std::result::Result<Option<Chart>, StoreError> {
        Ok(self
            .charts
            .iter()
            .find(|c| c.game == game && c.chart_id == chart_id)
            .cloned())
    }

    async fn reference_scores(&self, chart_id: &str) -> std::result::Result<Option<Vec<f64>>, StoreError> {
        Ok(self.reference_scores.get(chart_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::iidx_catalog;
    use std::io::Write;

    #[tokio::test]
    async fn title_lookup_is_case_insensitive_and_checks_alt_titles() {
        let catalog = iidx_catalog();
        let by_title = catalog
            .find_song(Game::Iidx, SongQuery::Title("TEST SONG"))
            .await
            .unwrap();
        assert!(by_title.is_some());
        let by_alt = catalog
            .find_song(Game::Iidx, SongQuery::Title("tesuto"))
            .await
            .unwrap();
        assert_eq!(by_alt.map(|s| s.id), by_title.map(|s| s.id));
        assert!(catalog
            .find_song(Game::Sdvx, SongQuery::Title("test song"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn version_filters_in_game_id_lookups() {
        let catalog = iidx_catalog();
        let query = |version| ChartQuery::InGameId {
            in_game_id: 1000,
            difficulty: "ANOTHER",
            version,
        };
        assert!(catalog
            .find_chart(Game::Iidx, Playtype::SP, query(Some("27")))
            .await
            .unwrap()
            .is_some());
        assert!(catalog
            .find_chart(Game::Iidx, Playtype::SP, query(Some("20")))
            .await
            .unwrap()
            .is_none());
        assert!(catalog
            .find_chart(Game::Iidx, Playtype::SP, query(None))
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn loads_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "songs": [{{"id": 1, "game": "iidx", "title": "A", "artist": "B"}}],
                "charts": [{{
                    "chartID": "x", "songID": 1, "game": "iidx", "playtype": "SP",
                    "difficulty": "HYPER", "level": "8", "levelNum": 8,
                    "data": {{"notecount": 900}}
                }}],
                "referenceScores": {{"x": [1.0, 2.0]}}
            }}"#
        )
        .unwrap();

        let catalog = InMemoryCatalog::from_seed_file(file.path()).unwrap();
        assert_eq!(catalog.charts.len(), 1);
        assert!(catalog.charts[0].is_primary);
        assert_eq!(catalog.reference_scores["x"], vec![1.0, 2.0]);
    }
}
