// Historical data sources for the initial match list and odds snapshot.
//
// `BundledSource` decodes a JSON dataset shipped with the app; `LiveSource`
// stands in for the real backend, which is not wired up yet.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Match, MatchId, Odds};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("match data unavailable at {path}: {source}")]
    DataUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode match data from {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid odds for match {match_id} in {path}: {team_a} / {team_b}")]
    InvalidOdds {
        path: PathBuf,
        match_id: MatchId,
        team_a: f64,
        team_b: f64,
    },

    #[error("live {operation} API is not implemented")]
    NotImplemented { operation: &'static str },
}

impl SourceError {
    /// The dataset was readable but its contents were rejected.
    pub fn is_decode(&self) -> bool {
        matches!(self, SourceError::Decode { .. } | SourceError::InvalidOdds { .. })
    }
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Asynchronous provider of the initial match list and odds snapshot.
#[async_trait]
pub trait MatchSource: Send + Sync + 'static {
    async fn fetch_matches(&self) -> Result<Vec<Match>, SourceError>;

    async fn fetch_odds(&self) -> Result<Vec<Odds>, SourceError>;
}

/// Which backing implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Bundled,
    Live,
}

// ---------------------------------------------------------------------------
// Bundled JSON dataset
// ---------------------------------------------------------------------------

/// On-disk layout of the bundled dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub matches: Vec<Match>,
    pub odds: Vec<Odds>,
}

impl Dataset {
    /// Decode a dataset document. `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Dataset, SourceError> {
        let dataset: Dataset =
            serde_json::from_str(text).map_err(|e| SourceError::Decode {
                path: origin.to_path_buf(),
                source: e,
            })?;

        if let Some(bad) = dataset.odds.iter().find(|o| !o.is_sane()) {
            return Err(SourceError::InvalidOdds {
                path: origin.to_path_buf(),
                match_id: bad.match_id,
                team_a: bad.team_a,
                team_b: bad.team_b,
            });
        }

        Ok(dataset)
    }
}

/// Reads the bundled dataset from disk on every fetch.
#[derive(Debug, Clone)]
pub struct BundledSource {
    path: PathBuf,
}

impl BundledSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BundledSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Dataset, SourceError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::DataUnavailable {
                path: self.path.clone(),
                source: e,
            })?;
        let dataset = Dataset::parse(&text, &self.path)?;
        debug!(
            "Decoded {} matches and {} odds from {}",
            dataset.matches.len(),
            dataset.odds.len(),
            self.path.display()
        );
        Ok(dataset)
    }
}

#[async_trait]
impl MatchSource for BundledSource {
    async fn fetch_matches(&self) -> Result<Vec<Match>, SourceError> {
        Ok(self.load().await?.matches)
    }

    async fn fetch_odds(&self) -> Result<Vec<Odds>, SourceError> {
        Ok(self.load().await?.odds)
    }
}

// ---------------------------------------------------------------------------
// Live backend placeholder
// ---------------------------------------------------------------------------

/// Placeholder for the real match API. Every call fails with
/// [`SourceError::NotImplemented`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveSource;

#[async_trait]
impl MatchSource for LiveSource {
    async fn fetch_matches(&self) -> Result<Vec<Match>, SourceError> {
        Err(SourceError::NotImplemented { operation: "matches" })
    }

    async fn fetch_odds(&self) -> Result<Vec<Odds>, SourceError> {
        Err(SourceError::NotImplemented { operation: "odds" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "matches": [
            {"id": 1, "teamA": "Lions", "teamB": "Tigers", "startTime": "2025-07-24T10:00:00Z"},
            {"id": 2, "teamA": "Bears", "teamB": "Wolves", "startTime": "2025-07-24T12:00:00Z"}
        ],
        "odds": [
            {"matchID": 1, "teamAOdds": 1.8, "teamBOdds": 1.9}
        ]
    }"#;

    #[test]
    fn parse_valid_dataset() {
        let dataset = Dataset::parse(VALID, Path::new("inline")).unwrap();
        assert_eq!(dataset.matches.len(), 2);
        assert_eq!(dataset.odds, vec![Odds::new(1, 1.8, 1.9)]);
    }

    #[test]
    fn parse_rejects_bad_timestamp() {
        let text = VALID.replace("2025-07-24T10:00:00Z", "24/07/2025 10:00");
        let err = Dataset::parse(&text, Path::new("inline")).unwrap_err();
        assert!(err.is_decode());
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[test]
    fn parse_rejects_missing_section() {
        let err = Dataset::parse(r#"{"matches": []}"#, Path::new("inline")).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[test]
    fn parse_rejects_non_positive_quote() {
        let text = VALID.replace("\"teamBOdds\": 1.9", "\"teamBOdds\": 0.0");
        let err = Dataset::parse(&text, Path::new("inline")).unwrap_err();
        assert!(err.is_decode());
        match err {
            SourceError::InvalidOdds { match_id, .. } => assert_eq!(match_id, 1),
            other => panic!("expected InvalidOdds, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_file_is_data_unavailable() {
        let source = BundledSource::new("does/not/exist.json");
        let err = source.fetch_matches().await.unwrap_err();
        assert!(matches!(err, SourceError::DataUnavailable { .. }));
        assert!(!err.is_decode());
    }

    #[tokio::test]
    async fn live_source_is_not_implemented() {
        let source = LiveSource;
        assert!(matches!(
            source.fetch_matches().await,
            Err(SourceError::NotImplemented { operation: "matches" })
        ));
        assert!(matches!(
            source.fetch_odds().await,
            Err(SourceError::NotImplemented { operation: "odds" })
        ));
    }
}
