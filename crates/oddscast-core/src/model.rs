// Match and odds value records plus the feed connection state.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Stable integer identifier shared by a match and its odds.
pub type MatchId = i64;

/// Latest odds per match, keyed by match identifier.
pub type OddsMap = HashMap<MatchId, Odds>;

/// A scheduled contest between two teams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    #[serde(rename = "id", alias = "matchID")]
    pub match_id: MatchId,
    #[serde(rename = "teamA")]
    pub team_a: String,
    #[serde(rename = "teamB")]
    pub team_b: String,
    /// Kickoff time, see [`parse_start_time`].
    #[serde(rename = "startTime", deserialize_with = "deserialize_start_time")]
    pub start_time: DateTime<Utc>,
}

/// Parse an ISO-8601 internet timestamp: `T` date/time separator, explicit
/// offset (`Z` or `±hh:mm`), upper case only. Fractional seconds are allowed.
pub fn parse_start_time(text: &str) -> Result<DateTime<Utc>, String> {
    let bytes = text.as_bytes();
    if bytes.get(10) != Some(&b'T') || text.ends_with('z') {
        return Err(format!(
            "invalid timestamp `{text}`: expected YYYY-MM-DDThh:mm:ss with an offset"
        ));
    }
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp `{text}`: {e}"))
}

fn deserialize_start_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_start_time(&text).map_err(de::Error::custom)
}

/// A quoted price pair for the two outcomes of a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Odds {
    #[serde(rename = "matchID")]
    pub match_id: MatchId,
    #[serde(rename = "teamAOdds")]
    pub team_a: f64,
    #[serde(rename = "teamBOdds")]
    pub team_b: f64,
}

impl Odds {
    pub fn new(match_id: MatchId, team_a: f64, team_b: f64) -> Self {
        Odds {
            match_id,
            team_a,
            team_b,
        }
    }

    /// Both prices are finite and strictly positive.
    pub fn is_sane(&self) -> bool {
        self.team_a.is_finite() && self.team_b.is_finite() && self.team_a > 0.0 && self.team_b > 0.0
    }

    /// True when either quote differs from `other`.
    pub fn quotes_differ(&self, other: &Odds) -> bool {
        self.team_a != other.team_a || self.team_b != other.team_b
    }
}

/// Connection state of the push feed. Transitions are driven by the feed
/// only; everything else observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Sort matches by start time, latest first. Equal start times keep their
/// fetched order.
pub fn sort_by_start_desc(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.start_time.cmp(&a.start_time));
}

/// Build an odds map from a fetched list. Later entries for the same match
/// replace earlier ones.
pub fn odds_map_from(odds: Vec<Odds>) -> OddsMap {
    let mut map = OddsMap::with_capacity(odds.len());
    for quote in odds {
        map.insert(quote.match_id, quote);
    }
    map
}
