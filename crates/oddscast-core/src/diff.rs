// Change detection between successive odds maps.

use std::collections::BTreeSet;

use crate::model::{MatchId, OddsMap};

/// Match identifiers whose odds should be re-rendered going from `previous`
/// to `current`: keys new in `current`, plus keys whose quotes differ.
/// Keys missing from `current` are not reported.
pub fn changed_match_ids(previous: &OddsMap, current: &OddsMap) -> BTreeSet<MatchId> {
    current
        .iter()
        .filter(|(id, odds)| match previous.get(*id) {
            Some(old) => old.quotes_differ(odds),
            None => true,
        })
        .map(|(id, _)| *id)
        .collect()
}

/// Remembers the last odds map a consumer rendered and reports what changed
/// in each newly observed map.
#[derive(Debug, Clone, Default)]
pub struct OddsTracker {
    last: OddsMap,
}

impl OddsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-rendered map.
    pub fn with_baseline(baseline: OddsMap) -> Self {
        OddsTracker { last: baseline }
    }

    /// Diff `current` against the previously observed map, then remember it.
    pub fn observe(&mut self, current: &OddsMap) -> BTreeSet<MatchId> {
        let changed = changed_match_ids(&self.last, current);
        self.last.clone_from(current);
        changed
    }

    pub fn last(&self) -> &OddsMap {
        &self.last
    }
}
