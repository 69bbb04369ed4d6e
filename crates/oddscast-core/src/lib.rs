// Library root: live odds model, historical data sources, the simulated push
// feed and the reconciler that merges both into observable state.

pub mod diff;
pub mod feed;
pub mod model;
pub mod publish;
pub mod reconciler;
pub mod source;
