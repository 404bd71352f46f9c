//! Bus arrival delay prediction from historical stop observations joined
//! with route, stop, traffic and speed limit tables.

pub mod chart;
pub mod config;
pub mod destinations;
pub mod encoding;
pub mod error;
pub mod feature_table;
pub mod forest;
pub mod geo_join;
pub mod model;
pub mod predict;
pub mod records;
pub mod session;
pub mod time_features;
pub mod trip_resolver;

#[cfg(test)]
mod test_support;

pub use config::PipelineConfig;
pub use error::DelayError;
pub use predict::{PredictionResult, Query, QueryOutcome};
pub use session::DelayService;
