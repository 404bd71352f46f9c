use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::DelayError;

/// Top level settings for building the feature table, training the model and
/// answering queries. Every field has a default so an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: SourcePaths,
    pub forest: ForestConfig,
    pub query: QueryConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, DelayError> {
        let text = fs::read_to_string(path).map_err(|source| DelayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, DelayError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads `path` when given, otherwise falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, DelayError> {
        match path {
            Some(p) => {
                log::info!("loading pipeline config from {}", p.display());
                Self::from_file(p)
            }
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcePaths {
    pub data_dir: PathBuf,
    pub routes: String,
    pub traffic_counts: String,
    pub delays: String,
    pub speed_limits: String,
    pub bus_stops: String,
    pub gtfs_stops: String,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            routes: "Bus_Route_CLEANED.csv".to_string(),
            traffic_counts: "Average_Daily_Traffic_Counts_CLEANED.csv".to_string(),
            delays: "bus_delay_results_c.csv".to_string(),
            speed_limits: "Speed_Limits_CLEANED.csv".to_string(),
            bus_stops: "Bus_Stop_CLEANED.csv".to_string(),
            gtfs_stops: "gtfs/stops.txt".to_string(),
        }
    }
}

impl SourcePaths {
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// share of complete rows held out for validation
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 20,
            min_samples_split: 2,
            min_samples_leaf: 1,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub trip_selection: TripSelection,
}

/// How the trip used for a query is picked among all qualifying trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripSelection {
    /// first trip in feature table order (trip id order), regardless of departure
    #[default]
    FirstEncountered,
    /// trip whose start stop is scheduled soonest at or after the requested time
    EarliestDeparture,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config.forest.n_trees, 100);
        assert_eq!(config.forest.seed, 42);
        assert_eq!(config.sources.delays, "bus_delay_results_c.csv");
        assert_eq!(config.query.trip_selection, TripSelection::FirstEncountered);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let text = r#"
            [sources]
            data_dir = "fixtures"

            [forest]
            n_trees = 8

            [query]
            trip_selection = "earliest_departure"
        "#;
        let config = PipelineConfig::from_toml(text).unwrap();
        assert_eq!(config.forest.n_trees, 8);
        assert_eq!(config.forest.max_depth, 20);
        assert_eq!(
            config.sources.resolve(&config.sources.gtfs_stops),
            PathBuf::from("fixtures").join("gtfs/stops.txt")
        );
        assert_eq!(config.query.trip_selection, TripSelection::EarliestDeparture);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = PipelineConfig::from_toml("[forest]\nn_trees = \"many\"").unwrap_err();
        assert!(matches!(err, DelayError::Config(_)));
    }
}
