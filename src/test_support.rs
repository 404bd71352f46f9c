use std::path::PathBuf;

use crate::config::{ForestConfig, SourcePaths};
use crate::feature_table::FeatureTable;
use crate::records::SourceTables;

pub fn fixture_paths() -> SourcePaths {
    SourcePaths {
        data_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures"),
        ..SourcePaths::default()
    }
}

pub fn fixture_sources() -> SourceTables {
    SourceTables::load(&fixture_paths()).expect("fixture tables should load")
}

pub fn fixture_table() -> FeatureTable {
    FeatureTable::build(&fixture_sources())
}

/// A forest small enough for unit tests.
pub fn small_forest() -> ForestConfig {
    ForestConfig {
        n_trees: 12,
        max_depth: 8,
        ..ForestConfig::default()
    }
}
