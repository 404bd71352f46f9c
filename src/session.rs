//! Process-wide prediction state, built once from the source tables.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use chrono::Local;

use crate::config::{PipelineConfig, TripSelection};
use crate::error::DelayError;
use crate::feature_table::FeatureTable;
use crate::model::DelayModel;
use crate::predict::{Predictor, Query, QueryOutcome};
use crate::records::SourceTables;

static SERVICE: OnceLock<DelayService> = OnceLock::new();
/// held while the shared service is being built
static BUILD_LOCK: Mutex<()> = Mutex::new(());
static GLOBAL_BUILDS: AtomicUsize = AtomicUsize::new(0);

/// Feature table and trained model, read-only once built.
#[derive(Debug)]
pub struct DelayService {
    table: FeatureTable,
    model: DelayModel,
    selection: TripSelection,
}

impl DelayService {
    /// Loads the sources, builds the feature table and trains the model.
    pub fn build(config: &PipelineConfig) -> Result<Self, DelayError> {
        let sources = SourceTables::load(&config.sources)?;
        let table = FeatureTable::build(&sources);
        log::info!(
            "feature table ready: {} rows, {:.1}% of delay rows dropped",
            table.len(),
            table.stats().drop_rate() * 100.0
        );
        let model = DelayModel::train(&table, &config.forest)?;
        Ok(Self::from_parts(table, model, config.query.trip_selection))
    }

    pub fn from_parts(table: FeatureTable, model: DelayModel, selection: TripSelection) -> Self {
        Self {
            table,
            model,
            selection,
        }
    }

    /// The shared service, built from `config` on first use. Later calls
    /// ignore `config` and return the existing instance.
    pub fn global(config: &PipelineConfig) -> Result<&'static DelayService, DelayError> {
        if let Some(service) = SERVICE.get() {
            return Ok(service);
        }
        let _guard = BUILD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(service) = SERVICE.get() {
            return Ok(service);
        }
        let built = Self::build(config)?;
        GLOBAL_BUILDS.fetch_add(1, Ordering::SeqCst);
        Ok(SERVICE.get_or_init(|| built))
    }

    pub fn table(&self) -> &FeatureTable {
        &self.table
    }

    pub fn model(&self) -> &DelayModel {
        &self.model
    }

    pub fn predictor(&self) -> Predictor<'_> {
        Predictor::new(&self.table, &self.model, self.selection)
    }

    pub fn valid_start_stops(&self) -> Vec<String> {
        self.table.valid_start_stops()
    }

    /// Answers `query` for a departure today, local time.
    pub fn answer(&self, query: &Query) -> QueryOutcome {
        self.predictor().answer(query, Local::now().date_naive())
    }
}
