use chrono::{Datelike, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::ForestConfig;
use crate::error::DelayError;
use crate::feature_table::{FeatureTable, StopObservation};
use crate::forest::{RandomForestRegressor, Regressor};
use crate::time_features::{is_peak_hour, HourBins, HourBucket};

pub const FEATURE_COUNT: usize = 23;

/// Column order of the model's input vector.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hour",
    "weekday",
    "is_peak",
    "trip_hour",
    "adt",
    "peaktraffic",
    "pccar",
    "pclcv",
    "stop_lat",
    "stop_lon",
    "speed_limit",
    "shape_length",
    "route_name_encoded",
    "mode_encoded",
    "avg_loc_delay",
    "prev_stop_encoded",
    "next_stop_encoded",
    "hour_bin_morning",
    "hour_bin_afternoon",
    "hour_bin_evening",
    "hour_bin_night",
    "minute",
    "second",
];

/// Named model inputs for one row. Optional fields are the ones that can be
/// missing after the joins.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub hour: u32,
    pub weekday: u32,
    pub is_peak: bool,
    pub trip_hour: Option<u32>,
    pub adt: Option<f64>,
    pub peaktraffic: Option<f64>,
    pub pccar: Option<f64>,
    pub pclcv: Option<f64>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub speed_limit: Option<f64>,
    pub shape_length: Option<f64>,
    pub route_name_encoded: u32,
    pub mode_encoded: u32,
    pub avg_loc_delay: Option<f64>,
    pub prev_stop_encoded: u32,
    pub next_stop_encoded: u32,
    pub hour_bins: HourBins,
    pub minute: u32,
    pub second: u32,
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl FeatureRow {
    /// Training row: every field comes from the historical record.
    pub fn from_observation(row: &StopObservation) -> Self {
        Self {
            hour: row.time.hour,
            weekday: row.time.weekday,
            is_peak: row.time.is_peak,
            trip_hour: row.trip_hour,
            adt: row.traffic.adt,
            peaktraffic: row.traffic.peaktraffic,
            pccar: row.traffic.pccar,
            pclcv: row.traffic.pclcv,
            stop_lat: row.stop_lat,
            stop_lon: row.stop_lon,
            speed_limit: row.speed_limit,
            shape_length: row.shape_length,
            route_name_encoded: row.route_name_encoded,
            mode_encoded: row.mode_encoded,
            avg_loc_delay: row.avg_loc_delay,
            prev_stop_encoded: row.prev_stop_encoded,
            next_stop_encoded: row.next_stop_encoded,
            hour_bins: row.time.hour_bins,
            minute: row.time.minute,
            second: row.time.second,
        }
    }

    /// Query row: time-of-day fields come from `departure`, the rest from the
    /// historical record of the departure stop.
    pub fn for_departure(row: &StopObservation, departure: NaiveDateTime) -> Self {
        let hour = departure.hour();
        Self {
            hour,
            weekday: departure.weekday().num_days_from_monday(),
            is_peak: is_peak_hour(hour),
            hour_bins: HourBucket::for_query_hour(hour).into(),
            minute: departure.minute(),
            second: departure.second(),
            ..Self::from_observation(row)
        }
    }

    /// Names of the inputs that are missing.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let optional = [
            ("trip_hour", self.trip_hour.is_none()),
            ("adt", self.adt.is_none()),
            ("peaktraffic", self.peaktraffic.is_none()),
            ("pccar", self.pccar.is_none()),
            ("pclcv", self.pclcv.is_none()),
            ("stop_lat", self.stop_lat.is_none()),
            ("stop_lon", self.stop_lon.is_none()),
            ("speed_limit", self.speed_limit.is_none()),
            ("shape_length", self.shape_length.is_none()),
            ("avg_loc_delay", self.avg_loc_delay.is_none()),
        ];
        optional.into_iter().filter(|(_, missing)| *missing).map(|(name, _)| name).collect()
    }

    /// The input vector in [`FEATURE_NAMES`] order, or `None` if any input is missing.
    pub fn to_vector(&self) -> Option<Vec<f64>> {
        Some(vec![
            self.hour as f64,
            self.weekday as f64,
            flag(self.is_peak),
            self.trip_hour? as f64,
            self.adt?,
            self.peaktraffic?,
            self.pccar?,
            self.pclcv?,
            self.stop_lat?,
            self.stop_lon?,
            self.speed_limit?,
            self.shape_length?,
            self.route_name_encoded as f64,
            self.mode_encoded as f64,
            self.avg_loc_delay?,
            self.prev_stop_encoded as f64,
            self.next_stop_encoded as f64,
            flag(self.hour_bins.morning),
            flag(self.hour_bins.afternoon),
            flag(self.hour_bins.evening),
            flag(self.hour_bins.night),
            self.minute as f64,
            self.second as f64,
        ])
    }
}

/// Holdout accuracy measured right after training. Informational only.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub mae: f64,
    pub mse: f64,
}

impl ValidationReport {
    pub fn rmse(&self) -> f64 {
        self.mse.sqrt()
    }
}

/// Shuffles row indices with `seed` and splits off `test_fraction` of them,
/// rounded up, for validation. Returns `(train, test)`.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let n_test = ((n as f64) * test_fraction.clamp(0.0, 1.0)).ceil() as usize;
    let n_test = if n_test >= n { n.saturating_sub(1) } else { n_test };
    let test = indices.split_off(n - n_test);
    (indices, test)
}

/// Regressor trained on the feature table, mapping a [`FeatureRow`] to a
/// signed delay in seconds (negative = early).
pub struct DelayModel {
    regressor: Box<dyn Regressor>,
    validation: Option<ValidationReport>,
}

impl std::fmt::Debug for DelayModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayModel")
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

impl DelayModel {
    pub fn train(table: &FeatureTable, config: &ForestConfig) -> Result<Self, DelayError> {
        Self::train_with(table, config, RandomForestRegressor::new(config.clone()))
    }

    pub fn train_with<R: Regressor + 'static>(
        table: &FeatureTable,
        config: &ForestConfig,
        mut regressor: R,
    ) -> Result<Self, DelayError> {
        let (features, targets): (Vec<Vec<f64>>, Vec<f64>) = table
            .rows()
            .iter()
            .filter_map(|row| {
                Some((FeatureRow::from_observation(row).to_vector()?, row.delay_seconds?))
            })
            .unzip();

        if features.is_empty() {
            return Err(DelayError::EmptyTrainingSet);
        }
        log::info!(
            "training on {} of {} rows with complete features",
            features.len(),
            table.len()
        );

        let (train_idx, test_idx) =
            train_test_split(features.len(), config.test_fraction, config.seed);
        let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
            idx.iter().map(|&i| (features[i].clone(), targets[i])).unzip()
        };
        let (x_train, y_train) = pick(&train_idx);
        let (x_test, y_test) = pick(&test_idx);

        regressor.fit(&x_train, &y_train);

        let validation = (!x_test.is_empty()).then(|| {
            let predictions = regressor.predict_many(&x_test);
            let n = y_test.len() as f64;
            let mae = predictions.iter().zip(&y_test).map(|(p, y)| (p - y).abs()).sum::<f64>() / n;
            let mse =
                predictions.iter().zip(&y_test).map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n;
            ValidationReport {
                train_rows: x_train.len(),
                test_rows: x_test.len(),
                mae,
                mse,
            }
        });

        match &validation {
            Some(report) => log::info!(
                "holdout MAE {:.2}s, MSE {:.2}, RMSE {:.2}s over {} rows",
                report.mae,
                report.mse,
                report.rmse(),
                report.test_rows
            ),
            None => log::warn!("too few rows for a holdout split, model trained on everything"),
        }

        Ok(Self {
            regressor: Box::new(regressor),
            validation,
        })
    }

    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }

    /// `None` when the row is missing an input.
    pub fn predict(&self, row: &FeatureRow) -> Option<f64> {
        row.to_vector().map(|v| self.regressor.predict(&v))
    }
}
