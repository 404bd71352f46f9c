//! Turns a user query into a delay estimate and an arrival time.

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::config::TripSelection;
use crate::destinations::get_possible_end_stops;
use crate::error::DelayError;
use crate::feature_table::{normalize_stop_name, FeatureTable};
use crate::model::{DelayModel, FeatureRow};
use crate::time_features::{format_time_of_day, parse_time_of_day};
use crate::trip_resolver::{find_candidate_trips, select_trip, trace_stop_ids};

/// One submission: travel from `start` to `end`, leaving at `departure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub start: String,
    pub end: String,
    pub departure: NaiveTime,
}

impl Query {
    pub fn parse(start: &str, end: &str, departure: &str) -> Result<Self, DelayError> {
        let departure = parse_time_of_day(departure)
            .ok_or_else(|| DelayError::InvalidTime(departure.to_string()))?;
        Ok(Self {
            start: normalize_stop_name(start),
            end: normalize_stop_name(end),
            departure,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayDirection {
    Delay,
    EarlyArrival,
}

impl DelayDirection {
    pub fn of(delay_seconds: f64) -> Self {
        if delay_seconds >= 0.0 {
            DelayDirection::Delay
        } else {
            DelayDirection::EarlyArrival
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DelayDirection::Delay => "Delay",
            DelayDirection::EarlyArrival => "Early Arrival",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelAdvice {
    ConsiderAlternative,
    NoNeedToHurry,
    ArrivingSoon,
}

impl TravelAdvice {
    pub fn for_travel_minutes(minutes: f64) -> Self {
        if minutes > 90.0 {
            TravelAdvice::ConsiderAlternative
        } else if minutes > 60.0 {
            TravelAdvice::NoNeedToHurry
        } else {
            TravelAdvice::ArrivingSoon
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            TravelAdvice::ConsiderAlternative => {
                "Suggestion: The predicted wait time for your trip is too long. Please consider departing closer to the estimated time or choosing an alternative route."
            }
            TravelAdvice::NoNeedToHurry => {
                "Suggestion: The predicted arrival time is still a while away, so there's no need to worry about your departure time."
            }
            TravelAdvice::ArrivingSoon => {
                "Suggestion: The predicted vehicle is arriving soon. Please get ready to depart."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub trip_id: String,
    pub stop_ids: Vec<String>,
    /// whether the traced path reached the destination stop
    pub path_complete: bool,
    pub delay_seconds: f64,
    pub scheduled_arrival: Option<NaiveTime>,
    pub predicted_arrival: Option<NaiveTime>,
}

impl PredictionResult {
    pub fn direction(&self) -> DelayDirection {
        DelayDirection::of(self.delay_seconds)
    }

    pub fn magnitude(&self) -> f64 {
        self.delay_seconds.abs()
    }

    /// Minutes from `departure` to the predicted arrival, same day.
    pub fn travel_minutes(&self, departure: NaiveTime) -> Option<f64> {
        self.predicted_arrival
            .map(|arrival| arrival.signed_duration_since(departure).num_seconds() as f64 / 60.0)
    }

    pub fn advice(&self, departure: NaiveTime) -> Option<TravelAdvice> {
        self.travel_minutes(departure).map(TravelAdvice::for_travel_minutes)
    }
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |t: Option<NaiveTime>| t.map_or_else(|| "Null".to_string(), format_time_of_day);
        writeln!(f, "Estimated {}: {:.2} seconds", self.direction().label(), self.magnitude())?;
        writeln!(f, "Scheduled Arrival Time: {}", show(self.scheduled_arrival))?;
        write!(f, "Estimated Actual Arrival Time: {}", show(self.predicted_arrival))
    }
}

/// What the user sees for a query. Query failures never escape as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Prediction(PredictionResult),
    /// expected outcome such as no matching trip
    Advisory(String),
    /// the prediction itself failed
    Failed(String),
}

/// Model inputs for a query departing from the first stop of `stop_ids`.
pub fn extract_features_for_prediction(
    table: &FeatureTable,
    trip_id: &str,
    stop_ids: &[String],
    departure: NaiveDateTime,
) -> Result<FeatureRow, DelayError> {
    let first = stop_ids.first().ok_or(DelayError::NoTraceablePath)?;
    let row = table
        .find_row(trip_id, first)
        .ok_or_else(|| DelayError::FeatureLookupFailure {
            trip_id: trip_id.to_string(),
            stop_id: first.clone(),
        })?;
    Ok(FeatureRow::for_departure(row, departure))
}

/// Observed arrival on `trip_id` along `stop_ids` whose time of day is
/// closest to `departure`. Earliest row in table order wins ties.
pub fn anchor_arrival(
    table: &FeatureTable,
    trip_id: &str,
    stop_ids: &[String],
    departure: NaiveTime,
) -> Option<NaiveDateTime> {
    table
        .trip_rows(trip_id)
        .filter(|r| stop_ids.contains(&r.stop_id))
        .min_by_key(|r| {
            r.arrival_dt.time().signed_duration_since(departure).num_milliseconds().abs()
        })
        .map(|r| r.arrival_dt)
}

/// Answers queries against a built feature table and trained model.
pub struct Predictor<'a> {
    table: &'a FeatureTable,
    model: &'a DelayModel,
    selection: TripSelection,
}

impl<'a> Predictor<'a> {
    pub fn new(table: &'a FeatureTable, model: &'a DelayModel, selection: TripSelection) -> Self {
        Self {
            table,
            model,
            selection,
        }
    }

    pub fn possible_end_stops(&self, start: &str, departure: NaiveTime) -> Vec<String> {
        get_possible_end_stops(self.table, departure, start)
    }

    /// Rejects destinations the enumerator would not offer for this start and time.
    pub fn check_destination(&self, query: &Query) -> Result<(), DelayError> {
        if self.possible_end_stops(&query.start, query.departure).contains(&query.end) {
            Ok(())
        } else {
            Err(DelayError::UnreachableDestination(query.end.clone()))
        }
    }

    pub fn predict(&self, query: &Query, today: NaiveDate) -> Result<PredictionResult, DelayError> {
        let candidates =
            find_candidate_trips(self.table, query.departure, &query.start, &query.end);
        let trip_id = select_trip(
            self.table,
            &candidates,
            self.selection,
            &query.start,
            query.departure,
        )
        .ok_or(DelayError::NoMatchingTrip)?;

        let path = trace_stop_ids(self.table, &trip_id, &query.start, &query.end).map_err(|e| {
            log::debug!("trace failed: {e}");
            DelayError::NoTraceablePath
        })?;
        if path.stop_ids.is_empty() {
            return Err(DelayError::NoTraceablePath);
        }
        if !path.reached_end {
            log::warn!(
                "trip {trip_id}: path from {} did not reach {}, predicting on the partial path",
                query.start,
                query.end
            );
        }

        let departure = today.and_time(query.departure);
        let features =
            extract_features_for_prediction(self.table, &trip_id, &path.stop_ids, departure)?;
        let delay_seconds =
            self.model.predict(&features).ok_or_else(|| DelayError::IncompleteFeatures {
                trip_id: trip_id.clone(),
                stop_id: path.stop_ids[0].clone(),
                missing: features.missing_fields().join(", "),
            })?;

        let anchor = anchor_arrival(self.table, &trip_id, &path.stop_ids, query.departure);
        let scheduled_arrival = anchor.map(|a| a.time());
        let predicted_arrival = scheduled_arrival.and_then(|t| shift_time(t, delay_seconds));

        log::info!(
            "trip {trip_id}: predicted {delay_seconds:.2}s over {} stops",
            path.stop_ids.len()
        );

        Ok(PredictionResult {
            trip_id,
            stop_ids: path.stop_ids,
            path_complete: path.reached_end,
            delay_seconds,
            scheduled_arrival,
            predicted_arrival,
        })
    }

    /// Like [`Predictor::predict`], with failures turned into display text.
    pub fn answer(&self, query: &Query, today: NaiveDate) -> QueryOutcome {
        match self.predict(query, today) {
            Ok(result) => QueryOutcome::Prediction(result),
            Err(e) if e.is_advisory() => QueryOutcome::Advisory(e.to_string()),
            Err(e) => {
                log::error!("prediction failed: {e}");
                QueryOutcome::Failed(format!("An error occurred during prediction: {e}"))
            }
        }
    }
}

/// Adds a signed number of seconds to a time of day, wrapping at midnight.
/// `None` when the offset is not finite or does not fit a [`Duration`].
fn shift_time(time: NaiveTime, seconds: f64) -> Option<NaiveTime> {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let offset = Duration::try_milliseconds(millis as i64)?;
    let (shifted, _) = time.overflowing_add_signed(offset);
    Some(shifted)
}
