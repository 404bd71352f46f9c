//! Matches a (start stop, time, end stop) query to historical trips and
//! traces the stop path between the two stops.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveTime;

use crate::config::TripSelection;
use crate::error::DelayError;
use crate::feature_table::{normalize_stop_name, FeatureTable, StopObservation};

/// Stop ids walked from the start stop along `next_stop_id` links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedPath {
    pub stop_ids: Vec<String>,
    /// false when the walk stopped at a missing or repeated link before the end stop
    pub reached_end: bool,
}

fn departs_at_or_after(row: &StopObservation, time: NaiveTime) -> bool {
    row.scheduled_time.is_some_and(|t| t >= time)
}

fn by_scheduled_time(a: &&StopObservation, b: &&StopObservation) -> Ordering {
    match (a.scheduled_time, b.scheduled_time) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Distinct trip ids with a visit to `start_name` at or after `time`, in
/// feature table order.
pub fn find_trips_from_start(
    table: &FeatureTable,
    time: NaiveTime,
    start_name: &str,
) -> Vec<String> {
    let start = normalize_stop_name(start_name);
    let mut seen: HashSet<String> = HashSet::new();
    table
        .rows()
        .iter()
        .filter(|r| r.has_stop_key(&start) && departs_at_or_after(r, time))
        .filter(|r| seen.insert(r.trip_id.clone()))
        .map(|r| r.trip_id.clone())
        .collect()
}

/// Trips from [`find_trips_from_start`] whose stop sequence, ordered by
/// scheduled time, visits `end_name` after `start_name`.
pub fn find_candidate_trips(
    table: &FeatureTable,
    time: NaiveTime,
    start_name: &str,
    end_name: &str,
) -> Vec<String> {
    let start = normalize_stop_name(start_name);
    let end = normalize_stop_name(end_name);

    find_trips_from_start(table, time, &start)
        .into_iter()
        .filter(|trip_id| {
            let mut sequence: Vec<&StopObservation> = table.trip_rows(trip_id).collect();
            sequence.sort_by(by_scheduled_time);
            let start_pos = sequence.iter().position(|r| r.has_stop_key(&start));
            let end_pos = sequence.iter().position(|r| r.has_stop_key(&end));
            matches!((start_pos, end_pos), (Some(s), Some(e)) if e > s)
        })
        .collect()
}

/// Picks one trip among `candidates` according to `selection`.
pub fn select_trip(
    table: &FeatureTable,
    candidates: &[String],
    selection: TripSelection,
    start_name: &str,
    time: NaiveTime,
) -> Option<String> {
    match selection {
        TripSelection::FirstEncountered => candidates.first().cloned(),
        TripSelection::EarliestDeparture => {
            let start = normalize_stop_name(start_name);
            let departure = |trip_id: &str| {
                table
                    .trip_rows(trip_id)
                    .filter(|r| r.has_stop_key(&start) && departs_at_or_after(r, time))
                    .filter_map(|r| r.scheduled_time)
                    .min()
            };
            let mut best: Option<(&String, NaiveTime)> = None;
            for trip_id in candidates {
                if let Some(t) = departure(trip_id.as_str()) {
                    if best.map_or(true, |(_, b)| t < b) {
                        best = Some((trip_id, t));
                    }
                }
            }
            best.map(|(trip_id, _)| trip_id.clone())
        }
    }
}

/// Walks `next_stop_id` links from the first visit to `start_name` on
/// `trip_id` until `end_name` is reached. A missing link or a stop already
/// on the path ends the walk early with a partial path.
pub fn trace_stop_ids(
    table: &FeatureTable,
    trip_id: &str,
    start_name: &str,
    end_name: &str,
) -> Result<TracedPath, DelayError> {
    let start = normalize_stop_name(start_name);
    let end = normalize_stop_name(end_name);
    let rows: Vec<&StopObservation> = table.trip_rows(trip_id).collect();

    let start_row = rows
        .iter()
        .find(|r| r.has_stop_key(&start))
        .ok_or_else(|| DelayError::StartStopNotInTrip {
            trip_id: trip_id.to_string(),
            stop_name: start.clone(),
        })?;

    let mut current = start_row.stop_id.as_str();
    let mut stop_ids = vec![current.to_string()];
    let mut visited: HashSet<&str> = HashSet::from([current]);
    let mut reached_end = false;

    // each step visits a new stop id, so the walk is bounded by the trip length
    while stop_ids.len() <= rows.len() {
        let Some(row) = rows.iter().find(|r| r.stop_id == current) else {
            break;
        };
        if row.has_stop_key(&end) {
            reached_end = true;
            break;
        }
        let Some(next) = row.next_stop_id.as_deref() else {
            break;
        };
        if !visited.insert(next) {
            break;
        }
        stop_ids.push(next.to_string());
        current = next;
    }

    if !reached_end {
        log::debug!("trip {trip_id}: walk from {start} stopped before reaching {end}");
    }
    Ok(TracedPath { stop_ids, reached_end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture_table;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn start_trips_respect_the_time_filter() {
        let table = fixture_table();
        let trips = find_trips_from_start(&table, at(13, 0), "  pukekohe train station 1 ");
        assert_eq!(
            trips,
            vec![
                "30001-20250505-A1",
                "30001-20250505-A2",
                "30002-20250505-B1",
                "30003-20250505-C1",
            ]
        );
        assert!(find_trips_from_start(&table, at(23, 0), "PUKEKOHE TRAIN STATION 1").is_empty());
    }

    #[test]
    fn candidates_need_end_after_start() {
        let table = fixture_table();
        let trips = find_candidate_trips(
            &table,
            at(13, 0),
            "Pukekohe Train Station 1",
            "Papakura Interchange",
        );
        assert_eq!(trips, vec!["30001-20250505-A1", "30001-20250505-A2"]);

        let reverse =
            find_candidate_trips(&table, at(13, 0), "Takanini Station", "Pukekohe Train Station 1");
        assert!(reverse.is_empty());

        let morning =
            find_candidate_trips(&table, at(12, 0), "Takanini Station", "Pukekohe Train Station 1");
        assert_eq!(morning, vec!["30002-20250505-B1"]);
    }

    #[test]
    fn earliest_departure_selection_can_differ_from_table_order() {
        let table = fixture_table();
        let trips = find_trips_from_start(&table, at(13, 0), "PUKEKOHE TRAIN STATION 1");
        let start = "PUKEKOHE TRAIN STATION 1";
        let first = select_trip(&table, &trips, TripSelection::FirstEncountered, start, at(13, 0));
        assert_eq!(first.as_deref(), Some("30001-20250505-A1"));

        let reordered = vec![
            "30003-20250505-C1".to_string(),
            "30001-20250505-A2".to_string(),
            "30001-20250505-A1".to_string(),
        ];
        let earliest =
            select_trip(&table, &reordered, TripSelection::EarliestDeparture, start, at(13, 0));
        assert_eq!(earliest.as_deref(), Some("30001-20250505-A1"));
        let none = select_trip(&table, &[], TripSelection::EarliestDeparture, "X", at(13, 0));
        assert_eq!(none, None);
    }

    #[test]
    fn trace_follows_links_to_the_end_stop() {
        let table = fixture_table();
        let path = trace_stop_ids(
            &table,
            "30001-20250505-A1",
            "Pukekohe Train Station 1",
            "Papakura Interchange",
        )
        .unwrap();
        assert_eq!(path.stop_ids, vec!["1001", "1002", "1003", "1004"]);
        assert!(path.reached_end);
        assert!(path.stop_ids.len() <= table.trip_rows("30001-20250505-A1").count());
    }

    #[test]
    fn trace_stops_at_a_cycle_with_the_partial_path() {
        let table = fixture_table();
        let path =
            trace_stop_ids(&table, "30003-20250505-C1", "Pukekohe Train Station 1", "Manukau Rd")
                .unwrap();
        assert_eq!(path.stop_ids, vec!["1001", "9001"]);
        assert!(!path.reached_end);
    }

    #[test]
    fn trace_stops_at_a_link_to_a_dropped_row() {
        let table = fixture_table();
        let path =
            trace_stop_ids(&table, "30001-20250505-A2", "Papakura Interchange", "Takanini Station")
                .unwrap();
        assert_eq!(path.stop_ids, vec!["1004", "1005"]);
        assert!(!path.reached_end);
    }

    #[test]
    fn trace_fails_when_start_is_not_on_the_trip() {
        let table = fixture_table();
        let err = trace_stop_ids(
            &table,
            "30002-20250505-B2",
            "Pukekohe Train Station 1",
            "Takanini Station",
        )
        .unwrap_err();
        assert!(matches!(err, DelayError::StartStopNotInTrip { .. }));
    }
}
