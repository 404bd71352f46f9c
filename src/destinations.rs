use std::collections::HashSet;

use chrono::NaiveTime;

use crate::feature_table::{normalize_stop_name, FeatureTable, StopObservation};
use crate::trip_resolver::find_trips_from_start;

/// Stop names reachable downstream of `start_name` on the first trip from
/// [`find_trips_from_start`] whose walk yields at least one stop. Names are
/// normalized, distinct, in walk order, and never include the start stop.
pub fn get_possible_end_stops(
    table: &FeatureTable,
    time: NaiveTime,
    start_name: &str,
) -> Vec<String> {
    let start = normalize_stop_name(start_name);
    for trip_id in find_trips_from_start(table, time, &start) {
        let rows: Vec<&StopObservation> = table.trip_rows(&trip_id).collect();
        let Some(start_row) = rows.iter().find(|r| r.has_stop_key(&start)) else {
            continue;
        };
        let names = walk_downstream(&rows, start_row, &start);
        if !names.is_empty() {
            return names;
        }
    }
    Vec::new()
}

fn walk_downstream(
    rows: &[&StopObservation],
    start_row: &StopObservation,
    start: &str,
) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::from([start_row.stop_id.as_str()]);
    let mut seen_names: HashSet<String> = HashSet::new();
    let mut names = Vec::new();
    let mut current = start_row;

    loop {
        let Some(next_id) = current.next_stop_id.as_deref() else {
            break;
        };
        if !visited.insert(next_id) {
            break;
        }
        let Some(next_row) = rows.iter().find(|r| r.stop_id == next_id) else {
            break;
        };
        if let Some(name) = next_row.stop_key.as_deref() {
            if name != start && seen_names.insert(name.to_string()) {
                names.push(name.to_string());
            }
        }
        current = *next_row;
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture_table;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn pukekohe_after_one_pm_lists_the_first_trip_downstream() {
        let table = fixture_table();
        let ends = get_possible_end_stops(&table, at(13, 0), "PUKEKOHE TRAIN STATION 1");
        assert_eq!(
            ends,
            vec!["PAERATA RD", "KARAKA RD", "PAPAKURA INTERCHANGE", "TAKANINI STATION"]
        );
    }

    #[test]
    fn loop_trip_walk_stops_at_the_revisited_stop() {
        let table = fixture_table();
        let ends = get_possible_end_stops(&table, at(14, 30), "Pukekohe Train Station 1");
        assert_eq!(ends, vec!["HOSPITAL LOOP"]);
    }

    #[test]
    fn trip_ending_at_the_start_falls_through_to_the_next_trip() {
        let table = fixture_table();
        let trips = find_trips_from_start(&table, at(12, 0), "Takanini Station");
        assert_eq!(trips[0], "30001-20250505-A1");

        // A1 terminates at Takanini, so B1 supplies the destinations
        let ends = get_possible_end_stops(&table, at(12, 0), "Takanini Station");
        assert_eq!(
            ends,
            vec!["PAPAKURA INTERCHANGE", "KARAKA RD", "PAERATA RD", "PUKEKOHE TRAIN STATION 1"]
        );
    }

    #[test]
    fn walk_never_returns_the_start_or_duplicates() {
        let table = fixture_table();
        for start in table.valid_start_stops() {
            let ends = get_possible_end_stops(&table, at(0, 0), &start);
            assert!(!ends.contains(&start));
            let distinct: HashSet<&String> = ends.iter().collect();
            assert_eq!(distinct.len(), ends.len());
        }
    }

    #[test]
    fn unknown_start_has_no_destinations() {
        let table = fixture_table();
        assert!(get_possible_end_stops(&table, at(13, 0), "NOWHERE").is_empty());
    }
}
