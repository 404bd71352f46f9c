//! Fuses the source tables into one row per historical stop visit.

use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDateTime, NaiveTime, Timelike};

use crate::encoding::{CategoryEncoder, FeatureEncoders};
use crate::geo_join::{nearest_join, Augment, JoinReport, PayloadTable, SpatialRow};
use crate::records::{
    BusStopRecord, DelayRecord, GtfsStopRecord, SourceTables, Table, TrafficCountRecord,
};
use crate::time_features::{parse_time_of_day, parse_timestamp, ArrivalTimeFeatures};

/// Trims and uppercases a stop name for matching.
pub fn normalize_stop_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Columns the traffic join can copy from a counting site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficColumn {
    Adt,
    PeakTraffic,
    PcCar,
    PcLcv,
    RoadId,
    RoadName,
    StartName,
    EndName,
}

impl TrafficColumn {
    pub const ALL: [TrafficColumn; 8] = [
        TrafficColumn::Adt,
        TrafficColumn::PeakTraffic,
        TrafficColumn::PcCar,
        TrafficColumn::PcLcv,
        TrafficColumn::RoadId,
        TrafficColumn::RoadName,
        TrafficColumn::StartName,
        TrafficColumn::EndName,
    ];

    pub fn header(self) -> &'static str {
        match self {
            TrafficColumn::Adt => "adt",
            TrafficColumn::PeakTraffic => "peaktraffic",
            TrafficColumn::PcCar => "pccar",
            TrafficColumn::PcLcv => "pclcv",
            TrafficColumn::RoadId => "road_id",
            TrafficColumn::RoadName => "road_name",
            TrafficColumn::StartName => "start_name",
            TrafficColumn::EndName => "end_name",
        }
    }
}

impl SpatialRow for TrafficCountRecord {
    fn lat_lon(&self) -> Option<(f64, f64)> {
        Some((self.adc_y?, self.adc_x?))
    }
}

impl PayloadTable for Table<TrafficCountRecord> {
    type Row = TrafficCountRecord;
    type Column = TrafficColumn;

    fn rows(&self) -> &[TrafficCountRecord] {
        &self.rows
    }

    fn has_column(&self, column: TrafficColumn) -> bool {
        Table::has_column(self, column.header())
    }
}

/// Traffic attributes of the road nearest to a stop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficMetrics {
    pub adt: Option<f64>,
    pub peaktraffic: Option<f64>,
    pub pccar: Option<f64>,
    pub pclcv: Option<f64>,
    pub road_id: Option<String>,
    pub road_name: Option<String>,
    pub start_name: Option<String>,
    pub end_name: Option<String>,
}

/// A fully derived historical stop visit.
#[derive(Debug, Clone, PartialEq)]
pub struct StopObservation {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_name: Option<String>,
    /// trimmed, uppercased `stop_name` used for matching queries
    pub stop_key: Option<String>,
    pub parent_station: Option<String>,
    pub scheduled_time: Option<NaiveTime>,
    pub arrival_time: Option<NaiveDateTime>,
    pub arrival_dt: NaiveDateTime,
    pub delay_seconds: Option<f64>,
    pub delay_minutes: Option<f64>,
    pub prev_stop_id: Option<String>,
    pub next_stop_id: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub mode: Option<String>,
    pub route_pattern: String,
    pub route_name: Option<String>,
    pub route_number: Option<String>,
    pub shape_length: Option<f64>,
    pub traffic: TrafficMetrics,
    pub speed_limit: Option<f64>,
    pub stop_id_group: String,
    pub trip_hour: Option<u32>,
    pub time: ArrivalTimeFeatures,
    pub route_name_encoded: u32,
    pub mode_encoded: u32,
    pub location_id: String,
    pub avg_loc_delay: Option<f64>,
    pub prev_stop_encoded: u32,
    pub next_stop_encoded: u32,
    pub adt_peak: Option<f64>,
}

impl StopObservation {
    pub fn has_stop_key(&self, key: &str) -> bool {
        self.stop_key.as_deref() == Some(key)
    }
}

/// Counters collected while building the table.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildStats {
    pub source_rows: usize,
    pub dropped_unparseable_arrivals: usize,
    pub traffic_join: JoinReport<TrafficColumn>,
}

impl BuildStats {
    pub fn drop_rate(&self) -> f64 {
        if self.source_rows == 0 {
            0.0
        } else {
            self.dropped_unparseable_arrivals as f64 / self.source_rows as f64
        }
    }
}

/// The fused, read-only feature table and the encoders fitted on it.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    rows: Vec<StopObservation>,
    trip_index: HashMap<String, Vec<usize>>,
    encoders: FeatureEncoders,
    stats: BuildStats,
}

/// Row state before the arrival timestamp filter.
#[derive(Debug, Clone)]
struct JoinedRow {
    trip_id: String,
    stop_id: String,
    stop_name: Option<String>,
    parent_station: Option<String>,
    scheduled_time: Option<NaiveTime>,
    arrival_time: Option<NaiveDateTime>,
    arrival_dt: Option<String>,
    delay_seconds: Option<f64>,
    stop_lat: Option<f64>,
    stop_lon: Option<f64>,
    x: Option<f64>,
    y: Option<f64>,
    mode: Option<String>,
    traffic: TrafficMetrics,
    speed_limit: Option<f64>,
    route_pattern: String,
    route_name: Option<String>,
    route_number: Option<String>,
    shape_length: Option<f64>,
    prev_stop_id: Option<String>,
    next_stop_id: Option<String>,
}

impl SpatialRow for JoinedRow {
    fn lat_lon(&self) -> Option<(f64, f64)> {
        Some((self.y?, self.x?))
    }
}

impl Augment<TrafficCountRecord, TrafficColumn> for JoinedRow {
    fn augment(&mut self, site: &TrafficCountRecord, columns: &[TrafficColumn]) {
        for column in columns {
            match column {
                TrafficColumn::Adt => self.traffic.adt = site.adt,
                TrafficColumn::PeakTraffic => self.traffic.peaktraffic = site.peaktraffic,
                TrafficColumn::PcCar => self.traffic.pccar = site.pccar,
                TrafficColumn::PcLcv => self.traffic.pclcv = site.pclcv,
                TrafficColumn::RoadId => self.traffic.road_id = site.road_id.clone(),
                TrafficColumn::RoadName => self.traffic.road_name = site.road_name.clone(),
                TrafficColumn::StartName => self.traffic.start_name = site.start_name.clone(),
                TrafficColumn::EndName => self.traffic.end_name = site.end_name.clone(),
            }
        }
    }
}

/// Route pattern is the trip id up to its first `-`.
pub fn route_pattern(trip_id: &str) -> &str {
    trip_id.split('-').next().unwrap_or(trip_id)
}

fn location_id(lat: Option<f64>, lon: Option<f64>) -> String {
    let part = |v: Option<f64>| v.map_or_else(|| "nan".to_string(), |v| format!("{v:.6}"));
    format!("{}_{}", part(lat), part(lon))
}

fn first_by_key<'a, T, F>(rows: &'a [T], key: F) -> HashMap<&'a str, &'a T>
where
    F: Fn(&'a T) -> &'a str,
{
    let mut map = HashMap::new();
    for row in rows {
        map.entry(key(row)).or_insert(row);
    }
    map
}

/// Left join of delays onto bus stops, backfilling from GTFS stops where the
/// bus stop table has no coordinates.
fn join_stops(
    delays: &[DelayRecord],
    bus_stops: &[BusStopRecord],
    gtfs_stops: &[GtfsStopRecord],
) -> Vec<JoinedRow> {
    let bus = first_by_key(bus_stops, |s| s.stop_id.as_str());
    let gtfs = first_by_key(gtfs_stops, |s| s.stop_id.as_str());

    delays
        .iter()
        .map(|d| {
            let stop = bus.get(d.stop_id.as_str());
            let mut row = JoinedRow {
                trip_id: d.trip_id.clone(),
                stop_id: d.stop_id.clone(),
                stop_name: d.stop_name.clone(),
                parent_station: stop.and_then(|s| s.parent_station.clone()),
                scheduled_time: d.scheduled_time.as_deref().and_then(parse_time_of_day),
                arrival_time: d.arrival_time_scheduled.as_deref().and_then(parse_timestamp),
                arrival_dt: d.arrival_dt.clone(),
                delay_seconds: d.delay_seconds,
                stop_lat: stop.and_then(|s| s.stop_lat),
                stop_lon: stop.and_then(|s| s.stop_lon),
                x: stop.and_then(|s| s.x),
                y: stop.and_then(|s| s.y),
                mode: stop.and_then(|s| s.mode.clone()),
                traffic: TrafficMetrics::default(),
                speed_limit: None,
                route_pattern: route_pattern(&d.trip_id).to_string(),
                route_name: None,
                route_number: None,
                shape_length: None,
                prev_stop_id: None,
                next_stop_id: None,
            };

            let reference = gtfs.get(d.stop_id.as_str());
            if row.stop_lat.is_none() || row.stop_lon.is_none() {
                row.stop_lat = reference.and_then(|g| g.stop_lat);
                row.stop_lon = reference.and_then(|g| g.stop_lon);
                row.parent_station = reference.and_then(|g| g.parent_station.clone());
            }
            if row.stop_name.is_none() {
                row.stop_name = reference.and_then(|g| g.stop_name.clone());
            }
            row
        })
        .collect()
}

impl FeatureTable {
    /// Runs the whole fusion pipeline. Deterministic for identical inputs.
    pub fn build(sources: &SourceTables) -> FeatureTable {
        let source_rows = sources.delays.rows.len();
        log::info!("building feature table from {source_rows} delay records");

        let mut rows = join_stops(
            &sources.delays.rows,
            &sources.bus_stops.rows,
            &sources.gtfs_stops.rows,
        );

        let traffic_join = nearest_join(&mut rows, &sources.traffic_counts, &TrafficColumn::ALL);

        let mut speed_limits: HashMap<&str, f64> = HashMap::new();
        for limit in &sources.speed_limits.rows {
            if let Some(value) = limit.speed_limit {
                speed_limits
                    .entry(limit.road_id.as_str())
                    .and_modify(|max| *max = max.max(value))
                    .or_insert(value);
            }
        }

        let routes = first_by_key(&sources.routes.rows, |r| r.route_pattern.as_str());

        for row in rows.iter_mut() {
            row.speed_limit = row
                .traffic
                .road_id
                .as_deref()
                .and_then(|id| speed_limits.get(id).copied());
            if let Some(route) = routes.get(row.route_pattern.as_str()) {
                row.route_name = route.route_name.clone();
                row.route_number = route.route_number.clone();
                row.shape_length = route.shape_length;
            }
        }

        // scheduled arrival drives trip ordering; unparseable values sort last
        rows.sort_by(|a, b| {
            a.trip_id
                .cmp(&b.trip_id)
                .then_with(|| match (a.arrival_time, b.arrival_time) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
        });
        link_neighbours(&mut rows);

        let (route_encoder, route_codes) =
            CategoryEncoder::fit_transform(rows.iter().map(|r| r.route_name.as_deref()));
        let (mode_encoder, mode_codes) =
            CategoryEncoder::fit_transform(rows.iter().map(|r| r.mode.as_deref()));

        let mut kept = Vec::with_capacity(rows.len());
        for ((row, route_code), mode_code) in rows.into_iter().zip(route_codes).zip(mode_codes) {
            if let Some(arrival) = row.arrival_dt.as_deref().and_then(parse_timestamp) {
                kept.push((row, arrival, route_code, mode_code));
            }
        }

        let dropped = source_rows - kept.len();
        if dropped > 0 {
            log::warn!(
                "dropped {} of {} rows with an unparseable arrival timestamp ({:.1}%)",
                dropped,
                source_rows,
                100.0 * dropped as f64 / source_rows as f64
            );
        }

        let mut delay_sums: HashMap<String, (f64, usize)> = HashMap::new();
        for (row, ..) in &kept {
            let entry = delay_sums
                .entry(location_id(row.stop_lat, row.stop_lon))
                .or_insert((0.0, 0));
            if let Some(delay) = row.delay_seconds {
                entry.0 += delay;
                entry.1 += 1;
            }
        }

        let (prev_encoder, prev_codes) =
            CategoryEncoder::fit_transform(kept.iter().map(|(r, ..)| r.prev_stop_id.as_deref()));
        let (next_encoder, next_codes) =
            CategoryEncoder::fit_transform(kept.iter().map(|(r, ..)| r.next_stop_id.as_deref()));

        let observations: Vec<StopObservation> = kept
            .into_iter()
            .zip(prev_codes.into_iter().zip(next_codes))
            .map(|((row, arrival, route_code, mode_code), (prev_code, next_code))| {
                let time = ArrivalTimeFeatures::from_arrival(arrival);
                let location = location_id(row.stop_lat, row.stop_lon);
                let avg_loc_delay = delay_sums
                    .get(&location)
                    .filter(|(_, n)| *n > 0)
                    .map(|(sum, n)| sum / *n as f64);
                let adt_peak = row.traffic.adt.map(|adt| if time.is_peak { adt } else { 0.0 });
                StopObservation {
                    stop_key: row.stop_name.as_deref().map(normalize_stop_name),
                    stop_id_group: row.stop_id.chars().take(4).collect(),
                    trip_hour: row.scheduled_time.map(|t| t.hour()),
                    delay_minutes: row.delay_seconds.map(|d| d / 60.0),
                    trip_id: row.trip_id,
                    stop_id: row.stop_id,
                    stop_name: row.stop_name,
                    parent_station: row.parent_station,
                    scheduled_time: row.scheduled_time,
                    arrival_time: row.arrival_time,
                    arrival_dt: arrival,
                    delay_seconds: row.delay_seconds,
                    prev_stop_id: row.prev_stop_id,
                    next_stop_id: row.next_stop_id,
                    stop_lat: row.stop_lat,
                    stop_lon: row.stop_lon,
                    x: row.x,
                    y: row.y,
                    mode: row.mode,
                    route_pattern: row.route_pattern,
                    route_name: row.route_name,
                    route_number: row.route_number,
                    shape_length: row.shape_length,
                    traffic: row.traffic,
                    speed_limit: row.speed_limit,
                    time,
                    route_name_encoded: route_code,
                    mode_encoded: mode_code,
                    location_id: location,
                    avg_loc_delay,
                    prev_stop_encoded: prev_code,
                    next_stop_encoded: next_code,
                    adt_peak,
                }
            })
            .collect();

        let mut trip_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, row) in observations.iter().enumerate() {
            trip_index.entry(row.trip_id.clone()).or_default().push(idx);
        }

        log::info!(
            "feature table ready: {} rows across {} trips",
            observations.len(),
            trip_index.len()
        );

        FeatureTable {
            rows: observations,
            trip_index,
            encoders: FeatureEncoders {
                route_name: route_encoder,
                mode: mode_encoder,
                prev_stop: prev_encoder,
                next_stop: next_encoder,
            },
            stats: BuildStats {
                source_rows,
                dropped_unparseable_arrivals: dropped,
                traffic_join,
            },
        }
    }

    pub fn rows(&self) -> &[StopObservation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn encoders(&self) -> &FeatureEncoders {
        &self.encoders
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Rows of one trip in table order (scheduled arrival).
    pub fn trip_rows<'a>(
        &'a self,
        trip_id: &str,
    ) -> impl Iterator<Item = &'a StopObservation> + 'a {
        self.trip_index
            .get(trip_id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.rows[idx])
    }

    /// First row of `trip_id` at `stop_id`.
    pub fn find_row(&self, trip_id: &str, stop_id: &str) -> Option<&StopObservation> {
        self.trip_rows(trip_id).find(|r| r.stop_id == stop_id)
    }

    /// Sorted distinct normalized names of stops that have a following stop.
    pub fn valid_start_stops(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter(|r| r.next_stop_id.is_some())
            .filter_map(|r| r.stop_key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Fills `prev_stop_id`/`next_stop_id` by position within each trip. Rows
/// must already be grouped by trip.
fn link_neighbours(rows: &mut [JoinedRow]) {
    for i in 0..rows.len() {
        let same_trip = |j: usize| rows[j].trip_id == rows[i].trip_id;
        let prev = (i > 0 && same_trip(i - 1)).then(|| rows[i - 1].stop_id.clone());
        let next = (i + 1 < rows.len() && same_trip(i + 1)).then(|| rows[i + 1].stop_id.clone());
        rows[i].prev_stop_id = prev;
        rows[i].next_stop_id = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture_sources, fixture_table};
    use approx::assert_relative_eq;

    #[test]
    fn unparseable_arrivals_are_dropped_and_counted() {
        let table = fixture_table();
        assert_eq!(table.stats().source_rows, 25);
        assert_eq!(table.stats().dropped_unparseable_arrivals, 1);
        assert_eq!(table.len(), 24);
        assert_relative_eq!(table.stats().drop_rate(), 0.04);
        assert!(table.find_row("30001-20250505-A2", "1005").is_none());
    }

    #[test]
    fn neighbour_links_are_computed_before_the_arrival_filter() {
        let table = fixture_table();
        let row = table.find_row("30001-20250505-A2", "1004").unwrap();
        assert_eq!(row.next_stop_id.as_deref(), Some("1005"));
        assert_eq!(row.prev_stop_id.as_deref(), Some("1003"));
    }

    #[test]
    fn prev_and_next_links_mirror_each_other() {
        let table = fixture_table();
        let sources = fixture_sources();
        let mut trips: Vec<&str> = sources.delays.rows.iter().map(|d| d.trip_id.as_str()).collect();
        trips.dedup();
        for trip in trips {
            let rows: Vec<_> = table.trip_rows(trip).collect();
            for pair in rows.windows(2) {
                if pair[0].next_stop_id.as_deref() == Some(pair[1].stop_id.as_str()) {
                    assert_eq!(pair[1].prev_stop_id.as_deref(), Some(pair[0].stop_id.as_str()));
                }
            }
            assert_eq!(rows.first().and_then(|r| r.prev_stop_id.clone()), None);
        }
    }

    #[test]
    fn missing_bus_stop_coordinates_are_backfilled_from_gtfs() {
        let table = fixture_table();
        let karaka = table.find_row("30001-20250505-A1", "1003").unwrap();
        assert_eq!(karaka.stop_lat, Some(-37.1201));
        assert_eq!(karaka.stop_lon, Some(174.9102));
        assert_eq!(karaka.parent_station.as_deref(), Some("9300"));

        let manukau = table.find_row("30003-20250505-C1", "1006").unwrap();
        assert_eq!(manukau.stop_key.as_deref(), Some("MANUKAU RD"));
        assert_eq!(manukau.stop_lat, Some(-37.2150));
        assert_eq!(manukau.mode, None);
    }

    #[test]
    fn traffic_speed_and_route_are_attached() {
        let table = fixture_table();
        let row = table.find_row("30001-20250505-A1", "1001").unwrap();
        assert_eq!(row.traffic.road_id.as_deref(), Some("501"));
        assert_eq!(row.traffic.adt, Some(8200.0));
        assert_eq!(row.speed_limit, Some(60.0));
        assert_eq!(row.route_pattern, "30001");
        assert_eq!(row.route_name.as_deref(), Some("Pukekohe To Takanini"));
        assert_eq!(row.shape_length, Some(24500.5));
        assert_eq!(row.stop_id_group, "1001");
        assert_eq!(row.trip_hour, Some(13));
        assert_relative_eq!(row.delay_minutes.unwrap(), 70.0 / 60.0);

        let papakura = table.find_row("30001-20250505-A1", "1004").unwrap();
        assert_eq!(papakura.speed_limit, Some(50.0));
    }

    #[test]
    fn stops_without_any_coordinates_pass_through_the_traffic_join() {
        let table = fixture_table();
        let row = table.find_row("30002-20250505-B2", "1007").unwrap();
        assert_eq!(row.stop_lat, None);
        assert_eq!(row.traffic, TrafficMetrics::default());
        assert_eq!(row.speed_limit, None);
        assert_eq!(row.location_id, "nan_nan");
        assert_eq!(table.stats().traffic_join.passed_through, 2);
    }

    #[test]
    fn time_fields_come_from_the_observed_arrival() {
        let table = fixture_table();
        let row = table.find_row("30001-20250506-A3", "1002").unwrap();
        assert_eq!(row.time.hour, 7);
        assert_eq!(row.time.minute, 16);
        assert_eq!(row.time.second, 10);
        assert_eq!(row.time.weekday, 1);
        assert!(row.time.is_peak);
        assert!(row.time.hour_bins.morning);
        assert_eq!(row.adt_peak, Some(8200.0));

        let midday = table.find_row("30001-20250505-A1", "1002").unwrap();
        assert_eq!(midday.adt_peak, Some(0.0));
    }

    #[test]
    fn location_average_delay_is_shared_by_a_location() {
        let table = fixture_table();
        let expected = (70.0 + 20.0 + 180.0 - 30.0 + 60.0 + 60.0) / 6.0;
        for row in table.rows().iter().filter(|r| r.stop_id == "1001") {
            assert_relative_eq!(row.avg_loc_delay.unwrap(), expected);
        }
    }

    #[test]
    fn encoders_cover_every_row() {
        let table = fixture_table();
        let encoders = table.encoders();
        for row in table.rows() {
            assert_eq!(encoders.mode.encode(row.mode.as_deref()), Some(row.mode_encoded));
            assert_eq!(
                encoders.prev_stop.encode(row.prev_stop_id.as_deref()),
                Some(row.prev_stop_encoded)
            );
            assert_eq!(
                encoders.next_stop.encode(row.next_stop_id.as_deref()),
                Some(row.next_stop_encoded)
            );
        }
        assert_eq!(encoders.mode.decode(0), Some("Bus"));
    }

    #[test]
    fn start_stops_need_a_following_stop() {
        let starts = fixture_table().valid_start_stops();
        assert!(starts.contains(&"PUKEKOHE TRAIN STATION 1".to_string()));
        assert!(starts.contains(&"UNLISTED STOP".to_string()));
        assert!(!starts.contains(&"MANUKAU RD".to_string()));
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn building_twice_gives_identical_tables() {
        let sources = fixture_sources();
        let a = FeatureTable::build(&sources);
        let b = FeatureTable::build(&sources);
        assert_eq!(a.rows(), b.rows());
        assert_eq!(a.encoders(), b.encoders());
    }

    #[test]
    fn route_pattern_is_text_before_first_dash() {
        assert_eq!(route_pattern("30001-20250505-A1"), "30001");
        assert_eq!(route_pattern("nodash"), "nodash");
    }
}
