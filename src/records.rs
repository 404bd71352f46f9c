use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::SourcePaths;
use crate::error::DelayError;

/// Route metadata keyed by route pattern.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRecord {
    #[serde(rename = "ROUTEPATTERN")]
    pub route_pattern: String,       // e.g. "30002"
    #[serde(rename = "ROUTENAME")]
    pub route_name: Option<String>,
    #[serde(rename = "ROUTENUMBER")]
    pub route_number: Option<String>,
    #[serde(rename = "Shape__Length")]
    pub shape_length: Option<f64>,
}

/// One traffic counting site. Coordinates are the site's X (lon) and Y (lat).
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficCountRecord {
    #[serde(rename = "X")]
    pub adc_x: Option<f64>,
    #[serde(rename = "Y")]
    pub adc_y: Option<f64>,
    pub adt: Option<f64>,            // average daily traffic
    pub peaktraffic: Option<f64>,
    pub pccar: Option<f64>,          // percent cars
    pub pclcv: Option<f64>,          // percent light commercial vehicles
    pub road_id: Option<String>,
    pub road_name: Option<String>,
    pub start_name: Option<String>,
    pub end_name: Option<String>,
}

/// Historical arrival observation, the primary fact table.
#[derive(Debug, Clone, Deserialize)]
pub struct DelayRecord {
    pub trip_id: String,             // e.g. "30002-20250505-1234"
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub scheduled_time: Option<String>,          // "HH:MM:SS"
    pub arrival_time_scheduled: Option<String>,  // full timestamp
    pub arrival_dt: Option<String>,              // observed arrival timestamp
    pub delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeedLimitRecord {
    #[serde(rename = "ROAD_ID")]
    pub road_id: String,
    #[serde(rename = "NS_SPEED_LIMIT")]
    pub speed_limit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusStopRecord {
    #[serde(rename = "STOPID")]
    pub stop_id: String,
    #[serde(rename = "STOPLAT")]
    pub stop_lat: Option<f64>,
    #[serde(rename = "STOPLON")]
    pub stop_lon: Option<f64>,
    #[serde(rename = "MODE")]
    pub mode: Option<String>,        // "Bus", "Train", "Ferry"
    #[serde(rename = "PARENTSTATION")]
    pub parent_station: Option<String>,
    #[serde(rename = "X")]
    pub x: Option<f64>,
    #[serde(rename = "Y")]
    pub y: Option<f64>,
}

/// Row of GTFS `stops.txt`; headers are lowercased and trimmed before decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct GtfsStopRecord {
    pub stop_id: String,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub stop_name: Option<String>,
    pub parent_station: Option<String>,
}

/// Decoded rows of one table together with the headers that were present.
#[derive(Debug, Clone)]
pub struct Table<T> {
    pub headers: Vec<String>,
    pub rows: Vec<T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl<T> Table<T> {
    pub fn new(headers: Vec<String>, rows: Vec<T>) -> Self {
        Self { headers, rows }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCase {
    AsIs,
    Lower,
}

/// All raw inputs of the feature builder.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub routes: Table<RouteRecord>,
    pub traffic_counts: Table<TrafficCountRecord>,
    pub delays: Table<DelayRecord>,
    pub speed_limits: Table<SpeedLimitRecord>,
    pub bus_stops: Table<BusStopRecord>,
    pub gtfs_stops: Table<GtfsStopRecord>,
}

impl SourceTables {
    pub fn load(paths: &SourcePaths) -> Result<Self, DelayError> {
        Ok(Self {
            routes: load_csv(&paths.resolve(&paths.routes), HeaderCase::AsIs)?,
            traffic_counts: load_csv(&paths.resolve(&paths.traffic_counts), HeaderCase::AsIs)?,
            delays: load_csv(&paths.resolve(&paths.delays), HeaderCase::AsIs)?,
            speed_limits: load_csv(&paths.resolve(&paths.speed_limits), HeaderCase::AsIs)?,
            bus_stops: load_csv(&paths.resolve(&paths.bus_stops), HeaderCase::AsIs)?,
            gtfs_stops: load_csv(&paths.resolve(&paths.gtfs_stops), HeaderCase::Lower)?,
        })
    }
}

/// Loads a csv file with a progress bar sized by the file's line count.
pub fn load_csv<T: DeserializeOwned>(
    path: &Path,
    case: HeaderCase,
) -> Result<Table<T>, DelayError> {
    let io_err = |source| DelayError::Io {
        path: path.display().to_string(),
        source,
    };

    // Count total number of records (minus header) for the progress bar.
    let total_lines = {
        let file = File::open(path).map_err(io_err)?;
        BufReader::new(file).lines().count().saturating_sub(1)
    };

    let pb = ProgressBar::new(total_lines as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {wide_bar} {pos}/{len} ({eta})")
            .progress_chars("█▒░"),
    );
    pb.set_message(format!("Reading {}", path.display()));

    let file = File::open(path).map_err(io_err)?;
    let table = read_records(file, &path.display().to_string(), case, &pb)?;
    pb.finish_with_message(format!("Read {} rows from {}", table.rows.len(), path.display()));
    Ok(table)
}

/// Decodes every row of `reader` into `T`. Headers are trimmed, and lowercased
/// for [`HeaderCase::Lower`].
pub fn read_records<T: DeserializeOwned, R: Read>(
    reader: R,
    label: &str,
    case: HeaderCase,
    pb: &ProgressBar,
) -> Result<Table<T>, DelayError> {
    let csv_err = |source| DelayError::Csv {
        table: label.to_string(),
        source,
    };

    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers: StringRecord = rdr
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| match case {
            HeaderCase::AsIs => h.trim().to_string(),
            HeaderCase::Lower => h.trim().to_lowercase(),
        })
        .collect();
    rdr.set_headers(headers.clone());

    let mut rows = Vec::new();
    for result in pb.wrap_iter(rdr.deserialize()) {
        let record: T = result.map_err(csv_err)?;
        rows.push(record);
    }
    log::debug!("{label}: decoded {} rows", rows.len());

    Ok(Table::new(headers.iter().map(str::to_string).collect(), rows))
}

/// Decodes csv text held in memory, without a visible progress bar.
pub fn read_str<T: DeserializeOwned>(
    text: &str,
    label: &str,
    case: HeaderCase,
) -> Result<Table<T>, DelayError> {
    read_records(text.as_bytes(), label, case, &ProgressBar::hidden())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gtfs_headers_are_normalized() {
        let text = " Stop_ID ,STOP_LAT,stop_lon,Stop_Name,parent_station\n\
                    1001,-37.2,174.9,Pukekohe Train Station 1,\n";
        let table: Table<GtfsStopRecord> = read_str(text, "stops.txt", HeaderCase::Lower).unwrap();
        assert_eq!(
            table.headers,
            vec!["stop_id", "stop_lat", "stop_lon", "stop_name", "parent_station"]
        );
        let stop = &table.rows[0];
        assert_eq!(stop.stop_id, "1001");
        assert_eq!(stop.stop_name.as_deref(), Some("Pukekohe Train Station 1"));
        assert_eq!(stop.parent_station, None);
    }

    #[test]
    fn missing_traffic_columns_decode_as_none() {
        let text = "X,Y,adt,road_id\n174.9,-37.2,5400,77\n";
        let table: Table<TrafficCountRecord> = read_str(text, "traffic", HeaderCase::AsIs).unwrap();
        assert!(table.has_column("adt"));
        assert!(!table.has_column("pccar"));
        let row = &table.rows[0];
        assert_eq!(row.adt, Some(5400.0));
        assert_eq!(row.pccar, None);
        assert_eq!(row.road_id.as_deref(), Some("77"));
    }

    #[test]
    fn empty_numeric_fields_are_none() {
        let text = "trip_id,stop_id,scheduled_time,arrival_time_scheduled,\
                    arrival_dt,delay_seconds\n\
                    101-A-1,1001,13:05:00,,,\n";
        let table: Table<DelayRecord> = read_str(text, "delays", HeaderCase::AsIs).unwrap();
        let row = &table.rows[0];
        assert_eq!(row.delay_seconds, None);
        assert_eq!(row.stop_name, None);
        assert_eq!(row.scheduled_time.as_deref(), Some("13:05:00"));
    }

    #[test]
    fn default_tables_start_empty() {
        let sources = SourceTables::default();
        assert!(sources.routes.rows.is_empty());
        assert!(sources.delays.headers.is_empty());
        let table: Table<RouteRecord> = Table::default();
        assert!(!table.has_column("ROUTEPATTERN"));
    }

    #[test]
    fn malformed_number_is_a_csv_error() {
        let text = "ROAD_ID,NS_SPEED_LIMIT\n77,fast\n";
        let err = read_str::<SpeedLimitRecord>(text, "speed", HeaderCase::AsIs).unwrap_err();
        assert!(matches!(err, DelayError::Csv { .. }));
    }
}
