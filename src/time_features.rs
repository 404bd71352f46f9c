//! Time parsing and the calendar-derived model inputs.
//!
//! Two different hour bucketings are in play. Training rows are bucketed with
//! right-closed intervals `(0,6] (6,12] (12,18] (18,24]`, so hour 0 falls in no
//! bucket. Query rows use the narrower windows `[6,10) [12,16) [16,20) [20,24)`.
//! Both are kept as-is so predictions stay comparable with the trained forest.

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, Timelike};

const TIME_FORMAT: &str = "%H:%M:%S";

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    // slash dates are month first
    "%m/%d/%Y %H:%M:%S",
];

/// Parses a bare `HH:MM:SS` time of day. Hours past 23 (GTFS overnight
/// service) do not parse.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).ok()
}

pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parses a timestamp, dropping any UTC offset and keeping local wall time.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

pub fn is_peak_hour(hour: u32) -> bool {
    (7..=9).contains(&hour) || (16..=18).contains(&hour)
}

pub fn is_noon_hour(hour: u32) -> bool {
    (11..=13).contains(&hour)
}

pub fn is_afternoon_hour(hour: u32) -> bool {
    (14..=17).contains(&hour)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HourBucket {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl HourBucket {
    /// Bucket used when building training rows.
    pub fn for_training_hour(hour: u32) -> Option<HourBucket> {
        match hour {
            1..=6 => Some(HourBucket::Night),
            7..=12 => Some(HourBucket::Morning),
            13..=18 => Some(HourBucket::Afternoon),
            19..=24 => Some(HourBucket::Evening),
            _ => None,
        }
    }

    /// Bucket used when building a query row.
    pub fn for_query_hour(hour: u32) -> Option<HourBucket> {
        match hour {
            6..=9 => Some(HourBucket::Morning),
            12..=15 => Some(HourBucket::Afternoon),
            16..=19 => Some(HourBucket::Evening),
            20..=23 => Some(HourBucket::Night),
            _ => None,
        }
    }
}

/// One-hot hour bucket flags, in the model's column order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HourBins {
    pub morning: bool,
    pub afternoon: bool,
    pub evening: bool,
    pub night: bool,
}

impl From<Option<HourBucket>> for HourBins {
    fn from(bucket: Option<HourBucket>) -> Self {
        let mut bins = HourBins::default();
        match bucket {
            Some(HourBucket::Morning) => bins.morning = true,
            Some(HourBucket::Afternoon) => bins.afternoon = true,
            Some(HourBucket::Evening) => bins.evening = true,
            Some(HourBucket::Night) => bins.night = true,
            None => {}
        }
        bins
    }
}

/// Calendar fields derived from an observed arrival timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalTimeFeatures {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Monday = 0
    pub weekday: u32,
    pub is_weekend: bool,
    pub is_peak: bool,
    pub is_noon: bool,
    pub is_afternoon: bool,
    pub hour_bins: HourBins,
}

impl ArrivalTimeFeatures {
    pub fn from_arrival(arrival: NaiveDateTime) -> Self {
        let hour = arrival.hour();
        let weekday = arrival.weekday().num_days_from_monday();
        Self {
            hour,
            minute: arrival.minute(),
            second: arrival.second(),
            weekday,
            is_weekend: weekday >= 5,
            is_peak: is_peak_hour(hour),
            is_noon: is_noon_hour(hour),
            is_afternoon: is_afternoon_hour(hour),
            hour_bins: HourBucket::for_training_hour(hour).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn timestamps_with_offsets_keep_wall_time() {
        let dt = parse_timestamp("2025-05-05 13:07:30+12:00").unwrap();
        let expected = NaiveDate::from_ymd_opt(2025, 5, 5).unwrap().and_hms_opt(13, 7, 30).unwrap();
        assert_eq!(dt, expected);
        let dt = parse_timestamp("2025-05-05T13:07:30Z").unwrap();
        assert_eq!(dt.hour(), 13);
        assert!(parse_timestamp("2025-05-05 13:07:30.250").is_some());
        assert!(parse_timestamp("not a time").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn slash_dates_read_month_first() {
        let dt = parse_timestamp("05/06/2025 07:15:00").unwrap();
        assert_eq!(dt, NaiveDate::from_ymd_opt(2025, 5, 6).unwrap().and_hms_opt(7, 15, 0).unwrap());
        assert_eq!(ArrivalTimeFeatures::from_arrival(dt).weekday, 1);
        assert!(parse_timestamp("25/06/2025 07:15:00").is_none());
    }

    #[test]
    fn overnight_gtfs_times_do_not_parse() {
        assert!(parse_time_of_day("13:00:00").is_some());
        assert!(parse_time_of_day("25:10:00").is_none());
    }

    #[test]
    fn training_buckets_are_right_closed() {
        assert_eq!(HourBucket::for_training_hour(0), None);
        assert_eq!(HourBucket::for_training_hour(6), Some(HourBucket::Night));
        assert_eq!(HourBucket::for_training_hour(7), Some(HourBucket::Morning));
        assert_eq!(HourBucket::for_training_hour(12), Some(HourBucket::Morning));
        assert_eq!(HourBucket::for_training_hour(18), Some(HourBucket::Afternoon));
        assert_eq!(HourBucket::for_training_hour(23), Some(HourBucket::Evening));
    }

    #[test]
    fn query_buckets_leave_gaps() {
        assert_eq!(HourBucket::for_query_hour(10), None);
        assert_eq!(HourBucket::for_query_hour(13), Some(HourBucket::Afternoon));
        assert_eq!(HourBucket::for_query_hour(3), None);
        assert_eq!(HourBucket::for_query_hour(21), Some(HourBucket::Night));
    }

    #[test]
    fn arrival_features_for_saturday_evening_peak() {
        let arrival = NaiveDate::from_ymd_opt(2025, 5, 10).unwrap().and_hms_opt(17, 45, 9).unwrap();
        let f = ArrivalTimeFeatures::from_arrival(arrival);
        assert_eq!(f.weekday, 5);
        assert!(f.is_weekend);
        assert!(f.is_peak);
        assert!(f.is_afternoon);
        assert!(!f.is_noon);
        assert!(f.hour_bins.afternoon);
        assert_eq!((f.minute, f.second), (45, 9));
    }
}
