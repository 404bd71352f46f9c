#[derive(thiserror::Error, Debug)]
pub enum DelayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode csv table {table}: {source}")]
    Csv {
        table: String,
        #[source]
        source: csv::Error,
    },
    #[error("failed to parse config file: {0}")]
    Config(#[from] toml::de::Error),
    #[error("invalid departure time '{0}', expected HH:MM:SS")]
    InvalidTime(String),
    #[error("No vehicle found that matches the specified time and stop sequence.")]
    NoMatchingTrip,
    #[error("Unable to trace the complete stop path from the departure to the destination stop.")]
    NoTraceablePath,
    #[error("stop '{stop_name}' does not appear on trip {trip_id}")]
    StartStopNotInTrip { trip_id: String, stop_name: String },
    #[error("no historical row for trip {trip_id} at stop {stop_id}")]
    FeatureLookupFailure { trip_id: String, stop_id: String },
    #[error("historical row for trip {trip_id} at stop {stop_id} is missing {missing}")]
    IncompleteFeatures {
        trip_id: String,
        stop_id: String,
        missing: String,
    },
    #[error("The selected destination stop '{0}' is not reachable from the chosen departure stop.")]
    UnreachableDestination(String),
    #[error("no complete feature rows available for training")]
    EmptyTrainingSet,
}

impl DelayError {
    /// true for errors that belong to a single query rather than the session
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            DelayError::NoMatchingTrip
                | DelayError::NoTraceablePath
                | DelayError::StartStopNotInTrip { .. }
                | DelayError::InvalidTime(_)
                | DelayError::UnreachableDestination(_)
        )
    }
}
