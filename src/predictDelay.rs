use std::error::Error;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;

use transit_delay::time_features::{format_time_of_day, parse_time_of_day};
use transit_delay::{DelayError, DelayService, PipelineConfig, Query, QueryOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about = "Predict the arrival delay for a bus trip", long_about = None)]
struct Args {
    /// TOML config with source paths and model settings
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print the stops a trip can start from and exit
    #[arg(long)]
    list_stops: bool,
    /// Departure stop name
    #[arg(short, long)]
    start: Option<String>,
    /// Destination stop name. Omit to list reachable destinations
    #[arg(short, long)]
    end: Option<String>,
    /// Departure time as HH:MM:SS, defaults to now
    #[arg(short, long)]
    time: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = PipelineConfig::load(args.config.as_deref())?;
    let service = DelayService::global(&config)?;

    if args.list_stops {
        for stop in service.valid_start_stops() {
            println!("{}", stop);
        }
        return Ok(());
    }

    let Some(start) = args.start else {
        return Err("--start is required unless --list-stops is given".into());
    };
    let time = args
        .time
        .unwrap_or_else(|| format_time_of_day(Local::now().time()));

    let Some(end) = args.end else {
        let departure =
            parse_time_of_day(&time).ok_or_else(|| DelayError::InvalidTime(time.clone()))?;
        let ends = service.predictor().possible_end_stops(&start, departure);
        if ends.is_empty() {
            println!("No reachable destinations from {} after {}.", start, time);
        }
        for stop in ends {
            println!("{}", stop);
        }
        return Ok(());
    };

    let query = Query::parse(&start, &end, &time)?;
    if let Err(e) = service.predictor().check_destination(&query) {
        println!("{}", e);
        return Ok(());
    }

    match service.answer(&query) {
        QueryOutcome::Prediction(result) => {
            println!("{}", result);
            if let Some(advice) = result.advice(query.departure) {
                println!("\n{}", advice.message());
            }
        }
        QueryOutcome::Advisory(message) | QueryOutcome::Failed(message) => println!("{}", message),
    }
    Ok(())
}
