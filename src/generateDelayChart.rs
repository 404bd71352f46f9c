use std::error::Error;
use std::path::PathBuf;

use clap::Parser;

use transit_delay::chart::{generate_hourly_delay_chart, generate_route_delay_chart};
use transit_delay::feature_table::FeatureTable;
use transit_delay::records::SourceTables;
use transit_delay::PipelineConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Chart mean observed delay by hour and by route",
    long_about = None
)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory the PNG charts are written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = PipelineConfig::load(args.config.as_deref())?;
    let sources = SourceTables::load(&config.sources)?;
    let table = FeatureTable::build(&sources);

    generate_hourly_delay_chart(&args.out_dir.join("delay_by_hour_chart.png"), &table)?;
    generate_route_delay_chart(&args.out_dir.join("delay_by_route_chart.png"), &table)?;

    println!("\nCharts generated successfully.");
    Ok(())
}
