use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use crate::feature_table::FeatureTable;

/// Mean observed delay in seconds for each arrival hour. Hours with no
/// observations are `None`.
pub fn hourly_mean_delay(table: &FeatureTable) -> [Option<f64>; 24] {
    let mut sums = [(0.0_f64, 0_usize); 24];
    for row in table.rows() {
        if let Some(delay) = row.delay_seconds {
            let slot = &mut sums[row.time.hour as usize];
            slot.0 += delay;
            slot.1 += 1;
        }
    }
    sums.map(|(sum, n)| (n > 0).then(|| sum / n as f64))
}

/// Mean observed delay in seconds per route name. Rows without a route are skipped.
pub fn route_mean_delay(table: &FeatureTable) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for row in table.rows() {
        if let (Some(route), Some(delay)) = (row.route_name.as_ref(), row.delay_seconds) {
            let entry = sums.entry(route.clone()).or_insert((0.0, 0));
            entry.0 += delay;
            entry.1 += 1;
        }
    }
    sums.into_iter().map(|(route, (sum, n))| (route, sum / n as f64)).collect()
}

/// Returns a palette of distinct colors.
fn get_color_palette() -> Vec<RGBColor> {
    vec![
        RGBColor(255, 0, 0),     // red
        RGBColor(0, 0, 255),     // blue
        RGBColor(0, 128, 0),     // green
        RGBColor(255, 165, 0),   // orange
        RGBColor(128, 0, 128),   // purple
        RGBColor(0, 128, 128),   // teal
        RGBColor(128, 128, 0),   // olive
        RGBColor(165, 42, 42),   // brown
    ]
}

/// Y range covering every bar plus a tenth of headroom on each side.
fn value_range(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().cloned().fold(0.0_f64, f64::min);
    let hi = values.iter().cloned().fold(0.0_f64, f64::max);
    let pad = ((hi - lo) / 10.0).max(1.0);
    (lo - if lo < 0.0 { pad } else { 0.0 }, hi + pad)
}

/// Draws a labelled vertical bar chart. Negative values hang below zero.
fn draw_bar_chart(
    path: &Path,
    caption: &str,
    x_desc: &str,
    bars: &[(String, f64)],
) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(path, (1600, 1200)).into_drawing_area();
    root.fill(&WHITE)?;

    let values: Vec<f64> = bars.iter().map(|(_, v)| *v).collect();
    let (lo, hi) = value_range(&values);

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 50))
        .margin(60)
        .x_label_area_size(100)
        .y_label_area_size(100)
        .build_cartesian_2d(0..bars.len(), lo..hi)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(bars.len())
        .x_label_formatter(&|idx| {
            bars.get(*idx).map(|(label, _)| label.clone()).unwrap_or_default()
        })
        .x_desc(x_desc)
        .y_desc("Mean Delay (seconds)")
        .label_style(("sans-serif", 30))
        .draw()?;

    let palette = get_color_palette();
    let label_offset = (hi - lo) / 50.0;
    for (i, (_, value)) in bars.iter().enumerate() {
        let color = &palette[i % palette.len()];
        chart.draw_series(std::iter::once(Rectangle::new(
            [(i, 0.0), (i + 1, *value)],
            color.filled(),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("{:.0}", value),
            (i, value + label_offset),
            ("sans-serif", 26).into_font().color(&BLACK),
        )))?;
    }

    root.present()?;
    Ok(())
}

/// Bar chart of mean delay for each hour that has observations.
pub fn generate_hourly_delay_chart(
    path: &Path,
    table: &FeatureTable,
) -> Result<(), Box<dyn Error>> {
    let bars: Vec<(String, f64)> = hourly_mean_delay(table)
        .iter()
        .enumerate()
        .filter_map(|(hour, mean)| mean.map(|m| (format!("{hour:02}"), m)))
        .collect();
    if bars.is_empty() {
        return Err("no delay observations to chart".into());
    }
    draw_bar_chart(path, "Mean Delay by Hour of Arrival", "Hour", &bars)
}

/// Bar chart of mean delay per route.
pub fn generate_route_delay_chart(path: &Path, table: &FeatureTable) -> Result<(), Box<dyn Error>> {
    let bars: Vec<(String, f64)> = route_mean_delay(table).into_iter().collect();
    if bars.is_empty() {
        return Err("no routed delay observations to chart".into());
    }
    draw_bar_chart(path, "Mean Delay by Route", "Route", &bars)
}
