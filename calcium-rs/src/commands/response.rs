use clap::Args;
use std::path::PathBuf;

use calcium::plot::{self, ResponseFreqCell, ResponseFreqTrial, ResponseRaster};
use calcium::response::{self, ResponseMatrix};
use calcium::session::{Session, StimKind};
use calcium::slices;

#[derive(Args, Clone)]
pub struct ResponseArgs {
    #[arg(long)]
    pub session: PathBuf,
    #[arg(long, value_parser = super::parse_kind)]
    pub kind: StimKind,
    /// Rows of the response matrix to include, e.g. "all", "0:50"
    #[arg(long, default_value = "all")]
    pub cells: String,
    #[arg(long)]
    pub output: PathBuf,
    #[arg(long)]
    pub style: Option<PathBuf>,
}

pub fn run(args: ResponseArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let style = super::load_style(args.style.as_deref())?;
    let session = Session::load(&args.session)?;
    let exp = session.require(args.kind)?;
    let rec = exp.recording();
    let responses = rec
        .responses()?
        .ok_or_else(|| format!("{} has no response matrix", exp.title()))?;
    let matrix = ResponseMatrix::new(responses);

    let rows = slices::parse_selection(&args.cells, matrix.n_cells())?;
    let selected = slices::to_mask(&rows, matrix.n_cells());
    let frequency = matrix.frequency(&selected)?;
    let targets = match exp.targeted_cells() {
        Some(flags) if !flags.is_empty() => response::selected_rows(&selected, flags)?,
        _ => Vec::new(),
    };
    progress(0.2, &format!("{}: {} cell(s) x {} trial(s)", exp.title(), rows.len(), matrix.n_trials()));

    let csv = args.output.join(format!("{}_response_freq.csv", exp.title()));
    response::write_csv(&csv, &frequency)?;

    let mut written = vec![csv];
    let trial = ResponseFreqTrial {
        title: rec.sheet_name.clone(),
        kind: args.kind,
        per_trial: frequency.per_trial.to_vec(),
    };
    written.extend(plot::save(&trial, &args.output.join(format!("{}_response_freq_trial", exp.title())), &style)?);
    progress(0.5, "Plotted per-trial response frequency");

    let cell = ResponseFreqCell {
        title: rec.sheet_name.clone(),
        kind: args.kind,
        per_cell: frequency.per_cell.to_vec(),
        targets: targets.clone(),
    };
    written.extend(plot::save(&cell, &args.output.join(format!("{}_response_freq_cell", exp.title())), &style)?);
    progress(0.7, "Plotted per-cell response frequency");

    let raster = ResponseRaster {
        title: rec.sheet_name.clone(),
        kind: args.kind,
        points: matrix.raster_points(&selected)?,
        frequency,
        targets,
    };
    written.extend(plot::save(&raster, &args.output.join(format!("{}_response_raster", exp.title())), &style)?);
    progress(1.0, &format!("Wrote {} file(s) to {}", written.len(), args.output.display()));
    Ok(())
}
