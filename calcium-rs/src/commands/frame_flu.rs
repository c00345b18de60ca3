use clap::Args;
use std::path::PathBuf;

use calcium::fluorescence;
use calcium::plot::{self, FrameDriftPlot};
use calcium::session::Session;

#[derive(Args, Clone)]
pub struct FrameFluArgs {
    #[arg(long, required = true, num_args = 1..)]
    pub session: Vec<PathBuf>,
    /// Directory written by `downsample`
    #[arg(long)]
    pub input: PathBuf,
    /// Output path without extension
    #[arg(long)]
    pub output: PathBuf,
    #[arg(long)]
    pub legend: bool,
    #[arg(long)]
    pub style: Option<PathBuf>,
}

pub fn run(args: FrameFluArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let style = super::load_style(args.style.as_deref())?;
    let n = args.session.len();
    let mut series = Vec::with_capacity(n);
    for (i, path) in args.session.iter().enumerate() {
        progress(i as f64 / n as f64 * 0.8, &format!("Reading mean frames for {}", path.display()));
        let session = Session::load(path)?;
        let stack = fluorescence::read_downsampled(&session, &args.input)?;
        series.push((session.name.clone(), fluorescence::frame_drift(&stack)));
    }
    let figure = FrameDriftPlot {
        series,
        legend: args.legend,
    };
    let written = plot::save(&figure, &args.output, &style)?;
    progress(1.0, &format!("Wrote {} figure(s)", written.len()));
    Ok(())
}
