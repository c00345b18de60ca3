use clap::Args;
use std::path::PathBuf;

use calcium::fluorescence;
use calcium::plot::{self, MeanFluorescence};
use calcium::session::Session;

#[derive(Args, Clone)]
pub struct CellFluArgs {
    #[arg(long, required = true, num_args = 1..)]
    pub session: Vec<PathBuf>,
    /// Output path without extension
    #[arg(long)]
    pub output: PathBuf,
    /// Plot style (JSON)
    #[arg(long)]
    pub style: Option<PathBuf>,
}

pub fn run(args: CellFluArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let style = super::load_style(args.style.as_deref())?;
    let n = args.session.len();
    let mut panels = Vec::with_capacity(n);
    for (i, path) in args.session.iter().enumerate() {
        progress(
            i as f64 / n as f64 * 0.8,
            &format!("Measuring mean cell fluorescence for {}", path.display()),
        );
        let session = Session::load(path)?;
        let title = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| session.name.clone());
        panels.push((title, fluorescence::mean_cell_fluorescence(&session)?));
    }
    let written = plot::save(&MeanFluorescence { panels }, &args.output, &style)?;
    progress(1.0, &format!("Wrote {} figure(s)", written.len()));
    Ok(())
}
