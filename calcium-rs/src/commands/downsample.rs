use clap::Args;
use std::path::PathBuf;

use calcium::fluorescence;
use calcium::session::Session;

#[derive(Args, Clone)]
pub struct DownsampleArgs {
    #[arg(long, required = true, num_args = 1..)]
    pub session: Vec<PathBuf>,
    /// Directory for `<name>_mean_start.tif` / `<name>_mean_end.tif`
    #[arg(long)]
    pub output: PathBuf,
}

pub fn run(args: DownsampleArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let n = args.session.len();
    let mut written = 0;
    for (i, path) in args.session.iter().enumerate() {
        progress(i as f64 / n as f64, &format!("Downsampling {}", path.display()));
        let session = Session::load(path)?;
        written += fluorescence::downsample_session(&session, &args.output)?.len();
    }
    progress(1.0, &format!("Wrote {} image(s) to {}", written, args.output.display()));
    Ok(())
}
