use clap::Args;
use std::collections::HashSet;
use std::path::PathBuf;

use calcium::session::Session;
use calcium::{sta, tiff_stack};

#[derive(Args, Clone)]
pub struct StaMovieArgs {
    /// Session record(s) (JSON)
    #[arg(long, required = true, num_args = 1..)]
    pub session: Vec<PathBuf>,
    /// Directory for `<stack>_plane0.tif` movies
    #[arg(long)]
    pub output: PathBuf,
}

pub fn run(args: StaMovieArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let mut jobs = Vec::new();
    for path in &args.session {
        let session = Session::load(path)?;
        for exp in session.recorded() {
            if exp.recording().n_trials() == 0 {
                log::warn!("{}: no stimulus onsets, skipping STA movie", exp.title());
                continue;
            }
            jobs.push(exp.recording().clone());
        }
    }
    if jobs.is_empty() {
        return Err("No stimulated recordings to average".into());
    }

    let mut taken = HashSet::new();
    for (i, rec) in jobs.iter().enumerate() {
        progress(
            i as f64 / jobs.len() as f64,
            &format!("STA movie {}/{}: {}", i + 1, jobs.len(), rec.tiff_path.display()),
        );
        let movie = sta::recording_movie(rec)?;
        let out = sta::movie_output_path(&args.output, &movie.tiff, &mut taken);
        tiff_stack::write_stack_f32(&out, &movie.dff)?;
        log::info!(
            "STA movie made for {} trial(s) ({} skipped): {}",
            movie.selection.n_included(),
            movie.selection.excluded.len(),
            out.display()
        );
    }
    progress(1.0, &format!("Wrote {} STA movie(s) to {}", jobs.len(), args.output.display()));
    Ok(())
}
