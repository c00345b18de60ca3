use clap::Args;
use std::path::PathBuf;

use calcium::suite2p;

#[derive(Args, Clone)]
pub struct CombineIscellArgs {
    /// Suite2p output directory holding iscell.npy
    #[arg(long)]
    pub s2p: PathBuf,
    /// Extra iscell.npy whose flagged cells are added
    #[arg(long)]
    pub extra: PathBuf,
}

pub fn run(args: CombineIscellArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    progress(0.0, &format!("Combining {} into {}", args.extra.display(), args.s2p.display()));
    let summary = suite2p::combine_iscell(&args.s2p, &args.extra)?;
    progress(
        1.0,
        &format!(
            "{} -> {} cells, previous iscell saved to {}",
            summary.before,
            summary.after,
            summary.backup.display()
        ),
    );
    Ok(())
}
