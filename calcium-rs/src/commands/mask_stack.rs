use clap::Args;
use std::path::PathBuf;

use calcium::mask_stack::{self, MaskStack};
use calcium::session::Session;
use calcium::suite2p::Suite2p;

#[derive(Args, Clone)]
pub struct MaskStackArgs {
    #[arg(long, required = true, num_args = 1..)]
    pub session: Vec<PathBuf>,
    /// Directory with STA average images (`*AvgImage*<tiff dir name>*`)
    #[arg(long)]
    pub stam_dir: PathBuf,
    #[arg(long)]
    pub output: PathBuf,
}

pub fn run(args: MaskStackArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let n = args.session.len();
    for (i, path) in args.session.iter().enumerate() {
        progress(i as f64 / n as f64, &format!("Retrieving s2p masks for {}", path.display()));
        let session = Session::load(path)?;
        let s2p = Suite2p::load(&session.s2p_path)?;
        let stack = MaskStack::build(&session, &s2p, &args.stam_dir)?;
        let out = mask_stack::output_path(&args.output, &session);
        stack.write(&out)?;
        log::info!("{}: {}", out.display(), stack.names().join(", "));
    }
    progress(1.0, &format!("Wrote {} mask stack(s) to {}", n, args.output.display()));
    Ok(())
}
