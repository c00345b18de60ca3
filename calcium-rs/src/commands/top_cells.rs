use clap::Args;
use std::path::PathBuf;

use calcium::session::{Session, StimKind};
use calcium::sta;

#[derive(Args, Clone)]
pub struct TopCellsArgs {
    #[arg(long)]
    pub session: PathBuf,
    /// pr, ps, w or none
    #[arg(long, value_parser = super::parse_kind)]
    pub kind: StimKind,
    #[arg(long, default_value_t = 10)]
    pub n: usize,
    /// Candidate rows, e.g. "all", "0:50", "1,4,9"
    #[arg(long, default_value = "all")]
    pub cells: String,
}

pub fn run(args: TopCellsArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::load(&args.session)?;
    let exp = session.require(args.kind)?;
    progress(0.0, &format!("Ranking {} cells by STA amplitude", exp.title()));
    let stas = sta::recording_stas(exp.recording())?;
    let ranked = super::ranked_cells(exp.recording(), stas.view(), &args.cells, args.n)?;
    let (rows, cell_ids): (Vec<usize>, Vec<usize>) = ranked.into_iter().unzip();
    println!(
        "{}",
        serde_json::json!({
            "session": session.name,
            "kind": args.kind.code(),
            "rows": rows,
            "cell_ids": cell_ids,
        })
    );
    progress(1.0, &format!("Selected {} cell(s)", rows.len()));
    Ok(())
}
