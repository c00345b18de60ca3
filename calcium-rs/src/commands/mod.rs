pub mod cell_flu;
pub mod combine_iscell;
pub mod downsample;
pub mod figures;
pub mod frame_flu;
pub mod mask_stack;
pub mod response;
pub mod sta_movie;
pub mod top_cells;

use calcium::session::{Recording, StimKind};
use calcium::style::PlotStyle;
use calcium::{select, slices};
use ndarray::ArrayView2;
use std::path::Path;

/// Style from `--style`, or the defaults.
pub fn load_style(path: Option<&Path>) -> calcium::Result<PlotStyle> {
    match path {
        Some(p) => PlotStyle::load(p),
        None => Ok(PlotStyle::default()),
    }
}

/// Parse a `--kind` value given as code ("pr") or label ("ps_random").
pub fn parse_kind(s: &str) -> Result<StimKind, String> {
    StimKind::parse(s).ok_or_else(|| {
        let known: Vec<_> = StimKind::ALL.iter().map(|k| k.code()).collect();
        format!("unknown stimulus type {:?} (expected one of {})", s, known.join(", "))
    })
}

/// Cells of `rec` with the largest post-stimulus STA among the rows named by
/// `cells`, as (row, cell id), best first.
pub fn ranked_cells(
    rec: &Recording,
    stas: ArrayView2<f64>,
    cells: &str,
    n: usize,
) -> Result<Vec<(usize, usize)>, Box<dyn std::error::Error>> {
    let ids = &rec.cells.cell_id;
    if stas.nrows() != ids.len() {
        return Err(format!(
            "{}: {} STA rows for {} cells",
            rec.sheet_name,
            stas.nrows(),
            ids.len()
        )
        .into());
    }
    let rows = slices::parse_selection(cells, ids.len())?;
    let top = select::top_responders(stas, rec.pre_frames, &rows, n)?;
    Ok(top.into_iter().map(|r| (r, ids[r])).collect())
}
