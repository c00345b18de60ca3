use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};

use calcium::mask_stack;
use calcium::plot::{self, CellPositions, StaTraces};
use calcium::roi::Roi;
use calcium::session::{Experiment, Session, StimKind};
use calcium::stamps::{self, Stamp};
use calcium::style::PlotStyle;
use calcium::suite2p::Suite2p;
use calcium::{sta, tiff_stack};
use ndarray::Array2;

#[derive(Args, Clone)]
pub struct FiguresArgs {
    #[arg(long)]
    pub session: PathBuf,
    #[arg(long)]
    pub output: PathBuf,
    /// Cells per figure
    #[arg(long, default_value_t = 10)]
    pub n: usize,
    /// Candidate rows, e.g. "all", "0:50"
    #[arg(long, default_value = "all")]
    pub cells: String,
    /// STA image directory; enables postage-stamp montages
    #[arg(long)]
    pub stam_dir: Option<PathBuf>,
    #[arg(long)]
    pub style: Option<PathBuf>,
}

const KINDS: [StimKind; 3] = [StimKind::PhotostimRandom, StimKind::PhotostimSimilar, StimKind::WhiskerStim];

fn draw_stamps(
    exp: &Experiment,
    top: &[(usize, usize)],
    mean: &Array2<f64>,
    stam_dir: &Path,
    stem: &Path,
    style: &PlotStyle,
) -> Result<(), Box<dyn std::error::Error>> {
    let rec = exp.recording();
    let sta_image = match mask_stack::find_sta_image(stam_dir, rec)? {
        Some(path) => Some(tiff_stack::read_image(&path)?.mapv(f64::from)),
        None => {
            log::warn!("{}: no STA image in {}, STA row left blank", exp.title(), stam_dir.display());
            None
        }
    };
    let rois: Vec<Roi> = top
        .iter()
        .map(|&(row, _)| Roi {
            ypix: rec.cells.cell_y[row].clone(),
            xpix: rec.cells.cell_x[row].clone(),
        })
        .collect();
    let cells: Vec<Stamp> = top
        .iter()
        .zip(&rois)
        .map(|(&(row, cell_id), roi)| Stamp {
            cell_id,
            median: rec.cells.cell_med[row],
            roi,
        })
        .collect();
    let image = stamps::montage(mean.view(), sta_image.as_ref().map(|a| a.view()), &cells, style);
    stamps::save_montage(&image, stem, style)?;
    Ok(())
}

pub fn run(args: FiguresArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let style = super::load_style(args.style.as_deref())?;
    let session = Session::load(&args.session)?;
    fs::create_dir_all(&args.output)?;

    let mean = match &args.stam_dir {
        Some(_) => Some(Suite2p::load(&session.s2p_path)?.mean_image()?.mapv(f64::from)),
        None => None,
    };

    let exps: Vec<&Experiment> = KINDS
        .iter()
        .filter_map(|&k| session.get(k))
        .filter(|e| e.recording().n_trials() > 0 && !e.recording().cells.is_empty())
        .collect();
    for (i, exp) in exps.iter().enumerate() {
        let rec = exp.recording();
        let title = exp.title();
        progress(i as f64 / exps.len() as f64, &format!("Plotting {}", title));

        let stas = sta::recording_stas(rec)?;
        let top = super::ranked_cells(rec, stas.view(), &args.cells, args.n)?;
        let traces = StaTraces {
            title: format!("{} top {} largest STAs", title, top.len()),
            time: rec.time_axis(),
            traces: top.iter().map(|&(row, id)| (id, stas.row(row).to_vec())).collect(),
        };
        let stem = args.output.join(format!("{}_top_{}", title, args.n));
        plot::save(&traces, &with_suffix(&stem, "traces"), &style)?;

        let positions = CellPositions {
            title: format!("{} top {} cell positions", title, top.len()),
            kind: exp.kind(),
            frame: (rec.frame_x, rec.frame_y),
            medians: top.iter().map(|&(row, _)| rec.cells.cell_med[row]).collect(),
        };
        plot::save(&positions, &with_suffix(&stem, "positions"), &style)?;

        if let (Some(stam_dir), Some(mean)) = (&args.stam_dir, &mean) {
            draw_stamps(exp, &top, mean, stam_dir, &with_suffix(&stem, "cells"), &style)?;
        }
    }
    if exps.is_empty() {
        log::warn!("{}: no stimulated recordings with cells", session.name);
    }
    progress(1.0, &format!("Wrote figures for {} recording(s) to {}", exps.len(), args.output.display()));
    Ok(())
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push("_");
    name.push(suffix);
    PathBuf::from(name)
}
