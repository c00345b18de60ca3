//! QA figures rendered with plotters, written once per configured format.

use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::error::Error;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, Result};
use crate::fluorescence::{FluorescenceSegment, FrameDrift};
use crate::response::ResponseFrequency;
use crate::session::StimKind;
use crate::style::{FigureFormat, PlotStyle};

pub type DrawResult = std::result::Result<(), Box<dyn Error>>;

type Chart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Something that can be drawn onto any plotters backend.
pub trait Figure {
    /// Pixel size of the rendered figure.
    fn size(&self) -> (u32, u32);

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static;
}

fn render<F: Figure, DB: DrawingBackend>(figure: &F, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    figure.draw(root, style)?;
    root.present()?;
    Ok(())
}

/// `stem` plus `.png` / `.svg`; the stem itself may contain dots.
pub fn output_path(stem: &Path, format: FigureFormat) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    name.push(".");
    name.push(format.extension());
    PathBuf::from(name)
}

/// Render `figure` once per format in `style.formats`.
pub fn save<F: Figure>(figure: &F, stem: &Path, style: &PlotStyle) -> Result<Vec<PathBuf>> {
    if let Some(parent) = stem.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut written = Vec::with_capacity(style.formats.len());
    for &format in &style.formats {
        let path = output_path(stem, format);
        let drawn = match format {
            FigureFormat::Png => {
                let root = BitMapBackend::new(&path, figure.size()).into_drawing_area();
                render(figure, &root, style)
            }
            FigureFormat::Svg => {
                let root = SVGBackend::new(&path, figure.size()).into_drawing_area();
                render(figure, &root, style)
            }
        };
        drawn.map_err(|e| AnalysisError::Plot(format!("{}: {}", path.display(), e)))?;
        log::debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

fn font(style: &PlotStyle, size: u32) -> FontDesc<'_> {
    (style.font_family.as_str(), f64::from(size)).into_font()
}

/// Finite min/max padded by 5%; (0, 1) when nothing is finite.
pub(crate) fn value_bounds(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return (0.0, 1.0);
    }
    let pad = ((hi - lo) * 0.05).max(1e-9);
    if hi - lo < 1e-12 {
        return (lo - 1.0, hi + 1.0);
    }
    (lo - pad, hi + pad)
}

/// Outline of a step histogram with one unit-wide bin centred on each index.
pub(crate) fn step_outline(values: &[f64]) -> Vec<(f64, f64)> {
    let mut points = Vec::with_capacity(values.len() * 2 + 2);
    points.push((-0.5, 0.0));
    for (i, &v) in values.iter().enumerate() {
        let left = i as f64 - 0.5;
        points.push((left, v));
        points.push((left + 1.0, v));
    }
    points.push((values.len() as f64 - 0.5, 0.0));
    points
}

/// Height at which target markers sit above a per-cell histogram.
pub fn target_marker_level(kind: StimKind) -> Option<f64> {
    match kind {
        StimKind::PhotostimRandom => Some(102.0),
        StimKind::PhotostimSimilar => Some(105.0),
        _ => None,
    }
}

fn draw_mesh<'a, DB: DrawingBackend + 'a>(
    chart: &mut Chart<'a, DB>,
    style: &PlotStyle,
    x_desc: &str,
    y_desc: &str,
) -> DrawResult
where
    DB::ErrorType: 'static,
{
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .label_style(font(style, style.tick_size))
        .axis_desc_style(font(style, style.label_size))
        .draw()?;
    Ok(())
}

fn draw_legend<'a, DB: DrawingBackend + 'a>(chart: &mut Chart<'a, DB>, style: &PlotStyle) -> DrawResult
where
    DB::ErrorType: 'static,
{
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(font(style, style.legend_size))
        .draw()?;
    Ok(())
}

struct Histogram<'a> {
    caption: &'a str,
    x_desc: &'a str,
    y_desc: &'a str,
    values: &'a [f64],
    kind: StimKind,
    /// Bins extend along y instead of x.
    horizontal: bool,
    /// Target rows and the level their markers sit at.
    targets: Option<(&'a [usize], f64)>,
}

fn draw_histogram<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, style: &PlotStyle, hist: &Histogram<'_>) -> DrawResult
where
    DB::ErrorType: 'static,
{
    let n = hist.values.len() as f64;
    let top = hist
        .values
        .iter()
        .copied()
        .chain(hist.targets.map(|(_, level)| level))
        .filter(|v| v.is_finite())
        .fold(0.0f64, f64::max)
        .max(1.0)
        * 1.05;
    let bins = -0.5..(n - 0.5).max(0.5);
    let heights = 0.0..top;
    let (x_range, y_range) = if hist.horizontal { (heights, bins) } else { (bins, heights) };

    let mut chart = ChartBuilder::on(area)
        .caption(hist.caption, font(style, style.title_size))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)?;
    draw_mesh(&mut chart, style, hist.x_desc, hist.y_desc)?;

    let colour = style.stim_colour(hist.kind);
    let line = colour.mix(0.6).stroke_width(style.line_width);
    let outline: Vec<(f64, f64)> = step_outline(hist.values)
        .into_iter()
        .map(|(i, v)| if hist.horizontal { (v, i) } else { (i, v) })
        .collect();
    chart
        .draw_series(std::iter::once(PathElement::new(outline, line)))?
        .label(hist.kind.code())
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], line));

    if let Some((rows, level)) = hist.targets {
        let marker = colour.filled();
        let size = style.marker_size;
        let horizontal = hist.horizontal;
        chart
            .draw_series(rows.iter().map(|&r| {
                let p = if horizontal { (level, r as f64) } else { (r as f64, level) };
                Circle::new(p, size, marker)
            }))?
            .label(format!("{} target", hist.kind.code()))
            .legend(move |(x, y)| Circle::new((x + 10, y), size, marker));
    }
    draw_legend(&mut chart, style)
}

/// STA traces of a few cells against time from stimulus onset.
pub struct StaTraces {
    pub title: String,
    pub time: Vec<f64>,
    /// (cell id, dF/F trace)
    pub traces: Vec<(usize, Vec<f64>)>,
}

impl Figure for StaTraces {
    fn size(&self) -> (u32, u32) {
        (1500, 500)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static,
    {
        let (x0, x1) = value_bounds(self.time.iter().copied());
        let (y0, y1) = value_bounds(self.traces.iter().flat_map(|(_, t)| t.iter().copied()));
        let mut chart = ChartBuilder::on(root)
            .caption(&self.title, font(style, style.title_size))
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(x0..x1, y0..y1)?;
        draw_mesh(&mut chart, style, "time (sec)", "dF/F (baseline-subtracted)")?;
        for (i, (cell, trace)) in self.traces.iter().enumerate() {
            let line = style.series_colour(i).stroke_width(style.line_width);
            let points = self
                .time
                .iter()
                .copied()
                .zip(trace.iter().copied())
                .filter(|(_, v)| v.is_finite());
            chart
                .draw_series(LineSeries::new(points, line))?
                .label(cell.to_string())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], line));
        }
        draw_legend(&mut chart, style)
    }
}

/// Cell medians scattered in image coordinates (origin top-left).
pub struct CellPositions {
    pub title: String,
    pub kind: StimKind,
    /// (frame_x, frame_y)
    pub frame: (usize, usize),
    /// Medians as (y, x).
    pub medians: Vec<[f64; 2]>,
}

impl Figure for CellPositions {
    fn size(&self) -> (u32, u32) {
        let (fx, fy) = (self.frame.0.max(1) as f64, self.frame.1.max(1) as f64);
        let height = (640.0 * fy / fx).clamp(200.0, 1600.0);
        (760, height as u32 + 120)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static,
    {
        let (fx, fy) = (self.frame.0 as f64, self.frame.1 as f64);
        let mut chart = ChartBuilder::on(root)
            .caption(&self.title, font(style, style.title_size))
            .margin(15)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(0.0..fx.max(1.0), 0.0..fy.max(1.0))?;
        // y grows downwards in image coordinates
        let flip = |v: &f64| format!("{:.0}", fy - v);
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("x_coords (pixels)")
            .y_desc("y_coords (pixels)")
            .y_label_formatter(&flip)
            .label_style(font(style, style.tick_size))
            .axis_desc_style(font(style, style.label_size))
            .draw()?;
        let marker = style.stim_colour(self.kind).filled();
        let size = style.marker_size + 2;
        chart.draw_series(
            self.medians
                .iter()
                .map(|&[y, x]| Circle::new((x, fy - y), size, marker)),
        )?;
        Ok(())
    }
}

/// % of selected cells responding on each trial.
pub struct ResponseFreqTrial {
    pub title: String,
    pub kind: StimKind,
    pub per_trial: Vec<f64>,
}

impl Figure for ResponseFreqTrial {
    fn size(&self) -> (u32, u32) {
        (1000, 500)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static,
    {
        let caption = format!("{} cell responses over time", self.title);
        draw_histogram(
            root,
            style,
            &Histogram {
                caption: &caption,
                x_desc: "trial #",
                y_desc: "% cells responding",
                values: &self.per_trial,
                kind: self.kind,
                horizontal: false,
                targets: None,
            },
        )
    }
}

/// % of trials each selected cell responded on, with photostim targets marked.
pub struct ResponseFreqCell {
    pub title: String,
    pub kind: StimKind,
    pub per_cell: Vec<f64>,
    /// Selected-row positions of targeted cells.
    pub targets: Vec<usize>,
}

impl Figure for ResponseFreqCell {
    fn size(&self) -> (u32, u32) {
        (1000, 500)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static,
    {
        let caption = format!("{} trial responses per cell", self.title);
        draw_histogram(
            root,
            style,
            &Histogram {
                caption: &caption,
                x_desc: "cell #",
                y_desc: "% trials with responses",
                values: &self.per_cell,
                kind: self.kind,
                horizontal: false,
                targets: target_marker_level(self.kind).map(|level| (self.targets.as_slice(), level)),
            },
        )
    }
}

/// Per-trial histogram above a response raster, per-cell histogram to its right.
pub struct ResponseRaster {
    pub title: String,
    pub kind: StimKind,
    pub frequency: ResponseFrequency,
    /// (trial, selected row) of every response.
    pub points: Vec<(usize, usize)>,
    pub targets: Vec<usize>,
}

impl Figure for ResponseRaster {
    fn size(&self) -> (u32, u32) {
        (1400, 1200)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static,
    {
        let panels = root.split_evenly((2, 2));
        let per_trial = self.frequency.per_trial.to_vec();
        let per_cell = self.frequency.per_cell.to_vec();

        draw_histogram(
            &panels[0],
            style,
            &Histogram {
                caption: "Cell responses over time",
                x_desc: "",
                y_desc: "% cells responding",
                values: &per_trial,
                kind: self.kind,
                horizontal: false,
                targets: None,
            },
        )?;

        let n_trials = per_trial.len() as f64;
        let n_rows = per_cell.len() as f64;
        let caption = format!("{} raster of single trial responses", self.title);
        let mut raster = ChartBuilder::on(&panels[2])
            .caption(&caption, font(style, style.title_size))
            .margin(10)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(-0.5..(n_trials - 0.5).max(0.5), -0.5..(n_rows - 0.5).max(0.5))?;
        draw_mesh(&mut raster, style, "trial #", "cell #")?;
        let marker = style.stim_colour(self.kind).mix(0.8).filled();
        let size = style.marker_size;
        raster.draw_series(
            self.points
                .iter()
                .map(|&(trial, row)| Circle::new((trial as f64, row as f64), size, marker)),
        )?;

        draw_histogram(
            &panels[3],
            style,
            &Histogram {
                caption: "",
                x_desc: "% trials responded on",
                y_desc: "Trial responses per cell",
                values: &per_cell,
                kind: self.kind,
                horizontal: true,
                targets: target_marker_level(self.kind).map(|level| (self.targets.as_slice(), level)),
            },
        )
    }
}

/// Mean raw cell fluorescence over each session, experiments laid end to end.
pub struct MeanFluorescence {
    /// (panel title, segments in acquisition order)
    pub panels: Vec<(String, Vec<FluorescenceSegment>)>,
}

impl Figure for MeanFluorescence {
    fn size(&self) -> (u32, u32) {
        (1000, 300 * self.panels.len().max(1) as u32)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static,
    {
        let areas = root.split_evenly((self.panels.len().max(1), 1));
        let x_max = self
            .panels
            .iter()
            .map(|(_, segs)| segs.iter().map(|s| s.values.len()).sum::<usize>())
            .max()
            .unwrap_or(0)
            .max(1) as f64;
        for (area, (title, segments)) in areas.iter().zip(&self.panels) {
            let (y0, y1) = value_bounds(segments.iter().flat_map(|s| s.values.iter().copied()));
            let mut chart = ChartBuilder::on(area)
                .caption(title, font(style, style.title_size))
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(80)
                .build_cartesian_2d(0.0..x_max, y0..y1)?;
            draw_mesh(&mut chart, style, "frames", "mean_raw_f")?;
            let mut offset = 0usize;
            for seg in segments {
                let line = style.stim_colour(seg.kind).stroke_width(style.line_width);
                let start = offset;
                chart
                    .draw_series(LineSeries::new(
                        seg.values
                            .iter()
                            .enumerate()
                            .map(|(i, &v)| ((start + i) as f64, v)),
                        line,
                    ))?
                    .label(seg.kind.label())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], line));
                offset += seg.values.len();
            }
            draw_legend(&mut chart, style)?;
        }
        Ok(())
    }
}

fn start_end_label(v: &f64) -> String {
    if v.fract().abs() > 1e-9 || *v < 0.0 {
        return String::new();
    }
    if (*v as usize) % 2 == 0 {
        "start".to_string()
    } else {
        "end".to_string()
    }
}

/// Raw and first-frame-normalised mean frame intensity of downsampled stacks.
pub struct FrameDriftPlot {
    /// (file name, drift)
    pub series: Vec<(String, FrameDrift)>,
    pub legend: bool,
}

impl Figure for FrameDriftPlot {
    fn size(&self) -> (u32, u32) {
        (1500, 1000)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, style: &PlotStyle) -> DrawResult
    where
        DB::ErrorType: 'static,
    {
        let areas = root.split_evenly((2, 1));
        let len = self.series.iter().map(|(_, d)| d.raw.len()).max().unwrap_or(0);
        let x_range = -0.25..(len.max(1) as f64 - 0.75);
        let raw_bounds = value_bounds(self.series.iter().flat_map(|(_, d)| d.raw.iter().copied()));

        for (panel, area) in areas.iter().enumerate() {
            let (y_desc, (y0, y1)) = if panel == 0 {
                ("raw_f", raw_bounds)
            } else {
                ("norm_f", (0.6, 1.2))
            };
            let mut chart = ChartBuilder::on(area)
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(80)
                .build_cartesian_2d(x_range.clone(), y0..y1)?;
            chart
                .configure_mesh()
                .disable_mesh()
                .x_desc(if panel == 1 { "experiments" } else { "" })
                .y_desc(y_desc)
                .x_labels(len.max(1))
                .x_label_formatter(&start_end_label)
                .label_style(font(style, style.tick_size))
                .axis_desc_style(font(style, style.label_size))
                .draw()?;
            for (i, (name, drift)) in self.series.iter().enumerate() {
                let values = if panel == 0 { &drift.raw } else { &drift.norm };
                let line = style.series_colour(i).stroke_width(style.line_width);
                chart
                    .draw_series(LineSeries::new(
                        values
                            .iter()
                            .enumerate()
                            .filter(|(_, v)| v.is_finite())
                            .map(|(x, &v)| (x as f64, v)),
                        line,
                    ))?
                    .label(name.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], line));
            }
            if self.legend && panel == 1 {
                draw_legend(&mut chart, style)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_outline_closes_at_zero() {
        assert_eq!(
            step_outline(&[1.0, 2.0]),
            vec![(-0.5, 0.0), (-0.5, 1.0), (0.5, 1.0), (0.5, 2.0), (1.5, 2.0), (1.5, 0.0)]
        );
        assert_eq!(step_outline(&[]), vec![(-0.5, 0.0), (-0.5, 0.0)]);
    }

    #[test]
    fn bounds_ignore_nan_and_pad() {
        let (lo, hi) = value_bounds([f64::NAN, 0.0, 10.0]);
        assert!((lo + 0.5).abs() < 1e-9);
        assert!((hi - 10.5).abs() < 1e-9);
        assert_eq!(value_bounds([f64::NAN]), (0.0, 1.0));
        assert_eq!(value_bounds([3.0, 3.0]), (2.0, 4.0));
    }

    #[test]
    fn markers_only_for_photostim() {
        assert_eq!(target_marker_level(StimKind::PhotostimRandom), Some(102.0));
        assert_eq!(target_marker_level(StimKind::PhotostimSimilar), Some(105.0));
        assert_eq!(target_marker_level(StimKind::WhiskerStim), None);
    }

    #[test]
    fn output_paths_keep_dotted_stems() {
        let stem = Path::new("figs/2020-01-01_t-001.v2_pr_top_ten_traces");
        assert_eq!(
            output_path(stem, FigureFormat::Svg),
            PathBuf::from("figs/2020-01-01_t-001.v2_pr_top_ten_traces.svg")
        );
    }

    #[test]
    fn start_end_labels_alternate() {
        assert_eq!(start_end_label(&0.0), "start");
        assert_eq!(start_end_label(&3.0), "end");
        assert_eq!(start_end_label(&0.5), "");
    }

    #[test]
    fn figures_render_to_every_format() {
        let dir = tempfile::tempdir().unwrap();
        let style = PlotStyle::default();

        let traces = StaTraces {
            title: "pr".to_string(),
            time: vec![-1.0, -0.5, 0.0, 0.5, 1.0],
            traces: vec![(3, vec![-4.0, 4.0, 12.0, 20.0, 28.0]), (7, vec![0.0, f64::NAN, 1.0, 2.0, 3.0])],
        };
        let written = save(&traces, &dir.path().join("pr_traces"), &style).unwrap();
        assert_eq!(written.len(), 2);

        let raster = ResponseRaster {
            title: "ps".to_string(),
            kind: StimKind::PhotostimSimilar,
            frequency: ResponseFrequency {
                per_trial: ndarray::array![50.0, 100.0, 0.0],
                per_cell: ndarray::array![66.7, 33.3],
            },
            points: vec![(0, 0), (1, 0), (1, 1)],
            targets: vec![1],
        };
        let written = save(&raster, &dir.path().join("ps_raster"), &style).unwrap();
        assert!(written.iter().all(|p| p.exists()));

        let drift = FrameDriftPlot {
            series: vec![(
                "session_a".to_string(),
                FrameDrift {
                    raw: vec![10.0, 9.0, 8.0, 8.5],
                    norm: vec![1.0, 0.9, 0.8, 0.85],
                },
            )],
            legend: true,
        };
        assert_eq!(save(&drift, &dir.path().join("drift"), &style).unwrap().len(), 2);
    }
}
