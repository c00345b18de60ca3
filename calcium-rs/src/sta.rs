//! Stimulus-triggered averages.
//!
//! A trial window starts `pre_frames` before a stimulus onset and spans
//! `window_len` frames. Windows that do not fit inside the recording are
//! dropped rather than padded (recordings truncated by corrupt data are
//! common), and every dropped trial is reported back to the caller.

use ndarray::{s, Array, Array2, Array3, ArrayView2, Axis, Dimension};
use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, Result};
use crate::session::Recording;
use crate::tiff_stack::{self, TiffStack};

/// Random access to a (frame, y, x) timeseries.
pub trait FrameSource {
    fn frame_count(&self) -> usize;
    /// (height, width) of every frame.
    fn frame_shape(&self) -> (usize, usize);
    fn read_frames(&mut self, range: Range<usize>) -> Result<Array3<f32>>;
}

/// A stack already held in memory.
pub struct MemoryStack(pub Array3<f32>);

impl FrameSource for MemoryStack {
    fn frame_count(&self) -> usize {
        self.0.len_of(Axis(0))
    }

    fn frame_shape(&self) -> (usize, usize) {
        let (_, h, w) = self.0.dim();
        (h, w)
    }

    fn read_frames(&mut self, range: Range<usize>) -> Result<Array3<f32>> {
        if range.end > self.frame_count() {
            return Err(AnalysisError::shape(
                "in-memory frame range",
                format!("within 0..{}", self.frame_count()),
                format!("{:?}", range),
            ));
        }
        Ok(self.0.slice(s![range, .., ..]).to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Onset is closer to frame 0 than the baseline length.
    StartsBeforeFirstFrame,
    /// Window end lies beyond the last recorded frame.
    RunsPastEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedTrial {
    pub trial: usize,
    pub onset: usize,
    pub reason: ExclusionReason,
}

/// Trial windows split into those that fit the recording and those that don't.
#[derive(Debug, Clone)]
pub struct WindowSelection {
    pub pre_frames: usize,
    pub window_len: usize,
    /// (trial index, frame range) of each usable window.
    pub included: Vec<(usize, Range<usize>)>,
    pub excluded: Vec<ExcludedTrial>,
}

impl WindowSelection {
    pub fn n_included(&self) -> usize {
        self.included.len()
    }
}

pub fn select_windows(
    onsets: &[usize],
    pre_frames: usize,
    window_len: usize,
    n_frames: usize,
) -> WindowSelection {
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (trial, &onset) in onsets.iter().enumerate() {
        let reason = if onset < pre_frames {
            Some(ExclusionReason::StartsBeforeFirstFrame)
        } else if onset - pre_frames + window_len > n_frames {
            Some(ExclusionReason::RunsPastEnd)
        } else {
            None
        };
        match reason {
            Some(reason) => excluded.push(ExcludedTrial {
                trial,
                onset,
                reason,
            }),
            None => {
                let start = onset - pre_frames;
                included.push((trial, start..start + window_len));
            }
        }
    }
    WindowSelection {
        pre_frames,
        window_len,
        included,
        excluded,
    }
}

/// Mean (window, y, x) movie over every included window.
pub fn average_windows<S: FrameSource>(
    source: &mut S,
    selection: &WindowSelection,
) -> Result<Array3<f64>> {
    if selection.included.is_empty() {
        return Err(AnalysisError::NoValidTrials);
    }
    let (h, w) = source.frame_shape();
    let mut acc = Array3::<f64>::zeros((selection.window_len, h, w));
    for (_, range) in &selection.included {
        let frames = source.read_frames(range.clone())?;
        if frames.dim() != acc.dim() {
            return Err(AnalysisError::shape(
                "trial window",
                format!("{:?}", acc.dim()),
                format!("{:?}", frames.dim()),
            ));
        }
        acc.zip_mut_with(&frames, |a, &f| *a += f64::from(f));
    }
    acc /= selection.n_included() as f64;
    Ok(acc)
}

/// Mean (cell, window) traces from (cell, frame) fluorescence.
pub fn average_trace_windows(
    traces: ArrayView2<f64>,
    selection: &WindowSelection,
) -> Result<Array2<f64>> {
    if selection.included.is_empty() {
        return Err(AnalysisError::NoValidTrials);
    }
    let n_frames = traces.ncols();
    let mut acc = Array2::<f64>::zeros((traces.nrows(), selection.window_len));
    for (trial, range) in &selection.included {
        if range.end > n_frames {
            return Err(AnalysisError::shape(
                format!("trace window of trial {}", trial),
                format!("end <= {}", n_frames),
                range.end,
            ));
        }
        acc += &traces.slice(s![.., range.clone()]);
    }
    acc /= selection.n_included() as f64;
    Ok(acc)
}

/// What to do where the pre-stimulus baseline is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroBaseline {
    /// Fail with [`AnalysisError::ZeroBaseline`].
    #[default]
    Reject,
    /// Fill the affected samples with NaN and keep going.
    NotANumber,
}

#[derive(Debug, Clone)]
pub struct Normalized<D: Dimension> {
    pub data: Array<f64, D>,
    /// Lanes whose baseline was zero.
    pub zero_baseline: usize,
}

/// Percent change from the mean of the first `pre_frames` samples along
/// `time_axis`. Negative baselines are normalised as-is.
pub fn dff<D: Dimension>(
    avg: &Array<f64, D>,
    pre_frames: usize,
    time_axis: Axis,
    policy: ZeroBaseline,
) -> Result<Normalized<D>> {
    let len = avg.len_of(time_axis);
    if pre_frames == 0 || pre_frames > len {
        return Err(AnalysisError::shape(
            "dF/F baseline",
            format!("1..={} pre-stimulus frames", len),
            pre_frames,
        ));
    }
    let mut data = avg.clone();
    let mut zero_baseline = 0;
    for mut lane in data.lanes_mut(time_axis) {
        let baseline = lane.slice(s![..pre_frames]).mean().unwrap_or(0.0);
        if baseline == 0.0 {
            zero_baseline += 1;
            lane.fill(f64::NAN);
            continue;
        }
        lane.mapv_inplace(|v| (v - baseline) / baseline * 100.0);
    }
    if zero_baseline > 0 && policy == ZeroBaseline::Reject {
        return Err(AnalysisError::ZeroBaseline {
            count: zero_baseline,
        });
    }
    Ok(Normalized {
        data,
        zero_baseline,
    })
}

/// Mean dF/F over the post-stimulus tail (last `pre_frames` samples) of each row.
pub fn sta_amplitudes(stas: ArrayView2<f64>, pre_frames: usize) -> Vec<f64> {
    let n = stas.ncols();
    let tail = pre_frames.clamp(1, n.max(1));
    stas.rows()
        .into_iter()
        .map(|row| {
            if n == 0 {
                f64::NAN
            } else {
                row.slice(s![n - tail..]).mean().unwrap_or(f64::NAN)
            }
        })
        .collect()
}

fn log_exclusions(selection: &WindowSelection, what: &str) {
    for ex in &selection.excluded {
        log::warn!(
            "{}: skipping trial {} (onset {}): {:?}",
            what,
            ex.trial,
            ex.onset,
            ex.reason
        );
    }
}

/// Per-cell STA traces (dF/F). Stored traces win over recomputing from raw.
pub fn recording_stas(rec: &Recording) -> Result<Array2<f64>> {
    if let Some(stored) = rec.stored_stas()? {
        return Ok(stored);
    }
    let raw = rec.raw_traces()?;
    let selection = select_windows(
        &rec.stim_start_frames,
        rec.pre_frames,
        rec.window_len(),
        raw.ncols(),
    );
    log_exclusions(&selection, &rec.sheet_name);
    let avg = average_trace_windows(raw.view(), &selection)?;
    Ok(dff(&avg, rec.pre_frames, Axis(1), ZeroBaseline::Reject)?.data)
}

pub struct StaMovie {
    pub tiff: PathBuf,
    pub selection: WindowSelection,
    /// (window, y, x) dF/F in percent.
    pub dff: Array3<f32>,
    pub zero_baseline: usize,
}

/// Build the dF/F STA movie of a recording from the first TIFF in its directory.
pub fn recording_movie(rec: &Recording) -> Result<StaMovie> {
    let tiff = tiff_stack::find_tiff(&rec.tiff_path)?;
    let mut stack = TiffStack::open(&tiff)?;
    if stack.frame_count() != rec.n_frames {
        log::warn!(
            "{} holds {} frames, session record says {}",
            tiff.display(),
            stack.frame_count(),
            rec.n_frames
        );
    }
    let n_frames = stack.frame_count().min(rec.n_frames);
    let selection = select_windows(
        &rec.stim_start_frames,
        rec.pre_frames,
        rec.window_len(),
        n_frames,
    );
    log_exclusions(&selection, &tiff.display().to_string());
    let avg = average_windows(&mut stack, &selection)?;
    let normalized = dff(&avg, rec.pre_frames, Axis(0), ZeroBaseline::NotANumber)?;
    if normalized.zero_baseline > 0 {
        log::warn!(
            "{}: {} pixel(s) with zero baseline set to NaN",
            tiff.display(),
            normalized.zero_baseline
        );
    }
    Ok(StaMovie {
        tiff,
        selection,
        dff: normalized.data.mapv(|v| v as f32),
        zero_baseline: normalized.zero_baseline,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<out_dir>/<tiff stem>_plane0.tif`. A name already in `taken` is
/// prefixed with the TIFF's directory name instead.
pub fn movie_output_path(out_dir: &Path, tiff: &Path, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let stem = file_stem(tiff);
    let mut path = out_dir.join(format!("{}_plane0.tif", stem));
    if taken.contains(&path) {
        let dir = tiff.parent().map(file_stem).unwrap_or_default();
        let renamed = out_dir.join(format!("{}_{}_plane0.tif", dir, stem));
        log::warn!(
            "{} already written this run, using {} for {}",
            path.display(),
            renamed.display(),
            tiff.display()
        );
        path = renamed;
        if taken.contains(&path) {
            log::warn!("{} will be overwritten", path.display());
        }
    }
    taken.insert(path.clone());
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn windows_past_the_end_are_excluded_and_counted() {
        let sel = select_windows(&[2, 5, 8, 9], 2, 4, 10);
        let ranges: Vec<_> = sel.included.iter().map(|(_, r)| r.clone()).collect();
        assert_eq!(ranges, vec![0..4, 3..7, 6..10]);
        assert_eq!(sel.n_included(), 3);
        assert_eq!(
            sel.excluded,
            vec![ExcludedTrial {
                trial: 3,
                onset: 9,
                reason: ExclusionReason::RunsPastEnd
            }]
        );
    }

    #[test]
    fn windows_before_first_frame_are_excluded() {
        let sel = select_windows(&[1, 4], 2, 3, 20);
        assert_eq!(sel.n_included(), 1);
        assert_eq!(sel.excluded[0].reason, ExclusionReason::StartsBeforeFirstFrame);
    }

    #[test]
    fn average_uses_only_valid_trials() {
        // frame t is filled with the value t
        let stack = Array3::from_shape_fn((10, 2, 3), |(t, _, _)| t as f32);
        let mut source = MemoryStack(stack);
        let sel = select_windows(&[2, 6, 9], 2, 4, 10);
        assert_eq!(sel.n_included(), 2);
        let avg = average_windows(&mut source, &sel).unwrap();
        assert_eq!(avg.dim(), (4, 2, 3));
        // windows 0..4 and 4..8 -> mean of t and t+4
        assert_abs_diff_eq!(avg[[0, 0, 0]], 2.0);
        assert_abs_diff_eq!(avg[[3, 1, 2]], 5.0);
    }

    #[test]
    fn no_valid_trials_is_an_error() {
        let mut source = MemoryStack(Array3::zeros((3, 1, 1)));
        let sel = select_windows(&[2], 1, 5, 3);
        assert!(matches!(
            average_windows(&mut source, &sel),
            Err(AnalysisError::NoValidTrials)
        ));
    }

    #[test]
    fn baseline_period_normalises_to_zero() {
        let avg = Array3::from_shape_fn((6, 2, 2), |(t, y, x)| {
            10.0 + (t * t) as f64 + y as f64 * 3.0 + x as f64
        });
        let out = dff(&avg, 3, Axis(0), ZeroBaseline::Reject).unwrap();
        assert_eq!(out.zero_baseline, 0);
        let baseline_mean = out.data.slice(s![..3, .., ..]).mean_axis(Axis(0)).unwrap();
        for &v in baseline_mean.iter() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn dff_is_percent_change() {
        let avg: Array1<f64> = array![2.0, 2.0, 3.0, 1.0];
        let out = dff(&avg, 2, Axis(0), ZeroBaseline::Reject).unwrap();
        assert_abs_diff_eq!(out.data[2], 50.0);
        assert_abs_diff_eq!(out.data[3], -50.0);
    }

    #[test]
    fn zero_baseline_policies() {
        let avg: Array2<f64> = array![[0.0, 0.0, 5.0], [1.0, 1.0, 2.0]];
        let err = dff(&avg, 2, Axis(1), ZeroBaseline::Reject).unwrap_err();
        assert!(matches!(err, AnalysisError::ZeroBaseline { count: 1 }));

        let out = dff(&avg, 2, Axis(1), ZeroBaseline::NotANumber).unwrap();
        assert_eq!(out.zero_baseline, 1);
        assert!(out.data.row(0).iter().all(|v| v.is_nan()));
        assert_abs_diff_eq!(out.data[[1, 2]], 100.0);
    }

    #[test]
    fn trace_windows_average_per_cell() {
        let traces: Array2<f64> = Array2::from_shape_fn((2, 12), |(c, t)| (c * 100 + t) as f64);
        let sel = select_windows(&[3, 7, 11], 1, 3, 12);
        assert_eq!(sel.n_included(), 2);
        let avg = average_trace_windows(traces.view(), &sel).unwrap();
        assert_eq!(avg.dim(), (2, 3));
        // windows 2..5 and 6..9
        assert_abs_diff_eq!(avg[[0, 0]], 4.0);
        assert_abs_diff_eq!(avg[[1, 2]], 106.0);
    }

    /// Recording of 12 frames with onsets 2, 6 and 10 and 5-frame windows;
    /// the last window runs past the end.
    fn driver_recording(tiff_dir: &std::path::Path) -> Recording {
        let mut value = crate::session::tests::recording_json(&tiff_dir.to_string_lossy());
        value["n_frames"] = 12.into();
        value["stim_dur"] = 2.0.into();
        value["stim_start_frames"] = serde_json::json!([2, 6, 10]);
        let ramp: Vec<f64> = (0..12).map(|t| 20.0 + 2.0 * t as f64).collect();
        value["cells"]["raw"] = serde_json::json!([ramp, vec![5.0; 12]]);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn movie_from_tiff_skips_truncated_trials() {
        let dir = tempfile::tempdir().unwrap();
        // row 0 is dark, row 1 ramps by 2 per frame from 20
        let stack = Array3::from_shape_fn((12, 2, 2), |(t, y, _)| if y == 0 { 0.0 } else { 20.0 + 2.0 * t as f32 });
        tiff_stack::write_stack_f32(&dir.path().join("stack_00001.tif"), &stack).unwrap();
        let rec = driver_recording(dir.path());
        assert_eq!(rec.window_len(), 5);

        let movie = recording_movie(&rec).unwrap();
        assert_eq!(movie.tiff, dir.path().join("stack_00001.tif"));
        assert_eq!(movie.selection.n_included(), 2);
        assert_eq!(
            movie.selection.excluded,
            vec![ExcludedTrial {
                trial: 2,
                onset: 10,
                reason: ExclusionReason::RunsPastEnd
            }]
        );
        assert_eq!(movie.dff.dim(), (5, 2, 2));
        let expected = [-4.0, 4.0, 12.0, 20.0, 28.0];
        for (k, &v) in expected.iter().enumerate() {
            assert_abs_diff_eq!(movie.dff[[k, 1, 0]], v, epsilon = 1e-4);
            assert_abs_diff_eq!(movie.dff[[k, 1, 1]], v, epsilon = 1e-4);
        }
        assert_eq!(movie.zero_baseline, 2);
        assert!(movie.dff.slice(s![.., 0, ..]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn missing_tiff_fails_the_movie() {
        let dir = tempfile::tempdir().unwrap();
        let rec = driver_recording(dir.path());
        assert!(matches!(recording_movie(&rec), Err(AnalysisError::MissingFile(_))));
    }

    #[test]
    fn stas_are_recomputed_from_raw_traces() {
        let dir = tempfile::tempdir().unwrap();
        let rec = driver_recording(dir.path());
        assert!(rec.cells.stas.is_none());
        let stas = recording_stas(&rec).unwrap();
        assert_eq!(stas.dim(), (2, 5));
        for (k, &v) in [-4.0, 4.0, 12.0, 20.0, 28.0].iter().enumerate() {
            assert_abs_diff_eq!(stas[[0, k]], v, epsilon = 1e-9);
            assert_abs_diff_eq!(stas[[1, k]], 0.0, epsilon = 1e-9);
        }

        let mut dark = rec.clone();
        dark.cells.raw[1] = vec![0.0; 12];
        assert!(matches!(
            recording_stas(&dark),
            Err(AnalysisError::ZeroBaseline { count: 1 })
        ));

        let mut stored = rec;
        stored.cells.stas = Some(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(recording_stas(&stored).unwrap(), array![[1.0, 2.0], [3.0, 4.0]]);
    }

    #[test]
    fn movie_names_from_the_same_stack_name_do_not_collide() {
        let out = Path::new("/out");
        let mut taken = HashSet::new();
        let first = movie_output_path(out, Path::new("/a/pr_tiffs/file_00001.tif"), &mut taken);
        let second = movie_output_path(out, Path::new("/b/ps_tiffs/file_00001.tif"), &mut taken);
        let other = movie_output_path(out, Path::new("/a/w_tiffs/w_00001.tif"), &mut taken);
        assert_eq!(first, out.join("file_00001_plane0.tif"));
        assert_eq!(second, out.join("ps_tiffs_file_00001_plane0.tif"));
        assert_eq!(other, out.join("w_00001_plane0.tif"));
        assert_eq!(taken.len(), 3);
    }

    #[test]
    fn amplitudes_average_the_tail() {
        let stas: Array2<f64> = array![[0.0, 0.0, 1.0, 4.0, 6.0], [0.0, 0.0, 0.0, -2.0, -2.0]];
        let amps = sta_amplitudes(stas.view(), 2);
        assert_eq!(amps, vec![5.0, -2.0]);
    }
}
