//! Session-wide fluorescence drift summaries.

use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, Result};
use crate::session::{Recording, Session, StimKind};
use crate::sta::FrameSource;
use crate::tiff_stack::{self, TiffStack};

/// Frames averaged at each end of a recording when downsampling.
pub const DOWNSAMPLE_FRAMES: usize = 1000;
/// Midpoint of the unsigned 16-bit range; raw frames carry this offset.
pub const U16_OFFSET: f64 = 32768.0;

/// Mean raw fluorescence across cells for each frame of one experiment.
#[derive(Debug, Clone)]
pub struct FluorescenceSegment {
    pub kind: StimKind,
    pub values: Vec<f64>,
}

/// Per-frame mean over all curated cells, one segment per recorded experiment.
pub fn mean_cell_fluorescence(session: &Session) -> Result<Vec<FluorescenceSegment>> {
    session
        .recorded()
        .into_iter()
        .map(|exp| {
            let raw = exp.recording().raw_traces()?;
            let values = raw
                .mean_axis(Axis(0))
                .map(|m| m.to_vec())
                .unwrap_or_default();
            Ok(FluorescenceSegment {
                kind: exp.kind(),
                values,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameDrift {
    /// Frame mean minus [`U16_OFFSET`].
    pub raw: Vec<f64>,
    /// `raw` divided by its first value; NaN when that value is zero.
    pub norm: Vec<f64>,
}

pub fn frame_drift(stack: &Array3<f32>) -> FrameDrift {
    let raw: Vec<f64> = stack
        .outer_iter()
        .map(|frame| {
            let n = frame.len().max(1) as f64;
            frame.iter().map(|&v| f64::from(v)).sum::<f64>() / n - U16_OFFSET
        })
        .collect();
    let first = raw.first().copied().unwrap_or(0.0);
    let norm = raw
        .iter()
        .map(|&v| if first == 0.0 { f64::NAN } else { v / first })
        .collect();
    FrameDrift { raw, norm }
}

fn mean_image<S: FrameSource>(source: &mut S, range: std::ops::Range<usize>) -> Result<Array2<f64>> {
    let frames = source.read_frames(range.clone())?;
    frames
        .mapv(f64::from)
        .mean_axis(Axis(0))
        .ok_or_else(|| AnalysisError::shape("mean image", "at least one frame", format!("{:?}", range)))
}

/// Mean of the first and of the last [`DOWNSAMPLE_FRAMES`] frames.
pub fn start_end_means<S: FrameSource>(source: &mut S, n_frames: usize) -> Result<(Array2<f64>, Array2<f64>)> {
    let n_frames = n_frames.min(source.frame_count());
    let span = DOWNSAMPLE_FRAMES.min(n_frames);
    let start = mean_image(source, 0..span)?;
    let end = mean_image(source, n_frames - span..n_frames)?;
    Ok((start, end))
}

const DOWNSAMPLE_SUFFIXES: [&str; 2] = ["mean_start", "mean_end"];

fn downsampled_paths(rec: &Recording, dir: &Path) -> [PathBuf; 2] {
    let name = rec.tiff_name();
    DOWNSAMPLE_SUFFIXES.map(|suffix| dir.join(format!("{}_{}.tif", name, suffix)))
}

/// Write `<tiff dir name>_mean_start.tif` and `_mean_end.tif` into `out_dir`.
pub fn downsample_session(session: &Session, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for exp in session.recorded() {
        let rec = exp.recording();
        let tiff = tiff_stack::find_tiff(&rec.tiff_path)?;
        let mut stack = TiffStack::open(&tiff)?;
        let (start, end) = start_end_means(&mut stack, rec.n_frames)?;
        let [start_path, end_path] = downsampled_paths(rec, out_dir);
        tiff_stack::write_image_i16(&start_path, &start)?;
        tiff_stack::write_image_i16(&end_path, &end)?;
        log::info!("Downsampled {} ({})", rec.tiff_name(), exp.kind().label());
        written.push(start_path);
        written.push(end_path);
    }
    Ok(written)
}

/// Start and end mean images of every recorded experiment, in acquisition
/// order, as one (image, y, x) stack.
pub fn read_downsampled(session: &Session, dir: &Path) -> Result<Array3<f32>> {
    let mut images = Vec::new();
    for exp in session.recorded() {
        for path in downsampled_paths(exp.recording(), dir) {
            images.push(tiff_stack::read_image(&path)?);
        }
    }
    let views: Vec<_> = images.iter().map(|i| i.view()).collect();
    ndarray::stack(Axis(0), &views)
        .map_err(|e| AnalysisError::shape(format!("downsampled images of {}", session.name), "equal frame shapes", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sta::MemoryStack;
    use approx::assert_abs_diff_eq;

    #[test]
    fn drift_is_offset_and_normalised() {
        let stack = Array3::from_shape_fn((3, 2, 2), |(t, _, _)| (U16_OFFSET + 10.0 * (t + 1) as f64) as f32);
        let drift = frame_drift(&stack);
        assert_eq!(drift.raw, vec![10.0, 20.0, 30.0]);
        assert_eq!(drift.norm, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn short_recordings_use_every_frame_for_both_ends() {
        let stack = Array3::from_shape_fn((4, 1, 2), |(t, _, x)| (t * 2 + x) as f32);
        let mut source = MemoryStack(stack);
        let (start, end) = start_end_means(&mut source, 4).unwrap();
        assert_eq!(start, end);
        assert_abs_diff_eq!(start[[0, 0]], 3.0);
        assert_abs_diff_eq!(start[[0, 1]], 4.0);
    }

    #[test]
    fn downsampled_images_are_read_in_acquisition_order() {
        let dir = tempfile::tempdir().unwrap();
        let session_path = dir.path().join("session.json");
        std::fs::write(&session_path, crate::session::tests::session_json().to_string()).unwrap();
        let session = Session::load(&session_path).unwrap();
        for (i, name) in ["pr_tiffs_mean_start", "pr_tiffs_mean_end", "ps_tiffs_mean_start", "ps_tiffs_mean_end"]
            .iter()
            .enumerate()
        {
            let image = Array2::from_elem((2, 2), 100.0 * (i + 1) as f64);
            tiff_stack::write_image_i16(&dir.path().join(format!("{}.tif", name)), &image).unwrap();
        }
        let stack = read_downsampled(&session, dir.path()).unwrap();
        assert_eq!(stack.dim(), (4, 2, 2));
        let firsts: Vec<f32> = stack.outer_iter().map(|f| f[[0, 0]]).collect();
        assert_eq!(firsts, vec![100.0, 200.0, 300.0, 400.0]);

        std::fs::remove_file(dir.path().join("ps_tiffs_mean_end.tif")).unwrap();
        assert!(read_downsampled(&session, dir.path()).is_err());
    }

    fn load_session(dir: &Path, value: &serde_json::Value) -> Session {
        let path = dir.join("session.json");
        std::fs::write(&path, value.to_string()).unwrap();
        Session::load(&path).unwrap()
    }

    #[test]
    fn downsampling_writes_start_and_end_means_per_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = crate::session::tests::session_json();
        let levels = [(100.0f32, "pr_tiffs"), (40000.0, "ps_tiffs")];
        for (exp, &(level, name)) in value["experiments"].as_array_mut().unwrap().iter_mut().zip(&levels) {
            let tiff_dir = dir.path().join(name);
            // frames rise by 10, so the 3-frame mean is level + 10
            let stack = Array3::from_shape_fn((3, 3, 4), |(t, _, _)| level + 10.0 * t as f32);
            tiff_stack::write_stack_f32(&tiff_dir.join("file_00001.tif"), &stack).unwrap();
            exp["tiff_path"] = tiff_dir.to_string_lossy().into_owned().into();
            exp["n_frames"] = 3.into();
        }
        let session = load_session(dir.path(), &value);
        let out = dir.path().join("downsampled");

        let written = downsample_session(&session, &out).unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "pr_tiffs_mean_start.tif",
                "pr_tiffs_mean_end.tif",
                "ps_tiffs_mean_start.tif",
                "ps_tiffs_mean_end.tif"
            ]
        );
        let pr_start = tiff_stack::read_image(&written[0]).unwrap();
        assert_eq!(pr_start.dim(), (3, 4));
        assert_eq!(pr_start[[2, 3]], 110.0);
        // beyond the i16 range the mean saturates
        let ps_end = tiff_stack::read_image(&written[3]).unwrap();
        assert_eq!(ps_end[[0, 0]], f32::from(i16::MAX));

        assert_eq!(read_downsampled(&session, &out).unwrap().dim(), (4, 3, 4));
    }

    #[test]
    fn mean_cell_fluorescence_has_one_segment_per_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = crate::session::tests::session_json();
        value["experiments"][1]["cells"]["raw"] = serde_json::json!([vec![4.0; 6], vec![8.0; 6]]);
        let session = load_session(dir.path(), &value);

        let segments = mean_cell_fluorescence(&session).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].kind, StimKind::PhotostimRandom);
        assert_eq!(segments[0].values, vec![1.5; 10]);
        assert_eq!(segments[1].kind, StimKind::PhotostimSimilar);
        assert_eq!(segments[1].values, vec![6.0; 6]);
    }

    #[test]
    fn long_recordings_average_each_end() {
        let n = DOWNSAMPLE_FRAMES + 500;
        let stack = Array3::from_shape_fn((n, 1, 1), |(t, _, _)| if t < 500 { 0.0 } else { 2.0 });
        let mut source = MemoryStack(stack);
        let (start, end) = start_end_means(&mut source, n).unwrap();
        assert_abs_diff_eq!(start[[0, 0]], 1.0);
        assert_abs_diff_eq!(end[[0, 0]], 2.0);
    }
}
