//! Session records: one imaging session with its photostim, whisker and
//! spontaneous recordings.
//!
//! Records are JSON documents exported by the acquisition pipeline. Every
//! experiment carries a `kind` tag and a shared [`Recording`] body; only
//! plane 0 is represented.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, Result};
use crate::roi;

const DEFAULT_TARGET_RADIUS: f64 = 10.0;

fn unit_pixel() -> f64 {
    1.0
}

fn default_target_radius() -> f64 {
    DEFAULT_TARGET_RADIUS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimKind {
    PhotostimRandom,
    PhotostimSimilar,
    WhiskerStim,
    Spontaneous,
}

impl StimKind {
    /// Order used for session-wide summaries.
    pub const ALL: [StimKind; 4] = [
        StimKind::PhotostimRandom,
        StimKind::PhotostimSimilar,
        StimKind::WhiskerStim,
        StimKind::Spontaneous,
    ];

    /// Short stimulus code used in figure titles and file names.
    pub fn code(self) -> &'static str {
        match self {
            StimKind::PhotostimRandom => "pr",
            StimKind::PhotostimSimilar => "ps",
            StimKind::WhiskerStim => "w",
            StimKind::Spontaneous => "none",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StimKind::PhotostimRandom => "ps_random",
            StimKind::PhotostimSimilar => "ps_similar",
            StimKind::WhiskerStim => "whisker_stim",
            StimKind::Spontaneous => "spont",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code || k.label() == code)
    }
}

/// Per-cell data extracted by Suite2p for one recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cells {
    /// Suite2p ROI index of each row.
    #[serde(default)]
    pub cell_id: Vec<usize>,
    /// Median pixel (y, x) of each cell.
    #[serde(default)]
    pub cell_med: Vec<[f64; 2]>,
    #[serde(default)]
    pub cell_x: Vec<Vec<usize>>,
    #[serde(default)]
    pub cell_y: Vec<Vec<usize>>,
    /// Raw fluorescence, cell x frame.
    #[serde(default)]
    pub raw: Vec<Vec<f64>>,
    /// Precomputed STA traces (dF/F), cell x window.
    #[serde(default)]
    pub stas: Option<Vec<Vec<f64>>>,
    /// Upstream response classification, cell x trial.
    #[serde(default)]
    pub responses: Option<Vec<Vec<bool>>>,
}

impl Cells {
    pub fn len(&self) -> usize {
        self.cell_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_id.is_empty()
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let n = self.cell_id.len();
        let columns = [
            ("cell_med", self.cell_med.len()),
            ("cell_x", self.cell_x.len()),
            ("cell_y", self.cell_y.len()),
        ];
        for (name, len) in columns {
            if len != n {
                return Err(AnalysisError::malformed(
                    path,
                    format!("{} has {} rows but cell_id has {}", name, len, n),
                ));
            }
        }
        if !self.raw.is_empty() && self.raw.len() != n {
            return Err(AnalysisError::malformed(
                path,
                format!("raw has {} rows but cell_id has {}", self.raw.len(), n),
            ));
        }
        for (i, (xs, ys)) in self.cell_x.iter().zip(&self.cell_y).enumerate() {
            if xs.len() != ys.len() {
                return Err(AnalysisError::malformed(
                    path,
                    format!("cell {} has {} x pixels and {} y pixels", i, xs.len(), ys.len()),
                ));
            }
        }
        Ok(())
    }
}

fn rows_to_array<T: Clone>(rows: &[Vec<T>], context: &str) -> Result<Array2<T>> {
    let n_cols = rows.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(rows.len() * n_cols);
    for row in rows {
        if row.len() != n_cols {
            return Err(AnalysisError::shape(context, n_cols, row.len()));
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), n_cols), flat)
        .map_err(|e| AnalysisError::shape(context, "rectangular rows", e))
}

/// Fields shared by every experiment kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub sheet_name: String,
    /// Directory holding the registered TIFF stack.
    pub tiff_path: PathBuf,
    pub frame_x: usize,
    pub frame_y: usize,
    pub n_frames: usize,
    pub fps: f64,
    #[serde(default = "unit_pixel")]
    pub pix_sz_x: f64,
    #[serde(default = "unit_pixel")]
    pub pix_sz_y: f64,
    #[serde(default)]
    pub pre_frames: usize,
    #[serde(default)]
    pub stim_dur: f64,
    /// Stimulus onset frame of each trial.
    #[serde(default)]
    pub stim_start_frames: Vec<usize>,
    #[serde(default)]
    pub cells: Cells,
}

impl Recording {
    pub fn n_trials(&self) -> usize {
        self.stim_start_frames.len()
    }

    /// Frames covered by the stimulus itself.
    pub fn stim_frames(&self) -> usize {
        if self.fps > 0.0 {
            (self.stim_dur / self.fps) as usize
        } else {
            0
        }
    }

    /// Pre-stimulus baseline, stimulus and an equally long post-stimulus tail.
    pub fn window_len(&self) -> usize {
        self.pre_frames * 2 + self.stim_frames()
    }

    /// Seconds relative to stimulus onset for each sample of a trial window.
    pub fn time_axis(&self) -> Vec<f64> {
        let fps = if self.fps > 0.0 { self.fps } else { 1.0 };
        (0..self.window_len())
            .map(|i| (i as f64 - self.pre_frames as f64) / fps)
            .collect()
    }

    /// Last path component of `tiff_path`, used to match derived files.
    pub fn tiff_name(&self) -> String {
        self.tiff_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn raw_traces(&self) -> Result<Array2<f64>> {
        rows_to_array(&self.cells.raw, "raw traces")
    }

    pub fn stored_stas(&self) -> Result<Option<Array2<f64>>> {
        self.cells
            .stas
            .as_deref()
            .map(|rows| rows_to_array(rows, "stored STA traces"))
            .transpose()
    }

    pub fn responses(&self) -> Result<Option<Array2<bool>>> {
        self.cells
            .responses
            .as_deref()
            .map(|rows| rows_to_array(rows, "response matrix"))
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photostim {
    #[serde(flatten)]
    pub recording: Recording,
    #[serde(default)]
    pub targeted_cells: Vec<bool>,
    /// Cells classified as s2 (significant in the second pass).
    #[serde(default)]
    pub cell_s2: Vec<bool>,
    /// SLM target pixels as (y, x).
    #[serde(default)]
    pub target_areas: Vec<Vec<[usize; 2]>>,
    /// SLM target centres as (y, x); used when `target_areas` is empty.
    #[serde(default)]
    pub target_coords: Vec<[f64; 2]>,
    #[serde(default = "default_target_radius")]
    pub target_radius: f64,
}

impl Photostim {
    pub fn target_areas(&self) -> Vec<Vec<[usize; 2]>> {
        if !self.target_areas.is_empty() {
            return self.target_areas.clone();
        }
        self.target_coords
            .iter()
            .map(|&[y, x]| {
                roi::points_in_circle(self.target_radius, x.round() as i64, y.round() as i64)
                    .into_iter()
                    .filter(|&(px, py)| px >= 0 && py >= 0)
                    .map(|(px, py)| [py as usize, px as usize])
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhiskerStim {
    #[serde(flatten)]
    pub recording: Recording,
    /// Cells with a significant whisker STA.
    #[serde(default)]
    pub sta_sig: Vec<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Experiment {
    PhotostimRandom(Photostim),
    PhotostimSimilar(Photostim),
    WhiskerStim(WhiskerStim),
    Spontaneous(Recording),
}

impl Experiment {
    pub fn kind(&self) -> StimKind {
        match self {
            Experiment::PhotostimRandom(_) => StimKind::PhotostimRandom,
            Experiment::PhotostimSimilar(_) => StimKind::PhotostimSimilar,
            Experiment::WhiskerStim(_) => StimKind::WhiskerStim,
            Experiment::Spontaneous(_) => StimKind::Spontaneous,
        }
    }

    pub fn recording(&self) -> &Recording {
        match self {
            Experiment::PhotostimRandom(p) | Experiment::PhotostimSimilar(p) => &p.recording,
            Experiment::WhiskerStim(w) => &w.recording,
            Experiment::Spontaneous(r) => r,
        }
    }

    pub fn photostim(&self) -> Option<&Photostim> {
        match self {
            Experiment::PhotostimRandom(p) | Experiment::PhotostimSimilar(p) => Some(p),
            _ => None,
        }
    }

    pub fn targeted_cells(&self) -> Option<&[bool]> {
        self.photostim().map(|p| p.targeted_cells.as_slice())
    }

    /// `sheet_name` and stimulus code, e.g. `"2020-03-03_t-001_pr"`.
    pub fn title(&self) -> String {
        format!("{}_{}", self.recording().sheet_name, self.kind().code())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let rec = self.recording();
        rec.cells.validate(path)?;
        let n_cells = rec.cells.len();
        let flags: Vec<(&str, usize)> = match self {
            Experiment::PhotostimRandom(p) | Experiment::PhotostimSimilar(p) => vec![
                ("targeted_cells", p.targeted_cells.len()),
                ("cell_s2", p.cell_s2.len()),
            ],
            Experiment::WhiskerStim(w) => vec![("sta_sig", w.sta_sig.len())],
            Experiment::Spontaneous(_) => vec![],
        };
        for (name, len) in flags {
            if len != 0 && len != n_cells {
                return Err(AnalysisError::malformed(
                    path,
                    format!(
                        "{} {} has {} entries for {} cells",
                        self.kind().code(),
                        name,
                        len,
                        n_cells
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub name: String,
    /// Suite2p `save_path0` for this session.
    pub s2p_path: PathBuf,
    pub experiments: Vec<Experiment>,
    #[serde(skip)]
    source: PathBuf,
}

impl Session {
    /// Load and validate a session record. Both photostim experiments are required.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AnalysisError::MissingFile(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let mut session: Session = serde_json::from_str(&text)
            .map_err(|e| AnalysisError::malformed(path, e.to_string()))?;
        session.source = path.to_path_buf();
        if session.name.is_empty() {
            session.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        for exp in &session.experiments {
            exp.validate(path)?;
        }
        session.photostim(StimKind::PhotostimRandom)?;
        session.photostim(StimKind::PhotostimSimilar)?;
        log::debug!(
            "Loaded session {} with {} experiment(s)",
            session.name,
            session.experiments.len()
        );
        Ok(session)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn get(&self, kind: StimKind) -> Option<&Experiment> {
        self.experiments.iter().find(|e| e.kind() == kind)
    }

    pub fn require(&self, kind: StimKind) -> Result<&Experiment> {
        self.get(kind).ok_or_else(|| {
            AnalysisError::malformed(&self.source, format!("missing {} experiment", kind.label()))
        })
    }

    pub fn photostim(&self, kind: StimKind) -> Result<&Photostim> {
        self.require(kind)?.photostim().ok_or_else(|| {
            AnalysisError::malformed(&self.source, format!("{} is not a photostim experiment", kind.label()))
        })
    }

    pub fn whisker(&self) -> Option<&WhiskerStim> {
        match self.get(StimKind::WhiskerStim) {
            Some(Experiment::WhiskerStim(w)) if w.recording.n_frames > 0 => Some(w),
            _ => None,
        }
    }

    /// Experiments with frames, in pr, ps, whisker, spontaneous order.
    pub fn recorded(&self) -> Vec<&Experiment> {
        StimKind::ALL
            .into_iter()
            .filter_map(|k| self.get(k))
            .filter(|e| e.recording().n_frames > 0)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn recording_json(tiff: &str) -> serde_json::Value {
        serde_json::json!({
            "sheet_name": "2020-01-01_t-001",
            "tiff_path": tiff,
            "frame_x": 4,
            "frame_y": 3,
            "n_frames": 10,
            "fps": 2.0,
            "pre_frames": 2,
            "stim_dur": 4.0,
            "stim_start_frames": [2, 5, 8],
            "cells": {
                "cell_id": [3, 7],
                "cell_med": [[1.0, 1.0], [2.0, 3.0]],
                "cell_x": [[0, 1], [3]],
                "cell_y": [[1, 1], [2]],
                "raw": [vec![1.0; 10], vec![2.0; 10]]
            }
        })
    }

    pub(crate) fn session_json() -> serde_json::Value {
        let mut pr = recording_json("/data/pr_tiffs");
        pr["kind"] = "photostim_random".into();
        pr["targeted_cells"] = serde_json::json!([true, false]);
        let mut ps = recording_json("/data/ps_tiffs");
        ps["kind"] = "photostim_similar".into();
        ps["target_coords"] = serde_json::json!([[1.0, 1.0]]);
        ps["target_radius"] = 1.0.into();
        serde_json::json!({
            "name": "session_a",
            "s2p_path": "/data/suite2p",
            "experiments": [pr, ps]
        })
    }

    fn write_session(value: &serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", value).unwrap();
        file
    }

    #[test]
    fn load_session_and_dispatch_by_kind() {
        let file = write_session(&session_json());
        let session = Session::load(file.path()).unwrap();
        assert_eq!(session.name, "session_a");
        let pr = session.require(StimKind::PhotostimRandom).unwrap();
        assert_eq!(pr.kind().code(), "pr");
        assert_eq!(pr.recording().window_len(), 2 * 2 + 2);
        assert_eq!(pr.targeted_cells(), Some(&[true, false][..]));
        assert!(session.whisker().is_none());
        assert_eq!(session.recorded().len(), 2);
    }

    #[test]
    fn missing_photostim_is_malformed() {
        let mut value = session_json();
        value["experiments"].as_array_mut().unwrap().remove(1);
        let file = write_session(&value);
        let err = Session::load(file.path()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedRecord { .. }));
    }

    #[test]
    fn missing_field_is_malformed() {
        let mut value = session_json();
        value["experiments"][0]
            .as_object_mut()
            .unwrap()
            .remove("n_frames");
        let file = write_session(&value);
        let err = Session::load(file.path()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedRecord { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Session::load(Path::new("/nonexistent/session.json")).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingFile(_)));
    }

    #[test]
    fn target_areas_fall_back_to_circles() {
        let file = write_session(&session_json());
        let session = Session::load(file.path()).unwrap();
        let ps = session.photostim(StimKind::PhotostimSimilar).unwrap();
        let areas = ps.target_areas();
        assert_eq!(areas.len(), 1);
        // radius 1 disc: centre plus 4 neighbours
        assert_eq!(areas[0].len(), 5);
        assert!(areas[0].contains(&[1, 1]));
        assert!(areas[0].contains(&[0, 1]));
    }

    #[test]
    fn time_axis_is_zero_at_onset() {
        let rec: Recording = serde_json::from_value(recording_json("/x")).unwrap();
        let t = rec.time_axis();
        assert_eq!(t.len(), 6);
        assert_eq!(t[2], 0.0);
        assert_eq!(t[0], -1.0);
    }
}
