//! Suite2p outputs for one session (`save_path0`).
//!
//! `iscell.npy` is read as-is. `ops` and `stat` are pickled object arrays in a
//! stock Suite2p run, so they are expected as `ops.json` / `stat.json`
//! sidecars exported next to them.

use ndarray::{s, Array2};
use ndarray_npy::{read_npy, write_npy};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, Result};
use crate::roi::{self, Roi};

pub const OPS_FILE: &str = "ops.json";
pub const STAT_FILE: &str = "stat.json";
pub const ISCELL_FILE: &str = "iscell.npy";
pub const ISCELL_BACKUP_FILE: &str = "iscell_backup.npy";

#[derive(Debug, Clone, Deserialize)]
pub struct Ops {
    #[serde(rename = "meanImg")]
    pub mean_img: Vec<Vec<f64>>,
    #[serde(rename = "Ly")]
    pub ly: usize,
    #[serde(rename = "Lx")]
    pub lx: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct StatEntry {
    ypix: Vec<usize>,
    xpix: Vec<usize>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(AnalysisError::MissingFile(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| AnalysisError::malformed(path, e.to_string()))
}

/// Load an `iscell` array (n_rois x 2: flag, probability).
pub fn read_iscell(path: &Path) -> Result<Array2<f64>> {
    if !path.exists() {
        return Err(AnalysisError::MissingFile(path.to_path_buf()));
    }
    let iscell: Array2<f64> = read_npy(path)?;
    if iscell.ncols() == 0 {
        return Err(AnalysisError::shape(
            format!("{}", path.display()),
            "at least one column",
            "0 columns",
        ));
    }
    Ok(iscell)
}

fn flagged(iscell: &Array2<f64>) -> BTreeSet<usize> {
    iscell
        .column(0)
        .iter()
        .enumerate()
        .filter(|(_, &v)| v != 0.0)
        .map(|(i, _)| i)
        .collect()
}

pub struct Suite2p {
    dir: PathBuf,
    ops: Ops,
    rois: Vec<Roi>,
    iscell: Array2<f64>,
}

impl Suite2p {
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(AnalysisError::MissingFile(dir.to_path_buf()));
        }
        let ops: Ops = read_json(&dir.join(OPS_FILE))?;
        let stat: Vec<StatEntry> = read_json(&dir.join(STAT_FILE))?;
        let iscell = read_iscell(&dir.join(ISCELL_FILE))?;
        let rois = stat
            .into_iter()
            .map(|e| Roi {
                ypix: e.ypix,
                xpix: e.xpix,
            })
            .collect::<Vec<_>>();
        for (i, r) in rois.iter().enumerate() {
            if r.ypix.len() != r.xpix.len() {
                return Err(AnalysisError::malformed(
                    dir.join(STAT_FILE),
                    format!("ROI {} has {} ypix and {} xpix", i, r.ypix.len(), r.xpix.len()),
                ));
            }
        }
        log::debug!(
            "Suite2p {}: {}x{} frame, {} ROIs",
            dir.display(),
            ops.ly,
            ops.lx,
            rois.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            ops,
            rois,
            iscell,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// (Ly, Lx)
    pub fn shape(&self) -> (usize, usize) {
        (self.ops.ly, self.ops.lx)
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    /// Indices flagged as cells in `iscell`.
    pub fn curated_cells(&self) -> BTreeSet<usize> {
        flagged(&self.iscell)
    }

    /// Mean image cast to u16 (saturating).
    pub fn mean_image(&self) -> Result<Array2<u16>> {
        let (ly, lx) = self.shape();
        let rows = &self.ops.mean_img;
        if rows.len() != ly || rows.iter().any(|r| r.len() != lx) {
            return Err(AnalysisError::shape(
                "ops meanImg",
                format!("{}x{}", ly, lx),
                format!("{} rows", rows.len()),
            ));
        }
        Ok(Array2::from_shape_fn((ly, lx), |(y, x)| rows[y][x] as u16))
    }

    /// ROI label image restricted to `cell_ids` among the ROIs listed in `iscell`.
    pub fn masks(&self, cell_ids: impl IntoIterator<Item = usize>) -> Result<Array2<u16>> {
        let n = self.iscell.nrows().min(self.rois.len());
        roi::label_image(self.shape(), &self.rois[..n], cell_ids)
    }
}

#[derive(Debug, Clone)]
pub struct CombineSummary {
    pub before: usize,
    pub after: usize,
    pub backup: PathBuf,
}

/// Mark every cell flagged in `extra` as a cell in `s2p_dir/iscell.npy`.
///
/// The current file is copied to `iscell_backup.npy` first; the new array is
/// written to a sibling temp file and renamed over the original.
pub fn combine_iscell(s2p_dir: &Path, extra: &Path) -> Result<CombineSummary> {
    let iscell_path = s2p_dir.join(ISCELL_FILE);
    let mut iscell = read_iscell(&iscell_path)?;
    let extra_cells = flagged(&read_iscell(extra)?);

    let before = flagged(&iscell);
    if let Some(&max) = extra_cells.iter().next_back() {
        if max >= iscell.nrows() {
            return Err(AnalysisError::shape(
                format!("{}", extra.display()),
                format!("cell indices < {}", iscell.nrows()),
                max,
            ));
        }
    }

    let backup = s2p_dir.join(ISCELL_BACKUP_FILE);
    fs::copy(&iscell_path, &backup)?;

    let mut flags = iscell.slice_mut(s![.., 0]);
    for &i in before.union(&extra_cells) {
        flags[i] = 1.0;
    }

    let tmp = s2p_dir.join(format!("{}.tmp", ISCELL_FILE));
    write_npy(&tmp, &iscell)?;
    fs::rename(&tmp, &iscell_path)?;

    let after = flagged(&iscell).len();
    log::info!(
        "{}: {} -> {} cells (backup at {})",
        iscell_path.display(),
        before.len(),
        after,
        backup.display()
    );
    Ok(CombineSummary {
        before: before.len(),
        after,
        backup,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::array;

    pub(crate) fn write_suite2p(dir: &Path) {
        let ops = serde_json::json!({
            "meanImg": [[1.0, 2.0, 3.0], [4.0, 5.5, 70000.0]],
            "Ly": 2,
            "Lx": 3
        });
        let stat = serde_json::json!([
            {"ypix": [0], "xpix": [0], "med": [0, 0]},
            {"ypix": [0, 1], "xpix": [1, 1]},
            {"ypix": [1], "xpix": [2]}
        ]);
        fs::write(dir.join(OPS_FILE), ops.to_string()).unwrap();
        fs::write(dir.join(STAT_FILE), stat.to_string()).unwrap();
        let iscell: Array2<f64> = array![[1.0, 0.9], [0.0, 0.2], [1.0, 0.8]];
        write_npy(dir.join(ISCELL_FILE), &iscell).unwrap();
    }

    #[test]
    fn load_mean_image_and_masks() {
        let dir = tempfile::tempdir().unwrap();
        write_suite2p(dir.path());
        let s2p = Suite2p::load(dir.path()).unwrap();
        assert_eq!(s2p.shape(), (2, 3));
        assert_eq!(s2p.curated_cells().into_iter().collect::<Vec<_>>(), vec![0, 2]);

        let mean = s2p.mean_image().unwrap();
        assert_eq!(mean[[1, 1]], 5);
        assert_eq!(mean[[1, 2]], u16::MAX);

        let masks = s2p.masks([1, 2]).unwrap();
        assert_eq!(masks, array![[0u16, 1, 0], [0, 1, 2]]);
    }

    #[test]
    fn missing_sidecar_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_suite2p(dir.path());
        fs::remove_file(dir.path().join(STAT_FILE)).unwrap();
        assert!(matches!(
            Suite2p::load(dir.path()),
            Err(AnalysisError::MissingFile(_))
        ));
    }

    #[test]
    fn combine_backs_up_then_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        write_suite2p(dir.path());
        let extra_path = dir.path().join("extra_iscell.npy");
        let extra: Array2<f64> = array![[0.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        write_npy(&extra_path, &extra).unwrap();

        let summary = combine_iscell(dir.path(), &extra_path).unwrap();
        assert_eq!(summary.before, 2);
        assert_eq!(summary.after, 3);

        let backup = read_iscell(&summary.backup).unwrap();
        assert_eq!(backup.column(0).to_vec(), vec![1.0, 0.0, 1.0]);
        let combined = read_iscell(&dir.path().join(ISCELL_FILE)).unwrap();
        assert_eq!(combined.column(0).to_vec(), vec![1.0, 1.0, 1.0]);
        // probabilities are untouched
        assert_eq!(combined.column(1).to_vec(), vec![0.9, 0.2, 0.8]);
        assert!(!dir.path().join("iscell.npy.tmp").exists());
    }

    #[test]
    fn combine_rejects_out_of_range_cells_before_touching_files() {
        let dir = tempfile::tempdir().unwrap();
        write_suite2p(dir.path());
        let extra_path = dir.path().join("extra_iscell.npy");
        let extra: Array2<f64> = array![[0.0, 0.0], [0.0, 0.0], [0.0, 0.0], [1.0, 1.0]];
        write_npy(&extra_path, &extra).unwrap();

        assert!(matches!(
            combine_iscell(dir.path(), &extra_path),
            Err(AnalysisError::ShapeMismatch { .. })
        ));
        assert!(!dir.path().join(ISCELL_BACKUP_FILE).exists());
    }
}
