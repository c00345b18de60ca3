//! Response frequency over a (cell x trial) response classification.

use ndarray::{Array1, Array2, Axis};
use std::path::Path;

use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone)]
pub struct ResponseMatrix {
    responses: Array2<bool>,
}

/// Percentages over the selected cells only.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrequency {
    /// % of selected cells responding, per trial.
    pub per_trial: Array1<f64>,
    /// % of trials responded on, per selected cell.
    pub per_cell: Array1<f64>,
}

impl ResponseMatrix {
    pub fn new(responses: Array2<bool>) -> Self {
        Self { responses }
    }

    pub fn n_cells(&self) -> usize {
        self.responses.nrows()
    }

    pub fn n_trials(&self) -> usize {
        self.responses.ncols()
    }

    fn check_mask(&self, selected: &[bool]) -> Result<()> {
        if selected.len() != self.n_cells() {
            return Err(AnalysisError::shape(
                "response cell mask",
                self.n_cells(),
                selected.len(),
            ));
        }
        Ok(())
    }

    /// Rows of the selected cells, in order.
    pub fn select(&self, selected: &[bool]) -> Result<Array2<bool>> {
        self.check_mask(selected)?;
        let rows: Vec<usize> = crate::select::where_true(selected);
        Ok(self.responses.select(Axis(0), &rows))
    }

    pub fn frequency(&self, selected: &[bool]) -> Result<ResponseFrequency> {
        let sub = self.select(selected)?;
        let (n_cells, n_trials) = sub.dim();
        if n_cells == 0 || n_trials == 0 {
            return Err(AnalysisError::EmptySelection);
        }
        let counts = sub.mapv(|b| if b { 1.0 } else { 0.0 });
        let per_trial = counts.sum_axis(Axis(0)) / n_cells as f64 * 100.0;
        let per_cell = counts.sum_axis(Axis(1)) / n_trials as f64 * 100.0;
        Ok(ResponseFrequency {
            per_trial,
            per_cell,
        })
    }

    /// (trial, selected-row) of every response among the selected cells.
    pub fn raster_points(&self, selected: &[bool]) -> Result<Vec<(usize, usize)>> {
        let sub = self.select(selected)?;
        Ok(sub
            .indexed_iter()
            .filter(|(_, &b)| b)
            .map(|((row, trial), _)| (trial, row))
            .collect())
    }
}

/// Selected-row positions of the flagged cells, e.g. photostim targets.
pub fn selected_rows(selected: &[bool], flags: &[bool]) -> Result<Vec<usize>> {
    if flags.len() != selected.len() {
        return Err(AnalysisError::shape("target flags", selected.len(), flags.len()));
    }
    Ok(selected
        .iter()
        .zip(flags)
        .filter(|(&s, _)| s)
        .enumerate()
        .filter(|(_, (_, &f))| f)
        .map(|(row, _)| row)
        .collect())
}

/// Write `kind,index,percent` rows for both reductions.
pub fn write_csv(path: &Path, freq: &ResponseFrequency) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["kind", "index", "percent"])?;
    for (kind, values) in [("trial", &freq.per_trial), ("cell", &freq.per_cell)] {
        for (i, v) in values.iter().enumerate() {
            let index = i.to_string();
            let percent = format!("{:.3}", v);
            wtr.write_record([kind, index.as_str(), percent.as_str()])?;
        }
    }
    wtr.flush()?;
    Ok(())
}
