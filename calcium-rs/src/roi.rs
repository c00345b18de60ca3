//! Label images built from per-cell pixel lists.

use ndarray::Array2;
use std::collections::BTreeSet;

use crate::error::{AnalysisError, Result};

pub const TARGET_VALUE: u16 = 255;

/// Pixel coordinates of one ROI, as parallel y/x lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roi {
    pub ypix: Vec<usize>,
    pub xpix: Vec<usize>,
}

impl Roi {
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.ypix.iter().copied().zip(self.xpix.iter().copied())
    }
}

fn check_pixel(shape: (usize, usize), y: usize, x: usize, what: &str) -> Result<()> {
    if y >= shape.0 || x >= shape.1 {
        return Err(AnalysisError::shape(
            what,
            format!("pixel inside {}x{}", shape.0, shape.1),
            format!("({}, {})", y, x),
        ));
    }
    Ok(())
}

/// Write each selected ROI's index into its pixels; everything else stays 0.
///
/// Cells are written in ascending index order, so where ROIs overlap the
/// highest index wins. Selected indices without an ROI are ignored; indices
/// that do not fit a u16 label are a `ShapeMismatch`.
pub fn label_image(
    shape: (usize, usize),
    rois: &[Roi],
    selected: impl IntoIterator<Item = usize>,
) -> Result<Array2<u16>> {
    let selected: BTreeSet<usize> = selected.into_iter().filter(|&n| n < rois.len()).collect();
    let mut image = Array2::<u16>::zeros(shape);
    for n in selected {
        let label = u16::try_from(n)
            .map_err(|_| AnalysisError::shape(format!("label of ROI {}", n), format!("<= {}", u16::MAX), n))?;
        for (y, x) in rois[n].pixels() {
            check_pixel(shape, y, x, &format!("ROI {}", n))?;
            image[[y, x]] = label;
        }
    }
    Ok(image)
}

/// Mark every (y, x) pixel of every target area with [`TARGET_VALUE`].
pub fn target_image(shape: (usize, usize), areas: &[Vec<[usize; 2]>]) -> Result<Array2<u16>> {
    let mut image = Array2::<u16>::zeros(shape);
    for (i, area) in areas.iter().enumerate() {
        for &[y, x] in area {
            check_pixel(shape, y, x, &format!("target area {}", i))?;
            image[[y, x]] = TARGET_VALUE;
        }
    }
    Ok(image)
}

/// Integer (x, y) points within `radius` of (x0, y0), x-major order.
pub fn points_in_circle(radius: f64, x0: i64, y0: i64) -> Vec<(i64, i64)> {
    let r = radius.max(0.0).ceil() as i64;
    let r2 = radius * radius;
    let mut points = Vec::new();
    for x in (x0 - r - 1)..(x0 + r + 1) {
        for y in (y0 - r - 1)..(y0 + r + 1) {
            let (dx, dy) = ((x - x0) as f64, (y - y0) as f64);
            if dx * dx + dy * dy <= r2 {
                points.push((x, y));
            }
        }
    }
    points
}
