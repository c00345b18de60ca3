//! Postage-stamp montages: per-cell cut-outs of the mean image, the ROI mask
//! and the STA image, one column per cell.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::{Array2, ArrayView2};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::plot;
use crate::roi::Roi;
use crate::style::{Colormap, FigureFormat, PlotStyle};

/// Side of each square cut-out, in source pixels.
pub const STAMP_SIZE: usize = 40;
/// Fixed display range of the STA row (dF/F %).
pub const STA_RANGE: (f64, f64) = (0.0, 25.0);
/// Value written into mask cut-outs.
pub const MASK_VALUE: f64 = 255.0;

const GAP: u32 = 4;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

pub struct Stamp<'a> {
    pub cell_id: usize,
    /// Median pixel as (y, x).
    pub median: [f64; 2],
    pub roi: &'a Roi,
}

impl Stamp<'_> {
    fn centre(&self) -> (usize, usize) {
        (self.median[0].max(0.0) as usize, self.median[1].max(0.0) as usize)
    }
}

fn origin(centre: (usize, usize)) -> (i64, i64) {
    let half = (STAMP_SIZE / 2) as i64;
    (centre.0 as i64 - half, centre.1 as i64 - half)
}

/// `STAMP_SIZE` square around `centre`; pixels beyond the image border are NaN.
pub fn cutout(image: ArrayView2<f64>, centre: (usize, usize)) -> Array2<f64> {
    let (h, w) = image.dim();
    let (y0, x0) = origin(centre);
    Array2::from_shape_fn((STAMP_SIZE, STAMP_SIZE), |(r, c)| {
        let (y, x) = (y0 + r as i64, x0 + c as i64);
        if y >= 0 && x >= 0 && (y as usize) < h && (x as usize) < w {
            image[[y as usize, x as usize]]
        } else {
            f64::NAN
        }
    })
}

/// Binary cut-out of one ROI around `centre`.
pub fn mask_cutout(roi: &Roi, centre: (usize, usize)) -> Array2<f64> {
    let (y0, x0) = origin(centre);
    let mut patch = Array2::<f64>::zeros((STAMP_SIZE, STAMP_SIZE));
    for (y, x) in roi.pixels() {
        let (r, c) = (y as i64 - y0, x as i64 - x0);
        if (0..STAMP_SIZE as i64).contains(&r) && (0..STAMP_SIZE as i64).contains(&c) {
            patch[[r as usize, c as usize]] = MASK_VALUE;
        }
    }
    patch
}

fn finite_range(patch: &Array2<f64>) -> (f64, f64) {
    patch
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Colour a cut-out between `lo` and `hi`; NaN is black.
fn colourise(patch: &Array2<f64>, (lo, hi): (f64, f64), colormap: Colormap) -> RgbImage {
    let span = hi - lo;
    let n = STAMP_SIZE as u32;
    ImageBuffer::from_fn(n, n, |x, y| {
        let v = patch[[y as usize, x as usize]];
        if !v.is_finite() {
            return Rgb([0, 0, 0]);
        }
        let t = if span > 0.0 { (v - lo) / span } else { 0.0 };
        Rgb(colormap.rgb(t))
    })
}

/// Three rows (mean image, ROI mask, STA image) by one column per stamp.
///
/// Mean cut-outs are min-max scaled individually; the STA row uses
/// [`STA_RANGE`] and stays blank when no STA image is given.
pub fn montage(
    mean: ArrayView2<f64>,
    sta: Option<ArrayView2<f64>>,
    stamps: &[Stamp<'_>],
    style: &PlotStyle,
) -> RgbImage {
    let scale = style.stamp_scale.max(1);
    let cell = STAMP_SIZE as u32 * scale;
    let cols = stamps.len().max(1) as u32;
    let width = GAP + cols * (cell + GAP);
    let height = GAP + 3 * (cell + GAP);
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);

    for (col, stamp) in stamps.iter().enumerate() {
        let centre = stamp.centre();
        let mean_patch = cutout(mean, centre);
        let mut rows = vec![
            colourise(&mean_patch, finite_range(&mean_patch), style.stamp_colormap),
            colourise(&mask_cutout(stamp.roi, centre), (0.0, MASK_VALUE), style.stamp_colormap),
        ];
        if let Some(sta) = sta {
            rows.push(colourise(&cutout(sta, centre), STA_RANGE, style.stamp_colormap));
        }
        let x = GAP + col as u32 * (cell + GAP);
        for (row, patch) in rows.iter().enumerate() {
            let scaled = imageops::resize(patch, cell, cell, FilterType::Nearest);
            let y = GAP + row as u32 * (cell + GAP);
            imageops::replace(&mut canvas, &scaled, i64::from(x), i64::from(y));
        }
        log::trace!("Stamp column {} for cell {}", col, stamp.cell_id);
    }
    canvas
}

/// Write a montage to `<stem>.png`. Montages are rasters, so an SVG entry in
/// `style.formats` is logged and skipped.
pub fn save_montage(image: &RgbImage, stem: &Path, style: &PlotStyle) -> Result<PathBuf> {
    if style.formats.contains(&FigureFormat::Svg) {
        log::info!("{}: postage stamps are written as PNG only", stem.display());
    }
    let path = plot::output_path(stem, FigureFormat::Png);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image.save(&path)?;
    log::debug!("Wrote {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutout_near_border_is_padded_with_nan() {
        let image = Array2::from_shape_fn((50, 50), |(y, x)| (y * 50 + x) as f64);
        let patch = cutout(image.view(), (5, 45));
        assert_eq!(patch.dim(), (STAMP_SIZE, STAMP_SIZE));
        assert_eq!(patch[[20, 20]], (5 * 50 + 45) as f64);
        assert!(patch[[0, 0]].is_nan());
        assert!(patch[[20, 39]].is_nan());
        // first in-bounds row is image row 0
        assert_eq!(patch[[15, 0]], 25.0);
    }

    #[test]
    fn mask_cutout_marks_roi_pixels_only() {
        let roi = Roi {
            ypix: vec![20, 20, 0],
            xpix: vec![20, 21, 0],
        };
        let patch = mask_cutout(&roi, (20, 20));
        assert_eq!(patch[[20, 20]], MASK_VALUE);
        assert_eq!(patch[[20, 21]], MASK_VALUE);
        assert_eq!(patch[[0, 0]], MASK_VALUE);
        assert_eq!(patch.iter().filter(|&&v| v > 0.0).count(), 3);
    }

    #[test]
    fn montage_layout() {
        let mean = Array2::from_shape_fn((60, 60), |(y, x)| (y + x) as f64);
        let roi = Roi {
            ypix: vec![30],
            xpix: vec![30],
        };
        let stamps = [
            Stamp { cell_id: 3, median: [30.0, 30.0], roi: &roi },
            Stamp { cell_id: 7, median: [2.0, 58.0], roi: &roi },
        ];
        let style = PlotStyle {
            stamp_scale: 2,
            stamp_colormap: Colormap::Grayscale,
            ..PlotStyle::default()
        };
        let sta = Array2::<f64>::from_elem((60, 60), 30.0);
        let img = montage(mean.view(), Some(sta.view()), &stamps, &style);
        let cell = 80;
        assert_eq!(img.dimensions(), (GAP + 2 * (cell + GAP), GAP + 3 * (cell + GAP)));
        // gap stays background
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        // STA above the display range saturates
        let sta_y = GAP + 2 * (cell + GAP);
        assert_eq!(*img.get_pixel(GAP, sta_y), Rgb([255, 255, 255]));
        // ROI pixel at the centre of the first mask stamp
        let mask_y = GAP + (cell + GAP);
        assert_eq!(*img.get_pixel(GAP + 40, mask_y + 40), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(GAP, mask_y), Rgb([0, 0, 0]));
    }

    #[test]
    fn montages_are_saved_as_png_only() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("figs").join("pr_top_10_cells");
        let image = RgbImage::from_pixel(8, 6, BACKGROUND);
        let style = PlotStyle::default();
        assert!(style.formats.contains(&FigureFormat::Svg));

        let path = save_montage(&image, &stem, &style).unwrap();
        assert_eq!(path, dir.path().join("figs").join("pr_top_10_cells.png"));
        assert_eq!(image::open(&path).unwrap().to_rgb8().dimensions(), (8, 6));
        assert!(!plot::output_path(&stem, FigureFormat::Svg).exists());
    }
}
