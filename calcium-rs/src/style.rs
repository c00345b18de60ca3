//! Rendering configuration handed to every figure.

use plotters::style::RGBColor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{AnalysisError, Result};
use crate::session::StimKind;

/// matplotlib "tab10" cycle.
const SERIES: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureFormat {
    Png,
    Svg,
}

impl FigureFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FigureFormat::Png => "png",
            FigureFormat::Svg => "svg",
        }
    }
}

/// matplotlib viridis at eighth steps.
const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [70, 50, 126],
    [54, 92, 141],
    [39, 127, 142],
    [31, 161, 135],
    [74, 193, 109],
    [160, 218, 57],
    [208, 225, 28],
    [253, 231, 37],
];

/// Lookup table for image patches in postage-stamp montages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    Grayscale,
    Hot,
    #[default]
    Viridis,
}

impl Colormap {
    /// RGB for `v` in [0, 1]; values outside are clamped.
    pub fn rgb(self, v: f64) -> [u8; 3] {
        let v = v.clamp(0.0, 1.0);
        match self {
            Colormap::Grayscale => {
                let u = (v * 255.0).round() as u8;
                [u, u, u]
            }
            Colormap::Hot => {
                if v < 1.0 / 3.0 {
                    [(v * 3.0 * 255.0).round() as u8, 0, 0]
                } else if v < 2.0 / 3.0 {
                    [255, ((v - 1.0 / 3.0) * 3.0 * 255.0).round() as u8, 0]
                } else {
                    [255, 255, ((v - 2.0 / 3.0) * 3.0 * 255.0).round() as u8]
                }
            }
            Colormap::Viridis => {
                let pos = v * (VIRIDIS.len() - 1) as f64;
                let i = (pos.floor() as usize).min(VIRIDIS.len() - 2);
                let f = pos - i as f64;
                let (a, b) = (VIRIDIS[i], VIRIDIS[i + 1]);
                let mix = |k: usize| (f64::from(a[k]) + (f64::from(b[k]) - f64::from(a[k])) * f).round() as u8;
                [mix(0), mix(1), mix(2)]
            }
        }
    }
}

/// Colour per stimulus type, as RGB triples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StimPalette {
    pub pr: [u8; 3],
    pub ps: [u8; 3],
    pub w: [u8; 3],
    pub none: [u8; 3],
}

impl Default for StimPalette {
    fn default() -> Self {
        Self {
            pr: SERIES[0],
            ps: SERIES[1],
            w: SERIES[3],
            none: SERIES[2],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotStyle {
    pub font_family: String,
    pub title_size: u32,
    pub label_size: u32,
    pub tick_size: u32,
    pub legend_size: u32,
    pub line_width: u32,
    pub marker_size: u32,
    pub formats: Vec<FigureFormat>,
    pub palette: StimPalette,
    pub stamp_colormap: Colormap,
    /// Magnification of each 40x40 stamp.
    pub stamp_scale: u32,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".to_string(),
            title_size: 24,
            label_size: 22,
            tick_size: 18,
            legend_size: 18,
            line_width: 2,
            marker_size: 3,
            formats: vec![FigureFormat::Png, FigureFormat::Svg],
            palette: StimPalette::default(),
            stamp_colormap: Colormap::default(),
            stamp_scale: 3,
        }
    }
}

impl PlotStyle {
    /// Read a JSON style file; omitted fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AnalysisError::MissingFile(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| AnalysisError::malformed(path, e.to_string()))
    }

    pub fn stim_colour(&self, kind: StimKind) -> RGBColor {
        let [r, g, b] = match kind {
            StimKind::PhotostimRandom => self.palette.pr,
            StimKind::PhotostimSimilar => self.palette.ps,
            StimKind::WhiskerStim => self.palette.w,
            StimKind::Spontaneous => self.palette.none,
        };
        RGBColor(r, g, b)
    }

    pub fn series_colour(&self, index: usize) -> RGBColor {
        let [r, g, b] = SERIES[index % SERIES.len()];
        RGBColor(r, g, b)
    }
}
