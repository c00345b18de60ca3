//! Per-session comparison hyperstack: Suite2p masks for each cell class next to
//! STA average images and SLM target areas, for side-by-side inspection in
//! ImageJ.

use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, Result};
use crate::roi;
use crate::session::{Photostim, Recording, Session, StimKind};
use crate::suite2p::Suite2p;
use crate::tiff_stack;

/// File-name fragment marking an STA average image.
pub const STA_IMAGE_TAG: &str = "AvgImage";

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub image: Array2<u16>,
}

#[derive(Debug, Clone)]
pub struct MaskStack {
    pub channels: Vec<Channel>,
    /// (y, x) microns per pixel.
    pub pixel_size: (f64, f64),
}

fn flagged_ids(ids: &[usize], flags: &[bool]) -> Vec<usize> {
    ids.iter()
        .zip(flags)
        .filter(|(_, &f)| f)
        .map(|(&id, _)| id)
        .collect()
}

/// The `AvgImage` file written for `rec` into `stam_dir`, if any.
pub fn find_sta_image(stam_dir: &Path, rec: &Recording) -> Result<Option<PathBuf>> {
    tiff_stack::find_derived(stam_dir, &[STA_IMAGE_TAG, rec.tiff_name().as_str()])
}

/// The `AvgImage` written for `rec` into `stam_dir`, cast to u16.
pub fn sta_image(stam_dir: &Path, rec: &Recording) -> Result<Array2<u16>> {
    let path = find_sta_image(stam_dir, rec)?.ok_or_else(|| {
        AnalysisError::MissingFile(stam_dir.join(format!("*{}*{}*", STA_IMAGE_TAG, rec.tiff_name())))
    })?;
    let image = tiff_stack::read_image(&path)?;
    Ok(image.mapv(|v| v as u16))
}

fn target_channel(name: &str, shape: (usize, usize), p: &Photostim) -> Result<Channel> {
    Ok(Channel {
        name: name.to_string(),
        image: roi::target_image(shape, &p.target_areas())?,
    })
}

impl MaskStack {
    /// Mean image, ROI masks (all ROIs, curated, s2, pr targets, ps targets,
    /// whisker-significant), STA images (whisker, pr, ps) and target areas
    /// (pr, ps). Whisker channels appear only when the session has whisker data.
    pub fn build(session: &Session, s2p: &Suite2p, stam_dir: &Path) -> Result<Self> {
        let pr = session.photostim(StimKind::PhotostimRandom)?;
        let ps = session.photostim(StimKind::PhotostimSimilar)?;
        let whisker = session.whisker();

        let shape = (pr.recording.frame_y, pr.recording.frame_x);
        if s2p.shape() != shape {
            return Err(AnalysisError::shape(
                format!("Suite2p frame of {}", session.name),
                format!("{:?}", shape),
                format!("{:?}", s2p.shape()),
            ));
        }

        let pr_ids = &pr.recording.cells.cell_id;
        let ps_ids = &ps.recording.cells.cell_id;
        let mut masks: Vec<(&str, Vec<usize>)> = vec![
            ("all_rois", (1..s2p.rois().len()).collect()),
            ("all_cells", pr_ids.clone()),
            ("s2_cells", flagged_ids(pr_ids, &pr.cell_s2)),
            ("pr_targeted", flagged_ids(pr_ids, &pr.targeted_cells)),
            ("ps_targeted", flagged_ids(ps_ids, &ps.targeted_cells)),
        ];
        if let Some(w) = whisker {
            masks.push(("w_sta_sig", flagged_ids(&w.recording.cells.cell_id, &w.sta_sig)));
        }

        let mut channels = vec![Channel {
            name: "mean_image".to_string(),
            image: s2p.mean_image()?,
        }];
        for (name, ids) in masks {
            log::debug!("{}: {} mask(s) in {}", session.name, ids.len(), name);
            channels.push(Channel {
                name: name.to_string(),
                image: s2p.masks(ids)?,
            });
        }

        let mut sta_sources = Vec::new();
        if let Some(w) = whisker {
            sta_sources.push(("w_sta", &w.recording));
        }
        sta_sources.push(("pr_sta", &pr.recording));
        sta_sources.push(("ps_sta", &ps.recording));
        for (name, rec) in sta_sources {
            channels.push(Channel {
                name: name.to_string(),
                image: sta_image(stam_dir, rec)?,
            });
        }

        channels.push(target_channel("pr_targets", shape, pr)?);
        channels.push(target_channel("ps_targets", shape, ps)?);

        Ok(Self {
            channels,
            pixel_size: (pr.recording.pix_sz_y, pr.recording.pix_sz_x),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Channels stacked as (c, y, x).
    pub fn to_array(&self) -> Result<Array3<u16>> {
        let views: Vec<_> = self.channels.iter().map(|c| c.image.view()).collect();
        ndarray::stack(Axis(0), &views).map_err(|e| {
            let shapes: Vec<_> = self.channels.iter().map(|c| (c.name.as_str(), c.image.dim())).collect();
            AnalysisError::shape("mask stack channels", "equal frame shapes", format!("{:?} ({})", shapes, e))
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        tiff_stack::write_imagej_channels(path, &self.to_array()?, self.pixel_size)
    }
}

/// `<out_dir>/<session name>_s2p_masks.tif`
pub fn output_path(out_dir: &Path, session: &Session) -> PathBuf {
    out_dir.join(format!("{}_s2p_masks.tif", session.name))
}
