//! Multi-page TIFF stacks: discovery, frame-range reads and writers for the
//! layouts downstream viewers expect.

use ndarray::{s, Array2, Array3};
use regex::Regex;
use std::fs;
use std::io::BufReader;
use std::io::BufWriter;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::{ResolutionUnit, Tag};

use crate::error::{AnalysisError, Result};
use crate::sta::FrameSource;

const TIFF_RE: &str = r"(?i)\.tiff?$";
const RESOLUTION_DENOMINATOR: u32 = 10_000;

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(AnalysisError::MissingFile(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| {
            let e = e.ok()?;
            if e.file_type().ok()?.is_file() {
                Some(e.path())
            } else {
                None
            }
        })
        .collect();
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First `.tif`/`.tiff` file (by name) inside `dir`.
pub fn find_tiff(dir: &Path) -> Result<PathBuf> {
    let re = Regex::new(TIFF_RE).map_err(|e| AnalysisError::malformed(dir, e.to_string()))?;
    sorted_entries(dir)?
        .into_iter()
        .find(|p| re.is_match(&file_name(p)))
        .ok_or_else(|| AnalysisError::MissingFile(dir.join("*.tif")))
}

/// First file in `dir` whose name contains every fragment in `needles`.
pub fn find_derived(dir: &Path, needles: &[&str]) -> Result<Option<PathBuf>> {
    Ok(sorted_entries(dir)?.into_iter().find(|p| {
        let name = file_name(p);
        needles.iter().all(|n| name.contains(n))
    }))
}

fn decoding_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    let data = match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => return Err(AnalysisError::UnsupportedPixels("need 8/16/32-bit integer or float".into())),
    };
    Ok(data)
}

/// Open handle on a multi-page TIFF, one 2D frame per page.
pub struct TiffStack {
    path: PathBuf,
    decoder: Decoder<BufReader<fs::File>>,
    width: usize,
    height: usize,
    n_frames: usize,
}

impl TiffStack {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AnalysisError::MissingFile(path.to_path_buf()));
        }
        let file = fs::File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let (width, height) = decoder.dimensions()?;
        let mut n_frames = 1;
        while decoder.more_images() {
            decoder.next_image()?;
            n_frames += 1;
        }
        decoder.seek_to_image(0)?;
        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            width: width as usize,
            height: height as usize,
            n_frames,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_current(&mut self, index: usize) -> Result<Vec<f32>> {
        let (w, h) = self.decoder.dimensions()?;
        if (w as usize, h as usize) != (self.width, self.height) {
            return Err(AnalysisError::shape(
                format!("frame {} of {}", index, self.path.display()),
                format!("{}x{}", self.width, self.height),
                format!("{}x{}", w, h),
            ));
        }
        decoding_to_f32(self.decoder.read_image()?)
    }
}

impl FrameSource for TiffStack {
    fn frame_count(&self) -> usize {
        self.n_frames
    }

    fn frame_shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn read_frames(&mut self, range: Range<usize>) -> Result<Array3<f32>> {
        if range.end > self.n_frames || range.start > range.end {
            return Err(AnalysisError::shape(
                format!("frame range of {}", self.path.display()),
                format!("within 0..{}", self.n_frames),
                format!("{:?}", range),
            ));
        }
        let mut out = Array3::<f32>::zeros((range.len(), self.height, self.width));
        if range.is_empty() {
            return Ok(out);
        }
        self.decoder.seek_to_image(range.start)?;
        for (i, index) in range.clone().enumerate() {
            if i > 0 {
                self.decoder.next_image()?;
            }
            let data = self.read_current(index)?;
            let frame = Array2::from_shape_vec((self.height, self.width), data)
                .map_err(|e| AnalysisError::shape("decoded frame", "height x width", e))?;
            out.slice_mut(s![i, .., ..]).assign(&frame);
        }
        Ok(out)
    }
}

/// Every page of `path` as (frame, y, x).
pub fn read_stack(path: &Path) -> Result<Array3<f32>> {
    let mut stack = TiffStack::open(path)?;
    let n = stack.frame_count();
    stack.read_frames(0..n)
}

/// First page of `path`.
pub fn read_image(path: &Path) -> Result<Array2<f32>> {
    let mut stack = TiffStack::open(path)?;
    let frames = stack.read_frames(0..1)?;
    Ok(frames.index_axis_move(ndarray::Axis(0), 0))
}

fn create_encoder(path: &Path) -> Result<TiffEncoder<BufWriter<fs::File>>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    Ok(TiffEncoder::new(BufWriter::new(file))?)
}

/// 32-bit float stack, one page per frame.
pub fn write_stack_f32(path: &Path, stack: &Array3<f32>) -> Result<()> {
    let (n, h, w) = stack.dim();
    let mut encoder = create_encoder(path)?;
    for t in 0..n {
        let data: Vec<f32> = stack.slice(s![t, .., ..]).iter().copied().collect();
        encoder.write_image::<colortype::Gray32Float>(w as u32, h as u32, &data)?;
    }
    Ok(())
}

/// Single signed 16-bit image; values saturate at the i16 range.
pub fn write_image_i16(path: &Path, image: &Array2<f64>) -> Result<()> {
    let (h, w) = image.dim();
    let data: Vec<i16> = image.iter().map(|&v| v as i16).collect();
    let mut encoder = create_encoder(path)?;
    encoder.write_image::<colortype::GrayI16>(w as u32, h as u32, &data)?;
    Ok(())
}

fn to_rational(pixels_per_unit: f64) -> Rational {
    Rational {
        n: (pixels_per_unit * RESOLUTION_DENOMINATOR as f64).round().max(1.0) as u32,
        d: RESOLUTION_DENOMINATOR,
    }
}

fn imagej_description(channels: usize) -> String {
    format!(
        "ImageJ=1.11a\nimages={c}\nchannels={c}\nhyperstack=true\nmode=grayscale\nunit=micron\n",
        c = channels
    )
}

/// u16 hyperstack in ImageJ's TZCYXS order with T = Z = S = 1 and one
/// channel per input image. `pixel_size` is (y, x) in microns.
pub fn write_imagej_channels(path: &Path, stack: &Array3<u16>, pixel_size: (f64, f64)) -> Result<()> {
    let (c, h, w) = stack.dim();
    let (pix_y, pix_x) = pixel_size;
    if pix_y <= 0.0 || pix_x <= 0.0 {
        return Err(AnalysisError::shape("pixel size", "positive", format!("{:?}", pixel_size)));
    }
    let description = imagej_description(c);
    let mut encoder = create_encoder(path)?;
    for i in 0..c {
        let data: Vec<u16> = stack.slice(s![i, .., ..]).iter().copied().collect();
        let mut image = encoder.new_image::<colortype::Gray16>(w as u32, h as u32)?;
        image.resolution_unit(ResolutionUnit::None);
        image.x_resolution(to_rational(1.0 / pix_x));
        image.y_resolution(to_rational(1.0 / pix_y));
        if i == 0 {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, description.as_str())?;
        }
        image.write_data(&data)?;
    }
    log::debug!("Wrote {} channel hyperstack to {}", c, path.display());
    Ok(())
}
