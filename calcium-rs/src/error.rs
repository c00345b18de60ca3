use std::path::PathBuf;
use thiserror::Error;

/// Failure classes shared by every analysis routine.
///
/// `MissingFile`, `MalformedRecord`, `ShapeMismatch` and `ZeroBaseline` are the
/// domain failures; the remaining variants wrap the libraries the crate sits on.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("File or directory not found: {0:?}")]
    MissingFile(PathBuf),
    #[error("Malformed record {path:?}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },
    #[error("Shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },
    #[error("dF/F baseline is zero at {count} sample(s)")]
    ZeroBaseline { count: usize },
    #[error("No trial window fits inside the recording")]
    NoValidTrials,
    #[error("Cell selection is empty")]
    EmptySelection,
    #[error("Invalid selection {0:?}")]
    InvalidSelection(String),
    #[error("Unsupported TIFF pixel format: {0}")]
    UnsupportedPixels(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to read npy array: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),
    #[error("Failed to write npy array: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Plotting failed: {0}")]
    Plot(String),
}

impl AnalysisError {
    pub(crate) fn shape(
        context: impl Into<String>,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
