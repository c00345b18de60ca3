//! Analysis and visual-QA helpers for two-photon calcium imaging sessions:
//! stimulus-triggered averages, Suite2p mask stacks, response statistics and
//! figures.

pub mod error;
pub mod fluorescence;
pub mod mask_stack;
pub mod plot;
pub mod response;
pub mod roi;
pub mod select;
pub mod session;
pub mod slices;
pub mod sta;
pub mod stamps;
pub mod style;
pub mod suite2p;
pub mod tiff_stack;

pub use error::{AnalysisError, Result};
