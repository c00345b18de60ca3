use ndarray::ArrayView2;

use crate::error::{AnalysisError, Result};
use crate::sta::sta_amplitudes;

/// The `n` candidates with the highest values, highest first.
///
/// `values[i]` belongs to `candidates[i]`. Values are stable-sorted
/// ascending (NaN lowest) and the last `n` are taken, so among equal values
/// the later candidate ranks higher. Fewer than `n` candidates yields all of
/// them.
pub fn top_n(values: &[f64], candidates: &[usize], n: usize) -> Result<Vec<usize>> {
    if values.len() != candidates.len() {
        return Err(AnalysisError::shape(
            "top-N selection",
            format!("{} values", candidates.len()),
            values.len(),
        ));
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| nan_low(values[a]).total_cmp(&nan_low(values[b])));
    Ok(order
        .iter()
        .rev()
        .take(n)
        .map(|&i| candidates[i])
        .collect())
}

fn nan_low(v: f64) -> f64 {
    if v.is_nan() {
        f64::NEG_INFINITY
    } else {
        v
    }
}

/// The `n` rows among `rows` with the largest post-stimulus STA amplitude.
pub fn top_responders(stas: ArrayView2<f64>, pre_frames: usize, rows: &[usize], n: usize) -> Result<Vec<usize>> {
    let amplitudes = sta_amplitudes(stas, pre_frames);
    let values = rows
        .iter()
        .map(|&r| {
            amplitudes
                .get(r)
                .copied()
                .ok_or_else(|| AnalysisError::shape("STA rows", format!("< {}", amplitudes.len()), r))
        })
        .collect::<Result<Vec<_>>>()?;
    top_n(&values, rows, n)
}

/// Rows of `mask` that are set.
pub fn where_true(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &b)| b.then_some(i))
        .collect()
}
