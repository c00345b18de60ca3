//! Row selections written like Python slices: "all", "3", "-1", "0:10:2",
//! or comma-separated combinations of those.

use std::collections::BTreeSet;

use crate::error::{AnalysisError, Result};

fn invalid(segment: &str) -> AnalysisError {
    AnalysisError::InvalidSelection(segment.to_string())
}

/// Sorted, de-duplicated row indices below `length` named by `s`.
///
/// Slices clamp to the valid range like `slice.indices`; bare indices
/// (negative counting from the end) must be in range.
pub fn parse_selection(s: &str, length: usize) -> Result<Vec<usize>> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("all") {
        return Ok((0..length).collect());
    }

    let len = length as isize;
    let mut rows = BTreeSet::new();
    for segment in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !segment.contains(':') {
            let idx: isize = segment.parse().map_err(|_| invalid(segment))?;
            if idx < -len || idx >= len {
                return Err(AnalysisError::InvalidSelection(format!(
                    "{} (only {} rows)",
                    segment, length
                )));
            }
            let idx = if idx < 0 { idx + len } else { idx };
            rows.insert(idx as usize);
            continue;
        }

        let parts = segment
            .split(':')
            .map(|p| match p.trim() {
                "" => Ok(None),
                t => t.parse::<isize>().map(Some).map_err(|_| invalid(segment)),
            })
            .collect::<Result<Vec<_>>>()?;
        if parts.len() > 3 {
            return Err(invalid(segment));
        }
        let step = parts.get(2).copied().flatten().unwrap_or(1);
        if step == 0 {
            return Err(AnalysisError::InvalidSelection(format!("{} (zero step)", segment)));
        }
        let (mut i, stop) = bounds(parts[0], parts.get(1).copied().flatten(), step, len);
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            rows.insert(i as usize);
            i += step;
        }
    }
    Ok(rows.into_iter().collect())
}

/// (start, stop) after `slice.indices(len)` clamping.
fn bounds(start: Option<isize>, stop: Option<isize>, step: isize, len: isize) -> (isize, isize) {
    let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
    let clamp = |v: isize| {
        if v < 0 {
            (v + len).max(lower)
        } else {
            v.min(upper)
        }
    };
    let start = start.map_or(if step < 0 { upper } else { lower }, clamp);
    let stop = stop.map_or(if step < 0 { lower } else { upper }, clamp);
    (start, stop)
}

/// Boolean mask of length `length` with `rows` set.
pub fn to_mask(rows: &[usize], length: usize) -> Vec<bool> {
    let mut mask = vec![false; length];
    for &r in rows.iter().filter(|&&r| r < length) {
        mask[r] = true;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_single_indices() {
        assert_eq!(parse_selection("all", 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_selection(" 2, 0 ,2", 3).unwrap(), vec![0, 2]);
        assert_eq!(parse_selection("-1", 4).unwrap(), vec![3]);
        assert!(parse_selection("4", 4).is_err());
        assert!(parse_selection("x", 4).is_err());
    }

    #[test]
    fn slices_follow_python_semantics() {
        assert_eq!(parse_selection("0:10:2", 7).unwrap(), vec![0, 2, 4, 6]);
        assert_eq!(parse_selection(":3", 10).unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_selection("-2:", 5).unwrap(), vec![3, 4]);
        assert_eq!(parse_selection("::-2", 5).unwrap(), vec![0, 2, 4]);
        assert_eq!(parse_selection("3:1:-1", 5).unwrap(), vec![2, 3]);
        assert!(parse_selection("5:2", 10).unwrap().is_empty());
        assert!(parse_selection("::0", 5).is_err());
        assert!(parse_selection("1:2:3:4", 5).is_err());
    }

    #[test]
    fn mask_from_rows() {
        assert_eq!(to_mask(&[0, 2, 9], 3), vec![true, false, true]);
    }
}
