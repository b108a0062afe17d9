//! Length reconciliation for detector outputs
//!
//! Detectors that subsample or window the batch return vectors whose
//! length differs from the batch. Policy:
//! - longer than the target: truncate from the tail
//! - shorter: pad with the vector's own mean (0 for an empty vector)
//! - anomaly flags pad with the integer part of their mean, i.e. `true`
//!   only when every existing flag is set

/// Pad with the mean or truncate to exactly `n` entries
pub fn reconcile(values: &[f64], n: usize) -> Vec<f64> {
    if values.len() >= n {
        return values[..n].to_vec();
    }
    let fill = crate::stats::mean(values);
    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(values);
    out.resize(n, fill);
    out
}

/// Flag counterpart of [`reconcile`]
pub fn reconcile_flags(flags: &[bool], n: usize) -> Vec<bool> {
    if flags.len() >= n {
        return flags[..n].to_vec();
    }
    let fill = !flags.is_empty() && flags.iter().all(|&f| f);
    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(flags);
    out.resize(n, fill);
    out
}

/// Repeat the whole vector end to end, then trim to `n`
pub fn tile_to<T: Clone>(values: &[T], n: usize) -> Vec<T> {
    if values.is_empty() {
        return Vec::new();
    }
    values.iter().cycle().take(n).cloned().collect()
}

/// Repeat each element `factor` times in place, then trim to `n`
///
/// The result may be shorter than `n` when `values.len() * factor < n`.
pub fn repeat_to<T: Clone>(values: &[T], factor: usize, n: usize) -> Vec<T> {
    values
        .iter()
        .flat_map(|v| std::iter::repeat(v.clone()).take(factor))
        .take(n)
        .collect()
}

/// Linear interpolation of `values` onto `n` evenly spaced points
pub fn interpolate_to(values: &[f64], n: usize) -> Vec<f64> {
    match (values.len(), n) {
        (_, 0) => Vec::new(),
        (0, _) => vec![0.0; n],
        (1, _) => vec![values[0]; n],
        (_, 1) => vec![values[0]],
        (m, _) => {
            let last = (m - 1) as f64;
            (0..n)
                .map(|i| {
                    let x = i as f64 * last / (n - 1) as f64;
                    let lo = (x.floor() as usize).min(m - 1);
                    let hi = (lo + 1).min(m - 1);
                    let frac = x - lo as f64;
                    values[lo] + (values[hi] - values[lo]) * frac
                })
                .collect()
        }
    }
}
