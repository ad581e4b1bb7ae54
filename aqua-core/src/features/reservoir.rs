//! Reservoir statistics.

/// Suffixes of the five statistics derived from each reservoir, in order.
pub const RES_FEATURE_SUFFIXES: [&str; 5] = ["avg", "90", "std", "avg_decay", "90_decay"];

/// Quantile used by both percentile statistics.
const QUANTILE: f64 = 0.9;

/// Slack when comparing cumulative weight against the quantile.
const QUANTILE_EPS: f64 = 1e-12;

/// Aggregate statistics over one reservoir of `(timestamp, value)` samples.
pub struct ReservoirStats;

impl ReservoirStats {
    /// Compute `[avg, p90, std, avg_decay, p90_decay]`.
    ///
    /// Each sample is weighted by `decay^(now - t)` for the decayed
    /// statistics. The decayed mean is `Σ v·w / Σ w`; the decayed 90th
    /// percentile is the smallest value whose cumulative normalized weight
    /// reaches 0.9. The plain 90th percentile interpolates linearly between
    /// closest ranks. An empty reservoir yields zeros.
    pub fn compute(samples: &[(f64, f64)], now: f64, decay: f64) -> [f64; 5] {
        if samples.is_empty() {
            return [0.0; 5];
        }
        let n = samples.len() as f64;

        let mut values: Vec<f64> = samples.iter().map(|&(_, v)| v).collect();
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        values.sort_by(f64::total_cmp);
        let p90 = linear_percentile(&values, QUANTILE);

        let mut weighted: Vec<(f64, f64)> = samples
            .iter()
            .map(|&(t, v)| (v, decay.powf(now - t)))
            .collect();
        let total: f64 = weighted.iter().map(|&(_, w)| w).sum();
        let (avg_decay, p90_decay) = if total > 0.0 && total.is_finite() {
            let avg = weighted.iter().map(|&(v, w)| v * w).sum::<f64>() / total;
            weighted.sort_by(|a, b| a.0.total_cmp(&b.0));
            (avg, weighted_percentile(&weighted, total, QUANTILE))
        } else {
            (0.0, 0.0)
        };

        [mean, p90, variance.sqrt(), avg_decay, p90_decay]
    }
}

/// Percentile of sorted values with linear interpolation between ranks.
pub fn linear_percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Smallest value whose cumulative normalized weight reaches `q`.
/// `sorted` holds `(value, weight)` pairs sorted by value.
pub fn weighted_percentile(sorted: &[(f64, f64)], total: f64, q: f64) -> f64 {
    let mut cumulative = 0.0;
    for &(v, w) in sorted {
        cumulative += w;
        if cumulative / total >= q - QUANTILE_EPS {
            return v;
        }
    }
    sorted.last().map(|&(v, _)| v).unwrap_or(0.0)
}
