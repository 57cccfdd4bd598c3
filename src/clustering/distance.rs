//! Series normalisation and pairwise period distances.

use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Scale each series to [0, 1] over the whole horizon and multiply by the
/// square root of its weight. A constant series maps to all zeros.
pub fn normalize(values: &Array3<f64>, weights: &[f64]) -> Array3<f64> {
    let mut normalized = values.clone();
    for (mut series, weight) in normalized.axis_iter_mut(Axis(0)).zip(weights) {
        let (min, max) = series
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let range = max - min;
        let factor = weight.sqrt();
        if range > 0.0 {
            series.mapv_inplace(|v| (v - min) / range * factor);
        } else {
            series.fill(0.0);
        }
    }
    normalized
}

/// Generalised Minkowski distance between two equally shaped blocks.
/// `p = ∞` gives the maximum norm.
pub fn minkowski(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>, p: f64) -> f64 {
    let diffs = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs());
    if p.is_infinite() {
        diffs.fold(0.0, f64::max)
    } else if (p - 1.0).abs() < f64::EPSILON {
        diffs.sum()
    } else if (p - 2.0).abs() < f64::EPSILON {
        diffs.map(|d| d * d).sum::<f64>().sqrt()
    } else {
        diffs.map(|d| d.powf(p)).sum::<f64>().powf(1.0 / p)
    }
}

/// Symmetric period-by-period distance matrix with a zero diagonal.
/// `normalized` is indexed `(series, step, period)`.
pub fn distance_matrix(normalized: &Array3<f64>, p: f64) -> Array2<f64> {
    let periods = normalized.len_of(Axis(2));
    let mut distances = Array2::zeros((periods, periods));
    for i in 0..periods {
        let a = normalized.index_axis(Axis(2), i);
        for j in (i + 1)..periods {
            let b = normalized.index_axis(Axis(2), j);
            let d = minkowski(a, b, p);
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }
    distances
}
