//! Typical-period clustering
//!
//! Reduces a horizon of equally long periods (usually days) to `k` weighted
//! representative periods:
//! 1. normalise every series to [0, 1] and scale by √weight
//! 2. build the pairwise Minkowski distance matrix between periods
//! 3. select `k` medoids with an integer program
//! 4. take each medoid's raw profile and rescale it so that
//!    `weight × Σ profile` equals the total of all periods it represents

pub mod distance;
pub mod medoids;

pub use distance::*;
pub use medoids::*;

use ndarray::{Array2, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{HubError, HubResult};
use crate::optimizer::strategies::MilpBackend;
use crate::optimizer::types::SolveBudget;

/// Series to cluster, indexed `(series, step, period)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringInput {
    names: Vec<String>,
    values: Array3<f64>,
    weights: Vec<f64>,
    /// Series whose representative is rescaled to preserve its total
    rescale: Vec<bool>,
}

impl ClusteringInput {
    pub fn new(names: Vec<String>, values: Array3<f64>) -> HubResult<Self> {
        let (series, steps, periods) = values.dim();
        if names.len() != series {
            return Err(HubError::data(
                "clustering.names",
                format!("{} names for {series} series", names.len()),
            ));
        }
        if series == 0 || steps == 0 || periods == 0 {
            return Err(HubError::data(
                "clustering.values",
                format!("empty input of shape ({series}, {steps}, {periods})"),
            ));
        }
        for (name, row) in names.iter().zip(values.axis_iter(Axis(0))) {
            if row.iter().any(|v| !v.is_finite()) {
                return Err(HubError::data(name.as_str(), "series contains non-finite values"));
            }
        }
        Ok(Self {
            names,
            values,
            weights: vec![1.0; series],
            rescale: vec![true; series],
        })
    }

    /// Build the input from flat horizon-long series cut into periods of
    /// `steps_per_period`.
    pub fn from_series(series: &[(String, Vec<f64>)], steps_per_period: usize) -> HubResult<Self> {
        let Some((_, first)) = series.first() else {
            return Err(HubError::data("clustering.series", "no series given"));
        };
        if steps_per_period == 0 {
            return Err(HubError::data("clustering.steps_per_period", "must be positive"));
        }
        let horizon = first.len();
        if horizon == 0 || horizon % steps_per_period != 0 {
            return Err(HubError::data(
                series[0].0.as_str(),
                format!("length {horizon} is not a multiple of the period length {steps_per_period}"),
            ));
        }
        if let Some((name, values)) = series.iter().find(|(_, v)| v.len() != horizon) {
            return Err(HubError::data(
                name.as_str(),
                format!("length {} differs from {horizon}", values.len()),
            ));
        }
        let periods = horizon / steps_per_period;
        let values = Array3::from_shape_fn((series.len(), steps_per_period, periods), |(s, t, p)| {
            series[s].1[p * steps_per_period + t]
        });
        Self::new(series.iter().map(|(n, _)| n.clone()).collect(), values)
    }

    /// Relative weights by series name; unnamed series keep weight 1.
    /// Weights are normalised to sum to one over all series.
    pub fn with_weights(mut self, weights: &BTreeMap<String, f64>) -> HubResult<Self> {
        if let Some(unknown) = weights.keys().find(|k| !self.names.contains(k)) {
            return Err(HubError::data(
                format!("clustering.weights.{unknown}"),
                "no series with this name",
            ));
        }
        if let Some((name, w)) = weights.iter().find(|(_, w)| !(w.is_finite() && **w >= 0.0)) {
            return Err(HubError::data(
                format!("clustering.weights.{name}"),
                format!("weight must be non-negative, got {w}"),
            ));
        }
        let raw: Vec<f64> = self
            .names
            .iter()
            .map(|n| weights.get(n).copied().unwrap_or(1.0))
            .collect();
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return Err(HubError::data("clustering.weights", "weights sum to zero"));
        }
        self.weights = raw.into_iter().map(|w| w / total).collect();
        Ok(self)
    }

    /// Keep the raw medoid profile of `name` (e.g. temperatures, which have
    /// no total to preserve).
    pub fn keep_raw(mut self, name: &str) -> Self {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            self.rescale[i] = false;
        }
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn steps(&self) -> usize {
        self.values.len_of(Axis(1))
    }

    pub fn periods(&self) -> usize {
        self.values.len_of(Axis(2))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub clusters: usize,
    /// Minkowski exponent, `f64::INFINITY` for the maximum norm
    pub norm: f64,
    pub budget: SolveBudget,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            clusters: 12,
            norm: 2.0,
            budget: SolveBudget::default(),
        }
    }
}

/// Representative periods ordered by medoid index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSet {
    pub names: Vec<String>,
    /// Rescaled profiles, `(series, step, cluster)`
    pub profiles: Array3<f64>,
    /// Number of original periods per cluster
    pub weights: Vec<usize>,
    /// Original period index of each cluster's medoid
    pub medoids: Vec<usize>,
    /// Cluster index of every original period
    pub assignment: Vec<usize>,
    /// Rescaling factor per `(series, cluster)`
    pub scale: Array2<f64>,
    /// Total normalised distance of the assignment
    pub objective: f64,
}

impl ClusterSet {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// One-hot `(period, cluster)` matrix.
    pub fn assignment_matrix(&self) -> Array2<u8> {
        let mut matrix = Array2::zeros((self.assignment.len(), self.len()));
        for (period, cluster) in self.assignment.iter().enumerate() {
            matrix[[period, *cluster]] = 1;
        }
        matrix
    }

    pub fn profile(&self, name: &str, cluster: usize) -> Option<ArrayView1<'_, f64>> {
        let s = self.names.iter().position(|n| n == name)?;
        (cluster < self.len()).then(|| self.profiles.index_axis(Axis(0), s).index_axis_move(Axis(1), cluster))
    }

    /// Weighted total of a series over the represented horizon.
    pub fn weighted_total(&self, name: &str) -> Option<f64> {
        (0..self.len())
            .map(|c| {
                self.profile(name, c)
                    .map(|p| self.weights[c] as f64 * p.sum())
            })
            .sum()
    }
}

pub struct TimeSeriesClusterer {
    settings: ClusterSettings,
    backend: Box<dyn MilpBackend>,
}

impl TimeSeriesClusterer {
    pub fn new(settings: ClusterSettings, backend: Box<dyn MilpBackend>) -> Self {
        Self { settings, backend }
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn cluster(&self, input: &ClusteringInput) -> HubResult<ClusterSet> {
        let k = self.settings.clusters;
        let periods = input.periods();
        if k == 0 || k > periods {
            return Err(HubError::data(
                "clustering.clusters",
                format!("cannot pick {k} clusters from {periods} periods"),
            ));
        }
        let p = self.settings.norm;
        if p.is_nan() || p < 1.0 {
            return Err(HubError::data(
                "clustering.norm",
                format!("Minkowski exponent must be at least 1, got {p}"),
            ));
        }

        info!(k, periods, series = input.names.len(), backend = self.backend.name(), "Clustering periods");

        let normalized = normalize(&input.values, &input.weights);
        let distances = distance_matrix(&normalized, p);
        let selection = select_medoids(&distances, k, self.backend.as_ref(), &self.settings.budget)?;

        let set = representatives(input, &selection);
        info!(k, objective = set.objective, weights = ?set.weights, "Clustering finished");
        Ok(set)
    }
}

/// Turn a medoid selection into rescaled representative profiles.
fn representatives(input: &ClusteringInput, selection: &MedoidSelection) -> ClusterSet {
    let k = selection.medoids.len();
    let series = input.names.len();
    let assignment: Vec<usize> = selection
        .assigned_medoid
        .iter()
        .map(|m| selection.medoids.iter().position(|x| x == m).unwrap_or(0))
        .collect();
    let mut weights = vec![0usize; k];
    for c in &assignment {
        weights[*c] += 1;
    }

    let mut scale = Array2::ones((series, k));
    let mut profiles = Array3::zeros((series, input.steps(), k));
    for s in 0..series {
        let raw = input.values.index_axis(Axis(0), s);
        for (c, medoid) in selection.medoids.iter().enumerate() {
            let medoid_profile = raw.index_axis(Axis(1), *medoid);
            if input.rescale[s] {
                let total: f64 = assignment
                    .iter()
                    .enumerate()
                    .filter(|(_, cluster)| **cluster == c)
                    .map(|(period, _)| raw.index_axis(Axis(1), period).sum())
                    .sum();
                let represented = weights[c] as f64 * medoid_profile.sum();
                if represented.abs() > f64::EPSILON {
                    scale[[s, c]] = total / represented;
                } else if total.abs() > f64::EPSILON {
                    warn!(
                        series = %input.names[s],
                        cluster = c,
                        total,
                        "Medoid profile is zero, cluster total cannot be preserved"
                    );
                }
            }
            let factor = scale[[s, c]];
            profiles
                .index_axis_mut(Axis(0), s)
                .index_axis_move(Axis(1), c)
                .assign(&medoid_profile.mapv(|v| v * factor));
        }
    }

    ClusterSet {
        names: input.names.clone(),
        profiles,
        weights,
        medoids: selection.medoids.clone(),
        assignment,
        scale,
        objective: selection.objective,
    }
}
