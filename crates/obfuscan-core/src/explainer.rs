//! Kernel SHAP feature attribution.
//!
//! Estimates Shapley values for one input by evaluating the classifier on
//! coalitions of features: features in the coalition take the input's
//! value, the rest are filled from each background row, and the outputs
//! are averaged. A weighted linear regression over the coalitions, with
//! the Shapley kernel as weights and the constraint
//! `sum(phi) = f(x) - E[f(background)]`, yields the attributions.
//!
//! Coalition sizes are enumerated completely while the sample budget
//! allows (smallest and largest sizes first, since the kernel weights
//! them most); the remaining budget is spent on seeded random coalitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};

use crate::background::BackgroundDataset;
use crate::classifier::Classifier;
use crate::encoder::EncodedInput;
use crate::error::ExplainError;

/// Upper bound on rows sent to the classifier in one batch.
const BATCH_ROWS: usize = 8192;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplainerSettings {
    /// Coalition budget; `None` uses `2 * M + 2048` for `M` varying features.
    pub samples: Option<usize>,
    pub seed: u64,
    /// Subsample the background to at most this many rows; `None` keeps
    /// the whole table.
    pub max_background: Option<usize>,
}

/// Coalition evaluation progress, readable from another thread.
#[derive(Debug, Default)]
pub struct ExplainProgress {
    pub total: AtomicUsize,
    pub done: AtomicUsize,
}

impl ExplainProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fraction(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.done.load(Ordering::Relaxed) as f32 / total as f32
    }

    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }
}

/// One attribution per input column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribution {
    /// Mean classifier output over the background table.
    pub base_value: f64,
    /// Classifier output for the explained input.
    pub prediction: f64,
    pub values: Vec<f64>,
}

impl Attribution {
    /// Column indices with their attribution, largest magnitude first.
    pub fn ranked(&self) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = self.values.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        ranked
    }
}

pub struct KernelExplainer<'a> {
    classifier: &'a dyn Classifier,
    background: &'a BackgroundDataset,
    settings: ExplainerSettings,
}

impl<'a> KernelExplainer<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        background: &'a BackgroundDataset,
        settings: ExplainerSettings,
    ) -> Self {
        Self {
            classifier,
            background,
            settings,
        }
    }

    pub fn explain(&self, input: &EncodedInput) -> Result<Attribution, ExplainError> {
        self.explain_with_progress(input, &ExplainProgress::new())
    }

    /// Blocking; cost grows with the coalition budget times the background size.
    pub fn explain_with_progress(
        &self,
        input: &EncodedInput,
        progress: &ExplainProgress,
    ) -> Result<Attribution, ExplainError> {
        let background = self.background.rows();
        let x = input.values().view();
        if background.ncols() != x.len() {
            return Err(ExplainError::Width {
                expected: background.ncols(),
                actual: x.len(),
            });
        }

        let background_scores = self.classifier.predict_batch(background)?;
        let base_value = mean(&background_scores);
        let prediction = f64::from(self.classifier.predict(input)?.probability);

        let varying = varying_features(x, background);
        let mut values = vec![0.0; x.len()];

        match varying.as_slice() {
            [] => progress.reset(0),
            [only] => {
                progress.reset(0);
                values[*only] = prediction - base_value;
            }
            _ => {
                let mut rng = StdRng::seed_from_u64(self.settings.seed);
                let coalitions = sample_coalitions(varying.len(), self.settings.samples, &mut rng);
                info!(
                    features = x.len(),
                    varying = varying.len(),
                    coalitions = coalitions.len(),
                    background = background.nrows(),
                    "sampling coalitions"
                );

                let outputs = self.evaluate(x, background, &varying, &coalitions, progress)?;
                let phi = solve_attributions(&coalitions, &outputs, base_value, prediction)?;
                for (&column, value) in varying.iter().zip(phi) {
                    values[column] = value;
                }
            }
        }

        Ok(Attribution {
            base_value,
            prediction,
            values,
        })
    }

    /// Mean classifier output for each coalition, averaged over the background.
    fn evaluate(
        &self,
        x: ArrayView1<'_, f32>,
        background: ArrayView2<'_, f32>,
        varying: &[usize],
        coalitions: &Coalitions,
        progress: &ExplainProgress,
    ) -> Result<Vec<f64>, ExplainError> {
        let n_bg = background.nrows();
        let per_batch = (BATCH_ROWS / n_bg).max(1);
        progress.reset(coalitions.len());

        let mut outputs = Vec::with_capacity(coalitions.len());
        for chunk in coalitions.masks.chunks(per_batch) {
            let mut batch = Array2::<f32>::zeros((chunk.len() * n_bg, x.len()));
            for (k, mask) in chunk.iter().enumerate() {
                let mut block = batch.slice_mut(ndarray::s![k * n_bg..(k + 1) * n_bg, ..]);
                block.assign(&background);
                for (pos, &column) in varying.iter().enumerate() {
                    if mask[pos] {
                        block.column_mut(column).fill(x[column]);
                    }
                }
            }

            let scores = self.classifier.predict_batch(batch.view())?;
            outputs.extend(scores.chunks(n_bg).map(mean));
            progress.done.fetch_add(chunk.len(), Ordering::Relaxed);
        }

        debug!(evaluated = outputs.len(), "coalitions evaluated");
        Ok(outputs)
    }
}

fn mean(scores: &[f32]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64
}

/// `|a - b| <= atol + rtol * |b|`, matching the usual float-closeness test.
fn is_close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

/// Columns whose input value differs from at least one background row.
/// The rest cannot move the output and are attributed exactly zero.
fn varying_features(x: ArrayView1<'_, f32>, background: ArrayView2<'_, f32>) -> Vec<usize> {
    (0..x.len())
        .filter(|&j| background.column(j).iter().any(|&b| !is_close(x[j], b)))
        .collect()
}

/// Coalition masks over the varying features with their kernel weights.
#[derive(Debug, Default)]
struct Coalitions {
    masks: Vec<Vec<bool>>,
    weights: Vec<f64>,
    index: HashMap<Vec<bool>, usize>,
}

impl Coalitions {
    fn len(&self) -> usize {
        self.masks.len()
    }

    /// Add `mask` with `weight`, or bump the weight of an existing copy.
    /// Returns whether the mask was new.
    fn add(&mut self, mask: Vec<bool>, weight: f64) -> bool {
        if let Some(&i) = self.index.get(&mask) {
            self.weights[i] += weight;
            return false;
        }
        self.index.insert(mask.clone(), self.masks.len());
        self.masks.push(mask);
        self.weights.push(weight);
        true
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

fn complement(mask: &[bool]) -> Vec<bool> {
    mask.iter().map(|&b| !b).collect()
}

/// Calls `f` with every `k`-subset of `0..n` in lexicographic order.
fn for_each_combination(n: usize, k: usize, mut f: impl FnMut(&[usize])) {
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        f(&idx);
        let Some(i) = (0..k).rev().find(|&i| idx[i] != i + n - k) else {
            return;
        };
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

fn sample_coalitions(m: usize, samples: Option<usize>, rng: &mut StdRng) -> Coalitions {
    let max_samples = if m > 30 { 1usize << 30 } else { (1usize << m) - 2 };
    let budget = samples.unwrap_or(2 * m + 2048).clamp(1, max_samples);

    // Sizes s and m - s share a weight; only the smaller half is iterated,
    // and each paired size also contributes its complement.
    let num_subset_sizes = m / 2;
    let num_paired = (m - 1) / 2;

    let mut weight_vector: Vec<f64> = (1..=num_subset_sizes)
        .map(|s| (m - 1) as f64 / (s * (m - s)) as f64)
        .collect();
    for w in weight_vector.iter_mut().take(num_paired) {
        *w *= 2.0;
    }
    let total: f64 = weight_vector.iter().sum();
    for w in &mut weight_vector {
        *w /= total;
    }

    let mut coalitions = Coalitions::default();
    let mut num_full_subsets = 0;
    let mut samples_left = budget as f64;
    let mut remaining = weight_vector.clone();

    for size in 1..=num_subset_sizes {
        let paired = size <= num_paired;
        let mut nsubsets = binomial(m, size);
        if paired {
            nsubsets *= 2.0;
        }
        if samples_left * remaining[size - 1] / nsubsets < 1.0 - 1e-8 {
            break;
        }

        num_full_subsets += 1;
        samples_left -= nsubsets;
        if remaining[size - 1] < 1.0 {
            let scale = 1.0 - remaining[size - 1];
            for w in &mut remaining {
                *w /= scale;
            }
        }

        let mut w = weight_vector[size - 1] / binomial(m, size);
        if paired {
            w /= 2.0;
        }
        for_each_combination(m, size, |inds| {
            let mut mask = vec![false; m];
            for &i in inds {
                mask[i] = true;
            }
            if paired {
                coalitions.add(complement(&mask), w);
            }
            coalitions.add(mask, w);
        });
    }

    let fixed = coalitions.len();
    let mut samples_left = budget.saturating_sub(fixed);
    debug!(m, budget, full_sizes = num_full_subsets, fixed, "enumerated coalition sizes");

    if num_full_subsets < num_subset_sizes && samples_left > 0 {
        let mut sampling_weights = weight_vector.clone();
        for w in sampling_weights.iter_mut().take(num_paired) {
            *w /= 2.0;
        }
        let sampling_weights = &sampling_weights[num_full_subsets..];

        if let Ok(dist) = WeightedIndex::new(sampling_weights) {
            let mut draws = 0;
            while samples_left > 0 && draws < 4 * budget {
                draws += 1;
                let size = dist.sample(rng) + num_full_subsets + 1;
                let mut mask = vec![false; m];
                for i in rand::seq::index::sample(rng, m, size).into_iter() {
                    mask[i] = true;
                }

                let paired = size <= num_paired;
                let mirrored = complement(&mask);
                if coalitions.add(mask, 1.0) {
                    samples_left -= 1;
                }
                if samples_left > 0 && paired && coalitions.add(mirrored, 1.0) {
                    samples_left -= 1;
                }
            }
        }

        // Sampled coalitions share the kernel weight of the sizes left unenumerated.
        let weight_left: f64 = weight_vector[num_full_subsets..].iter().sum();
        let sampled: f64 = coalitions.weights[fixed..].iter().sum();
        if sampled > 0.0 {
            for w in &mut coalitions.weights[fixed..] {
                *w *= weight_left / sampled;
            }
        }
    }

    coalitions
}

/// Constrained weighted least squares for the attribution of each varying feature.
///
/// The last feature is eliminated with the efficiency constraint, the
/// remaining `M - 1` are solved from the normal equations.
fn solve_attributions(
    coalitions: &Coalitions,
    outputs: &[f64],
    base_value: f64,
    prediction: f64,
) -> Result<Vec<f64>, ExplainError> {
    let m = coalitions.masks[0].len();
    let n = coalitions.len();
    let delta = prediction - base_value;
    let last = m - 1;

    let mut etmp = Array2::<f64>::zeros((n, last));
    let mut target = Array1::<f64>::zeros(n);
    for (r, mask) in coalitions.masks.iter().enumerate() {
        let z_last = f64::from(u8::from(mask[last]));
        for c in 0..last {
            etmp[[r, c]] = f64::from(u8::from(mask[c])) - z_last;
        }
        target[r] = outputs[r] - base_value - z_last * delta;
    }

    let w = Array1::from(coalitions.weights.clone());
    let weighted = &etmp * &w.view().insert_axis(Axis(1));
    let a = weighted.t().dot(&etmp);
    let b = weighted.t().dot(&target);

    let head = solve_linear(a.clone(), b.clone())
        .or_else(|| {
            let ridge = 1e-8 * (a.diag().sum() / last as f64).max(1e-12);
            let mut regularized = a;
            for i in 0..last {
                regularized[[i, i]] += ridge;
            }
            debug!(ridge, "normal equations singular, retrying with ridge");
            solve_linear(regularized, b)
        })
        .ok_or(ExplainError::Singular)?;

    let mut phi = head.to_vec();
    phi.push(delta - head.sum());
    Ok(phi)
}

/// Gaussian elimination with partial pivoting. `None` when singular.
fn solve_linear(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let scale = a.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() <= 1e-12 * scale {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }

        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}
