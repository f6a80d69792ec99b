//! Peak list → fixed-length spectral embedding.
//!
//! Peaks inside the m/z window are binned by their relative height (each bin
//! keeps the tallest peak that falls into it), the bins are smoothed with a
//! normalized Gaussian kernel and the result is L2-normalized.

use serde::{Deserialize, Serialize};

use crate::spectrum::Peak;

/// Lower edge of the binned m/z window.
pub const DEFAULT_MZ_LOW: f64 = 30.0;
/// Upper edge of the binned m/z window.
pub const DEFAULT_MZ_HIGH: f64 = 1100.0;
/// Embedding dimension.
pub const DEFAULT_DIM: usize = 300;
/// Gaussian smoothing width, in bins.
pub const DEFAULT_SIGMA: f64 = 1.2;

/// Binning and smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorizerParams {
    #[serde(default = "default_mz_low")]
    pub mz_low: f64,
    #[serde(default = "default_mz_high")]
    pub mz_high: f64,
    #[serde(default = "default_dim")]
    pub dim: usize,
    #[serde(default = "default_sigma")]
    pub sigma: f64,
}

impl Default for VectorizerParams {
    fn default() -> Self {
        Self {
            mz_low: DEFAULT_MZ_LOW,
            mz_high: DEFAULT_MZ_HIGH,
            dim: DEFAULT_DIM,
            sigma: DEFAULT_SIGMA,
        }
    }
}

fn default_mz_low() -> f64 {
    DEFAULT_MZ_LOW
}

fn default_mz_high() -> f64 {
    DEFAULT_MZ_HIGH
}

fn default_dim() -> usize {
    DEFAULT_DIM
}

fn default_sigma() -> f64 {
    DEFAULT_SIGMA
}

/// A spectral embedding: either all zeros or of unit L2 norm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// The all-zero embedding, used when a spectrum has no usable peaks.
    pub fn zeros(dim: usize) -> Self {
        Self(vec![0.0; dim])
    }

    /// L2-normalize `values`. A zero-norm input stays the zero vector.
    pub fn normalized(mut values: Vec<f32>) -> Self {
        let norm = l2_norm(&values);
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    /// Cosine similarity of two embeddings, clamped to `[0, 1]`.
    ///
    /// Both sides are unit (or zero) vectors so the dot product is the
    /// cosine. Negative similarity counts as no match.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        clamp_similarity(dot(&self.0, &other.0))
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Map a raw cosine into `[0, 1]`; NaN counts as no match.
pub(crate) fn clamp_similarity(raw: f32) -> f32 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// Turns peak lists into embeddings with a fixed set of parameters.
#[derive(Debug, Clone)]
pub struct PeakVectorizer {
    params: VectorizerParams,
    kernel: Vec<f64>,
}

impl Default for PeakVectorizer {
    fn default() -> Self {
        Self::new(VectorizerParams::default())
    }
}

impl PeakVectorizer {
    pub fn new(params: VectorizerParams) -> Self {
        Self {
            kernel: gaussian_kernel(params.sigma),
            params,
        }
    }

    pub fn dim(&self) -> usize {
        self.params.dim
    }

    /// Embed a peak list.
    ///
    /// Never fails: empty lists, all-zero intensities and lists whose peaks
    /// all fall outside the m/z window yield the zero vector.
    pub fn vectorize(&self, peaks: &[Peak]) -> Embedding {
        let VectorizerParams {
            mz_low,
            mz_high,
            dim,
            ..
        } = self.params;

        let in_window = |p: &&Peak| p.is_valid() && p.mz >= mz_low && p.mz <= mz_high;

        // Heights are relative to the tallest in-window peak. Out-of-window
        // peaks would only rescale every bin by the same factor, which the
        // final normalization removes anyway.
        let max_intensity = peaks
            .iter()
            .filter(in_window)
            .map(|p| p.intensity)
            .fold(0.0_f64, f64::max);

        if dim == 0 || max_intensity <= 0.0 {
            return Embedding::zeros(dim);
        }

        let span = mz_high - mz_low;
        let mut bins = vec![0.0_f64; dim];
        for peak in peaks.iter().filter(in_window) {
            let idx = ((peak.mz - mz_low) / span * (dim - 1) as f64).floor() as usize;
            let idx = idx.min(dim - 1);
            let height = peak.intensity / max_intensity;
            if height > bins[idx] {
                bins[idx] = height;
            }
        }

        let smoothed = smooth(&bins, &self.kernel);
        Embedding::normalized(smoothed.into_iter().map(|v| v as f32).collect())
    }
}

/// Normalized Gaussian taps over `[-ceil(3σ), ceil(3σ)]`.
///
/// A non-positive sigma gives the identity kernel.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma.is_nan() || sigma <= 0.0 {
        return vec![1.0];
    }

    let radius = (3.0 * sigma).ceil() as i64;
    let taps: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = taps.iter().sum();
    taps.into_iter().map(|w| w / total).collect()
}

/// Convolve with a symmetric odd-length kernel. Taps that fall outside the
/// signal are dropped without renormalizing the remaining weights.
fn smooth(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let radius = (kernel.len() / 2) as i64;
    let len = signal.len() as i64;

    (0..len)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = i + k as i64 - radius;
                    (0..len).contains(&j).then(|| w * signal[j as usize])
                })
                .sum()
        })
        .collect()
}
