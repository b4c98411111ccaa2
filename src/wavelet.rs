// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - wavelet.rs
 *
 * Copyright (C) 2024-2025 The libmotioncam developers
 *
 * This library is free software: you can redistribute it and/or
 * modify it under the terms of the GNU Lesser General Public License
 * as published by the Free Software Foundation, either version 3 of
 * the License, or (at your option) any later version.
 *
 * This library is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
 * Lesser General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public
 * License along with this library.  If not, see
 * <http://www.gnu.org/licenses/>.
 */

//! Separable CDF 5/3 wavelet pyramid.

use multiversion::multiversion;
use rayon::prelude::*;
use static_assertions::const_assert;

use crate::bitmap::ImageBuffer;
use crate::{Error, Result};

/// Pyramid depth. Plane dimensions must divide by `2^WAVELET_LEVELS`.
pub const WAVELET_LEVELS: usize = 6;

/// Internal linear code space the sensor range is stretched to.
pub const EXPANDED_RANGE: u32 = 16384;

const_assert!(EXPANDED_RANGE <= u16::MAX as u32);
const_assert!(WAVELET_LEVELS > 0 && WAVELET_LEVELS < 16);

/// Sub-band index of the coarse approximation.
pub const BAND_LL: usize = 0;
/// Horizontal detail.
pub const BAND_LH: usize = 1;
/// Vertical detail.
pub const BAND_HL: usize = 2;
/// Diagonal detail, dominated by noise at the finest level.
pub const BAND_HH: usize = 3;

/// One decomposition level. Sub-bands are half the size of the level's
/// input; level 0 is the finest.
#[derive(Clone, Debug)]
pub struct WaveletLevel {
    pub width: usize,
    pub height: usize,
    /// Sub-band coefficients, ordered LL, LH, HL, HH.
    pub values: [Vec<f32>; 4],
    /// Per coefficient accumulated fusion weight.
    pub weights: [Vec<f32>; 4],
}

/// The wavelet decomposition of one CFA plane.
#[derive(Clone, Debug)]
pub struct WaveletPyramid {
    pub levels: Vec<WaveletLevel>,
}

/// CDF 5/3 analysis lifting over one even length signal.
fn lift_forward(x: &[f32], low: &mut [f32], high: &mut [f32]) {
    let half = x.len() / 2;
    for i in 0..half {
        let left = x[2 * i];
        // Whole sample mirror at the right edge.
        let right = if 2 * i + 2 < x.len() { x[2 * i + 2] } else { left };
        high[i] = x[2 * i + 1] - 0.5 * (left + right);
    }
    for i in 0..half {
        let previous = if i == 0 { high[0] } else { high[i - 1] };
        low[i] = x[2 * i] + 0.25 * (previous + high[i]);
    }
}

/// CDF 5/3 synthesis lifting, the exact inverse of [`lift_forward`].
fn lift_inverse(low: &[f32], high: &[f32], x: &mut [f32]) {
    let half = low.len();
    for i in 0..half {
        let previous = if i == 0 { high[0] } else { high[i - 1] };
        x[2 * i] = low[i] - 0.25 * (previous + high[i]);
    }
    for i in 0..half {
        let left = x[2 * i];
        let right = if 2 * i + 2 < x.len() { x[2 * i + 2] } else { left };
        x[2 * i + 1] = high[i] + 0.5 * (left + right);
    }
}

/// One analysis level: rows then columns, producing LL/LH/HL/HH at
/// half resolution.
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+avx+avx2", "x86+sse", "aarch64+neon"))]
fn forward_level(input: &[f32], width: usize, height: usize) -> WaveletLevel {
    let hw = width / 2;
    let hh = height / 2;

    // Horizontal pass.
    let mut row_low = vec![0.0_f32; hw * height];
    let mut row_high = vec![0.0_f32; hw * height];
    row_low
        .par_chunks_mut(hw)
        .zip(row_high.par_chunks_mut(hw))
        .zip(input.par_chunks(width))
        .for_each(|((low, high), row)| lift_forward(row, low, high));

    // Vertical pass over both half images.
    let mut bands = [
        vec![0.0_f32; hw * hh],
        vec![0.0_f32; hw * hh],
        vec![0.0_f32; hw * hh],
        vec![0.0_f32; hw * hh],
    ];
    let mut column = vec![0.0_f32; height];
    let mut low = vec![0.0_f32; hh];
    let mut high = vec![0.0_f32; hh];
    for (source, pair) in [(&row_low, [BAND_LL, BAND_LH]), (&row_high, [BAND_HL, BAND_HH])] {
        for x in 0..hw {
            for y in 0..height {
                column[y] = source[y * hw + x];
            }
            lift_forward(&column, &mut low, &mut high);
            for y in 0..hh {
                bands[pair[0]][y * hw + x] = low[y];
                bands[pair[1]][y * hw + x] = high[y];
            }
        }
    }

    let weights = [
        vec![1.0_f32; hw * hh],
        vec![1.0_f32; hw * hh],
        vec![1.0_f32; hw * hh],
        vec![1.0_f32; hw * hh],
    ];
    WaveletLevel {
        width: hw,
        height: hh,
        values: bands,
        weights,
    }
}

/// One synthesis level from an LL band and the level's detail bands.
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+avx+avx2", "x86+sse", "aarch64+neon"))]
fn inverse_level(
    ll: &[f32],
    lh: &[f32],
    hl: &[f32],
    hh: &[f32],
    hw: usize,
    hh_dim: usize,
) -> Vec<f32> {
    let width = hw * 2;
    let height = hh_dim * 2;

    // Undo the vertical pass.
    let mut row_low = vec![0.0_f32; hw * height];
    let mut row_high = vec![0.0_f32; hw * height];
    let mut low = vec![0.0_f32; hh_dim];
    let mut high = vec![0.0_f32; hh_dim];
    let mut column = vec![0.0_f32; height];
    for (dest, pair) in [(&mut row_low, (ll, lh)), (&mut row_high, (hl, hh))] {
        for x in 0..hw {
            for y in 0..hh_dim {
                low[y] = pair.0[y * hw + x];
                high[y] = pair.1[y * hw + x];
            }
            lift_inverse(&low, &high, &mut column);
            for y in 0..height {
                dest[y * hw + x] = column[y];
            }
        }
    }

    // Undo the horizontal pass.
    let mut out = vec![0.0_f32; width * height];
    out.par_chunks_mut(width)
        .zip(row_low.par_chunks(hw))
        .zip(row_high.par_chunks(hw))
        .for_each(|((row, low), high)| lift_inverse(low, high, row));
    out
}

/// MAD estimator of a zero mean Gaussian sigma, robust to outliers.
pub fn estimate_noise(band: &[f32]) -> f32 {
    if band.is_empty() {
        return 0.0;
    }
    let mut magnitudes: Vec<f32> = band.iter().map(|v| v.abs()).collect();
    let mid = magnitudes.len() / 2;
    let (_, median, _) = magnitudes.select_nth_unstable_by(mid, f32::total_cmp);
    *median / 0.6745
}

/// Soft threshold shrinkage.
#[inline]
fn shrink(c: f32, threshold: f32) -> f32 {
    c.signum() * (c.abs() - threshold).max(0.0)
}

impl WaveletPyramid {
    /// Decompose one CFA plane, stretching `[black, white]` to the
    /// expanded range first.
    pub fn forward(plane: &ImageBuffer<u16>, black: u16, white: u16) -> Result<Self> {
        let w = plane.width as usize;
        let h = plane.height as usize;
        let grid = 1 << WAVELET_LEVELS;
        if w == 0 || h == 0 || w % grid != 0 || h % grid != 0 {
            return Err(Error::InvalidState(format!(
                "plane {}x{} is not padded to the wavelet grid",
                w, h
            )));
        }
        let data = plane.to_f32_scaled(black, white, EXPANDED_RANGE as f32);
        Ok(Self::forward_expanded(data, w, h))
    }

    /// Decompose an already expanded range plane.
    pub(crate) fn forward_expanded(data: Vec<f32>, width: usize, height: usize) -> Self {
        let mut levels = Vec::with_capacity(WAVELET_LEVELS);
        let mut ll = data;
        let mut w = width;
        let mut h = height;
        for _ in 0..WAVELET_LEVELS {
            let level = forward_level(&ll, w, h);
            ll = level.values[BAND_LL].clone();
            w /= 2;
            h /= 2;
            levels.push(level);
        }
        WaveletPyramid { levels }
    }

    /// An all zero pyramid with the same geometry, for fusion output.
    pub fn like(&self) -> Self {
        let levels = self
            .levels
            .iter()
            .map(|level| {
                let zero = vec![0.0_f32; level.width * level.height];
                WaveletLevel {
                    width: level.width,
                    height: level.height,
                    values: [zero.clone(), zero.clone(), zero.clone(), zero.clone()],
                    weights: [zero.clone(), zero.clone(), zero.clone(), zero],
                }
            })
            .collect();
        WaveletPyramid { levels }
    }

    /// Reconstructed plane width.
    pub fn width(&self) -> usize {
        self.levels[0].width * 2
    }

    pub fn height(&self) -> usize {
        self.levels[0].height * 2
    }

    /// Per level noise sigma of the HH band, finest first.
    pub fn noise_profile(&self) -> [f32; WAVELET_LEVELS] {
        let mut profile = [0.0_f32; WAVELET_LEVELS];
        for (sigma, level) in profile.iter_mut().zip(&self.levels) {
            *sigma = estimate_noise(&level.values[BAND_HH]);
        }
        profile
    }

    /// Channel noise sigma: the finest level's HH estimate.
    pub fn noise_sigma(&self) -> f32 {
        estimate_noise(&self.levels[0].values[BAND_HH])
    }

    /// Channel noise sigma of a fused pyramid, with the accumulated
    /// weights divided out first.
    pub fn noise_sigma_normalized(&self) -> f32 {
        let level = &self.levels[0];
        let band: Vec<f32> = level.values[BAND_HH]
            .iter()
            .zip(&level.weights[BAND_HH])
            .map(|(&v, &w)| if w > 0.0 { v / w } else { v })
            .collect();
        estimate_noise(&band)
    }

    /// Reconstruct the plane, normalizing fused coefficients by their
    /// accumulated weights and soft thresholding every detail band by
    /// `threshold`. The result clamps to `[0, EXPANDED_RANGE]`.
    pub fn inverse(&self, threshold: f32) -> ImageBuffer<u16> {
        let normalized = |level: &WaveletLevel, band: usize, shrunk: bool| -> Vec<f32> {
            level.values[band]
                .iter()
                .zip(&level.weights[band])
                .map(|(&v, &w)| {
                    let v = if w > 0.0 { v / w } else { v };
                    if shrunk {
                        shrink(v, threshold)
                    } else {
                        v
                    }
                })
                .collect()
        };

        let coarsest = &self.levels[WAVELET_LEVELS - 1];
        let mut ll = normalized(coarsest, BAND_LL, false);
        for level in self.levels.iter().rev() {
            let lh = normalized(level, BAND_LH, threshold > 0.0);
            let hl = normalized(level, BAND_HL, threshold > 0.0);
            let hh = normalized(level, BAND_HH, threshold > 0.0);
            ll = inverse_level(&ll, &lh, &hl, &hh, level.width, level.height);
        }

        let data = ll
            .iter()
            .map(|&v| v.round().clamp(0.0, EXPANDED_RANGE as f32) as u16)
            .collect();
        ImageBuffer::with_data(data, self.width() as u32, self.height() as u32, 1)
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{estimate_noise, lift_forward, lift_inverse, WaveletPyramid, EXPANDED_RANGE};
    use crate::bitmap::ImageBuffer;

    #[test]
    fn test_lifting_round_trip() {
        let signal: Vec<f32> = (0..64).map(|i| ((i * 37) % 61) as f32).collect();
        let mut low = vec![0.0_f32; 32];
        let mut high = vec![0.0_f32; 32];
        lift_forward(&signal, &mut low, &mut high);
        let mut back = vec![0.0_f32; 64];
        lift_inverse(&low, &high, &mut back);
        for (a, b) in signal.iter().zip(&back) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    fn noisy_plane(width: u32, height: u32, sigma: f32, seed: u64) -> ImageBuffer<u16> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..width * height)
            .map(|i| {
                let x = i % width;
                let clean = 2000.0 + 1500.0 * ((x as f32) * 0.05).sin();
                // Box-Muller pair, first component only.
                let u1: f32 = rng.gen::<f32>().max(1e-7);
                let u2: f32 = rng.gen();
                let n = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
                (clean + sigma * n).clamp(0.0, 16383.0) as u16
            })
            .collect();
        ImageBuffer::with_data(data, width, height, 1)
    }

    #[test]
    fn test_round_trip_within_one_lsb() {
        let plane = noisy_plane(128, 64, 120.0, 7);
        let pyramid =
            WaveletPyramid::forward(&plane, 0, EXPANDED_RANGE as u16).unwrap();
        let back = pyramid.inverse(0.0);
        for (a, b) in plane.data.iter().zip(&back.data) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_rejects_unpadded_plane() {
        let plane = ImageBuffer::<u16>::new(100, 64, 1);
        assert!(WaveletPyramid::forward(&plane, 0, 1023).is_err());
    }

    #[test]
    fn test_noise_estimate_monotonic() {
        let mut last = -1.0_f32;
        for (i, sigma) in [0.0_f32, 40.0, 120.0, 300.0].iter().enumerate() {
            let plane = noisy_plane(256, 128, *sigma, 11 + i as u64);
            let pyramid =
                WaveletPyramid::forward(&plane, 0, EXPANDED_RANGE as u16).unwrap();
            let estimate = pyramid.noise_sigma();
            assert!(
                estimate >= last,
                "sigma {} estimate {} after {}",
                sigma,
                estimate,
                last
            );
            last = estimate;
        }
    }

    #[test]
    fn test_shrinkage_reduces_noise() {
        let plane = noisy_plane(128, 128, 200.0, 3);
        let pyramid =
            WaveletPyramid::forward(&plane, 0, EXPANDED_RANGE as u16).unwrap();
        let sigma = pyramid.noise_sigma();
        let denoised = pyramid.inverse(sigma);
        let repyramid =
            WaveletPyramid::forward(&denoised, 0, EXPANDED_RANGE as u16).unwrap();
        assert!(repyramid.noise_sigma() < sigma);
    }

    #[test]
    fn test_mad_estimator() {
        // Constant magnitude band: median(|x|)/0.6745.
        let band = vec![0.6745_f32; 99];
        let sigma = estimate_noise(&band);
        assert!((sigma - 1.0).abs() < 1e-4);
        assert_eq!(estimate_noise(&[]), 0.0);
    }
}
