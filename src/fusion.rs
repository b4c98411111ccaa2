// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - fusion.rs
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

//! Flow guided temporal fusion of wavelet pyramids.

use multiversion::multiversion;
use rayon::prelude::*;

use crate::flow::FlowField;
use crate::wavelet::{WaveletPyramid, WAVELET_LEVELS};

/// Millisecond in nanoseconds, for the exposure thresholds.
const MS: i64 = 1_000_000;

/// Per candidate fusion weights.
///
/// `difference` scales the dissimilarity tolerance, `weight` scales the
/// candidate's share in the accumulator. The thresholds are empirical
/// and part of the contract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusionWeights {
    pub difference: f32,
    pub weight: f32,
}

impl FusionWeights {
    /// Select the regime from the reference metadata and the measured
    /// scene motion.
    pub fn select(iso: i32, exposure_time: i64, flow_std_dev: f32) -> Self {
        if iso >= 800 && exposure_time >= 8 * MS && flow_std_dev < 10.0 {
            // Low light, little motion: trust the burst.
            FusionWeights {
                difference: 16.0,
                weight: 16.0,
            }
        } else if iso <= 200 && exposure_time <= 5 * MS / 4 {
            // Bright scene, fast shutter.
            FusionWeights {
                difference: 4.0,
                weight: 4.0,
            }
        } else if flow_std_dev > 10.0 {
            // High motion: keep the reference dominant.
            FusionWeights {
                difference: 2.0,
                weight: 8.0,
            }
        } else {
            FusionWeights {
                difference: 16.0,
                weight: 8.0,
            }
        }
    }
}

/// Edge clamped bilinear sample over one sub-band.
#[inline]
fn sample_band(band: &[f32], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, width as f32 - 1.0);
    let y = y.clamp(0.0, height as f32 - 1.0);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let top = band[y0 * width + x0] * (1.0 - fx) + band[y0 * width + x1] * fx;
    let bottom = band[y1 * width + x0] * (1.0 - fx) + band[y1 * width + x1] * fx;
    top * (1.0 - fy) + bottom * fy
}

#[allow(clippy::too_many_arguments)]
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+avx+avx2", "x86+sse", "aarch64+neon"))]
fn fuse_band(
    reference: &[f32],
    candidate: &[f32],
    out_values: &mut [f32],
    out_weights: &mut [f32],
    width: usize,
    height: usize,
    flow: &FlowField,
    scale: f32,
    sigma: f32,
    weights: FusionWeights,
    reset_output: bool,
) {
    let tolerance = (sigma * weights.difference).max(1e-5);
    out_values
        .par_chunks_mut(width)
        .zip(out_weights.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (values, acc))| {
            for x in 0..width {
                let i = y * width + x;
                let reference_c = reference[i];

                // Flow lives at plane resolution; look it up at the
                // plane position of this coefficient and rescale the
                // displacement into sub-band units.
                let px = (x as f32 + 0.5) * scale;
                let py = (y as f32 + 0.5) * scale;
                let (fu, fv) = flow.sample(px, py);
                let candidate_c = sample_band(
                    candidate,
                    width,
                    height,
                    x as f32 + fu / scale,
                    y as f32 + fv / scale,
                );

                if reset_output {
                    values[x] = weights.weight * reference_c;
                    acc[x] = weights.weight;
                }

                // Trust decays with dissimilarity against the noise
                // scaled tolerance.
                let d = (candidate_c - reference_c) / tolerance;
                let alpha = 1.0 / (1.0 + d * d);

                values[x] += weights.weight * alpha * candidate_c;
                acc[x] += weights.weight * alpha;
            }
        });
}

/// Fuse one candidate pyramid into the accumulator.
///
/// `reset_output` must be true for the first candidate; it seeds the
/// accumulator with the reference at the candidate's weight. The
/// accumulator tracks the applied weight per coefficient so the
/// inverse transform can normalize.
pub fn fuse(
    reference: &WaveletPyramid,
    candidate: &WaveletPyramid,
    output: &mut WaveletPyramid,
    flow: &FlowField,
    noise: &[f32; WAVELET_LEVELS],
    weights: FusionWeights,
    reset_output: bool,
) {
    for (l, sigma) in noise.iter().enumerate() {
        let scale = (1_u32 << (l + 1)) as f32;
        let ref_level = &reference.levels[l];
        let cand_level = &candidate.levels[l];
        let out_level = &mut output.levels[l];
        for band in 0..4 {
            fuse_band(
                &ref_level.values[band],
                &cand_level.values[band],
                &mut out_level.values[band],
                &mut out_level.weights[band],
                ref_level.width,
                ref_level.height,
                flow,
                scale,
                *sigma,
                weights,
                reset_output,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{fuse, FusionWeights};
    use crate::bitmap::ImageBuffer;
    use crate::flow::FlowField;
    use crate::wavelet::{WaveletPyramid, EXPANDED_RANGE};

    #[test]
    fn test_weight_regimes() {
        let ms = 1_000_000_i64;
        // Low light, low motion.
        assert_eq!(
            FusionWeights::select(800, 8 * ms, 9.9),
            FusionWeights { difference: 16.0, weight: 16.0 }
        );
        // Bright and fast.
        assert_eq!(
            FusionWeights::select(200, ms, 0.0),
            FusionWeights { difference: 4.0, weight: 4.0 }
        );
        assert_eq!(
            FusionWeights::select(100, 5 * ms / 4, 50.0),
            FusionWeights { difference: 4.0, weight: 4.0 }
        );
        // High motion.
        assert_eq!(
            FusionWeights::select(400, 4 * ms, 10.1),
            FusionWeights { difference: 2.0, weight: 8.0 }
        );
        // Either side of the low light thresholds lands in the default.
        for (iso, exposure, motion) in [
            (799, 8 * ms, 0.0_f32),
            (800, 8 * ms - 1, 0.0),
            (400, 4 * ms, 9.9),
            (201, ms, 5.0),
        ] {
            assert_eq!(
                FusionWeights::select(iso, exposure, motion),
                FusionWeights { difference: 16.0, weight: 8.0 },
                "iso {} exposure {} motion {}",
                iso,
                exposure,
                motion
            );
        }
    }

    fn noisy_plane(sigma: f32, seed: u64) -> ImageBuffer<u16> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..128 * 128)
            .map(|i| {
                let x = i % 128;
                let clean = 4000.0 + 2000.0 * ((x as f32) * 0.1).sin();
                let u1: f32 = rng.gen::<f32>().max(1e-7);
                let u2: f32 = rng.gen();
                let n = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
                (clean + sigma * n).clamp(0.0, 16383.0) as u16
            })
            .collect();
        ImageBuffer::with_data(data, 128, 128, 1)
    }

    #[test]
    fn test_two_still_frames_average() {
        // Two aligned noisy exposures of the same scene: fusion should
        // cut the noise close to 1/sqrt(2).
        let white = EXPANDED_RANGE as u16;
        let a = WaveletPyramid::forward(&noisy_plane(150.0, 1), 0, white).unwrap();
        let b = WaveletPyramid::forward(&noisy_plane(150.0, 2), 0, white).unwrap();
        let mut out = a.like();
        let flow = FlowField {
            width: 128,
            height: 128,
            u: vec![0.0; 128 * 128],
            v: vec![0.0; 128 * 128],
        };
        let noise = a.noise_profile();
        let weights = FusionWeights::select(400, 4_000_000, flow.std_dev());
        fuse(&a, &b, &mut out, &flow, &noise, weights, true);

        let sigma_in = a.noise_sigma();
        let sigma_out = out.noise_sigma_normalized();
        let expected = sigma_in / 2.0_f32.sqrt();
        assert!(
            (sigma_out - expected).abs() / expected < 0.10,
            "in {} out {} expected {}",
            sigma_in,
            sigma_out,
            expected
        );
    }

    fn noisy_ramp(sigma: f32, seed: u64) -> ImageBuffer<u16> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..128 * 128)
            .map(|i| {
                let x = (i % 128) as f32;
                let u1: f32 = rng.gen::<f32>().max(1e-7);
                let u2: f32 = rng.gen();
                let n = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
                (8.0 * x + 200.0 + sigma * n).clamp(0.0, 16383.0) as u16
            })
            .collect();
        ImageBuffer::with_data(data, 128, 128, 1)
    }

    #[test]
    fn test_misaligned_candidate_rejected() {
        // A strongly misaligned candidate must barely contribute: the
        // output stays close to the reference, without ghosting, and
        // the residual noise does not grow.
        let white = EXPANDED_RANGE as u16;
        let ref_plane = noisy_ramp(20.0, 5);
        let a = WaveletPyramid::forward(&ref_plane, 0, white).unwrap();
        let shifted = {
            let mut data = ref_plane.data.clone();
            data.rotate_left(31); // large misalignment
            ImageBuffer::with_data(data, 128, 128, 1)
        };
        let b = WaveletPyramid::forward(&shifted, 0, white).unwrap();
        let mut out = a.like();
        let flow = FlowField {
            width: 128,
            height: 128,
            u: vec![0.0; 128 * 128],
            v: vec![0.0; 128 * 128],
        };
        let noise = a.noise_profile();
        // High motion regime.
        let weights = FusionWeights::select(400, 4_000_000, 50.0);
        fuse(&a, &b, &mut out, &flow, &noise, weights, true);

        let restored = out.inverse(0.0);
        let mut max_err = 0_i32;
        for (r, o) in ref_plane.data.iter().zip(&restored.data) {
            max_err = max_err.max((*r as i32 - *o as i32).abs());
        }
        // The misaligned copy differs by ~250 codes across most of the
        // plane; the fused result must stay far closer to the
        // reference than that.
        assert!(max_err < 150, "max err {}", max_err);
        assert!(out.noise_sigma_normalized() <= a.noise_sigma() * 1.05);
    }
}
