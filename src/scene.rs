// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - scene.rs
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

//! Scene analysis on the reference frame.

use crate::bitmap::ImageBuffer;
use crate::deinterleave::RawData;
use crate::metadata::{RawCameraMetadata, ScreenOrientation};
use crate::render::render_preview;
use crate::settings::PostProcessSettings;
use crate::Result;

/// Bins of every analysis histogram, over [0, 256).
pub const HISTOGRAM_BINS: usize = 255;

/// Shadow sweep step and range.
const SHADOWS_STEP: f32 = 2.0;
const SHADOWS_MAX: f32 = 14.0;
/// The sweep stops once a step grows mean luminance by less than 3%.
const SHADOWS_GROWTH: f32 = 1.03;

fn bin_of(value: f32) -> usize {
    (value as usize).min(HISTOGRAM_BINS - 1)
}

/// Luma histogram of a BGRA preview.
fn luma_histogram(preview: &ImageBuffer<u8>) -> ([u32; HISTOGRAM_BINS], u64) {
    let mut histogram = [0_u32; HISTOGRAM_BINS];
    let mut total = 0_u64;
    for pixel in preview.data.chunks_exact(4) {
        let l = 0.114 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.299 * pixel[2] as f32;
        histogram[bin_of(l)] += 1;
        total += 1;
    }
    (histogram, total)
}

fn mean_luminance(preview: &ImageBuffer<u8>) -> f32 {
    let mut sum = 0.0_f64;
    let mut count = 0_u64;
    for pixel in preview.data.chunks_exact(4) {
        sum += (0.114 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.299 * pixel[2] as f32)
            as f64;
        count += 1;
    }
    (sum / count.max(1) as f64) as f32
}

/// Exposure compensation, in stops, that would bring the brightest
/// channel near the top of the histogram.
pub fn estimate_exposure_compensation(raw: &RawData, camera: &RawCameraMetadata) -> f32 {
    let mut histograms = [[0_u32; HISTOGRAM_BINS]; 3];
    let arrangement = camera.sensor_arrangement;
    let channel_of = |plane: usize| -> usize {
        let colours = arrangement.colours();
        colours[plane] as usize
    };

    let cw = raw.cropped_width();
    let ch = raw.cropped_height();
    for (k, plane) in raw.planes.iter().enumerate() {
        let black = camera.black_level[k];
        let range = (camera.white_level.saturating_sub(black)).max(1) as f32;
        let channel = channel_of(k);
        for y in 0..ch {
            for x in 0..cw {
                let v = plane.pixel(x, y).saturating_sub(black) as f32 / range;
                histograms[channel][bin_of(v * 255.0)] += 1;
            }
        }
    }

    // Per channel, walk from the top until the accumulated count
    // crosses the clipping budget.
    let threshold = (1.0e-4 * (cw as f64 * ch as f64)) as u64;
    let mut best_bin = 0_usize;
    for histogram in &histograms {
        let mut cumulative = 0_u64;
        let mut bin = HISTOGRAM_BINS - 1;
        for b in (0..HISTOGRAM_BINS).rev() {
            cumulative += histogram[b] as u64;
            if cumulative > threshold {
                bin = b;
                break;
            }
        }
        best_bin = best_bin.max(bin);
    }

    (HISTOGRAM_BINS as f32 / (best_bin + 1) as f32).log2()
}

/// The shadow sweep against an arbitrary luminance measurement;
/// factored out so the stopping rule is testable on its own.
fn shadows_sweep<F: FnMut(f32) -> Result<f32>>(mut measure: F) -> Result<f32> {
    let mut previous: Option<f32> = None;
    let mut shadows = SHADOWS_STEP;
    while shadows <= SHADOWS_MAX {
        let luminance = measure(shadows)?;
        if let Some(previous) = previous {
            if previous > 0.0 && luminance / previous < SHADOWS_GROWTH {
                return Ok((shadows - SHADOWS_STEP).max(SHADOWS_STEP));
            }
        }
        previous = Some(luminance);
        shadows += SHADOWS_STEP;
    }
    Ok(SHADOWS_MAX)
}

/// Sweep the shadow lift until the preview brightness flattens out.
pub fn estimate_shadows(
    raw: &RawData,
    camera: &RawCameraMetadata,
    settings: &PostProcessSettings,
) -> Result<f32> {
    shadows_sweep(|shadows| {
        let trial = PostProcessSettings {
            shadows,
            ..settings.clone()
        };
        let preview = render_preview(raw, camera, &trial, 8, ScreenOrientation::Landscape)?;
        Ok(mean_luminance(&preview))
    })
}

fn histogram_settings(
    raw: &RawData,
    camera: &RawCameraMetadata,
    shadows: f32,
    downscale: u32,
) -> Result<PostProcessSettings> {
    let mut settings = PostProcessSettings {
        shadows,
        ..Default::default()
    };
    let preview = render_preview(raw, camera, &settings, downscale, ScreenOrientation::Landscape)?;
    let (histogram, total) = luma_histogram(&preview);

    // Black point: the deepest cut, at most bin 7, clipping no more
    // than 7% of the pixels.
    let budget = (total as f64 * 0.07) as u64;
    let mut cumulative = 0_u64;
    let mut black_bin = 0_usize;
    for (b, count) in histogram.iter().enumerate().take(8) {
        cumulative += *count as u64;
        if cumulative <= budget {
            black_bin = b;
        } else {
            break;
        }
    }
    settings.blacks = (black_bin as f32 / (HISTOGRAM_BINS - 1) as f32).max(0.02);

    // White point: the earliest bin past 192 with at most 0.5% of the
    // pixels above it.
    let budget = (total as f64 * 0.005) as u64;
    settings.white_point = 1.0;
    let mut above = 0_u64;
    let mut above_at = [0_u64; HISTOGRAM_BINS];
    for b in (0..HISTOGRAM_BINS).rev() {
        above += histogram[b] as u64;
        above_at[b] = above - histogram[b] as u64;
    }
    for b in 192..HISTOGRAM_BINS {
        if above_at[b] <= budget {
            settings.white_point = b as f32 / (HISTOGRAM_BINS - 1) as f32;
            break;
        }
    }

    // Geometric mean of the preview luminance.
    let mut log_sum = 0.0_f64;
    let mut count = 0_u64;
    for pixel in preview.data.chunks_exact(4) {
        let l = (0.114 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.299 * pixel[2] as f32)
            / 255.0;
        log_sum += ((l + 1.0e-3) as f64).ln();
        count += 1;
    }
    settings.scene_luminance = (log_sum / count.max(1) as f64).exp() as f32;

    Ok(settings)
}

/// Fast settings estimate from a 1/8 preview.
pub fn estimate_basic_settings(
    raw: &RawData,
    camera: &RawCameraMetadata,
    shadows: f32,
) -> Result<PostProcessSettings> {
    histogram_settings(raw, camera, shadows, 8)
}

/// Full settings estimate: a 1/4 preview plus the global noise sigma.
pub fn estimate_settings(
    raw: &RawData,
    camera: &RawCameraMetadata,
    shadows: f32,
) -> Result<PostProcessSettings> {
    let mut settings = histogram_settings(raw, camera, shadows, 4)?;
    settings.noise_sigma = estimate_noise(&raw_luma(raw));
    Ok(settings)
}

/// Raw luma plane: the mean of the four CFA sites of each quad, in
/// sensor code units, padding excluded.
fn raw_luma(raw: &RawData) -> ImageBuffer<u16> {
    let w = raw.cropped_width();
    let h = raw.cropped_height();
    let mut data = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let sum: u32 = raw.planes.iter().map(|p| p.pixel(x, y) as u32).sum();
            data.push((sum / 4) as u16);
        }
    }
    ImageBuffer::with_data(data, w, h, 1)
}

/// Immerkaer's global noise estimate over a raw plane, in sensor code
/// units.
pub fn estimate_noise(plane: &ImageBuffer<u16>) -> f32 {
    let w = plane.width as usize;
    let h = plane.height as usize;
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: usize, y: usize| plane.data[y * w + x] as f32;
    let mut sum = 0.0_f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            // Laplacian of Laplacian, insensitive to edges and ramps.
            let response = at(x - 1, y - 1) - 2.0 * at(x, y - 1) + at(x + 1, y - 1)
                - 2.0 * at(x - 1, y)
                + 4.0 * at(x, y)
                - 2.0 * at(x + 1, y)
                + at(x - 1, y + 1)
                - 2.0 * at(x, y + 1)
                + at(x + 1, y + 1);
            sum += response.abs() as f64;
        }
    }
    let scale = (std::f64::consts::PI / 2.0).sqrt() / (6.0 * ((w - 2) * (h - 2)) as f64);
    (scale * sum) as f32
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{
        estimate_exposure_compensation, estimate_noise, estimate_settings, shadows_sweep,
    };
    use crate::bitmap::ImageBuffer;
    use crate::deinterleave::RawData;
    use crate::metadata::{RawCameraMetadata, RawImageMetadata};

    fn test_raw(value: u16) -> RawData {
        let plane = ImageBuffer::with_data(vec![value; 64 * 64], 64, 64, 1);
        RawData {
            planes: [plane.clone(), plane.clone(), plane.clone(), plane],
            preview: ImageBuffer::new(64, 64, 1),
            pad_x: 0,
            pad_y: 0,
            metadata: RawImageMetadata::default(),
        }
    }

    fn camera() -> RawCameraMetadata {
        RawCameraMetadata {
            black_level: [0; 4],
            ..Default::default()
        }
    }

    #[test]
    fn test_exposure_compensation_bright_scene() {
        // Near clipping: no compensation left.
        let raw = test_raw(1020);
        let ev = estimate_exposure_compensation(&raw, &camera());
        assert!(ev.abs() < 0.1, "ev {}", ev);
    }

    #[test]
    fn test_exposure_compensation_dark_scene() {
        // Two stops below clipping leaves about two stops of headroom.
        let raw = test_raw(255);
        let ev = estimate_exposure_compensation(&raw, &camera());
        assert!((ev - 2.0).abs() < 0.25, "ev {}", ev);
    }

    #[test]
    fn test_shadows_sweep_stops_on_flat_growth() {
        // 2% growth per step flattens immediately: stop at the first
        // comparison and back off one step.
        let mut l = 100.0_f32;
        let result = shadows_sweep(|_| {
            l *= 1.02;
            Ok(l)
        })
        .unwrap();
        assert_eq!(result, 2.0);
    }

    #[test]
    fn test_shadows_sweep_follows_growth() {
        // Strong growth up to shadows 8, flat afterwards.
        let result = shadows_sweep(|s| Ok(if s <= 8.0 { s * 100.0 } else { 801.0 })).unwrap();
        assert_eq!(result, 8.0);
    }

    #[test]
    fn test_shadows_sweep_never_flattens() {
        let mut l = 1.0_f32;
        let result = shadows_sweep(|_| {
            l *= 2.0;
            Ok(l)
        })
        .unwrap();
        assert_eq!(result, 14.0);
    }

    #[test]
    fn test_estimate_settings_ranges() {
        let raw = test_raw(400);
        let settings = estimate_settings(&raw, &camera(), 2.0).unwrap();
        assert!(settings.blacks >= 0.02);
        assert!(settings.white_point > settings.blacks);
        assert!(settings.white_point <= 1.0);
        assert!(settings.scene_luminance > 0.0 && settings.scene_luminance <= 1.0);
    }

    #[test]
    fn test_noise_estimate_tracks_sigma() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut noisy = |sigma: f32| {
            let data: Vec<u16> = (0..128 * 128)
                .map(|_| {
                    let u1: f32 = rng.gen::<f32>().max(1e-7);
                    let u2: f32 = rng.gen();
                    let n = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
                    (2000.0 + sigma * n).clamp(0.0, 16383.0) as u16
                })
                .collect();
            ImageBuffer::with_data(data, 128, 128, 1)
        };
        // The estimate works in sensor code units.
        let flat = estimate_noise(&noisy(0.0));
        let low = estimate_noise(&noisy(16.0));
        let high = estimate_noise(&noisy(48.0));
        assert!(flat < 0.5);
        assert!((low - 16.0).abs() < 2.0, "low {}", low);
        assert!(high > low);
    }

    #[test]
    fn test_noise_estimate_from_planes() {
        // Through the settings estimator: noisy planes must yield a
        // larger sigma than flat ones.
        let mut rng = StdRng::seed_from_u64(7);
        let noisy_raw = {
            let mut raw = test_raw(400);
            for plane in raw.planes.iter_mut() {
                for v in plane.data.iter_mut() {
                    let u1: f32 = rng.gen::<f32>().max(1e-7);
                    let u2: f32 = rng.gen();
                    let n = (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos();
                    *v = (*v as f32 + 40.0 * n).clamp(0.0, 1023.0) as u16;
                }
            }
            raw
        };
        let flat = estimate_settings(&test_raw(400), &camera(), 2.0).unwrap();
        let noisy = estimate_settings(&noisy_raw, &camera(), 2.0).unwrap();
        assert!(flat.noise_sigma < 0.5);
        assert!(noisy.noise_sigma > 10.0, "sigma {}", noisy.noise_sigma);
    }
}
