// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - settings.rs
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

//! Post process settings.

/// Settings driving the tonemap pipeline and the encoders.
///
/// When both `temperature` and `tint` are 0 the white balance comes
/// from the frame's as-shot neutral.
#[derive(Clone, Debug, PartialEq)]
pub struct PostProcessSettings {
    pub temperature: f32,
    pub tint: f32,
    /// Exposure bias in stops.
    pub exposure: f32,
    /// Shadow lift multiplier, >= 1.
    pub shadows: f32,
    /// Black point in [0, 1].
    pub blacks: f32,
    /// White point in [0, 1].
    pub white_point: f32,
    /// Encoding gamma; 0 selects the standard sRGB curve.
    pub gamma: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub blue_saturation: f32,
    pub green_saturation: f32,
    /// Controls the tonemap roll-off; smaller values compress more.
    pub tonemap_variance: f32,
    /// Fine unsharp mask gain.
    pub sharpen0: f32,
    /// Coarse unsharp mask gain.
    pub sharpen1: f32,
    /// Edge aware chroma smoothing strength; 0 disables.
    pub chroma_eps: f32,
    /// Geometric mean luminance measured by the scene analyzer.
    pub scene_luminance: f32,
    /// Global noise sigma measured by the scene analyzer.
    pub noise_sigma: f32,
    /// JPEG quality in [1, 100].
    pub jpeg_quality: u8,
    /// Wavelet shrinkage weight of the denoiser.
    pub spatial_denoise_aggressiveness: f32,
    pub flipped: bool,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        PostProcessSettings {
            temperature: 0.0,
            tint: 0.0,
            exposure: 0.0,
            shadows: 1.0,
            blacks: 0.0,
            white_point: 1.0,
            gamma: 2.2,
            contrast: 0.5,
            saturation: 1.0,
            blue_saturation: 1.0,
            green_saturation: 1.0,
            tonemap_variance: 0.25,
            sharpen0: 1.0,
            sharpen1: 0.5,
            chroma_eps: 8.0,
            scene_luminance: 0.0,
            noise_sigma: 0.0,
            jpeg_quality: 95,
            spatial_denoise_aggressiveness: 1.0,
            flipped: false,
        }
    }
}
