// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - colour/profile.rs
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

//! Camera colour profile: camera space to the sRGB PCS.

use nalgebra::{Matrix3, Vector3};

use super::{temperature_from_xy, xy_from_temperature, xy_to_xyz, xyz_to_xy, XYZ_D50_TO_SRGB};
use crate::metadata::{RawCameraMetadata, RawImageMetadata};
use crate::settings::PostProcessSettings;
use crate::{Error, Result};

/// Iteration cap for the as-shot neutral inversion.
const NEUTRAL_ITERATIONS: usize = 30;

/// The colour transform for one frame.
///
/// `camera_to_srgb` maps white balanced camera values to linear sRGB;
/// the white balance itself is the per channel division by
/// `camera_white`.
#[derive(Clone, Debug)]
pub struct ColourProfile {
    pub camera_to_srgb: Matrix3<f64>,
    pub camera_white: Vector3<f64>,
    pub temperature: f64,
    pub tint: f64,
}

/// Interpolation weight of the illuminant1 matrices, in reciprocal
/// temperature space, clamped to [0, 1].
fn illuminant1_weight(camera: &RawCameraMetadata, temperature: f64) -> f64 {
    let t1 = camera.colour_illuminant1.temperature();
    let t2 = camera.colour_illuminant2.temperature();
    if (t1 - t2).abs() < f64::EPSILON {
        return 1.0;
    }
    let inv = 1.0 / temperature.max(1.0);
    ((inv - 1.0 / t2) / (1.0 / t1 - 1.0 / t2)).clamp(0.0, 1.0)
}

fn interpolate(m1: &Matrix3<f64>, m2: &Matrix3<f64>, w: f64) -> Matrix3<f64> {
    m1 * w + m2 * (1.0 - w)
}

impl ColourProfile {
    /// Profile for an explicit temperature and tint.
    pub fn from_temperature(
        camera: &RawCameraMetadata,
        temperature: f64,
        tint: f64,
    ) -> Result<Self> {
        let (x, y) = xy_from_temperature(temperature, tint);
        let w = illuminant1_weight(camera, temperature);
        let cm = interpolate(&camera.colour_matrix1, &camera.colour_matrix2, w);
        let fm = interpolate(&camera.forward_matrix1, &camera.forward_matrix2, w);

        let mut camera_white = cm * xy_to_xyz(x, y);
        let max = camera_white.max();
        if max <= 0.0 {
            return Err(Error::InvalidState(
                "colour matrix maps white point outside the sensor gamut".into(),
            ));
        }
        camera_white /= max;

        Ok(ColourProfile {
            camera_to_srgb: *XYZ_D50_TO_SRGB * fm,
            camera_white,
            temperature,
            tint,
        })
    }

    /// Profile for the camera reported neutral vector.
    ///
    /// The vector is normalized by its maximum first, so any positive
    /// scaling of the same neutral produces the identical profile.
    pub fn from_as_shot(camera: &RawCameraMetadata, as_shot: &[f64; 3]) -> Result<Self> {
        let max = as_shot.iter().cloned().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Err(Error::InvalidInput("as-shot neutral is all zero".into()));
        }
        let neutral = Vector3::new(as_shot[0] / max, as_shot[1] / max, as_shot[2] / max);

        // Invert the temperature -> neutral mapping. The white point and
        // the matrix interpolation depend on each other, iterate until
        // the chromaticity settles.
        let (mut x, mut y) = (0.3457_f64, 0.3585_f64);
        let mut temperature = 5000.0;
        let mut tint = 0.0;
        for _ in 0..NEUTRAL_ITERATIONS {
            let (t, ti) = temperature_from_xy(x, y);
            temperature = t;
            tint = ti;

            let w = illuminant1_weight(camera, temperature);
            let cm = interpolate(&camera.colour_matrix1, &camera.colour_matrix2, w);
            let inverse = cm.try_inverse().ok_or_else(|| {
                Error::InvalidState("colour matrix is singular".into())
            })?;
            let (nx, ny) = xyz_to_xy(&(inverse * neutral));
            let delta = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if delta < 1.0e-6 {
                break;
            }
        }

        let w = illuminant1_weight(camera, temperature);
        let fm = interpolate(&camera.forward_matrix1, &camera.forward_matrix2, w);

        Ok(ColourProfile {
            camera_to_srgb: *XYZ_D50_TO_SRGB * fm,
            camera_white: neutral,
            temperature,
            tint,
        })
    }

    /// Profile selected by the settings: an explicit temperature/tint
    /// pair when either is set, the frame's as-shot neutral otherwise.
    pub fn for_settings(
        camera: &RawCameraMetadata,
        metadata: &RawImageMetadata,
        settings: &PostProcessSettings,
    ) -> Result<Self> {
        if settings.temperature != 0.0 || settings.tint != 0.0 {
            Self::from_temperature(camera, settings.temperature as f64, settings.tint as f64)
        } else {
            Self::from_as_shot(camera, &metadata.as_shot)
        }
    }
}
