// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - colour.rs
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

//! Everything about colour

mod profile;
mod temperature;

pub use profile::ColourProfile;
pub use temperature::{temperature_from_xy, xy_from_temperature};

use nalgebra::{Matrix3, Vector3};
use num_enum::TryFromPrimitive;

/// Calibration illuminant of a colour matrix pair.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Illuminant {
    StandardA = 0,
    StandardB = 1,
    StandardC = 2,
    D50 = 3,
    #[default]
    D55 = 4,
    D65 = 5,
    D75 = 6,
}

impl Illuminant {
    /// Correlated colour temperature in kelvin.
    pub fn temperature(self) -> f64 {
        match self {
            Self::StandardA => 2850.0,
            Self::StandardB => 4874.0,
            Self::StandardC => 6774.0,
            Self::D50 => 5003.0,
            Self::D55 => 5503.0,
            Self::D65 => 6504.0,
            Self::D75 => 7500.0,
        }
    }

    /// The EXIF/DNG `LightSource` code.
    pub fn dng_code(self) -> u16 {
        match self {
            Self::StandardA => 17,
            Self::StandardB => 18,
            Self::StandardC => 19,
            Self::D50 => 23,
            Self::D55 => 20,
            Self::D65 => 21,
            Self::D75 => 22,
        }
    }
}

lazy_static::lazy_static! {
    /// CIE XYZ (D50 PCS) to linear sRGB, Bradford adapted.
    pub(crate) static ref XYZ_D50_TO_SRGB: Matrix3<f64> = Matrix3::new(
        3.1338561, -1.6168667, -0.4906146,
        -0.9787684, 1.9161415, 0.0334540,
        0.0719453, -0.2289914, 1.4052427,
    );
}

/// XYZ tristimulus for an xy chromaticity at unit luminance.
pub(crate) fn xy_to_xyz(x: f64, y: f64) -> Vector3<f64> {
    if y <= f64::EPSILON {
        return Vector3::new(0.0, 1.0, 0.0);
    }
    Vector3::new(x / y, 1.0, (1.0 - x - y) / y)
}

/// Chromaticity of an XYZ tristimulus.
pub(crate) fn xyz_to_xy(xyz: &Vector3<f64>) -> (f64, f64) {
    let sum = xyz.x + xyz.y + xyz.z;
    if sum.abs() <= f64::EPSILON {
        // D50
        return (0.3457, 0.3585);
    }
    (xyz.x / sum, xyz.y / sum)
}
