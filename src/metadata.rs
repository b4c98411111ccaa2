// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - metadata.rs
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

//! Per frame and per camera metadata.

use nalgebra::{Matrix3, Vector3};
use num_enum::TryFromPrimitive;

use crate::bitmap::ImageBuffer;
use crate::colour::Illuminant;
use crate::mosaic::SensorArrangement;
use crate::{Error, Result};

/// Device orientation at capture time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ScreenOrientation {
    #[default]
    Landscape = 0,
    Portrait = 1,
    ReverseLandscape = 2,
    ReversePortrait = 3,
}

/// Metadata attached to a single exposure.
#[derive(Clone, Debug)]
pub struct RawImageMetadata {
    pub iso: i32,
    /// Exposure time in nanoseconds.
    pub exposure_time: i64,
    /// Exposure compensation as a (numerator, denominator) ratio.
    pub exposure_compensation: (i32, i32),
    /// Camera neutral. All components >= 0, at least one > 0.
    pub as_shot: [f64; 3],
    /// Per CFA position channel trim.
    pub colour_correction: [f32; 4],
    /// One gain grid per CFA position, all the same dimensions.
    pub lens_shading_map: [ImageBuffer<f32>; 4],
    pub orientation: ScreenOrientation,
}

impl Default for RawImageMetadata {
    fn default() -> Self {
        let flat = ImageBuffer::with_data(vec![1.0_f32; 4], 2, 2, 1);
        RawImageMetadata {
            iso: 100,
            exposure_time: 10_000_000,
            exposure_compensation: (0, 1),
            as_shot: [1.0, 1.0, 1.0],
            colour_correction: [1.0; 4],
            lens_shading_map: [flat.clone(), flat.clone(), flat.clone(), flat],
            orientation: ScreenOrientation::Landscape,
        }
    }
}

impl RawImageMetadata {
    /// The shading map planes must agree in size.
    pub fn validate_shading_map(&self) -> Result<()> {
        let w = self.lens_shading_map[0].width;
        let h = self.lens_shading_map[0].height;
        if w == 0 || h == 0 {
            return Err(Error::InvalidInput("empty lens shading map".into()));
        }
        for plane in &self.lens_shading_map[1..] {
            if plane.width != w || plane.height != h {
                return Err(Error::InvalidInput(
                    "lens shading planes disagree in size".into(),
                ));
            }
        }
        Ok(())
    }

    /// Exposure compensation as a float, 0 for a degenerate ratio.
    pub fn exposure_compensation_value(&self) -> f64 {
        if self.exposure_compensation.1 == 0 {
            return 0.0;
        }
        self.exposure_compensation.0 as f64 / self.exposure_compensation.1 as f64
    }
}

/// Static metadata of the sensor and its calibration.
#[derive(Clone, Debug)]
pub struct RawCameraMetadata {
    pub sensor_arrangement: SensorArrangement,
    /// Black level per CFA position.
    pub black_level: [u16; 4],
    pub white_level: u16,
    pub colour_matrix1: Matrix3<f64>,
    pub colour_matrix2: Matrix3<f64>,
    pub forward_matrix1: Matrix3<f64>,
    pub forward_matrix2: Matrix3<f64>,
    pub colour_illuminant1: Illuminant,
    pub colour_illuminant2: Illuminant,
    pub apertures: Vec<f64>,
    pub focal_lengths: Vec<f64>,
}

impl Default for RawCameraMetadata {
    fn default() -> Self {
        // The neutral camera: unit colour response, forward matrices
        // mapping a balanced neutral straight to the D50 white.
        let forward = Matrix3::from_diagonal(&Vector3::new(0.9642, 1.0, 0.8252));
        RawCameraMetadata {
            sensor_arrangement: SensorArrangement::Rggb,
            black_level: [64; 4],
            white_level: 1023,
            colour_matrix1: Matrix3::identity(),
            colour_matrix2: Matrix3::identity(),
            forward_matrix1: forward,
            forward_matrix2: forward,
            colour_illuminant1: Illuminant::StandardA,
            colour_illuminant2: Illuminant::D65,
            apertures: vec![1.8],
            focal_lengths: vec![4.38],
        }
    }
}

impl RawCameraMetadata {
    /// Black level of one CFA plane.
    pub fn black(&self, plane: usize) -> u16 {
        self.black_level[plane]
    }
}
