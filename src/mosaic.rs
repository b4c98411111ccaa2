// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - mosaic.rs
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

//! CFA mosaic arrangements.

use num_enum::TryFromPrimitive;

/// A CFA colour component.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum CfaColour {
    Red = 0,
    Green = 1,
    Blue = 2,
}

impl CfaColour {
    pub fn to_char(self) -> char {
        match self {
            Self::Red => 'R',
            Self::Green => 'G',
            Self::Blue => 'B',
        }
    }
}

/// 2x2 Bayer sensor arrangement. Position 0 is the top-left CFA site,
/// 1 top-right, 2 bottom-left, 3 bottom-right; deinterleaved planes use
/// the same canonical order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum SensorArrangement {
    #[default]
    Rggb = 0,
    Grbg = 1,
    Gbrg = 2,
    Bggr = 3,
}

impl SensorArrangement {
    /// Colour at each of the four CFA positions.
    pub fn colours(self) -> [CfaColour; 4] {
        use CfaColour::*;
        match self {
            Self::Rggb => [Red, Green, Green, Blue],
            Self::Grbg => [Green, Red, Blue, Green],
            Self::Gbrg => [Green, Blue, Red, Green],
            Self::Bggr => [Blue, Green, Green, Red],
        }
    }

    /// Plane index of the red CFA site.
    pub fn red_index(self) -> usize {
        match self {
            Self::Rggb => 0,
            Self::Grbg => 1,
            Self::Gbrg => 2,
            Self::Bggr => 3,
        }
    }

    /// Plane index of the blue CFA site.
    pub fn blue_index(self) -> usize {
        match self {
            Self::Rggb => 3,
            Self::Grbg => 2,
            Self::Gbrg => 1,
            Self::Bggr => 0,
        }
    }

    /// Plane indices of the two green CFA sites, in row-major order.
    pub fn green_indices(self) -> [usize; 2] {
        match self {
            Self::Rggb | Self::Bggr => [1, 2],
            Self::Grbg | Self::Gbrg => [0, 3],
        }
    }

    /// Plane permutation producing RGGB order for the DNG writer.
    ///
    /// This table is authoritative; it is not derived from the colour
    /// layout at write time. The greens keep their relative order, red
    /// and blue are swapped into place.
    pub fn dng_plane_order(self) -> [usize; 4] {
        match self {
            Self::Rggb => [0, 1, 2, 3],
            Self::Grbg => [1, 0, 3, 2],
            Self::Gbrg => [2, 0, 3, 1],
            Self::Bggr => [3, 1, 2, 0],
        }
    }
}

impl std::fmt::Display for SensorArrangement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.colours() {
            write!(f, "{}", c.to_char())?;
        }
        Ok(())
    }
}
