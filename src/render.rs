// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - render.rs
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

//! Display rendering: the tonemap pipeline shared by the full
//! resolution post process and the previews.

mod postprocess;
mod preview;

pub use postprocess::postprocess;
pub use preview::render_preview;

use crate::settings::PostProcessSettings;

/// Linear sRGB to XYZ, D50 PCS, Bradford adapted.
#[rustfmt::skip]
pub(crate) const SRGB_TO_XYZ_D50: [f32; 9] = [
    0.436_074_7, 0.385_064_9, 0.143_080_4,
    0.222_504_5, 0.716_878_6, 0.060_616_9,
    0.013_932_2, 0.097_104_5, 0.714_173_3,
];

/// D50 reference white.
const LAB_WHITE: [f32; 3] = [0.964_22, 1.0, 0.825_21];

/// The luminance mapping of the tonemap stage. Monotone, fixed at 0
/// and 1.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ToneCurve {
    shadows: f32,
    blacks: f32,
    white_point: f32,
    /// Reinhard white point derived from the tonemap variance.
    white: f32,
    contrast: f32,
}

impl ToneCurve {
    pub(crate) fn new(settings: &PostProcessSettings) -> Self {
        ToneCurve {
            shadows: settings.shadows.max(1.0),
            blacks: settings.blacks.clamp(0.0, 0.99),
            white_point: settings.white_point.clamp(0.01, 1.0),
            white: (1.0 / settings.tonemap_variance.max(1.0 / 64.0)).clamp(1.0, 64.0),
            contrast: settings.contrast.clamp(0.0, 1.0),
        }
    }

    pub(crate) fn apply(&self, x: f32) -> f32 {
        let x = x.max(0.0);
        // Shadow lift; the endpoints stay put.
        let x = x * self.shadows / (1.0 + (self.shadows - 1.0) * x.min(1.0));
        // Black and white point normalization.
        let x = ((x - self.blacks) / (self.white_point - self.blacks).max(1e-4)).clamp(0.0, 1.0);
        // Extended Reinhard, white point mapped to 1.
        let w = self.white;
        let x = x * w * (1.0 + x / w) / (1.0 + x * w);
        // Contrast blends toward an s-curve about 0.5.
        let s = x * x * (3.0 - 2.0 * x);
        x + self.contrast * (s - x)
    }
}

/// sRGB style encoding with a configurable exponent; `gamma <= 0`
/// selects the standard curve.
pub(crate) fn gamma_encode(x: f32, gamma: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);
    let g = if gamma > 0.0 { gamma } else { 2.4 };
    if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / g) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > 0.008_856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    let cube = t * t * t;
    if cube > 0.008_856 {
        cube
    } else {
        (t - 16.0 / 116.0) / 7.787
    }
}

/// Linear sRGB to CIE Lab (D50).
pub(crate) fn linear_rgb_to_lab(r: f32, g: f32, b: f32) -> [f32; 3] {
    let m = &SRGB_TO_XYZ_D50;
    let x = (m[0] * r + m[1] * g + m[2] * b) / LAB_WHITE[0];
    let y = (m[3] * r + m[4] * g + m[5] * b) / LAB_WHITE[1];
    let z = (m[6] * r + m[7] * g + m[8] * b) / LAB_WHITE[2];
    let fx = lab_f(x);
    let fy = lab_f(y);
    let fz = lab_f(z);
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// CIE Lab (D50) back to linear sRGB.
pub(crate) fn lab_to_linear_rgb(l: f32, a: f32, b: f32) -> [f32; 3] {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;
    let x = lab_f_inv(fx) * LAB_WHITE[0];
    let y = lab_f_inv(fy) * LAB_WHITE[1];
    let z = lab_f_inv(fz) * LAB_WHITE[2];
    // Inverse of SRGB_TO_XYZ_D50.
    let r = 3.133_856_1 * x - 1.616_866_7 * y - 0.490_614_6 * z;
    let g = -0.978_768_4 * x + 1.916_141_5 * y + 0.033_454 * z;
    let b = 0.071_945_3 * x - 0.228_991_4 * y + 1.405_242_7 * z;
    [r, g, b]
}

/// Chroma gain for the hue at (a, b): the base saturation plus band
/// selective boosts around the blue and green hue angles.
pub(crate) fn chroma_gain(a: f32, b: f32, settings: &PostProcessSettings) -> f32 {
    let mut gain = settings.saturation.max(0.0);
    if a == 0.0 && b == 0.0 {
        return gain;
    }
    let hue = b.atan2(a);
    // -b is blue; gate on a cosine lobe around -90 degrees.
    let blue = (hue + std::f32::consts::FRAC_PI_2).cos().max(0.0);
    gain *= 1.0 + (settings.blue_saturation - 1.0) * blue * blue;
    // -a is green; lobe around 180 degrees.
    let green = (-hue.cos()).max(0.0);
    gain *= 1.0 + (settings.green_saturation - 1.0) * green * green;
    gain
}

#[cfg(test)]
mod test {
    use super::{gamma_encode, lab_to_linear_rgb, linear_rgb_to_lab, ToneCurve};
    use crate::settings::PostProcessSettings;

    #[test]
    fn test_tone_curve_monotone() {
        let settings = PostProcessSettings {
            shadows: 4.0,
            blacks: 0.05,
            white_point: 0.9,
            contrast: 0.6,
            tonemap_variance: 0.25,
            ..Default::default()
        };
        let curve = ToneCurve::new(&settings);
        let mut last = -1.0_f32;
        for i in 0..=100 {
            let y = curve.apply(i as f32 / 100.0);
            assert!(y >= last - 1e-6, "not monotone at {}", i);
            assert!((0.0..=1.0 + 1e-6).contains(&y));
            last = y;
        }
        assert!(curve.apply(0.0) < 1e-6);
        assert!(curve.apply(1.0) > 0.999);
    }

    #[test]
    fn test_shadow_lift_raises_midtones() {
        let base = ToneCurve::new(&PostProcessSettings::default());
        let lifted = ToneCurve::new(&PostProcessSettings {
            shadows: 6.0,
            ..Default::default()
        });
        assert!(lifted.apply(0.1) > base.apply(0.1));
    }

    #[test]
    fn test_lab_round_trip() {
        for rgb in [[0.2_f32, 0.4, 0.7], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [0.8, 0.1, 0.05]] {
            let lab = linear_rgb_to_lab(rgb[0], rgb[1], rgb[2]);
            let back = lab_to_linear_rgb(lab[0], lab[1], lab[2]);
            for (a, b) in rgb.iter().zip(&back) {
                assert!((a - b).abs() < 1e-3, "{:?} -> {:?}", rgb, back);
            }
        }
    }

    #[test]
    fn test_grey_has_no_chroma() {
        let lab = linear_rgb_to_lab(0.5, 0.5, 0.5);
        assert!(lab[1].abs() < 0.5 && lab[2].abs() < 0.5);
        assert!(lab[0] > 0.0);
    }

    #[test]
    fn test_gamma_encode() {
        assert_eq!(gamma_encode(0.0, 2.2), 0.0);
        assert!((gamma_encode(1.0, 2.2) - 1.0).abs() < 1e-6);
        // The standard sRGB curve at the default exponent.
        assert!((gamma_encode(0.5, 2.4) - 0.735_356).abs() < 1e-3);
    }
}
