// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - colour/temperature.rs
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

//! Correlated colour temperature along the Robertson locus.

/// One isotherm of the Robertson table: reciprocal temperature in
/// mired, CIE 1960 (u, v) on the Planckian locus, isotherm slope.
struct Isotherm {
    r: f64,
    u: f64,
    v: f64,
    t: f64,
}

/// Tint is the signed uv distance to the locus scaled by this factor.
const TINT_SCALE: f64 = -3000.0;

#[rustfmt::skip]
const TEMP_TABLE: [Isotherm; 31] = [
    Isotherm { r: 0.0,   u: 0.18006, v: 0.26352, t: -0.24341 },
    Isotherm { r: 10.0,  u: 0.18066, v: 0.26589, t: -0.25479 },
    Isotherm { r: 20.0,  u: 0.18133, v: 0.26846, t: -0.26876 },
    Isotherm { r: 30.0,  u: 0.18208, v: 0.27119, t: -0.28539 },
    Isotherm { r: 40.0,  u: 0.18293, v: 0.27407, t: -0.30470 },
    Isotherm { r: 50.0,  u: 0.18388, v: 0.27709, t: -0.32675 },
    Isotherm { r: 60.0,  u: 0.18494, v: 0.28021, t: -0.35156 },
    Isotherm { r: 70.0,  u: 0.18611, v: 0.28342, t: -0.37915 },
    Isotherm { r: 80.0,  u: 0.18740, v: 0.28668, t: -0.40955 },
    Isotherm { r: 90.0,  u: 0.18880, v: 0.28997, t: -0.44278 },
    Isotherm { r: 100.0, u: 0.19032, v: 0.29326, t: -0.47888 },
    Isotherm { r: 125.0, u: 0.19462, v: 0.30141, t: -0.58204 },
    Isotherm { r: 150.0, u: 0.19962, v: 0.30921, t: -0.70471 },
    Isotherm { r: 175.0, u: 0.20525, v: 0.31647, t: -0.84901 },
    Isotherm { r: 200.0, u: 0.21142, v: 0.32312, t: -1.0182 },
    Isotherm { r: 225.0, u: 0.21807, v: 0.32909, t: -1.2168 },
    Isotherm { r: 250.0, u: 0.22511, v: 0.33439, t: -1.4512 },
    Isotherm { r: 275.0, u: 0.23247, v: 0.33904, t: -1.7298 },
    Isotherm { r: 300.0, u: 0.24010, v: 0.34308, t: -2.0637 },
    Isotherm { r: 325.0, u: 0.24792, v: 0.34655, t: -2.4681 },
    Isotherm { r: 350.0, u: 0.25591, v: 0.34951, t: -2.9641 },
    Isotherm { r: 375.0, u: 0.26400, v: 0.35200, t: -3.5814 },
    Isotherm { r: 400.0, u: 0.27218, v: 0.35407, t: -4.3633 },
    Isotherm { r: 425.0, u: 0.28039, v: 0.35577, t: -5.3762 },
    Isotherm { r: 450.0, u: 0.28863, v: 0.35714, t: -6.7262 },
    Isotherm { r: 475.0, u: 0.29685, v: 0.35823, t: -8.5955 },
    Isotherm { r: 500.0, u: 0.30505, v: 0.35907, t: -11.324 },
    Isotherm { r: 525.0, u: 0.31320, v: 0.35968, t: -15.628 },
    Isotherm { r: 550.0, u: 0.32129, v: 0.36011, t: -23.325 },
    Isotherm { r: 575.0, u: 0.32931, v: 0.36038, t: -40.770 },
    Isotherm { r: 600.0, u: 0.33724, v: 0.36051, t: -116.45 },
];

fn xy_to_uv(x: f64, y: f64) -> (f64, f64) {
    let d = 1.5 - x + 6.0 * y;
    (2.0 * x / d, 3.0 * y / d)
}

fn uv_to_xy(u: f64, v: f64) -> (f64, f64) {
    let d = u - 4.0 * v + 2.0;
    (1.5 * u / d, v / d)
}

/// Correlated colour temperature (kelvin) and tint for an xy white point.
pub fn temperature_from_xy(x: f64, y: f64) -> (f64, f64) {
    let (u, v) = xy_to_uv(x, y);

    let mut last_dt = 0.0;
    let mut last_du = 0.0;
    let mut last_dv = 0.0;
    for index in 1..TEMP_TABLE.len() {
        let line = &TEMP_TABLE[index];
        // Unit vector along the isotherm.
        let len = (1.0 + line.t * line.t).sqrt();
        let du = 1.0 / len;
        let dv = line.t / len;

        // Signed distance of the sample from this isotherm.
        let uu = u - line.u;
        let vv = v - line.v;
        let mut dt = -uu * dv + vv * du;

        if dt <= 0.0 || index == TEMP_TABLE.len() - 1 {
            dt = -dt.min(0.0);
            let f = if index == 1 {
                0.0
            } else {
                (dt / (last_dt + dt)).clamp(0.0, 1.0)
            };

            let mired = TEMP_TABLE[index - 1].r * f + line.r * (1.0 - f);
            let temperature = 1.0e6 / mired.max(1.0);

            // Project onto the interpolated isotherm for the tint.
            let uu = u - (TEMP_TABLE[index - 1].u * f + line.u * (1.0 - f));
            let vv = v - (TEMP_TABLE[index - 1].v * f + line.v * (1.0 - f));
            let mut dui = du * (1.0 - f) + last_du * f;
            let mut dvi = dv * (1.0 - f) + last_dv * f;
            let len = (dui * dui + dvi * dvi).sqrt();
            dui /= len;
            dvi /= len;
            let tint = (uu * dui + vv * dvi) * TINT_SCALE;

            return (temperature, tint);
        }

        last_dt = dt;
        last_du = du;
        last_dv = dv;
    }

    (1.0e6 / TEMP_TABLE[TEMP_TABLE.len() - 1].r, 0.0)
}

/// xy white point for a temperature (kelvin) and tint.
pub fn xy_from_temperature(temperature: f64, tint: f64) -> (f64, f64) {
    let r = 1.0e6 / temperature.clamp(1667.0, 100_000.0);

    let mut index = 1;
    while index < TEMP_TABLE.len() - 1 && TEMP_TABLE[index].r < r {
        index += 1;
    }
    let lo = &TEMP_TABLE[index - 1];
    let hi = &TEMP_TABLE[index];
    let f = ((hi.r - r) / (hi.r - lo.r)).clamp(0.0, 1.0);

    let mut u = lo.u * f + hi.u * (1.0 - f);
    let mut v = lo.v * f + hi.v * (1.0 - f);

    // Interpolated isotherm direction for the tint offset.
    let len = (1.0 + lo.t * lo.t).sqrt();
    let (du_lo, dv_lo) = (1.0 / len, lo.t / len);
    let len = (1.0 + hi.t * hi.t).sqrt();
    let (du_hi, dv_hi) = (1.0 / len, hi.t / len);
    let mut du = du_lo * f + du_hi * (1.0 - f);
    let mut dv = dv_lo * f + dv_hi * (1.0 - f);
    let len = (du * du + dv * dv).sqrt();
    du /= len;
    dv /= len;

    u += du * tint / TINT_SCALE;
    v += dv * tint / TINT_SCALE;

    uv_to_xy(u, v)
}

#[cfg(test)]
mod test {
    use super::{temperature_from_xy, uv_to_xy, xy_from_temperature, xy_to_uv};

    #[test]
    fn test_uv_round_trip() {
        let (u, v) = xy_to_uv(0.3127, 0.3290);
        let (x, y) = uv_to_xy(u, v);
        assert!((x - 0.3127).abs() < 1e-12);
        assert!((y - 0.3290).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_round_trip() {
        for temp in [2850.0, 4000.0, 5003.0, 6504.0, 7500.0] {
            let (x, y) = xy_from_temperature(temp, 0.0);
            let (recovered, tint) = temperature_from_xy(x, y);
            assert!(
                (recovered - temp).abs() / temp < 0.01,
                "{} -> {}",
                temp,
                recovered
            );
            assert!(tint.abs() < 2.0, "tint {} at {}K", tint, temp);
        }
    }

    #[test]
    fn test_tint_round_trip() {
        let (x, y) = xy_from_temperature(5000.0, 12.0);
        let (_, tint) = temperature_from_xy(x, y);
        assert!((tint - 12.0).abs() < 1.0, "tint {}", tint);
    }

    #[test]
    fn test_temperature_monotonic_along_locus() {
        // D65 is bluer than illuminant A.
        let (xa, ya) = xy_from_temperature(2850.0, 0.0);
        let (xd, yd) = xy_from_temperature(6504.0, 0.0);
        assert!(xa > xd);
        assert!(ya > yd);
    }
}
