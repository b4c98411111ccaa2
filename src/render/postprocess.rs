// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - render/postprocess.rs
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

//! Full resolution tonemap from 4 linear CFA planes to RGB8.

use rayon::prelude::*;

use super::{chroma_gain, gamma_encode, lab_to_linear_rgb, linear_rgb_to_lab, ToneCurve};
use crate::bitmap::ImageBuffer;
use crate::colour::ColourProfile;
use crate::metadata::{RawCameraMetadata, RawImageMetadata};
use crate::mosaic::CfaColour;
use crate::settings::PostProcessSettings;
use crate::{Error, Result};

/// Separable [1 2 1]/4 blur of a single channel plane.
fn blur3(input: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut horizontal = vec![0.0_f32; input.len()];
    horizontal
        .par_chunks_mut(width)
        .zip(input.par_chunks(width))
        .for_each(|(out, row)| {
            for x in 0..width {
                let l = row[x.saturating_sub(1)];
                let r = row[(x + 1).min(width - 1)];
                out[x] = 0.25 * l + 0.5 * row[x] + 0.25 * r;
            }
        });
    let mut out = vec![0.0_f32; input.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let up = y.saturating_sub(1);
        let down = (y + 1).min(height - 1);
        for x in 0..width {
            row[x] = 0.25 * horizontal[up * width + x]
                + 0.5 * horizontal[y * width + x]
                + 0.25 * horizontal[down * width + x];
        }
    });
    out
}

/// Luma guided 3x3 smoothing of the chroma channels.
fn smooth_chroma(l: &[f32], a: &mut Vec<f32>, b: &mut Vec<f32>, width: usize, height: usize, eps: f32) {
    let a_in = a.clone();
    let b_in = b.clone();
    let inv_eps2 = 1.0 / (eps * eps);
    a.par_chunks_mut(width)
        .zip(b.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (a_row, b_row))| {
            for x in 0..width {
                let centre = l[y * width + x];
                let mut wa = 0.0;
                let mut wb = 0.0;
                let mut wsum = 0.0;
                for dy in -1_i64..=1 {
                    for dx in -1_i64..=1 {
                        let nx = (x as i64 + dx).clamp(0, width as i64 - 1) as usize;
                        let ny = (y as i64 + dy).clamp(0, height as i64 - 1) as usize;
                        let dl = l[ny * width + nx] - centre;
                        let w = 1.0 / (1.0 + dl * dl * inv_eps2);
                        wa += w * a_in[ny * width + nx];
                        wb += w * b_in[ny * width + nx];
                        wsum += w;
                    }
                }
                a_row[x] = wa / wsum;
                b_row[x] = wb / wsum;
            }
        });
}

/// Tonemap the denoised planes into an interleaved RGB8 image.
///
/// The planes keep their wavelet padding; `pad_x`/`pad_y` are removed
/// so the output measures `2 * (plane_w - pad_x)` by
/// `2 * (plane_h - pad_y)` pixels.
#[allow(clippy::too_many_arguments)]
pub fn postprocess(
    planes: &[ImageBuffer<u16>; 4],
    pad_x: u32,
    pad_y: u32,
    metadata: &RawImageMetadata,
    camera: &RawCameraMetadata,
    black_level: [u16; 4],
    white_level: u16,
    settings: &PostProcessSettings,
) -> Result<ImageBuffer<u8>> {
    metadata.validate_shading_map()?;
    let pw = planes[0].width;
    let ph = planes[0].height;
    for plane in planes.iter() {
        if plane.width != pw || plane.height != ph {
            return Err(Error::InvalidState("CFA planes disagree in size".into()));
        }
    }
    if pad_x >= pw || pad_y >= ph {
        return Err(Error::InvalidInput("padding exceeds the plane".into()));
    }

    let out_w = ((pw - pad_x) * 2) as usize;
    let out_h = ((ph - pad_y) * 2) as usize;
    log::debug!("postprocess {} planes -> {}x{}", planes.len(), out_w, out_h);

    let profile = ColourProfile::for_settings(camera, metadata, settings)?;
    let ctos: Vec<f32> = profile.camera_to_srgb.iter().map(|&v| v as f32).collect();
    // nalgebra stores column major.
    let matrix = [
        ctos[0], ctos[3], ctos[6],
        ctos[1], ctos[4], ctos[7],
        ctos[2], ctos[5], ctos[8],
    ];
    let white = [
        profile.camera_white.x.max(1e-4) as f32,
        profile.camera_white.y.max(1e-4) as f32,
        profile.camera_white.z.max(1e-4) as f32,
    ];

    let arrangement = camera.sensor_arrangement;
    let red = arrangement.red_index();
    let blue = arrangement.blue_index();
    let greens = arrangement.green_indices();
    let colours = arrangement.colours();

    let range: Vec<f32> = (0..4)
        .map(|k| (white_level.saturating_sub(black_level[k])).max(1) as f32)
        .collect();
    let exposure = 2.0_f32.powf(settings.exposure);
    let curve = ToneCurve::new(settings);
    let shading = &metadata.lens_shading_map;

    // Stage one: per pixel colour into Lab planes.
    let mut l_plane = vec![0.0_f32; out_w * out_h];
    let mut a_plane = vec![0.0_f32; out_w * out_h];
    let mut b_plane = vec![0.0_f32; out_w * out_h];
    l_plane
        .par_chunks_mut(out_w)
        .zip(a_plane.par_chunks_mut(out_w))
        .zip(b_plane.par_chunks_mut(out_w))
        .enumerate()
        .for_each(|(y, ((l_row, a_row), b_row))| {
            let py = y as u32 / 2;
            let map_y = y as f32 / (out_h - 1).max(1) as f32;
            for x in 0..out_w {
                let px = x as u32 / 2;
                let position = (y % 2) * 2 + (x % 2);
                let map_x = x as f32 / (out_w - 1).max(1) as f32;

                let linear = |k: usize| -> f32 {
                    let v = planes[k].pixel(px, py).saturating_sub(black_level[k]) as f32
                        / range[k]
                        * metadata.colour_correction[k];
                    let map = &shading[k];
                    let gain = map.sample_bilinear(
                        map_x * (map.width - 1) as f32,
                        map_y * (map.height - 1) as f32,
                    );
                    v * gain
                };

                // CFA position aware reconstruction: greens come from
                // the collocated site when this position is green.
                let g = if colours[position] == CfaColour::Green {
                    linear(position)
                } else {
                    0.5 * (linear(greens[0]) + linear(greens[1]))
                };
                let mut rgb = [linear(red) / white[0], g / white[1], linear(blue) / white[2]];

                let r = matrix[0] * rgb[0] + matrix[1] * rgb[1] + matrix[2] * rgb[2];
                let gg = matrix[3] * rgb[0] + matrix[4] * rgb[1] + matrix[5] * rgb[2];
                let b = matrix[6] * rgb[0] + matrix[7] * rgb[1] + matrix[8] * rgb[2];
                rgb = [r, gg, b];

                for v in rgb.iter_mut() {
                    *v = curve.apply(*v * exposure);
                }

                let lab = linear_rgb_to_lab(rgb[0], rgb[1], rgb[2]);
                l_row[x] = lab[0];
                a_row[x] = lab[1];
                b_row[x] = lab[2];
            }
        });

    // Stage two: chroma adjustments.
    if settings.chroma_eps > 0.0 {
        smooth_chroma(
            &l_plane,
            &mut a_plane,
            &mut b_plane,
            out_w,
            out_h,
            settings.chroma_eps,
        );
    }
    a_plane
        .par_iter_mut()
        .zip(b_plane.par_iter_mut())
        .for_each(|(a, b)| {
            let gain = chroma_gain(*a, *b, settings);
            *a *= gain;
            *b *= gain;
        });

    // Stage three: two scale unsharp mask on the lightness.
    if settings.sharpen0 > 0.0 || settings.sharpen1 > 0.0 {
        let fine = blur3(&l_plane, out_w, out_h);
        let coarse = blur3(&blur3(&fine, out_w, out_h), out_w, out_h);
        l_plane
            .par_iter_mut()
            .zip(fine.par_iter())
            .zip(coarse.par_iter())
            .for_each(|((l, f), c)| {
                *l = (*l + settings.sharpen0 * (*l - f) + settings.sharpen1 * (f - c)).max(0.0);
            });
    }

    // Stage four: back to gamma encoded RGB8.
    let mut out = ImageBuffer::new(out_w as u32, out_h as u32, 3);
    let gamma = settings.gamma;
    out.data
        .par_chunks_mut(out_w * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..out_w {
                let i = y * out_w + x;
                let rgb = lab_to_linear_rgb(l_plane[i], a_plane[i], b_plane[i]);
                for c in 0..3 {
                    row[x * 3 + c] =
                        (gamma_encode(rgb[c], gamma) * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
                }
            }
        });

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::postprocess;
    use crate::bitmap::ImageBuffer;
    use crate::metadata::{RawCameraMetadata, RawImageMetadata};
    use crate::settings::PostProcessSettings;

    fn flat_planes(value: u16) -> [ImageBuffer<u16>; 4] {
        let plane = ImageBuffer::with_data(vec![value; 64 * 64], 64, 64, 1);
        [plane.clone(), plane.clone(), plane.clone(), plane]
    }

    fn neutral_camera() -> RawCameraMetadata {
        RawCameraMetadata {
            black_level: [0; 4],
            white_level: 16384,
            ..Default::default()
        }
    }

    #[test]
    fn test_output_dimensions_crop_padding() {
        let planes = flat_planes(8000);
        let out = postprocess(
            &planes,
            14,
            14,
            &RawImageMetadata::default(),
            &neutral_camera(),
            [0; 4],
            16384,
            &PostProcessSettings::default(),
        )
        .unwrap();
        assert_eq!(out.width, 100);
        assert_eq!(out.height, 100);
        assert_eq!(out.cc, 3);
    }

    #[test]
    fn test_neutral_grey_stays_neutral() {
        let planes = flat_planes(4000);
        let settings = PostProcessSettings {
            sharpen0: 0.0,
            sharpen1: 0.0,
            chroma_eps: 0.0,
            ..Default::default()
        };
        let out = postprocess(
            &planes,
            0,
            0,
            &RawImageMetadata::default(),
            &neutral_camera(),
            [0; 4],
            16384,
            &settings,
        )
        .unwrap();
        let p = &out.data[0..3];
        assert!(p[0] > 0 && p[0] < 255);
        assert!((p[0] as i32 - p[1] as i32).abs() <= 2, "{:?}", p);
        assert!((p[1] as i32 - p[2] as i32).abs() <= 2, "{:?}", p);
        // Uniform input renders uniformly.
        assert!(out.data.chunks(3).all(|c| c == p));
    }

    #[test]
    fn test_brighter_input_brighter_output() {
        let settings = PostProcessSettings::default();
        let camera = neutral_camera();
        let metadata = RawImageMetadata::default();
        let dark = postprocess(&flat_planes(1000), 0, 0, &metadata, &camera, [0; 4], 16384, &settings)
            .unwrap();
        let bright =
            postprocess(&flat_planes(9000), 0, 0, &metadata, &camera, [0; 4], 16384, &settings)
                .unwrap();
        assert!(bright.data[1] > dark.data[1]);
    }

    #[test]
    fn test_plane_mismatch_rejected() {
        let mut planes = flat_planes(4000);
        planes[2] = ImageBuffer::with_data(vec![0_u16; 32 * 64], 32, 64, 1);
        let result = postprocess(
            &planes,
            0,
            0,
            &RawImageMetadata::default(),
            &neutral_camera(),
            [0; 4],
            16384,
            &PostProcessSettings::default(),
        );
        assert!(result.is_err());
    }
}
