// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - render/preview.rs
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

//! Reduced cost BGRA previews of a deinterleaved frame.

use rayon::prelude::*;

use super::{gamma_encode, ToneCurve};
use crate::bitmap::ImageBuffer;
use crate::colour::ColourProfile;
use crate::deinterleave::RawData;
use crate::metadata::{RawCameraMetadata, ScreenOrientation};
use crate::settings::PostProcessSettings;
use crate::{Error, Result};

/// Render a BGRA preview at 1/2, 1/4 or 1/8 of the half resolution
/// planes, rotated for the requested screen orientation.
///
/// Shares the colour transform and tone curve of the full post process
/// but skips lens shading, sharpening and chroma smoothing; the scene
/// analyzer's measurements transfer to the full pipeline.
pub fn render_preview(
    raw: &RawData,
    camera: &RawCameraMetadata,
    settings: &PostProcessSettings,
    downscale: u32,
    orientation: ScreenOrientation,
) -> Result<ImageBuffer<u8>> {
    if !matches!(downscale, 2 | 4 | 8) {
        return Err(Error::InvalidInput(format!(
            "unsupported preview downscale {}",
            downscale
        )));
    }

    let src_w = (raw.cropped_width() / downscale).max(1);
    let src_h = (raw.cropped_height() / downscale).max(1);

    let profile = ColourProfile::for_settings(camera, &raw.metadata, settings)?;
    let ctos: Vec<f32> = profile.camera_to_srgb.iter().map(|&v| v as f32).collect();
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
    let range: Vec<f32> = (0..4)
        .map(|k| {
            (camera.white_level.saturating_sub(camera.black_level[k])).max(1) as f32
        })
        .collect();

    let exposure = 2.0_f32.powf(settings.exposure);
    let curve = ToneCurve::new(settings);
    let gamma = settings.gamma;
    let flipped = settings.flipped;

    // The preview before rotation.
    let mut base = vec![0.0_f32; (src_w * src_h * 3) as usize];
    base.par_chunks_mut((src_w * 3) as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let py = y as u32 * downscale;
            for x in 0..src_w as usize {
                let px = x as u32 * downscale;
                let linear = |k: usize| -> f32 {
                    (raw.planes[k].pixel(px, py).saturating_sub(camera.black_level[k])) as f32
                        / range[k]
                        * raw.metadata.colour_correction[k]
                };
                let rgb = [
                    linear(red) / white[0],
                    0.5 * (linear(greens[0]) + linear(greens[1])) / white[1],
                    linear(blue) / white[2],
                ];
                for c in 0..3 {
                    let v = matrix[c * 3] * rgb[0]
                        + matrix[c * 3 + 1] * rgb[1]
                        + matrix[c * 3 + 2] * rgb[2];
                    row[x * 3 + c] = curve.apply(v * exposure);
                }
            }
        });

    // Rotate into the screen orientation, mirroring first when the
    // capture was flipped.
    let (out_w, out_h) = match orientation {
        ScreenOrientation::Landscape | ScreenOrientation::ReverseLandscape => (src_w, src_h),
        ScreenOrientation::Portrait | ScreenOrientation::ReversePortrait => (src_h, src_w),
    };
    let mut out = ImageBuffer::new(out_w, out_h, 4);
    out.data
        .par_chunks_mut((out_w * 4) as usize)
        .enumerate()
        .for_each(|(oy, row)| {
            for ox in 0..out_w as usize {
                let (mut sx, sy) = match orientation {
                    ScreenOrientation::Landscape => (ox as u32, oy as u32),
                    ScreenOrientation::Portrait => (oy as u32, src_h - 1 - ox as u32),
                    ScreenOrientation::ReverseLandscape => {
                        (src_w - 1 - ox as u32, src_h - 1 - oy as u32)
                    }
                    ScreenOrientation::ReversePortrait => {
                        (src_w - 1 - oy as u32, ox as u32)
                    }
                };
                if flipped {
                    sx = src_w - 1 - sx;
                }
                let i = ((sy * src_w + sx) * 3) as usize;
                // BGRA output.
                row[ox * 4] = (gamma_encode(base[i + 2], gamma) * 255.0 + 0.5) as u8;
                row[ox * 4 + 1] = (gamma_encode(base[i + 1], gamma) * 255.0 + 0.5) as u8;
                row[ox * 4 + 2] = (gamma_encode(base[i], gamma) * 255.0 + 0.5) as u8;
                row[ox * 4 + 3] = 255;
            }
        });

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::render_preview;
    use crate::bitmap::ImageBuffer;
    use crate::deinterleave::RawData;
    use crate::metadata::{RawCameraMetadata, RawImageMetadata, ScreenOrientation};
    use crate::settings::PostProcessSettings;

    fn test_raw(width: u32, height: u32) -> RawData {
        let plane = |v: u16| ImageBuffer::with_data(vec![v; (width * height) as usize], width, height, 1);
        RawData {
            planes: [plane(500), plane(500), plane(500), plane(500)],
            preview: ImageBuffer::new(width, height, 1),
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
    fn test_preview_scales() {
        let raw = test_raw(64, 64);
        for (scale, expected) in [(2_u32, 32_u32), (4, 16), (8, 8)] {
            let preview = render_preview(
                &raw,
                &camera(),
                &PostProcessSettings::default(),
                scale,
                ScreenOrientation::Landscape,
            )
            .unwrap();
            assert_eq!(preview.width, expected);
            assert_eq!(preview.height, expected);
            assert_eq!(preview.cc, 4);
        }
    }

    #[test]
    fn test_invalid_scale_fails() {
        let raw = test_raw(64, 64);
        for scale in [0_u32, 1, 3, 16] {
            assert!(render_preview(
                &raw,
                &camera(),
                &PostProcessSettings::default(),
                scale,
                ScreenOrientation::Landscape,
            )
            .is_err());
        }
    }

    #[test]
    fn test_portrait_swaps_dimensions() {
        let raw = test_raw(128, 64);
        let landscape = render_preview(
            &raw,
            &camera(),
            &PostProcessSettings::default(),
            4,
            ScreenOrientation::Landscape,
        )
        .unwrap();
        let portrait = render_preview(
            &raw,
            &camera(),
            &PostProcessSettings::default(),
            4,
            ScreenOrientation::Portrait,
        )
        .unwrap();
        assert_eq!((landscape.width, landscape.height), (32, 16));
        assert_eq!((portrait.width, portrait.height), (16, 32));
    }

    #[test]
    fn test_rotation_moves_corner() {
        // Mark the top-left quad of the sensor planes.
        let mut raw = test_raw(64, 64);
        for plane in raw.planes.iter_mut() {
            plane.set_pixel(0, 0, 1023);
        }
        let camera = camera();
        let settings = PostProcessSettings::default();

        let landscape =
            render_preview(&raw, &camera, &settings, 8, ScreenOrientation::Landscape).unwrap();
        let rotated =
            render_preview(&raw, &camera, &settings, 8, ScreenOrientation::ReverseLandscape)
                .unwrap();
        // The bright corner moves from (0, 0) to the opposite corner.
        assert!(landscape.component(0, 0, 1) > landscape.component(7, 7, 1));
        assert!(
            rotated.component(7, 7, 1) > rotated.component(0, 0, 1),
            "180 degree rotation"
        );
    }
}
