// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - deinterleave.rs
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

//! Packed Bayer to planar channels.

use bitreader::BitReader;
use byteorder::{ByteOrder, LittleEndian};

use crate::bitmap::ImageBuffer;
use crate::buffer::{PixelFormat, RawImageBuffer};
use crate::metadata::{RawCameraMetadata, RawImageMetadata};
use crate::wavelet::WAVELET_LEVELS;
use crate::{Error, Result};

/// One deinterleaved exposure: four half resolution CFA planes plus a
/// luma preview, all padded to the wavelet grid.
///
/// Owned by the fusion loop and dropped as soon as the frame's
/// contribution is accumulated.
#[derive(Debug)]
pub struct RawData {
    /// Planes in canonical CFA order (top-left, top-right, bottom-left,
    /// bottom-right site).
    pub planes: [ImageBuffer<u16>; 4],
    pub preview: ImageBuffer<u8>,
    /// Right pad of each plane, in plane pixels.
    pub pad_x: u32,
    /// Bottom pad of each plane, in plane pixels.
    pub pad_y: u32,
    pub metadata: RawImageMetadata,
}

impl RawData {
    /// Plane width without the padding.
    pub fn cropped_width(&self) -> u32 {
        self.planes[0].width - self.pad_x
    }

    pub fn cropped_height(&self) -> u32 {
        self.planes[0].height - self.pad_y
    }
}

/// Right/bottom pad, in plane pixels, bringing half resolution
/// dimensions up to a multiple of `2^WAVELET_LEVELS`.
pub fn padded_dimensions(half_width: u32, half_height: u32) -> (u32, u32) {
    let grid = 1_u32 << WAVELET_LEVELS;
    let pad = |v: u32| (grid - v % grid) % grid;
    (pad(half_width), pad(half_height))
}

/// Unpack one packed sensor row into 16 bit samples.
fn unpack_row(
    bytes: &[u8],
    width: usize,
    format: PixelFormat,
    white_level: u16,
    out: &mut [u16],
) -> Result<()> {
    match format {
        PixelFormat::Raw16 => {
            if bytes.len() < width * 2 {
                return Err(Error::InvalidState("row stride too small for RAW16".into()));
            }
            for (x, v) in out.iter_mut().enumerate().take(width) {
                *v = LittleEndian::read_u16(&bytes[x * 2..]);
            }
        }
        PixelFormat::Raw10 | PixelFormat::Raw12 => {
            let bits = if format == PixelFormat::Raw10 { 10 } else { 12 };
            if bytes.len() * 8 < width * bits as usize {
                return Err(Error::InvalidState(
                    "row stride too small for packed raw".into(),
                ));
            }
            let mut reader = BitReader::new(bytes);
            for v in out.iter_mut().take(width) {
                *v = reader
                    .read_u16(bits)
                    .map_err(|e| Error::InvalidState(format!("packed raw row: {}", e)))?;
            }
        }
        PixelFormat::Yuv420Bayer => {
            if bytes.len() < width {
                return Err(Error::InvalidState(
                    "row stride too small for 8 bit bayer".into(),
                ));
            }
            for (x, v) in out.iter_mut().enumerate().take(width) {
                *v = (bytes[x] as u32 * white_level as u32 / 255) as u16;
            }
        }
    }
    Ok(())
}

/// Split a packed Bayer buffer into four padded planes and a preview.
///
/// `pad_x`/`pad_y` are plane domain pads, normally the result of
/// [`padded_dimensions`]. The pad region replicates the last valid
/// column and row. The preview is the linearized mean of the four CFA
/// sites of each quad, scaled by `scale_preview`.
pub fn deinterleave(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
    pad_x: u32,
    pad_y: u32,
    scale_preview: f32,
) -> Result<RawData> {
    let half_w = buffer.width / 2;
    let half_h = buffer.height / 2;
    if half_w == 0 || half_h == 0 {
        return Err(Error::InvalidInput("frame too small to deinterleave".into()));
    }

    let pw = half_w + pad_x;
    let ph = half_h + pad_y;
    log::debug!(
        "deinterleave {}x{} -> 4 x {}x{} ({:?})",
        buffer.width,
        buffer.height,
        pw,
        ph,
        buffer.pixel_format
    );

    let mut planes: [ImageBuffer<u16>; 4] = [
        ImageBuffer::new(pw, ph, 1),
        ImageBuffer::new(pw, ph, 1),
        ImageBuffer::new(pw, ph, 1),
        ImageBuffer::new(pw, ph, 1),
    ];

    {
        let data = buffer.data.lock();
        let stride = buffer.row_stride as usize;
        if data.len() < stride * buffer.height as usize {
            return Err(Error::InvalidState("buffer smaller than stride * height".into()));
        }

        let width = (half_w * 2) as usize;
        let mut top = vec![0_u16; width];
        let mut bottom = vec![0_u16; width];
        for py in 0..half_h {
            let y = (py * 2) as usize;
            unpack_row(
                &data[y * stride..(y + 1) * stride],
                width,
                buffer.pixel_format,
                camera.white_level,
                &mut top,
            )?;
            unpack_row(
                &data[(y + 1) * stride..(y + 2) * stride],
                width,
                buffer.pixel_format,
                camera.white_level,
                &mut bottom,
            )?;

            for px in 0..half_w as usize {
                let offset = (py * pw + px as u32) as usize;
                planes[0].data[offset] = top[px * 2];
                planes[1].data[offset] = top[px * 2 + 1];
                planes[2].data[offset] = bottom[px * 2];
                planes[3].data[offset] = bottom[px * 2 + 1];
            }
        }
    }

    // Edge clamp into the pad region.
    for plane in planes.iter_mut() {
        for y in 0..half_h {
            let last = plane.pixel(half_w - 1, y);
            for x in half_w..pw {
                plane.set_pixel(x, y, last);
            }
        }
        for y in half_h..ph {
            let (src, dst) = plane.data.split_at_mut((y * pw) as usize);
            let from = ((half_h - 1) * pw) as usize;
            dst[..pw as usize].copy_from_slice(&src[from..from + pw as usize]);
        }
    }

    // Luma preview from the linearized quad mean.
    let mut preview = ImageBuffer::new(pw, ph, 1);
    let white = camera.white_level;
    for y in 0..ph {
        for x in 0..pw {
            let mut l = 0.0_f32;
            for (k, plane) in planes.iter().enumerate() {
                let black = camera.black_level[k];
                let range = (white.saturating_sub(black)).max(1) as f32;
                l += (plane.pixel(x, y).saturating_sub(black)) as f32 / range;
            }
            let l = (l / 4.0 * 255.0 * scale_preview).clamp(0.0, 255.0);
            preview.set_pixel(x, y, l as u8);
        }
    }

    Ok(RawData {
        planes,
        preview,
        pad_x,
        pad_y,
        metadata: buffer.metadata.clone(),
    })
}
