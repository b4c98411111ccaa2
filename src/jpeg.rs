// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - jpeg.rs
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

//! JPEG encoding of the rendered image and its thumbnail.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;

use crate::bitmap::ImageBuffer;
use crate::{Error, Result};

/// Width of the embedded EXIF thumbnail.
pub(crate) const THUMBNAIL_WIDTH: u32 = 320;

fn to_rgb_image(image: &ImageBuffer<u8>) -> Result<RgbImage> {
    if image.cc != 3 {
        return Err(Error::InvalidState(format!(
            "expected 3 channel image, got {}",
            image.cc
        )));
    }
    RgbImage::from_raw(image.width, image.height, image.data.clone())
        .ok_or_else(|| Error::InvalidState("image buffer too small".into()))
}

/// Encode an interleaved RGB8 image at the given quality.
pub(crate) fn encode(image: &ImageBuffer<u8>, quality: u8) -> Result<Vec<u8>> {
    let rgb = to_rgb_image(image)?;
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|e| Error::Io(format!("jpeg encode: {}", e)))?;
    Ok(bytes)
}

/// A JPEG thumbnail, `THUMBNAIL_WIDTH` wide with the aspect preserved.
pub(crate) fn thumbnail(image: &ImageBuffer<u8>, quality: u8) -> Result<Vec<u8>> {
    let rgb = to_rgb_image(image)?;
    let height =
        ((image.height as u64 * THUMBNAIL_WIDTH as u64) / image.width.max(1) as u64).max(1) as u32;
    let small = image::imageops::resize(&rgb, THUMBNAIL_WIDTH, height, FilterType::Triangle);
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    small
        .write_with_encoder(encoder)
        .map_err(|e| Error::Io(format!("thumbnail encode: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod test {
    use super::{encode, thumbnail};
    use crate::bitmap::ImageBuffer;

    fn gradient(width: u32, height: u32) -> ImageBuffer<u8> {
        let data = (0..width * height * 3)
            .map(|i| (i % 251) as u8)
            .collect();
        ImageBuffer::with_data(data, width, height, 3)
    }

    #[test]
    fn test_encode_round_trip() {
        let image = gradient(64, 48);
        let bytes = encode(&image, 90).unwrap();
        // JPEG SOI marker.
        assert_eq!(&bytes[0..2], &[0xff, 0xd8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn test_thumbnail_dimensions() {
        let image = gradient(640, 480);
        let bytes = thumbnail(&image, 90).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 320);
        assert_eq!(decoded.height(), 240);
    }

    #[test]
    fn test_wrong_channel_count_rejected() {
        let image = ImageBuffer::<u8>::new(8, 8, 4);
        assert!(encode(&image, 90).is_err());
    }
}
