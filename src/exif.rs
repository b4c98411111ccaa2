// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - exif.rs
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

//! EXIF metadata and the consumed embedding interface.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use little_exif::rational::uR64;

use crate::metadata::ScreenOrientation;
use crate::{Error, Result};

/// The lens model written into every output.
pub const LENS_MODEL: &str = "MotionCam";

/// Hard payload limit of a JPEG APP1 segment.
const APP1_CAPACITY: usize = 0xffff;

/// TIFF tags and types of the thumbnail directory.
const TAG_COMPRESSION: u16 = 0x0103;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

/// EXIF fields the orchestrator collects for the embedder.
#[derive(Clone, Debug)]
pub struct ExifMetadata {
    pub iso: i32,
    /// Exposure time in nanoseconds.
    pub exposure_time: i64,
    /// One of the 8 EXIF orientation codes.
    pub orientation: u16,
    pub aperture: Option<f64>,
    pub focal_length: Option<f64>,
    /// "YYYY:MM:DD HH:MM:SS".
    pub capture_time: String,
    /// Thumbnail JPEG bytes, embedded as the IFD1 preview image.
    pub thumbnail: Option<Vec<u8>>,
}

/// Map the screen orientation and the mirror flag to the EXIF
/// `Orientation` code.
pub fn exif_orientation(orientation: ScreenOrientation, flipped: bool) -> u16 {
    use ScreenOrientation::*;
    match (orientation, flipped) {
        (Landscape, false) => 1,
        (Landscape, true) => 2,
        (ReverseLandscape, false) => 3,
        (ReverseLandscape, true) => 4,
        (Portrait, false) => 6,
        (Portrait, true) => 5,
        (ReversePortrait, false) => 8,
        (ReversePortrait, true) => 7,
    }
}

/// The consumed metadata embedding interface. Implementations rewrite
/// the in-memory JPEG; the orchestrator commits the file afterwards.
pub trait ExifWriter {
    fn embed(&self, jpeg: &mut Vec<u8>, exif: &ExifMetadata) -> Result<()>;
}

fn rational(numerator: u64, denominator: u64) -> uR64 {
    let gcd = {
        let mut a = numerator.max(1);
        let mut b = denominator.max(1);
        while b != 0 {
            let t = b;
            b = a % b;
            a = t;
        }
        a
    };
    uR64 {
        nominator: (numerator / gcd) as u32,
        denominator: (denominator / gcd) as u32,
    }
}

/// Locate the Exif APP1 segment. Returns the marker position and the
/// segment's payload length.
fn find_exif_app1(jpeg: &[u8]) -> Result<(usize, usize)> {
    if jpeg.len() < 4 || jpeg[0] != 0xff || jpeg[1] != 0xd8 {
        return Err(Error::Writer("not a JPEG stream".into()));
    }
    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xff {
            return Err(Error::Writer("malformed JPEG segment chain".into()));
        }
        let marker = jpeg[pos + 1];
        if marker == 0xda {
            break;
        }
        let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if length < 2 {
            return Err(Error::Writer("malformed JPEG segment length".into()));
        }
        if marker == 0xe1 && jpeg[pos + 4..].starts_with(b"Exif\0\0") {
            return Ok((pos, length));
        }
        pos += 2 + length;
    }
    Err(Error::Writer(
        "no Exif segment to attach the thumbnail to".into(),
    ))
}

/// Attach a JPEG thumbnail as the IFD1 of the Exif APP1 segment.
///
/// `little_exif` writes IFD0 and the Exif sub-IFD but has no thumbnail
/// directory support, so the chain is completed here: IFD0's next-IFD
/// pointer is set to an appended IFD1 carrying Compression = 6 and the
/// JPEGInterchangeFormat offset/length pair, followed by the thumbnail
/// bytes.
fn embed_thumbnail(jpeg: &mut Vec<u8>, thumbnail: &[u8]) -> Result<()> {
    let (segment, length) = find_exif_app1(jpeg)?;
    let tiff_start = segment + 4 + 6;
    let tiff_end = segment + 2 + length;
    if tiff_end > jpeg.len() || tiff_end < tiff_start + 8 {
        return Err(Error::Writer("truncated Exif segment".into()));
    }

    let little = match &jpeg[tiff_start..tiff_start + 2] {
        b"II" => true,
        b"MM" => false,
        _ => return Err(Error::Writer("unknown TIFF byte order".into())),
    };
    let read_u16 = |bytes: &[u8]| {
        if little {
            LittleEndian::read_u16(bytes)
        } else {
            BigEndian::read_u16(bytes)
        }
    };
    let read_u32 = |bytes: &[u8]| {
        if little {
            LittleEndian::read_u32(bytes)
        } else {
            BigEndian::read_u32(bytes)
        }
    };

    // Walk to IFD0's next-directory pointer.
    let tiff_len = tiff_end - tiff_start;
    let ifd0 = read_u32(&jpeg[tiff_start + 4..tiff_start + 8]) as usize;
    if tiff_start + ifd0 + 2 > tiff_end {
        return Err(Error::Writer("Exif IFD0 outside the segment".into()));
    }
    let entries = read_u16(&jpeg[tiff_start + ifd0..tiff_start + ifd0 + 2]) as usize;
    let next_ptr = tiff_start + ifd0 + 2 + entries * 12;
    if next_ptr + 4 > tiff_end {
        return Err(Error::Writer("Exif IFD0 outside the segment".into()));
    }
    if read_u32(&jpeg[next_ptr..next_ptr + 4]) != 0 {
        return Err(Error::Writer(
            "Exif segment already carries a thumbnail directory".into(),
        ));
    }

    // IFD1: Compression = 6 (JPEG) plus the interchange offset/length,
    // with the thumbnail bytes right behind the directory.
    let push_u16 = |out: &mut Vec<u8>, v: u16| {
        if little {
            out.extend_from_slice(&v.to_le_bytes())
        } else {
            out.extend_from_slice(&v.to_be_bytes())
        }
    };
    let push_u32 = |out: &mut Vec<u8>, v: u32| {
        if little {
            out.extend_from_slice(&v.to_le_bytes())
        } else {
            out.extend_from_slice(&v.to_be_bytes())
        }
    };
    let entry = |out: &mut Vec<u8>, tag: u16, kind: u16, value: u32| {
        push_u16(out, tag);
        push_u16(out, kind);
        push_u32(out, 1);
        if kind == TYPE_SHORT {
            // Left justified in the 4 byte value field.
            push_u16(out, value as u16);
            push_u16(out, 0);
        } else {
            push_u32(out, value);
        }
    };

    let ifd1_offset = tiff_len as u32;
    let thumb_offset = ifd1_offset + 2 + 3 * 12 + 4;
    let mut appended = Vec::with_capacity(2 + 3 * 12 + 4 + thumbnail.len());
    push_u16(&mut appended, 3);
    entry(&mut appended, TAG_COMPRESSION, TYPE_SHORT, 6);
    entry(&mut appended, TAG_JPEG_OFFSET, TYPE_LONG, thumb_offset);
    entry(&mut appended, TAG_JPEG_LENGTH, TYPE_LONG, thumbnail.len() as u32);
    push_u32(&mut appended, 0);
    appended.extend_from_slice(thumbnail);

    let new_length = length + appended.len();
    if new_length > APP1_CAPACITY {
        return Err(Error::Writer(format!(
            "thumbnail does not fit the Exif segment ({} bytes)",
            new_length
        )));
    }

    // Chain IFD0 to the new directory, grow the segment, splice.
    if little {
        LittleEndian::write_u32(&mut jpeg[next_ptr..next_ptr + 4], ifd1_offset);
    } else {
        BigEndian::write_u32(&mut jpeg[next_ptr..next_ptr + 4], ifd1_offset);
    }
    BigEndian::write_u16(&mut jpeg[segment + 2..segment + 4], new_length as u16);
    let tail = jpeg.split_off(tiff_end);
    jpeg.extend_from_slice(&appended);
    jpeg.extend_from_slice(&tail);
    Ok(())
}

/// The bundled embedder: `little_exif` for the tag set, the thumbnail
/// chained into its output as IFD1.
#[derive(Debug, Default)]
pub struct LittleExifWriter;

impl ExifWriter for LittleExifWriter {
    fn embed(&self, jpeg: &mut Vec<u8>, exif: &ExifMetadata) -> Result<()> {
        let mut metadata = Metadata::new();

        metadata.set_tag(ExifTag::Model(LENS_MODEL.to_string()));
        metadata.set_tag(ExifTag::Software(LENS_MODEL.to_string()));
        metadata.set_tag(ExifTag::LensModel(LENS_MODEL.to_string()));
        metadata.set_tag(ExifTag::Orientation(vec![exif.orientation]));
        metadata.set_tag(ExifTag::ISO(vec![exif.iso.max(0) as u16]));
        metadata.set_tag(ExifTag::ExposureTime(vec![rational(
            exif.exposure_time.max(0) as u64,
            1_000_000_000,
        )]));
        if let Some(aperture) = exif.aperture {
            metadata.set_tag(ExifTag::FNumber(vec![rational(
                (aperture * 100.0).round() as u64,
                100,
            )]));
        }
        if let Some(focal_length) = exif.focal_length {
            metadata.set_tag(ExifTag::FocalLength(vec![rational(
                (focal_length * 100.0).round() as u64,
                100,
            )]));
        }
        metadata.set_tag(ExifTag::DateTimeOriginal(exif.capture_time.clone()));
        metadata.set_tag(ExifTag::CreateDate(exif.capture_time.clone()));
        // sRGB, directly photographed, manual white balance, 72 dpi.
        metadata.set_tag(ExifTag::ColorSpace(vec![1_u16]));
        metadata.set_tag(ExifTag::SceneType(vec![1_u8]));
        metadata.set_tag(ExifTag::WhiteBalance(vec![0_u16]));
        metadata.set_tag(ExifTag::XResolution(vec![rational(72, 1)]));
        metadata.set_tag(ExifTag::YResolution(vec![rational(72, 1)]));
        metadata.set_tag(ExifTag::ResolutionUnit(vec![2_u16]));

        metadata
            .write_to_vec(jpeg, FileExtension::JPEG)
            .map_err(|e| Error::Writer(format!("exif embed: {}", e)))?;

        if let Some(thumbnail) = &exif.thumbnail {
            embed_thumbnail(jpeg, thumbnail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{embed_thumbnail, exif_orientation, find_exif_app1, rational};
    use crate::metadata::ScreenOrientation::*;

    #[test]
    fn test_orientation_table() {
        // The 8 EXIF orientations from screen orientation x flipped.
        let table = [
            ((Landscape, false), 1),
            ((Landscape, true), 2),
            ((ReverseLandscape, false), 3),
            ((ReverseLandscape, true), 4),
            ((Portrait, true), 5),
            ((Portrait, false), 6),
            ((ReversePortrait, true), 7),
            ((ReversePortrait, false), 8),
        ];
        for ((orientation, flipped), code) in table {
            assert_eq!(exif_orientation(orientation, flipped), code);
        }
        // All 8 codes appear exactly once.
        let mut seen: Vec<u16> = table.iter().map(|(_, c)| *c).collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_rational_reduction() {
        let r = rational(10_000_000, 1_000_000_000);
        assert_eq!((r.nominator, r.denominator), (1, 100));
        let r = rational(0, 1_000_000_000);
        assert_eq!(r.nominator, 0);
    }

    /// SOI + a minimal Exif APP1 (empty IFD0, little endian) + EOI.
    fn minimal_exif_jpeg() -> Vec<u8> {
        let mut jpeg = vec![0xff_u8, 0xd8];
        jpeg.extend_from_slice(&[0xff, 0xe1, 0x00, 0x16]);
        jpeg.extend_from_slice(b"Exif\0\0");
        jpeg.extend_from_slice(b"II");
        jpeg.extend_from_slice(&42_u16.to_le_bytes());
        jpeg.extend_from_slice(&8_u32.to_le_bytes()); // IFD0 offset
        jpeg.extend_from_slice(&0_u16.to_le_bytes()); // no entries
        jpeg.extend_from_slice(&0_u32.to_le_bytes()); // no next IFD
        jpeg.extend_from_slice(&[0xff, 0xd9]);
        jpeg
    }

    #[test]
    fn test_thumbnail_chained_as_ifd1() {
        let mut jpeg = minimal_exif_jpeg();
        let thumbnail = [0xde_u8; 8];
        embed_thumbnail(&mut jpeg, &thumbnail).unwrap();

        let (segment, length) = find_exif_app1(&jpeg).unwrap();
        // Grown by the directory (2 + 3 * 12 + 4) plus the bytes.
        assert_eq!(length, 0x16 + 42 + 8);

        let tiff = segment + 4 + 6;
        // IFD0's next pointer now references the appended IFD1.
        let next = u32::from_le_bytes(jpeg[tiff + 10..tiff + 14].try_into().unwrap());
        assert_eq!(next, 14);
        let ifd1 = tiff + next as usize;
        assert_eq!(u16::from_le_bytes(jpeg[ifd1..ifd1 + 2].try_into().unwrap()), 3);
        // First entry: Compression = 6.
        assert_eq!(
            u16::from_le_bytes(jpeg[ifd1 + 2..ifd1 + 4].try_into().unwrap()),
            0x0103
        );
        assert_eq!(
            u16::from_le_bytes(jpeg[ifd1 + 10..ifd1 + 12].try_into().unwrap()),
            6
        );
        // The thumbnail bytes sit at the recorded offset.
        let offset_entry = ifd1 + 2 + 12;
        assert_eq!(
            u16::from_le_bytes(jpeg[offset_entry..offset_entry + 2].try_into().unwrap()),
            0x0201
        );
        let offset =
            u32::from_le_bytes(jpeg[offset_entry + 8..offset_entry + 12].try_into().unwrap());
        assert_eq!(&jpeg[tiff + offset as usize..tiff + offset as usize + 8], &thumbnail);
        // The stream still ends with EOI.
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xff, 0xd9]);
    }

    #[test]
    fn test_thumbnail_not_embedded_twice() {
        let mut jpeg = minimal_exif_jpeg();
        embed_thumbnail(&mut jpeg, &[1, 2, 3, 4]).unwrap();
        assert!(embed_thumbnail(&mut jpeg, &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_oversized_thumbnail_rejected() {
        let mut jpeg = minimal_exif_jpeg();
        let huge = vec![0_u8; 0x1_0000];
        assert!(embed_thumbnail(&mut jpeg, &huge).is_err());
    }

    #[test]
    fn test_missing_exif_segment_rejected() {
        let mut jpeg = vec![0xff, 0xd8, 0xff, 0xd9];
        assert!(embed_thumbnail(&mut jpeg, &[1, 2]).is_err());
    }
}
