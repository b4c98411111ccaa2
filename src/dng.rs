// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - dng.rs
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

//! Linear DNG output of the denoised Bayer image.

use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};
use dng::ifd::{Ifd, IfdValue, Offsets};
use dng::tags::ifd as tags;
use dng::tags::MaybeKnownIfdFieldDescriptor;
use dng::{DngWriter, FileType};

/// DNG 1.4 tags not present in the `dng` crate's generated tag table.
const TAG_NOISE_REDUCTION_APPLIED: MaybeKnownIfdFieldDescriptor =
    MaybeKnownIfdFieldDescriptor::Unknown(50935);
const TAG_FORWARD_MATRIX1: MaybeKnownIfdFieldDescriptor =
    MaybeKnownIfdFieldDescriptor::Unknown(50964);
const TAG_FORWARD_MATRIX2: MaybeKnownIfdFieldDescriptor =
    MaybeKnownIfdFieldDescriptor::Unknown(50965);
const TAG_OPCODE_LIST2: MaybeKnownIfdFieldDescriptor =
    MaybeKnownIfdFieldDescriptor::Unknown(51009);
use nalgebra::Matrix3;

use crate::bitmap::ImageBuffer;
use crate::exif::exif_orientation;
use crate::metadata::{RawCameraMetadata, RawImageMetadata};
use crate::mosaic::SensorArrangement;
use crate::wavelet::EXPANDED_RANGE;
use crate::{Error, Result};

/// GainMap opcode id, DNG 1.3.
const OPCODE_GAIN_MAP: u32 = 9;

/// An interleaved RGGB mosaic ready for the writer.
#[derive(Clone, Debug, PartialEq)]
pub struct DngImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

/// Interleave the denoised planes into a single RGGB Bayer image,
/// cropping the wavelet padding.
///
/// The planes arrive in the sensor's native CFA order and are permuted
/// with the arrangement's fixed reorder table.
pub fn build_dng_image(
    planes: &[ImageBuffer<u16>; 4],
    arrangement: SensorArrangement,
    pad_x: u32,
    pad_y: u32,
) -> DngImage {
    let order = arrangement.dng_plane_order();
    let pw = planes[0].width - pad_x;
    let ph = planes[0].height - pad_y;
    let width = pw * 2;
    let height = ph * 2;

    let mut data = vec![0_u16; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let plane = order[((y % 2) * 2 + (x % 2)) as usize];
            data[(y * width + x) as usize] = planes[plane].pixel(x / 2, y / 2);
        }
    }

    DngImage {
        width,
        height,
        data,
    }
}

/// The consumed DNG serialization interface.
pub trait DngImageWriter {
    fn write(
        &self,
        image: &DngImage,
        metadata: &RawImageMetadata,
        camera: &RawCameraMetadata,
        path: &Path,
    ) -> Result<()>;
}

struct StripData {
    bytes: Vec<u8>,
}

impl Offsets for StripData {
    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn write(&self, writer: &mut dyn std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.bytes)
    }
}

fn matrix_values(matrix: &Matrix3<f64>) -> IfdValue {
    // Row major signed rationals in 1/10000ths.
    let mut values = Vec::with_capacity(9);
    for row in 0..3 {
        for col in 0..3 {
            values.push(IfdValue::SRational(
                (matrix[(row, col)] * 10_000.0).round() as i32,
                10_000,
            ));
        }
    }
    IfdValue::List(values)
}

/// Serialize the four per CFA position gain maps as GainMap opcodes.
///
/// One opcode per RGGB position, top-left offsets (0,0), (1,0), (0,1)
/// and (1,1), each covering the full mosaic at pitch 2.
fn gain_map_opcodes(
    metadata: &RawImageMetadata,
    arrangement: SensorArrangement,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    let order = arrangement.dng_plane_order();
    let offsets: [(u32, u32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

    let mut bytes = Vec::new();
    bytes.write_u32::<BigEndian>(4)?;
    for (position, (dx, dy)) in offsets.iter().enumerate() {
        let map = &metadata.lens_shading_map[order[position]];
        let points_h = map.width;
        let points_v = map.height;

        let mut params = Vec::new();
        params.write_u32::<BigEndian>(*dy)?; // Top
        params.write_u32::<BigEndian>(*dx)?; // Left
        params.write_u32::<BigEndian>(height)?; // Bottom
        params.write_u32::<BigEndian>(width)?; // Right
        params.write_u32::<BigEndian>(0)?; // Plane
        params.write_u32::<BigEndian>(1)?; // Planes
        params.write_u32::<BigEndian>(2)?; // RowPitch
        params.write_u32::<BigEndian>(2)?; // ColPitch
        params.write_u32::<BigEndian>(points_v)?;
        params.write_u32::<BigEndian>(points_h)?;
        let spacing_v = 1.0 / (points_v.max(2) - 1) as f64;
        let spacing_h = 1.0 / (points_h.max(2) - 1) as f64;
        params.write_f64::<BigEndian>(spacing_v)?;
        params.write_f64::<BigEndian>(spacing_h)?;
        params.write_f64::<BigEndian>(0.0)?; // MapOriginV
        params.write_f64::<BigEndian>(0.0)?; // MapOriginH
        params.write_u32::<BigEndian>(1)?; // MapPlanes
        for gain in &map.data {
            params.write_f32::<BigEndian>(*gain)?;
        }

        bytes.write_u32::<BigEndian>(OPCODE_GAIN_MAP)?;
        // Introduced with DNG 1.3, optional for readers.
        bytes.extend_from_slice(&[1, 3, 0, 0]);
        bytes.write_u32::<BigEndian>(1)?; // Flags
        bytes.write_u32::<BigEndian>(params.len() as u32)?;
        bytes.extend_from_slice(&params);
    }
    Ok(bytes)
}

/// The bundled writer, an uncompressed linear DNG on the `dng` crate.
#[derive(Debug, Default)]
pub struct DngFileWriter;

impl DngImageWriter for DngFileWriter {
    fn write(
        &self,
        image: &DngImage,
        metadata: &RawImageMetadata,
        camera: &RawCameraMetadata,
        path: &Path,
    ) -> Result<()> {
        log::debug!("writing DNG {}x{} to {:?}", image.width, image.height, path);

        let mut ifd = Ifd::default();
        ifd.insert(tags::ImageWidth, IfdValue::Long(image.width));
        ifd.insert(tags::ImageLength, IfdValue::Long(image.height));
        ifd.insert(tags::BitsPerSample, IfdValue::Short(16));
        ifd.insert(tags::Compression, IfdValue::Short(1));
        ifd.insert(tags::PhotometricInterpretation, IfdValue::Short(32803)); // CFA
        ifd.insert(tags::SamplesPerPixel, IfdValue::Short(1));
        ifd.insert(tags::RowsPerStrip, IfdValue::Long(image.height));
        ifd.insert(tags::PlanarConfiguration, IfdValue::Short(1));
        ifd.insert(
            tags::Orientation,
            IfdValue::Short(exif_orientation(metadata.orientation, false)),
        );

        ifd.insert(tags::Make, IfdValue::Ascii("MotionCam".into()));
        ifd.insert(tags::Model, IfdValue::Ascii("MotionCam".into()));
        ifd.insert(tags::UniqueCameraModel, IfdValue::Ascii("MotionCam".into()));
        ifd.insert(
            tags::LocalizedCameraModel,
            IfdValue::Ascii("MotionCam".into()),
        );
        ifd.insert(
            tags::Software,
            IfdValue::Ascii(format!("libmotioncam {}", env!("CARGO_PKG_VERSION"))),
        );

        ifd.insert(
            tags::DNGVersion,
            IfdValue::List(vec![
                IfdValue::Byte(1),
                IfdValue::Byte(4),
                IfdValue::Byte(0),
                IfdValue::Byte(0),
            ]),
        );
        ifd.insert(
            tags::DNGBackwardVersion,
            IfdValue::List(vec![
                IfdValue::Byte(1),
                IfdValue::Byte(3),
                IfdValue::Byte(0),
                IfdValue::Byte(0),
            ]),
        );

        // The image was reordered to RGGB before reaching the writer.
        ifd.insert(
            tags::CFARepeatPatternDim,
            IfdValue::List(vec![IfdValue::Short(2), IfdValue::Short(2)]),
        );
        ifd.insert(
            tags::CFAPattern,
            IfdValue::List(vec![
                IfdValue::Byte(0),
                IfdValue::Byte(1),
                IfdValue::Byte(1),
                IfdValue::Byte(2),
            ]),
        );
        ifd.insert(
            tags::CFAPlaneColor,
            IfdValue::List(vec![IfdValue::Byte(0), IfdValue::Byte(1), IfdValue::Byte(2)]),
        );
        ifd.insert(tags::CFALayout, IfdValue::Short(1));

        // Black was subtracted during denoise; the range is expanded.
        ifd.insert(tags::BlackLevel, IfdValue::Long(0));
        ifd.insert(tags::WhiteLevel, IfdValue::Long(EXPANDED_RANGE));
        ifd.insert(
            tags::DefaultScale,
            IfdValue::List(vec![IfdValue::Rational(1, 1), IfdValue::Rational(1, 1)]),
        );
        ifd.insert(
            tags::DefaultCropOrigin,
            IfdValue::List(vec![IfdValue::Long(0), IfdValue::Long(0)]),
        );
        ifd.insert(
            tags::DefaultCropSize,
            IfdValue::List(vec![
                IfdValue::Long(image.width),
                IfdValue::Long(image.height),
            ]),
        );
        ifd.insert(TAG_NOISE_REDUCTION_APPLIED, IfdValue::Rational(1, 1));

        ifd.insert(tags::ColorMatrix1, matrix_values(&camera.colour_matrix1));
        ifd.insert(tags::ColorMatrix2, matrix_values(&camera.colour_matrix2));
        ifd.insert(TAG_FORWARD_MATRIX1, matrix_values(&camera.forward_matrix1));
        ifd.insert(TAG_FORWARD_MATRIX2, matrix_values(&camera.forward_matrix2));
        ifd.insert(
            tags::CalibrationIlluminant1,
            IfdValue::Short(camera.colour_illuminant1.dng_code()),
        );
        ifd.insert(
            tags::CalibrationIlluminant2,
            IfdValue::Short(camera.colour_illuminant2.dng_code()),
        );

        let max = metadata.as_shot.iter().cloned().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Err(Error::InvalidInput("as-shot neutral is all zero".into()));
        }
        ifd.insert(
            tags::AsShotNeutral,
            IfdValue::List(
                metadata
                    .as_shot
                    .iter()
                    .map(|v| IfdValue::Rational((v / max * 1.0e6).round() as u32, 1_000_000))
                    .collect(),
            ),
        );

        // Allow copying the embedded profile.
        ifd.insert(tags::ProfileEmbedPolicy, IfdValue::Long(0));

        let opcodes = gain_map_opcodes(
            metadata,
            camera.sensor_arrangement,
            image.width,
            image.height,
        )?;
        ifd.insert(
            TAG_OPCODE_LIST2,
            IfdValue::List(opcodes.into_iter().map(IfdValue::Byte).collect()),
        );

        ifd.insert(
            tags::ISOSpeedRatings,
            IfdValue::Short(metadata.iso.clamp(0, u16::MAX as i32) as u16),
        );
        ifd.insert(
            tags::ExposureTime,
            IfdValue::Rational(
                (metadata.exposure_time.max(0) / 1000) as u32,
                1_000_000,
            ),
        );

        let mut bytes = Vec::with_capacity(image.data.len() * 2);
        for v in &image.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let length = bytes.len() as u32;
        let strip: Arc<dyn Offsets + Send + Sync> = Arc::new(StripData { bytes });
        ifd.insert(tags::StripOffsets, IfdValue::Offsets(strip));
        ifd.insert(tags::StripByteCounts, IfdValue::Long(length));

        let file = std::fs::File::create(path)?;
        DngWriter::write_dng(file, true, FileType::Dng, vec![ifd])
            .map_err(|e| Error::Writer(format!("dng write: {:?}", e)))
    }
}

#[cfg(test)]
mod test {
    use super::build_dng_image;
    use crate::bitmap::ImageBuffer;
    use crate::mosaic::SensorArrangement;

    fn marked_planes() -> [ImageBuffer<u16>; 4] {
        // Every plane filled with its own index.
        let plane = |v: u16| ImageBuffer::with_data(vec![v; 16], 4, 4, 1);
        [plane(0), plane(1), plane(2), plane(3)]
    }

    #[test]
    fn test_bggr_reorder() {
        // BGGR planes: 0=B 1=G 2=G 3=R. The written mosaic must start
        // R at (0,0), i.e. plane 3 first.
        let image = build_dng_image(&marked_planes(), SensorArrangement::Bggr, 0, 0);
        assert_eq!(image.width, 8);
        assert_eq!(image.data[0], 3); // R
        assert_eq!(image.data[1], 1); // G
        assert_eq!(image.data[8], 2); // G, second row
        assert_eq!(image.data[9], 0); // B
    }

    #[test]
    fn test_rggb_is_identity() {
        let image = build_dng_image(&marked_planes(), SensorArrangement::Rggb, 0, 0);
        assert_eq!(&image.data[0..2], &[0, 1]);
        assert_eq!(&image.data[8..10], &[2, 3]);
    }

    #[test]
    fn test_crop_applied() {
        let image = build_dng_image(&marked_planes(), SensorArrangement::Rggb, 1, 2);
        assert_eq!(image.width, 6);
        assert_eq!(image.height, 4);
        assert_eq!(image.data.len(), 24);
    }

    #[test]
    fn test_every_arrangement_lands_rggb() {
        for arrangement in [
            SensorArrangement::Rggb,
            SensorArrangement::Grbg,
            SensorArrangement::Gbrg,
            SensorArrangement::Bggr,
        ] {
            let image = build_dng_image(&marked_planes(), arrangement, 0, 0);
            let colours = arrangement.colours();
            use crate::mosaic::CfaColour::*;
            assert_eq!(colours[image.data[0] as usize], Red, "{}", arrangement);
            assert_eq!(colours[image.data[1] as usize], Green, "{}", arrangement);
            assert_eq!(colours[image.data[8] as usize], Green, "{}", arrangement);
            assert_eq!(colours[image.data[9] as usize], Blue, "{}", arrangement);
        }
    }
}
