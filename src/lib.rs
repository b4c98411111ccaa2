// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - lib.rs
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

mod bitmap;
mod buffer;
pub mod colour;
mod container;
mod deinterleave;
mod denoise;
mod dng;
mod exif;
pub mod flow;
pub mod fusion;
mod jpeg;
mod metadata;
mod mosaic;
mod processor;
pub mod render;
pub mod scene;
mod settings;
pub mod wavelet;

pub use bitmap::ImageBuffer;
pub use buffer::{NativeBuffer, PixelFormat, RawImageBuffer};
pub use container::FrameContainer;
pub use deinterleave::{deinterleave, padded_dimensions, RawData};
pub use denoise::{denoise, DenoiseOutput, DenoiseSettings};
pub use dng::{build_dng_image, DngFileWriter, DngImage, DngImageWriter};
pub use exif::{exif_orientation, ExifMetadata, ExifWriter, LittleExifWriter};
pub use flow::FlowField;
pub use fusion::FusionWeights;
pub use metadata::{RawCameraMetadata, RawImageMetadata, ScreenOrientation};
pub use mosaic::{CfaColour, SensorArrangement};
pub use processor::{process, Processor, ProgressListener};
pub use settings::PostProcessSettings;
pub use wavelet::{WaveletPyramid, EXPANDED_RANGE, WAVELET_LEVELS};

/// Standard Result for libmotioncam
pub type Result<T> = std::result::Result<T, Error>;

/// Standard Error for libmotioncam
///
/// The orchestrator never catches these; they surface through the
/// progress listener and abort the run.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A precondition on the input data does not hold.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Metadata and pixel data disagree.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// IO Error
    #[error("io error: {0}")]
    Io(String),
    /// Surfaced from an external DNG or EXIF writer, unchanged.
    #[error("writer error: {0}")]
    Writer(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err.to_string())
    }
}
