// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - processor.rs
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

//! The orchestrator: container in, JPEG (and optionally DNG) out.

use std::path::Path;

use log::{error, info};

use crate::container::FrameContainer;
use crate::denoise::{denoise, DenoiseSettings};
use crate::dng::{build_dng_image, DngFileWriter, DngImageWriter};
use crate::exif::{exif_orientation, ExifMetadata, ExifWriter, LittleExifWriter};
use crate::jpeg;
use crate::render::postprocess;
use crate::Result;

/// Share of the progress meter covered by the denoiser.
const DENOISE_PROGRESS: usize = 75;
/// Meter position after the post process.
const POSTPROCESS_PROGRESS: u32 = 95;

/// Outward progress reporting. There is no inward cancellation
/// channel; a run ends on completion or on the first error.
pub trait ProgressListener {
    fn on_progress_update(&self, progress: u32);
    fn on_completed(&self);
    fn on_error(&self, message: &str);
}

/// Drives denoise, post process and the writers for one container.
pub struct Processor {
    dng_writer: Box<dyn DngImageWriter>,
    exif_writer: Box<dyn ExifWriter>,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    /// A processor with the bundled DNG and EXIF writers.
    pub fn new() -> Self {
        Processor {
            dng_writer: Box::new(DngFileWriter),
            exif_writer: Box::new(LittleExifWriter),
        }
    }

    /// A processor with caller provided writers.
    pub fn with_writers(
        dng_writer: Box<dyn DngImageWriter>,
        exif_writer: Box<dyn ExifWriter>,
    ) -> Self {
        Processor {
            dng_writer,
            exif_writer,
        }
    }

    /// Process one burst. Errors are surfaced through the listener and
    /// abort the run; nothing is caught locally.
    pub fn process(
        &self,
        container: &dyn FrameContainer,
        output_path: &Path,
        listener: &dyn ProgressListener,
    ) {
        match self.run(container, output_path, listener) {
            Ok(()) => listener.on_completed(),
            Err(e) => {
                error!("processing failed: {}", e);
                listener.on_error(&e.to_string());
            }
        }
    }

    fn run(
        &self,
        container: &dyn FrameContainer,
        output_path: &Path,
        listener: &dyn ProgressListener,
    ) -> Result<()> {
        listener.on_progress_update(0);
        let settings = container.post_process_settings();
        let camera = container.camera_metadata().clone();

        let denoise_settings = DenoiseSettings {
            spatial_weight: settings.spatial_denoise_aggressiveness,
            ..Default::default()
        };
        let mut reported = 0_u32;
        let output = denoise(container, &denoise_settings, &mut |done, total| {
            let progress = (done * DENOISE_PROGRESS / total.max(1)) as u32;
            if progress > reported {
                reported = progress;
                listener.on_progress_update(progress);
            }
        })?;

        if container.write_dng() {
            let image = build_dng_image(
                &output.planes,
                camera.sensor_arrangement,
                output.pad_x,
                output.pad_y,
            );
            let dng_path = output_path.with_extension("dng");
            info!("writing {:?}", dng_path);
            self.dng_writer
                .write(&image, &output.metadata, &camera, &dng_path)?;
        }

        let rgb = postprocess(
            &output.planes,
            output.pad_x,
            output.pad_y,
            &output.metadata,
            &camera,
            output.black_level(),
            output.white_level(),
            &settings,
        )?;
        listener.on_progress_update(POSTPROCESS_PROGRESS);

        // The JPEG is committed in a single write after the EXIF embed
        // succeeded; no partial output files.
        let mut encoded = jpeg::encode(&rgb, settings.jpeg_quality)?;
        let thumbnail = jpeg::thumbnail(&rgb, settings.jpeg_quality)?;
        let exif = ExifMetadata {
            iso: output.metadata.iso,
            exposure_time: output.metadata.exposure_time,
            orientation: exif_orientation(output.metadata.orientation, settings.flipped),
            aperture: camera.apertures.first().copied(),
            focal_length: camera.focal_lengths.first().copied(),
            capture_time: chrono::Local::now().format("%Y:%m:%d %H:%M:%S").to_string(),
            thumbnail: Some(thumbnail),
        };
        self.exif_writer.embed(&mut encoded, &exif)?;
        std::fs::write(output_path, &encoded)?;

        info!("finished {:?}", output_path);
        listener.on_progress_update(100);
        Ok(())
    }
}

/// Process a burst with the bundled writers.
pub fn process(container: &dyn FrameContainer, output_path: &Path, listener: &dyn ProgressListener) {
    Processor::new().process(container, output_path, listener)
}
