// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - denoise.rs
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

//! Multi frame wavelet denoiser.

use log::{debug, info};

use crate::container::FrameContainer;
use crate::deinterleave::{deinterleave, padded_dimensions};
use crate::flow;
use crate::fusion::{fuse, FusionWeights};
use crate::metadata::RawImageMetadata;
use crate::wavelet::{WaveletPyramid, EXPANDED_RANGE};
use crate::{bitmap::ImageBuffer, Error, Result};

/// Denoiser knobs that do not come from the container settings.
#[derive(Clone, Debug)]
pub struct DenoiseSettings {
    /// Wavelet shrinkage weight; 0 disables spatial denoising.
    pub spatial_weight: f32,
    /// Gain applied to the luma preview used for flow and analysis.
    pub scale_preview: f32,
}

impl Default for DenoiseSettings {
    fn default() -> Self {
        DenoiseSettings {
            spatial_weight: 1.0,
            scale_preview: 1.0,
        }
    }
}

/// The denoised burst: four expanded range planes plus the reference
/// frame's metadata. Black is 0 and white [`EXPANDED_RANGE`] from here
/// on.
#[derive(Debug)]
pub struct DenoiseOutput {
    pub planes: [ImageBuffer<u16>; 4],
    /// Right pad of each plane, in plane pixels.
    pub pad_x: u32,
    /// Bottom pad of each plane, in plane pixels.
    pub pad_y: u32,
    /// Frames actually fused, reference included.
    pub num_frames: usize,
    pub metadata: RawImageMetadata,
}

impl DenoiseOutput {
    pub fn white_level(&self) -> u16 {
        EXPANDED_RANGE as u16
    }

    pub fn black_level(&self) -> [u16; 4] {
        [0; 4]
    }
}

/// Fuse the container's burst into one low noise Bayer image.
///
/// `progress` is called after every fused (channel, frame) unit with
/// the units done and the total, `4 * frames`.
pub fn denoise(
    container: &dyn FrameContainer,
    settings: &DenoiseSettings,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<DenoiseOutput> {
    let frames = container.frames();
    if frames.is_empty() {
        return Err(Error::InvalidInput("no frames".into()));
    }
    let camera = container.camera_metadata();

    let reference_id = container.reference_frame();
    let reference_buffer = container.load_frame(&reference_id)?;
    let (pad_x, pad_y) =
        padded_dimensions(reference_buffer.width / 2, reference_buffer.height / 2);
    let reference = deinterleave(
        &reference_buffer,
        camera,
        pad_x,
        pad_y,
        settings.scale_preview,
    )?;
    drop(reference_buffer);
    container.release_frame(&reference_id);

    // Frames with a different exposure compensation do not merge.
    let reference_compensation = reference.metadata.exposure_compensation;
    let candidates: Vec<String> = frames
        .iter()
        .filter(|id| **id != reference_id)
        .filter(|id| match container.frame_metadata(id) {
            Some(metadata) => metadata.exposure_compensation == reference_compensation,
            None => false,
        })
        .cloned()
        .collect();

    let num_frames = candidates.len() + 1;
    let total_units = num_frames * 4;
    let mut done_units = 0_usize;
    info!(
        "denoising {} of {} frames, reference {}",
        num_frames,
        frames.len(),
        reference_id
    );

    // Reference pyramids and their per level noise, one per channel.
    let mut reference_pyramids = Vec::with_capacity(4);
    for (k, plane) in reference.planes.iter().enumerate() {
        reference_pyramids.push(WaveletPyramid::forward(
            plane,
            camera.black_level[k],
            camera.white_level,
        )?);
    }
    let noise: Vec<_> = reference_pyramids.iter().map(|p| p.noise_profile()).collect();
    debug!(
        "channel noise sigma {:?}",
        reference_pyramids
            .iter()
            .map(|p| p.noise_sigma())
            .collect::<Vec<_>>()
    );

    let mut outputs: Option<Vec<WaveletPyramid>> = if candidates.is_empty() {
        None
    } else {
        Some(reference_pyramids.iter().map(|p| p.like()).collect())
    };

    for (index, candidate_id) in candidates.iter().enumerate() {
        let candidate_buffer = container.load_frame(candidate_id)?;
        let candidate = deinterleave(
            &candidate_buffer,
            camera,
            pad_x,
            pad_y,
            settings.scale_preview,
        )?;
        drop(candidate_buffer);
        container.release_frame(candidate_id);

        if candidate.planes[0].width != reference.planes[0].width
            || candidate.planes[0].height != reference.planes[0].height
        {
            return Err(Error::InvalidState(
                "candidate dimensions differ from the reference".into(),
            ));
        }

        let field = flow::compute(&reference.preview, &candidate.preview);
        let motion = field.std_dev();
        let weights = FusionWeights::select(
            reference.metadata.iso,
            reference.metadata.exposure_time,
            motion,
        );
        debug!(
            "frame {}: flow sigma {:.2}, weights {:?}",
            candidate_id, motion, weights
        );

        let outputs = outputs.as_mut().expect("output pyramids");
        for k in 0..4 {
            let pyramid = WaveletPyramid::forward(
                &candidate.planes[k],
                camera.black_level[k],
                camera.white_level,
            )?;
            fuse(
                &reference_pyramids[k],
                &pyramid,
                &mut outputs[k],
                &field,
                &noise[k],
                weights,
                index == 0,
            );
            done_units += 1;
            progress(done_units, total_units);
        }
        // `candidate` drops here; peak memory stays at the reference
        // pyramids, the accumulator and one candidate.
    }

    // Single frame burst: the reference pyramid is the output.
    let fused = match outputs {
        Some(outputs) => outputs,
        None => reference_pyramids,
    };

    let m = num_frames as f32;
    let mut planes = Vec::with_capacity(4);
    for (k, pyramid) in fused.iter().enumerate() {
        let sigma = noise[k][0];
        let threshold = settings.spatial_weight * sigma / m.sqrt();
        planes.push(pyramid.inverse(threshold));
    }
    let planes: [ImageBuffer<u16>; 4] = match planes.try_into() {
        Ok(planes) => planes,
        Err(_) => unreachable!(),
    };

    Ok(DenoiseOutput {
        planes,
        pad_x,
        pad_y,
        num_frames,
        metadata: reference.metadata.clone(),
    })
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{denoise, DenoiseSettings};
    use crate::buffer::{PixelFormat, RawImageBuffer};
    use crate::container::FrameContainer;
    use crate::metadata::{RawCameraMetadata, RawImageMetadata};
    use crate::settings::PostProcessSettings;
    use crate::wavelet::EXPANDED_RANGE;
    use crate::{Error, Result};

    struct TestContainer {
        frames: Vec<(String, Rc<RawImageBuffer>)>,
        camera: RawCameraMetadata,
        released: RefCell<Vec<String>>,
    }

    impl TestContainer {
        fn new(frames: Vec<(String, RawImageBuffer)>) -> Self {
            TestContainer {
                frames: frames
                    .into_iter()
                    .map(|(id, buffer)| (id, Rc::new(buffer)))
                    .collect(),
                camera: RawCameraMetadata {
                    black_level: [0; 4],
                    ..Default::default()
                },
                released: RefCell::new(Vec::new()),
            }
        }
    }

    impl FrameContainer for TestContainer {
        fn frames(&self) -> Vec<String> {
            self.frames.iter().map(|(id, _)| id.clone()).collect()
        }

        fn reference_frame(&self) -> String {
            self.frames[0].0.clone()
        }

        fn frame_metadata(&self, id: &str) -> Option<RawImageMetadata> {
            self.frames
                .iter()
                .find(|(fid, _)| fid == id)
                .map(|(_, buffer)| buffer.metadata.clone())
        }

        fn load_frame(&self, id: &str) -> Result<Rc<RawImageBuffer>> {
            self.frames
                .iter()
                .find(|(fid, _)| fid == id)
                .map(|(_, buffer)| buffer.clone())
                .ok_or_else(|| Error::Io(format!("no frame {}", id)))
        }

        fn release_frame(&self, id: &str) {
            self.released.borrow_mut().push(id.to_string());
        }

        fn camera_metadata(&self) -> &RawCameraMetadata {
            &self.camera
        }

        fn post_process_settings(&self) -> PostProcessSettings {
            PostProcessSettings::default()
        }

        fn write_dng(&self) -> bool {
            false
        }
    }

    fn frame(mut values: impl FnMut(u32, u32) -> u16) -> RawImageBuffer {
        let width = 128_u32;
        let height = 128_u32;
        let mut bytes = Vec::with_capacity((width * height * 2) as usize);
        for y in 0..height {
            for x in 0..width {
                bytes.extend_from_slice(&values(x, y).to_le_bytes());
            }
        }
        RawImageBuffer::new(
            width,
            height,
            width * 2,
            PixelFormat::Raw16,
            bytes,
            RawImageMetadata::default(),
        )
    }

    #[test]
    fn test_empty_container_fails() {
        let container = TestContainer::new(vec![]);
        let mut progress = |_: usize, _: usize| {};
        let result = denoise(&container, &DenoiseSettings::default(), &mut progress);
        assert_eq!(result.unwrap_err(), Error::InvalidInput("no frames".into()));
    }

    #[test]
    fn test_single_frame_identity() {
        // With shrinkage off, a single frame burst reproduces the
        // reference (up to the expanded range quantization).
        let container =
            TestContainer::new(vec![("ref".into(), frame(|x, y| (100 + ((x * 7 + y * 3) % 800)) as u16))]);
        let settings = DenoiseSettings {
            spatial_weight: 0.0,
            ..Default::default()
        };
        let mut progress = |_: usize, _: usize| {};
        let output = denoise(&container, &settings, &mut progress).unwrap();
        assert_eq!(output.num_frames, 1);
        assert_eq!(output.white_level(), EXPANDED_RANGE as u16);

        // Compare against the directly expanded reference plane.
        let white = container.camera.white_level as f32;
        for (k, plane) in output.planes.iter().enumerate() {
            assert_eq!(plane.width, 64);
            assert_eq!(plane.height, 64);
            for y in 0..2_u32 {
                for x in 0..2_u32 {
                    let original = [(0_u32, 0_u32), (1, 0), (0, 1), (1, 1)][k];
                    let raw = 100 + ((x * 2 + original.0) * 7 + (y * 2 + original.1) * 3) % 800;
                    let expanded = raw as f32 / white * EXPANDED_RANGE as f32;
                    let got = plane.pixel(x, y) as f32;
                    assert!(
                        (got - expanded).abs() <= 1.5,
                        "plane {} ({}, {}): {} vs {}",
                        k,
                        x,
                        y,
                        got,
                        expanded
                    );
                }
            }
        }
    }

    #[test]
    fn test_two_frame_noise_drop() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let noisy = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut noise = move || {
                let u1: f32 = rng.gen::<f32>().max(1e-7);
                let u2: f32 = rng.gen();
                (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
            };
            frame(move |x, _| (500.0 + 100.0 * ((x as f32) * 0.2).sin() + 8.0 * noise())
                .clamp(0.0, 1023.0) as u16)
        };
        let container = TestContainer::new(vec![
            ("ref".into(), noisy(1)),
            ("cand".into(), noisy(2)),
        ]);
        let settings = DenoiseSettings {
            spatial_weight: 0.0,
            ..Default::default()
        };
        let mut updates = Vec::new();
        let mut progress = |done: usize, total: usize| updates.push((done, total));
        let output = denoise(&container, &settings, &mut progress).unwrap();
        assert_eq!(output.num_frames, 2);
        // One unit per fused (channel, frame).
        assert_eq!(updates, vec![(1, 8), (2, 8), (3, 8), (4, 8)]);
        // Both frames were released.
        assert!(container.released.borrow().contains(&"ref".to_string()));
        assert!(container.released.borrow().contains(&"cand".to_string()));
    }

    #[test]
    fn test_exposure_compensation_filtered() {
        let mut other = frame(|_, _| 400);
        other.metadata.exposure_compensation = (1, 2);
        let container = TestContainer::new(vec![
            ("ref".into(), frame(|_, _| 400)),
            ("skewed".into(), other),
        ]);
        let mut progress = |_: usize, _: usize| {};
        let output =
            denoise(&container, &DenoiseSettings::default(), &mut progress).unwrap();
        // The compensated frame is dropped from the merge set.
        assert_eq!(output.num_frames, 1);
    }
}
