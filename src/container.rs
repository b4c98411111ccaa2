// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - container.rs
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

//! The consumed burst container interface.

use std::rc::Rc;

use crate::buffer::RawImageBuffer;
use crate::metadata::{RawCameraMetadata, RawImageMetadata};
use crate::settings::PostProcessSettings;
use crate::Result;

/// A burst of raw frames plus its capture metadata.
///
/// The file format behind this interface is not the core's concern.
/// Frames load lazily: [`FrameContainer::load_frame`] materializes the
/// bytes, [`FrameContainer::release_frame`] lets the container drop
/// them once the frame's contribution has been fused.
pub trait FrameContainer {
    /// Frame ids, in capture order.
    fn frames(&self) -> Vec<String>;

    /// Id of the reference frame.
    fn reference_frame(&self) -> String;

    /// Cheap metadata-only access to one frame.
    fn frame_metadata(&self, id: &str) -> Option<RawImageMetadata>;

    /// Materialize one frame.
    fn load_frame(&self, id: &str) -> Result<Rc<RawImageBuffer>>;

    /// Drop the materialized bytes of one frame.
    fn release_frame(&self, id: &str);

    fn camera_metadata(&self) -> &RawCameraMetadata;

    fn post_process_settings(&self) -> PostProcessSettings;

    /// Whether the caller wants the linear DNG written too.
    fn write_dng(&self) -> bool;
}
