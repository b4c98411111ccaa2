// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - buffer.rs
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

//! Raw frame buffers.

use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::metadata::RawImageMetadata;

/// Pixel packing of the sensor bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    /// 10 bit samples, packed MSB first, rows padded to `row_stride`.
    Raw10,
    /// 12 bit samples, packed MSB first, rows padded to `row_stride`.
    Raw12,
    /// Little endian 16 bit samples.
    Raw16,
    /// 8 bit Bayer sites in a luma plane, scaled to the white level.
    Yuv420Bayer,
}

/// The raw byte blob of one exposure, behind a scoped lock.
///
/// Access goes through [`NativeBuffer::lock`]; the lock is released
/// when the guard drops, on every exit path.
#[derive(Debug, Default)]
pub struct NativeBuffer {
    data: Mutex<Vec<u8>>,
}

impl NativeBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        NativeBuffer {
            data: Mutex::new(data),
        }
    }

    /// Scoped access to the bytes.
    pub fn lock(&self) -> LockedBuffer<'_> {
        LockedBuffer {
            guard: self.data.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// RAII guard over the raw bytes.
pub struct LockedBuffer<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
}

impl Deref for LockedBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.as_slice()
    }
}

/// One raw exposure as it comes out of the container.
#[derive(Debug)]
pub struct RawImageBuffer {
    /// Width in sensor pixels.
    pub width: u32,
    /// Height in sensor pixels.
    pub height: u32,
    /// Bytes per packed row.
    pub row_stride: u32,
    pub pixel_format: PixelFormat,
    pub data: NativeBuffer,
    pub metadata: RawImageMetadata,
}

impl RawImageBuffer {
    pub fn new(
        width: u32,
        height: u32,
        row_stride: u32,
        pixel_format: PixelFormat,
        data: Vec<u8>,
        metadata: RawImageMetadata,
    ) -> Self {
        RawImageBuffer {
            width,
            height,
            row_stride,
            pixel_format,
            data: NativeBuffer::new(data),
            metadata,
        }
    }
}

#[cfg(test)]
mod test {
    use super::NativeBuffer;

    #[test]
    fn test_scoped_lock() {
        let buffer = NativeBuffer::new(vec![1, 2, 3]);
        {
            let locked = buffer.lock();
            assert_eq!(&locked[..], &[1, 2, 3]);
        }
        // Released on drop; locking again must not deadlock.
        let locked = buffer.lock();
        assert_eq!(locked.len(), 3);
    }
}
