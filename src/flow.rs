// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * libmotioncam - flow.rs
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

//! Dense inverse search optical flow between two luma previews.

use crate::bitmap::ImageBuffer;

/// Patch edge length. Downstream motion heuristics depend on these
/// settings, they are part of the contract.
pub const PATCH_SIZE: usize = 16;
/// Grid stride between patches.
pub const PATCH_STRIDE: usize = 8;
/// Inverse compositional iterations per patch.
pub const DESCENT_ITERATIONS: usize = 16;
/// Variational refinement sweeps over the dense field.
pub const REFINEMENT_ITERATIONS: usize = 5;

/// Downscale applied before measuring the motion statistic.
const STAT_DOWNSCALE: usize = 4;

/// Dense (u, v) displacement field at preview resolution, mapping
/// reference coordinates into the candidate frame.
#[derive(Clone, Debug)]
pub struct FlowField {
    pub width: usize,
    pub height: usize,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
}

impl FlowField {
    fn zero(width: usize, height: usize) -> Self {
        FlowField {
            width,
            height,
            u: vec![0.0; width * height],
            v: vec![0.0; width * height],
        }
    }

    /// Bilinear sample of the field, edge clamped.
    pub fn sample(&self, x: f32, y: f32) -> (f32, f32) {
        let x = x.clamp(0.0, self.width as f32 - 1.0);
        let y = y.clamp(0.0, self.height as f32 - 1.0);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let at = |f: &[f32], x: usize, y: usize| f[y * self.width + x];
        let u = lerp(
            lerp(at(&self.u, x0, y0), at(&self.u, x1, y0), fx),
            lerp(at(&self.u, x0, y1), at(&self.u, x1, y1), fx),
            fy,
        );
        let v = lerp(
            lerp(at(&self.v, x0, y0), at(&self.v, x1, y0), fx),
            lerp(at(&self.v, x0, y1), at(&self.v, x1, y1), fx),
            fy,
        );
        (u, v)
    }

    /// Standard deviation of the flow magnitude, measured on the field
    /// downscaled by 4. Characterizes scene motion for the fusion
    /// weight heuristics.
    pub fn std_dev(&self) -> f32 {
        let mut magnitudes = Vec::new();
        let mut y = 0;
        while y < self.height {
            let mut x = 0;
            while x < self.width {
                let i = y * self.width + x;
                magnitudes.push((self.u[i] * self.u[i] + self.v[i] * self.v[i]).sqrt());
                x += STAT_DOWNSCALE;
            }
            y += STAT_DOWNSCALE;
        }
        if magnitudes.len() < 2 {
            return 0.0;
        }
        let mean = magnitudes.iter().sum::<f32>() / magnitudes.len() as f32;
        let var = magnitudes
            .iter()
            .map(|m| (m - mean) * (m - mean))
            .sum::<f32>()
            / magnitudes.len() as f32;
        var.sqrt()
    }
}

struct Level {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Level {
    fn from_preview(preview: &ImageBuffer<u8>) -> Self {
        Level {
            width: preview.width as usize,
            height: preview.height as usize,
            data: preview.data.iter().map(|&v| v as f32).collect(),
        }
    }

    fn downsample(&self) -> Self {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        let mut data = vec![0.0_f32; w * h];
        for y in 0..h {
            for x in 0..w {
                let x0 = (x * 2).min(self.width - 1);
                let x1 = (x * 2 + 1).min(self.width - 1);
                let y0 = (y * 2).min(self.height - 1);
                let y1 = (y * 2 + 1).min(self.height - 1);
                data[y * w + x] = 0.25
                    * (self.data[y0 * self.width + x0]
                        + self.data[y0 * self.width + x1]
                        + self.data[y1 * self.width + x0]
                        + self.data[y1 * self.width + x1]);
            }
        }
        Level {
            width: w,
            height: h,
            data,
        }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    fn sample(&self, x: f32, y: f32) -> f32 {
        let x = x.clamp(0.0, self.width as f32 - 1.0);
        let y = y.clamp(0.0, self.height as f32 - 1.0);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let top = self.at(x0, y0) * (1.0 - fx) + self.at(x1, y0) * fx;
        let bottom = self.at(x0, y1) * (1.0 - fx) + self.at(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// Patch SSD between the reference at (px, py) and the candidate
/// displaced by (u, v).
fn patch_cost(reference: &Level, candidate: &Level, px: usize, py: usize, u: f32, v: f32) -> f32 {
    let mut cost = 0.0;
    for dy in 0..PATCH_SIZE {
        for dx in 0..PATCH_SIZE {
            let r = reference.at(px + dx, py + dy);
            let c = candidate.sample((px + dx) as f32 + u, (py + dy) as f32 + v);
            cost += (c - r) * (c - r);
        }
    }
    cost
}

/// Inverse compositional refinement of one patch displacement.
fn descend_patch(
    reference: &Level,
    candidate: &Level,
    px: usize,
    py: usize,
    mut u: f32,
    mut v: f32,
) -> (f32, f32) {
    // Patch gradients and the 2x2 Gauss-Newton system, computed once
    // on the reference.
    let mut gx = [0.0_f32; PATCH_SIZE * PATCH_SIZE];
    let mut gy = [0.0_f32; PATCH_SIZE * PATCH_SIZE];
    let mut h00 = 0.0_f32;
    let mut h01 = 0.0_f32;
    let mut h11 = 0.0_f32;
    for dy in 0..PATCH_SIZE {
        for dx in 0..PATCH_SIZE {
            let x = (px + dx).min(reference.width - 2).max(1);
            let y = (py + dy).min(reference.height - 2).max(1);
            let ix = 0.5 * (reference.at(x + 1, y) - reference.at(x - 1, y));
            let iy = 0.5 * (reference.at(x, y + 1) - reference.at(x, y - 1));
            gx[dy * PATCH_SIZE + dx] = ix;
            gy[dy * PATCH_SIZE + dx] = iy;
            h00 += ix * ix;
            h01 += ix * iy;
            h11 += iy * iy;
        }
    }
    let det = h00 * h11 - h01 * h01;
    if det.abs() < 1e-6 {
        // Textureless patch, keep the propagated displacement.
        return (u, v);
    }
    let inv00 = h11 / det;
    let inv01 = -h01 / det;
    let inv11 = h00 / det;

    for _ in 0..DESCENT_ITERATIONS {
        let mut b0 = 0.0_f32;
        let mut b1 = 0.0_f32;
        for dy in 0..PATCH_SIZE {
            for dx in 0..PATCH_SIZE {
                let e = candidate.sample((px + dx) as f32 + u, (py + dy) as f32 + v)
                    - reference.at(px + dx, py + dy);
                b0 += e * gx[dy * PATCH_SIZE + dx];
                b1 += e * gy[dy * PATCH_SIZE + dx];
            }
        }
        let du = inv00 * b0 + inv01 * b1;
        let dv = inv01 * b0 + inv11 * b1;
        u -= du;
        v -= dv;
        if du.abs() < 0.01 && dv.abs() < 0.01 {
            break;
        }
    }
    (u, v)
}

/// Horn-Schunck style smoothing of the dense field against the
/// linearized data term.
fn refine(reference: &Level, candidate: &Level, flow: &mut FlowField) {
    let w = flow.width;
    let h = flow.height;
    const ALPHA2: f32 = 100.0;

    // Linearize once around the current field.
    let mut ix = vec![0.0_f32; w * h];
    let mut iy = vec![0.0_f32; w * h];
    let mut it = vec![0.0_f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let cx = x as f32 + flow.u[i];
            let cy = y as f32 + flow.v[i];
            ix[i] = 0.5 * (candidate.sample(cx + 1.0, cy) - candidate.sample(cx - 1.0, cy));
            iy[i] = 0.5 * (candidate.sample(cx, cy + 1.0) - candidate.sample(cx, cy - 1.0));
            it[i] = candidate.sample(cx, cy) - reference.at(x, y);
        }
    }

    for _ in 0..REFINEMENT_ITERATIONS {
        let u = flow.u.clone();
        let v = flow.v.clone();
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let left = u[y * w + x.saturating_sub(1)];
                let right = u[y * w + (x + 1).min(w - 1)];
                let up = u[y.saturating_sub(1) * w + x];
                let down = u[(y + 1).min(h - 1) * w + x];
                let ubar = 0.25 * (left + right + up + down);
                let left = v[y * w + x.saturating_sub(1)];
                let right = v[y * w + (x + 1).min(w - 1)];
                let up = v[y.saturating_sub(1) * w + x];
                let down = v[(y + 1).min(h - 1) * w + x];
                let vbar = 0.25 * (left + right + up + down);

                let t = (ix[i] * (ubar - u[i]) + iy[i] * (vbar - v[i]) + it[i])
                    / (ALPHA2 + ix[i] * ix[i] + iy[i] * iy[i]);
                flow.u[i] = ubar - ix[i] * t;
                flow.v[i] = vbar - iy[i] * t;
            }
        }
    }
}

/// Dense flow from `reference` to `candidate`.
///
/// Coarse to fine inverse search: per patch gradient descent with
/// left/top spatial propagation, bilinear densification of the patch
/// grid, then variational refinement at each scale.
pub fn compute(reference: &ImageBuffer<u8>, candidate: &ImageBuffer<u8>) -> FlowField {
    let mut ref_pyramid = vec![Level::from_preview(reference)];
    let mut cand_pyramid = vec![Level::from_preview(candidate)];
    while ref_pyramid.last().map(|l| l.width.min(l.height)).unwrap_or(0) >= PATCH_SIZE * 4
        && ref_pyramid.len() < 6
    {
        let coarser = ref_pyramid.last().unwrap().downsample();
        ref_pyramid.push(coarser);
        let coarser = cand_pyramid.last().unwrap().downsample();
        cand_pyramid.push(coarser);
    }

    let coarsest = ref_pyramid.len() - 1;
    let mut flow = FlowField::zero(ref_pyramid[coarsest].width, ref_pyramid[coarsest].height);

    for level in (0..=coarsest).rev() {
        let r = &ref_pyramid[level];
        let c = &cand_pyramid[level];

        if flow.width != r.width || flow.height != r.height {
            // Upsample the coarser field, doubling the displacements.
            let mut up = FlowField::zero(r.width, r.height);
            for y in 0..r.height {
                for x in 0..r.width {
                    let (u, v) = flow.sample(x as f32 * 0.5, y as f32 * 0.5);
                    up.u[y * r.width + x] = u * 2.0;
                    up.v[y * r.width + x] = v * 2.0;
                }
            }
            flow = up;
        }

        if r.width < PATCH_SIZE || r.height < PATCH_SIZE {
            continue;
        }

        // Patch grid.
        let gw = (r.width - PATCH_SIZE) / PATCH_STRIDE + 1;
        let gh = (r.height - PATCH_SIZE) / PATCH_STRIDE + 1;
        let mut grid_u = vec![0.0_f32; gw * gh];
        let mut grid_v = vec![0.0_f32; gw * gh];
        for gy in 0..gh {
            for gx in 0..gw {
                let px = gx * PATCH_STRIDE;
                let py = gy * PATCH_STRIDE;
                let cx = (px + PATCH_SIZE / 2) as f32;
                let cy = (py + PATCH_SIZE / 2) as f32;
                let (mut u, mut v) = flow.sample(cx, cy);
                let mut best = patch_cost(r, c, px, py, u, v);

                // Spatial propagation from the already refined left and
                // top neighbours.
                if gx > 0 {
                    let nu = grid_u[gy * gw + gx - 1];
                    let nv = grid_v[gy * gw + gx - 1];
                    let cost = patch_cost(r, c, px, py, nu, nv);
                    if cost < best {
                        best = cost;
                        u = nu;
                        v = nv;
                    }
                }
                if gy > 0 {
                    let nu = grid_u[(gy - 1) * gw + gx];
                    let nv = grid_v[(gy - 1) * gw + gx];
                    let cost = patch_cost(r, c, px, py, nu, nv);
                    if cost < best {
                        u = nu;
                        v = nv;
                    }
                }

                let (u, v) = descend_patch(r, c, px, py, u, v);
                grid_u[gy * gw + gx] = u;
                grid_v[gy * gw + gx] = v;
            }
        }

        // Densify: bilinear spread of the patch grid.
        let origin = (PATCH_SIZE / 2) as f32;
        let stride = PATCH_STRIDE as f32;
        for y in 0..r.height {
            for x in 0..r.width {
                let gx = ((x as f32 - origin) / stride).clamp(0.0, gw as f32 - 1.0);
                let gy = ((y as f32 - origin) / stride).clamp(0.0, gh as f32 - 1.0);
                let x0 = gx.floor() as usize;
                let y0 = gy.floor() as usize;
                let x1 = (x0 + 1).min(gw - 1);
                let y1 = (y0 + 1).min(gh - 1);
                let fx = gx - x0 as f32;
                let fy = gy - y0 as f32;
                let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
                flow.u[y * r.width + x] = lerp(
                    lerp(grid_u[y0 * gw + x0], grid_u[y0 * gw + x1], fx),
                    lerp(grid_u[y1 * gw + x0], grid_u[y1 * gw + x1], fx),
                    fy,
                );
                flow.v[y * r.width + x] = lerp(
                    lerp(grid_v[y0 * gw + x0], grid_v[y0 * gw + x1], fx),
                    lerp(grid_v[y1 * gw + x0], grid_v[y1 * gw + x1], fx),
                    fy,
                );
            }
        }

        refine(r, c, &mut flow);
    }

    flow
}
