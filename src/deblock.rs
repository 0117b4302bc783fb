// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::geometry::CtuInfo;
use crate::tiling::*;
use crate::util::*;

use std::cmp;

/// Deblocking of one CTU.
///
/// `planes` holds one region per plane covering the CTU plus
/// [`DEBLOCK_MARGIN`](crate::geometry::DEBLOCK_MARGIN) samples of the left
/// and top neighbours (decimated for chroma), clipped to the frame; the CTU
/// sits at `ctu.rects[pli]` inside each region. Implementations must not
/// depend on anything but the region contents and `ctu`.
pub trait DeblockStage<T: Pixel>: Send + Sync {
  fn filter_ctu(&self, ctu: &CtuInfo<'_>, planes: &mut [PlaneRegionMut<'_, T>]);
}

#[rustfmt::skip]
static BETA_PRIME: [u16; 52] = [
   0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,
   6,  7,  8,  9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 20, 22, 24,
  26, 28, 30, 32, 34, 36, 38, 40, 42, 44, 46, 48, 50, 52, 54, 56,
  58, 60, 62, 64,
];

#[rustfmt::skip]
static TC_PRIME: [u16; 54] = [
   0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,  0,
   0,  0,  1,  1,  1,  1,  1,  1,  1,  1,  1,  2,  2,  2,  2,  3,
   3,  3,  3,  4,  4,  4,  5,  5,  6,  6,  7,  8,  9, 10, 11, 13,
  14, 16, 18, 20, 22, 24,
];

#[rustfmt::skip]
static CHROMA_QP_TABLE: [i32; 13] = [
  29, 30, 31, 32, 33, 33, 34, 34, 35, 35, 36, 36, 37,
];

fn chroma_qp_mapping(qp_i: i32) -> i32 {
  if qp_i < 30 {
    qp_i
  } else if qp_i >= 43 {
    qp_i - 6
  } else {
    CHROMA_QP_TABLE[(qp_i - 30) as usize]
  }
}

/// Spacing of the edge grid, in samples of the filtered plane.
const EDGE_GRID: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Edge {
  x: usize,
  y: usize,
  vertical: bool,
}

impl Edge {
  // sample `i` of line `k`; the edge lies between samples 3 and 4
  #[inline(always)]
  fn pos(self, k: usize, i: usize) -> (usize, usize) {
    if self.vertical {
      (self.x + i - 4, self.y + k)
    } else {
      (self.x + k, self.y + i - 4)
    }
  }
}

#[inline(always)]
fn load<T: Pixel>(
  region: &PlaneRegionMut<'_, T>, edge: Edge, k: usize, taps: usize,
) -> [i32; 8] {
  let mut s = [0; 8];
  for i in 4 - taps..4 + taps {
    let (x, y) = edge.pos(k, i);
    s[i] = i32::cast_from(region[y][x]);
  }
  s
}

#[inline(always)]
fn store<T: Pixel>(
  region: &mut PlaneRegionMut<'_, T>, edge: Edge, k: usize, s: &[i32; 8],
  taps: usize,
) {
  for i in 4 - taps..4 + taps {
    let (x, y) = edge.pos(k, i);
    region[y][x] = T::cast_from(s[i]);
  }
}

/// HEVC-style deblocking, treating every edge on the 8x8 grid as an intra
/// boundary (bS = 2) with the CTU's QP on both sides.
///
/// A CTU filters the vertical edges in its own columns, which reach three
/// samples into the left neighbour, then the horizontal edges across its
/// own columns, which reach three samples into the top neighbour.
#[derive(Debug, Clone, Copy, Default)]
pub struct HevcDeblock {
  /// `slice_beta_offset_div2 * 2`
  pub beta_offset: i32,
  /// `slice_tc_offset_div2 * 2`
  pub tc_offset: i32,
}

impl HevcDeblock {
  fn filter_plane<T: Pixel>(
    &self, region: &mut PlaneRegionMut<'_, T>, ctu: Rect, luma: bool,
    qp: i32, bit_depth: usize,
  ) {
    let taps = if luma { 4 } else { 2 };
    let origin = *region.rect();
    let (w, h) = (region.width(), region.height());
    let (x0, y0) = (ctu.x as usize, ctu.y as usize);
    let (x1, y1) = (x0 + ctu.width, y0 + ctu.height);
    let on_grid = |rel: usize, base: isize, len: usize| {
      let abs = base as usize + rel;
      abs > 0 && abs % EDGE_GRID == 0 && rel >= taps && rel + taps <= len
    };

    for x in (x0..x1).filter(|&x| on_grid(x, origin.x, w)) {
      for y in (y0..y1).step_by(4) {
        let edge = Edge { x, y, vertical: true };
        let lines = cmp::min(4, y1 - y);
        self.filter_edge(region, edge, lines, luma, qp, bit_depth);
      }
    }
    for y in (y0..y1).filter(|&y| on_grid(y, origin.y, h)) {
      for x in (x0..x1).step_by(4) {
        let edge = Edge { x, y, vertical: false };
        let lines = cmp::min(4, x1 - x);
        self.filter_edge(region, edge, lines, luma, qp, bit_depth);
      }
    }
  }

  fn filter_edge<T: Pixel>(
    &self, region: &mut PlaneRegionMut<'_, T>, edge: Edge, lines: usize,
    luma: bool, qp: i32, bit_depth: usize,
  ) {
    if luma {
      self.luma_edge(region, edge, lines, qp, bit_depth);
    } else {
      let xdec = region.plane_cfg.xdec;
      let ydec = region.plane_cfg.ydec;
      let qp_c =
        if xdec == 1 && ydec == 1 { chroma_qp_mapping(qp) } else { qp.min(51) };
      self.chroma_edge(region, edge, lines, qp_c, bit_depth);
    }
  }

  fn luma_edge<T: Pixel>(
    &self, region: &mut PlaneRegionMut<'_, T>, edge: Edge, lines: usize,
    qp: i32, bit_depth: usize,
  ) {
    let shift = bit_depth - 8;
    let max = (1 << bit_depth) - 1;
    let q_beta = (qp + self.beta_offset).clamp(0, 51);
    let beta = (BETA_PRIME[q_beta as usize] as i32) << shift;
    let q_tc = (qp + 2 + self.tc_offset).clamp(0, 53);
    let tc = (TC_PRIME[q_tc as usize] as i32) << shift;
    if tc == 0 {
      return;
    }

    let first = load(region, edge, 0, 4);
    let last = load(region, edge, lines - 1, 4);
    let dp = |s: &[i32; 8]| (s[1] - 2 * s[2] + s[3]).abs();
    let dq = |s: &[i32; 8]| (s[6] - 2 * s[5] + s[4]).abs();
    let dpq0 = dp(&first) + dq(&first);
    let dpq3 = dp(&last) + dq(&last);
    if dpq0 + dpq3 >= beta {
      return;
    }

    let strong_line = |s: &[i32; 8], dpq: i32| {
      2 * dpq < (beta >> 2)
        && (s[0] - s[3]).abs() + (s[4] - s[7]).abs() < (beta >> 3)
        && (s[3] - s[4]).abs() < ((5 * tc + 1) >> 1)
    };
    let strong = strong_line(&first, dpq0) && strong_line(&last, dpq3);
    let side = (beta + (beta >> 1)) >> 3;
    let d_ep = dp(&first) + dp(&last) < side;
    let d_eq = dq(&first) + dq(&last) < side;

    for k in 0..lines {
      let mut s = load(region, edge, k, 4);
      let [p3, p2, p1, p0, q0, q1, q2, q3] = s;
      if strong {
        let tc2 = 2 * tc;
        s[1] = ((2 * p3 + 3 * p2 + p1 + p0 + q0 + 4) >> 3)
          .clamp(p2 - tc2, p2 + tc2);
        s[2] = ((p2 + p1 + p0 + q0 + 2) >> 2).clamp(p1 - tc2, p1 + tc2);
        s[3] = ((p2 + 2 * p1 + 2 * p0 + 2 * q0 + q1 + 4) >> 3)
          .clamp(p0 - tc2, p0 + tc2);
        s[4] = ((p1 + 2 * p0 + 2 * q0 + 2 * q1 + q2 + 4) >> 3)
          .clamp(q0 - tc2, q0 + tc2);
        s[5] = ((p0 + q0 + q1 + q2 + 2) >> 2).clamp(q1 - tc2, q1 + tc2);
        s[6] = ((p0 + q0 + q1 + 3 * q2 + 2 * q3 + 4) >> 3)
          .clamp(q2 - tc2, q2 + tc2);
      } else {
        let delta = (9 * (q0 - p0) - 3 * (q1 - p1) + 8) >> 4;
        if delta.abs() >= 10 * tc {
          continue;
        }
        let delta = delta.clamp(-tc, tc);
        s[3] = p0 + delta;
        s[4] = q0 - delta;
        if d_ep {
          s[2] = p1
            + ((((p2 + p0 + 1) >> 1) - p1 + delta) >> 1)
              .clamp(-(tc >> 1), tc >> 1);
        }
        if d_eq {
          s[5] = q1
            + ((((q2 + q0 + 1) >> 1) - q1 - delta) >> 1)
              .clamp(-(tc >> 1), tc >> 1);
        }
      }
      for v in s.iter_mut() {
        *v = (*v).clamp(0, max);
      }
      store(region, edge, k, &s, 3);
    }
  }

  fn chroma_edge<T: Pixel>(
    &self, region: &mut PlaneRegionMut<'_, T>, edge: Edge, lines: usize,
    qp_c: i32, bit_depth: usize,
  ) {
    let max = (1 << bit_depth) - 1;
    let q_tc = (qp_c + 2 + self.tc_offset).clamp(0, 53);
    let tc = (TC_PRIME[q_tc as usize] as i32) << (bit_depth - 8);
    if tc == 0 {
      return;
    }

    for k in 0..lines {
      let mut s = load(region, edge, k, 2);
      let [_, _, p1, p0, q0, q1, _, _] = s;
      let delta = (((q0 - p0) * 4 + p1 - q1 + 4) >> 3).clamp(-tc, tc);
      s[3] = (p0 + delta).clamp(0, max);
      s[4] = (q0 - delta).clamp(0, max);
      store(region, edge, k, &s, 1);
    }
  }
}

impl<T: Pixel> DeblockStage<T> for HevcDeblock {
  fn filter_ctu(
    &self, ctu: &CtuInfo<'_>, planes: &mut [PlaneRegionMut<'_, T>],
  ) {
    let qp = ctu.qp as i32;
    for (pli, region) in planes.iter_mut().enumerate() {
      self.filter_plane(region, ctu.rects[pli], pli == 0, qp, ctu.bit_depth);
    }
  }
}
