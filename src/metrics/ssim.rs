// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::tiling::PlaneRegion;
use crate::util::{CastFromPrimitive, Pixel};

use std::mem;
use std::ops::Add;

/// Offset of the first window from the top-left of the picture.
const GRID_OFFSET: usize = 2;
/// Side of the blocks the windows are built from.
const BLOCK: usize = 4;

const SSIM_K1: f64 = 0.01 * 0.01;
const SSIM_K2: f64 = 0.03 * 0.03;

#[derive(Debug, Clone, Copy, Default)]
struct SsimMoments {
  mux: u64,
  muy: u64,
  xy2: u64,
  xy: u64,
}

impl Add for SsimMoments {
  type Output = Self;

  fn add(self, rhs: Self) -> Self {
    Self {
      mux: self.mux + rhs.mux,
      muy: self.muy + rhs.muy,
      xy2: self.xy2 + rhs.xy2,
      xy: self.xy + rhs.xy,
    }
  }
}

/// Luma SSIM over 8x8 windows placed every 4 samples, fed in line order.
///
/// Windows are assembled from 4x4 block moments; the last block line is
/// kept between calls so a window straddling two CTU rows is scored once
/// the lower row arrives.
#[derive(Debug, Clone)]
pub struct SsimAccumulator {
  width: usize,
  sample_max: f64,
  prev: Vec<SsimMoments>,
  cur: Vec<SsimMoments>,
  has_prev: bool,
  next_y: usize,
  sum: f64,
  count: u64,
}

impl SsimAccumulator {
  pub fn new(width: usize, bit_depth: usize) -> Self {
    let blocks = width.saturating_sub(GRID_OFFSET) / BLOCK;
    Self {
      width,
      sample_max: ((1 << bit_depth) - 1) as f64,
      prev: vec![SsimMoments::default(); blocks],
      cur: vec![SsimMoments::default(); blocks],
      has_prev: false,
      next_y: GRID_OFFSET,
      sum: 0.0,
      count: 0,
    }
  }

  /// Scores every window fully inside the lines of `src` and `rec`.
  ///
  /// Both regions must start at line 0 of the plane and span its full
  /// width; each call must cover at least the lines of the previous one.
  pub fn add_lines<T: Pixel>(
    &mut self, src: &PlaneRegion<'_, T>, rec: &PlaneRegion<'_, T>,
  ) {
    debug_assert_eq!(self.width, src.rect().width);
    let end = src.rect().height;
    while self.next_y + BLOCK <= end {
      let y = self.next_y;
      for (i, block) in self.cur.iter_mut().enumerate() {
        let x = GRID_OFFSET + i * BLOCK;
        *block = block_moments(src, rec, x, y);
      }
      if self.has_prev {
        for i in 1..self.cur.len() {
          let window =
            self.prev[i - 1] + self.prev[i] + self.cur[i - 1] + self.cur[i];
          self.sum += self.score(window);
          self.count += 1;
        }
      }
      mem::swap(&mut self.prev, &mut self.cur);
      self.has_prev = true;
      self.next_y += BLOCK;
    }
  }

  fn score(&self, m: SsimMoments) -> f64 {
    const N: f64 = (2 * BLOCK * 2 * BLOCK) as f64;
    let c1 = SSIM_K1 * self.sample_max * self.sample_max * N;
    let c2 = SSIM_K2 * self.sample_max * self.sample_max * N * (N - 1.0);
    let (s1, s2) = (m.mux as f64, m.muy as f64);
    let vars = m.xy2 as f64 * N - s1 * s1 - s2 * s2;
    let covar = m.xy as f64 * N - s1 * s2;
    (2.0 * s1 * s2 + c1) * (2.0 * covar + c2)
      / ((s1 * s1 + s2 * s2 + c1) * (vars + c2))
  }

  /// Number of windows scored.
  #[inline]
  pub fn count(&self) -> u64 {
    self.count
  }

  /// Mean SSIM of the scored windows, 1.0 if there were none.
  pub fn finish(&self) -> f64 {
    if self.count == 0 {
      1.0
    } else {
      self.sum / self.count as f64
    }
  }
}

fn block_moments<T: Pixel>(
  src: &PlaneRegion<'_, T>, rec: &PlaneRegion<'_, T>, x: usize, y: usize,
) -> SsimMoments {
  let mut m = SsimMoments::default();
  for line in y..y + BLOCK {
    let a = &src[line][x..x + BLOCK];
    let b = &rec[line][x..x + BLOCK];
    for (&a, &b) in a.iter().zip(b) {
      let a = u64::from(u32::cast_from(a));
      let b = u64::from(u32::cast_from(b));
      m.mux += a;
      m.muy += b;
      m.xy2 += a * a + b * b;
      m.xy += a * b;
    }
  }
  m
}
