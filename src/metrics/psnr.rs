// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::metrics::FrameMetrics;
use crate::tiling::PlaneRegion;
use crate::util::{CastFromPrimitive, Pixel};

/// Squared error per plane, accumulated over the rows seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsnrAccumulator {
  sse: [u64; 3],
  samples: [u64; 3],
}

impl PsnrAccumulator {
  /// Adds the squared error between two equally sized regions of plane
  /// `pli`.
  pub fn add<T: Pixel>(
    &mut self, pli: usize, src: &PlaneRegion<'_, T>, rec: &PlaneRegion<'_, T>,
  ) {
    debug_assert_eq!(src.rect().width, rec.rect().width);
    debug_assert_eq!(src.rect().height, rec.rect().height);
    self.sse[pli] += src
      .rows_iter()
      .zip(rec.rows_iter())
      .flat_map(|(a, b)| a.iter().zip(b))
      .map(|(&a, &b)| (i32::cast_from(a) - i32::cast_from(b)).unsigned_abs() as u64)
      .map(|err| err * err)
      .sum::<u64>();
    self.samples[pli] += (src.rect().width * src.rect().height) as u64;
  }

  #[inline]
  pub fn sse(&self, pli: usize) -> u64 {
    self.sse[pli]
  }

  /// PSNR of each plane over everything accumulated.
  pub fn finish(&self, bit_depth: usize) -> FrameMetrics {
    let psnr = |pli: usize| {
      calculate_psnr(self.sse[pli], self.samples[pli], bit_depth)
    };
    FrameMetrics { y: psnr(0), u: psnr(1), v: psnr(2) }
  }
}

/// Calculates the PSNR from a sum of squared errors. Higher PSNR is
/// better--PSNR is capped at 100 in order to avoid skewed statistics from
/// e.g. all black frames, which would otherwise show a PSNR of infinity.
pub fn calculate_psnr(sse: u64, samples: u64, bit_depth: usize) -> f64 {
  if samples == 0 {
    return 100.0;
  }
  let mse = sse as f64 / samples as f64;
  if mse <= f64::EPSILON {
    return 100.0;
  }
  let max = ((1 << bit_depth) - 1) as f64;
  20.0 * max.log10() - 10.0 * mse.log10()
}
