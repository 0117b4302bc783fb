// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::fmt::{Debug, Display, Formatter};
use std::mem;

use crate::util::*;

/// Plane-specific configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneConfig {
  /// Data stride.
  pub stride: usize,
  /// Allocated height in pixels.
  pub alloc_height: usize,
  /// Width in pixels.
  pub width: usize,
  /// Height in pixels.
  pub height: usize,
  /// Decimator along the X axis.
  ///
  /// For example, for chroma planes in a 4:2:0 configuration this would be 1.
  pub xdec: usize,
  /// Decimator along the Y axis.
  ///
  /// For example, for chroma planes in a 4:2:0 configuration this would be 1.
  pub ydec: usize,
  /// Number of padding pixels on the right.
  pub xpad: usize,
  /// Number of padding pixels on the bottom.
  pub ypad: usize,
  /// X where the data starts.
  pub xorigin: usize,
  /// Y where the data starts.
  pub yorigin: usize,
}

impl PlaneConfig {
  /// Stride alignment in bytes.
  const STRIDE_ALIGNMENT_LOG2: usize = 6;

  #[inline]
  pub fn new(
    width: usize, height: usize, xdec: usize, ydec: usize, xpad: usize,
    ypad: usize, type_size: usize,
  ) -> Self {
    let xorigin =
      xpad.align_power_of_two(Self::STRIDE_ALIGNMENT_LOG2 + 1 - type_size);
    let yorigin = ypad;
    let stride = (xorigin + width + xpad)
      .align_power_of_two(Self::STRIDE_ALIGNMENT_LOG2 + 1 - type_size);
    let alloc_height = yorigin + height + ypad;

    PlaneConfig {
      stride,
      alloc_height,
      width,
      height,
      xdec,
      ydec,
      xpad,
      ypad,
      xorigin,
      yorigin,
    }
  }
}

/// One data plane of a frame.
///
/// For example, a plane can be a Y luma plane or a U or V chroma plane.
#[derive(Clone, PartialEq, Eq)]
pub struct Plane<T: Pixel> {
  pub data: Vec<T>,
  /// Plane configuration.
  pub cfg: PlaneConfig,
}

impl<T: Pixel> Debug for Plane<T>
where
  T: Display,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Plane {{ data: [{}, ...], cfg: {:?} }}", self.data[0], self.cfg)
  }
}

impl<T: Pixel> Plane<T> {
  /// Allocates and returns a new plane filled with mid-grey.
  pub fn new(
    width: usize, height: usize, xdec: usize, ydec: usize, xpad: usize,
    ypad: usize,
  ) -> Self {
    let cfg = PlaneConfig::new(
      width,
      height,
      xdec,
      ydec,
      xpad,
      ypad,
      mem::size_of::<T>(),
    );
    let data = vec![T::cast_from(128u16); cfg.stride * cfg.alloc_height];

    Plane { data, cfg }
  }

  /// Replicates the outermost visible pixels into the whole padding area.
  pub fn pad(&mut self) {
    let PlaneConfig { stride, xorigin, yorigin, width, height, .. } = self.cfg;
    if width == 0 || height == 0 {
      return;
    }

    let lines = self.data.chunks_mut(stride).skip(yorigin).take(height);
    for line in lines {
      extend_line(line, xorigin, width);
    }
    extend_lines_up(&mut self.data[..(yorigin + 1) * stride], stride);
    extend_lines_down(&mut self.data[(yorigin + height - 1) * stride..], stride);
  }

  #[inline]
  fn index(&self, x: usize, y: usize) -> usize {
    (y + self.cfg.yorigin) * self.cfg.stride + (x + self.cfg.xorigin)
  }

  /// Returns the pixel at the given coordinates.
  pub fn p(&self, x: usize, y: usize) -> T {
    self.data[self.index(x, y)]
  }

  /// Returns the visible part of line `y`.
  pub fn row(&self, y: usize) -> &[T] {
    let base = self.index(0, y);
    &self.data[base..base + self.cfg.width]
  }

  /// Returns the visible part of line `y`, mutably.
  pub fn row_mut(&mut self, y: usize) -> &mut [T] {
    let base = self.index(0, y);
    let width = self.cfg.width;
    &mut self.data[base..base + width]
  }
}

/// Replicates the first and last visible pixel of a line into its padding.
pub(crate) fn extend_line<T: Pixel>(
  line: &mut [T], xorigin: usize, width: usize,
) {
  let (left, rest) = line.split_at_mut(xorigin);
  left.fill(rest[0]);
  let (visible, right) = rest.split_at_mut(width);
  right.fill(visible[width - 1]);
}

/// Copies the last line of `lines` into every line above it.
pub(crate) fn extend_lines_up<T: Pixel>(lines: &mut [T], stride: usize) {
  let (top, src) = lines.split_at_mut(lines.len() - stride);
  for dst in top.chunks_exact_mut(stride) {
    dst.copy_from_slice(src);
  }
}

/// Copies the first line of `lines` into every line below it.
pub(crate) fn extend_lines_down<T: Pixel>(lines: &mut [T], stride: usize) {
  let (src, bottom) = lines.split_at_mut(stride);
  for dst in bottom.chunks_exact_mut(stride) {
    dst.copy_from_slice(src);
  }
}
