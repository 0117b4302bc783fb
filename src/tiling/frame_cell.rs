// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;
use crate::frame::*;
use crate::util::*;

use std::marker::PhantomData;
use std::ops::Range;
use std::slice;

#[derive(Debug)]
struct PlaneCell<T: Pixel> {
  data: *mut T,
  len: usize,
  cfg: PlaneConfig,
}

impl<T: Pixel> PlaneCell<T> {
  fn new(plane: &mut Plane<T>) -> Self {
    Self {
      data: plane.data.as_mut_ptr(),
      len: plane.data.len(),
      cfg: plane.cfg.clone(),
    }
  }
}

/// Exclusive borrow of a frame that hands out regions to several threads.
///
/// The frame filter guarantees through its scheduling that concurrently
/// live regions never overlap when one of them is mutable; the cell itself
/// checks nothing beyond bounds, which is why its accessors are `unsafe`.
#[derive(Debug)]
pub struct FrameCell<'a, T: Pixel> {
  planes: [PlaneCell<T>; 3],
  phantom: PhantomData<&'a mut Frame<T>>,
}

unsafe impl<T: Pixel> Send for FrameCell<'_, T> {}
unsafe impl<T: Pixel> Sync for FrameCell<'_, T> {}

impl<'a, T: Pixel> FrameCell<'a, T> {
  pub fn new(frame: &'a mut Frame<T>) -> Self {
    let [y, u, v] = &mut frame.planes;
    Self {
      planes: [PlaneCell::new(y), PlaneCell::new(u), PlaneCell::new(v)],
      phantom: PhantomData,
    }
  }

  #[inline(always)]
  pub fn plane_cfg(&self, pli: usize) -> &PlaneConfig {
    &self.planes[pli].cfg
  }

  /// Read-only view of `rect` (relative to the plane origin).
  ///
  /// # Safety
  ///
  /// No mutable region overlapping `rect` may be live at the same time.
  #[inline(always)]
  pub unsafe fn region(&self, pli: usize, rect: Rect) -> PlaneRegion<'_, T> {
    let plane = &self.planes[pli];
    PlaneRegion::from_raw_parts(plane.data, &plane.cfg, rect)
  }

  /// Mutable view of `rect` (relative to the plane origin).
  ///
  /// # Safety
  ///
  /// No other region overlapping `rect` may be live at the same time.
  #[inline(always)]
  pub unsafe fn region_mut(
    &self, pli: usize, rect: Rect,
  ) -> PlaneRegionMut<'_, T> {
    let plane = &self.planes[pli];
    PlaneRegionMut::from_raw_parts(plane.data, &plane.cfg, rect)
  }

  /// Whole allocated lines `lines`, padding included, as one slice.
  ///
  /// # Safety
  ///
  /// No other region touching these lines may be live at the same time.
  #[allow(clippy::mut_from_ref)]
  pub unsafe fn lines_mut(
    &self, pli: usize, lines: Range<usize>,
  ) -> &mut [T] {
    let plane = &self.planes[pli];
    let start = lines.start * plane.cfg.stride;
    let end = lines.end * plane.cfg.stride;
    assert!(start <= end && end <= plane.len);
    slice::from_raw_parts_mut(plane.data.add(start), end - start)
  }

  /// Replicates the visible pixels of lines `rows` of plane `pli` into the
  /// left and right padding, and into the top or bottom padding when asked.
  ///
  /// # Safety
  ///
  /// No other region touching the affected lines may be live at the same
  /// time.
  pub unsafe fn extend_borders(
    &self, pli: usize, rows: Range<usize>, top: bool, bottom: bool,
  ) {
    let PlaneConfig { stride, width, height, xorigin, yorigin, .. } =
      self.planes[pli].cfg;
    if width == 0 || rows.is_empty() {
      return;
    }
    debug_assert!(rows.end <= height);

    let lines = self.lines_mut(pli, yorigin + rows.start..yorigin + rows.end);
    for line in lines.chunks_exact_mut(stride) {
      extend_line(line, xorigin, width);
    }
    if top {
      extend_lines_up(self.lines_mut(pli, 0..yorigin + 1), stride);
    }
    if bottom {
      let alloc_height = self.planes[pli].cfg.alloc_height;
      extend_lines_down(
        self.lines_mut(pli, yorigin + height - 1..alloc_height),
        stride,
      );
    }
  }
}
