// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::frame::ChromaSampling;
use crate::tiling::Rect;
use crate::util::Fixed;

use std::any::Any;
use std::cmp;
use std::ops::Range;

/// Luma samples of the left and top neighbours a deblocked CTU may touch.
pub const DEBLOCK_MARGIN: usize = 4;
/// Width of the ring of neighbouring samples SAO reads around a CTU.
pub const SAO_MARGIN: usize = 1;

/// A CTU rectangle inside the larger window handed to a filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtuWindow {
  /// The window, relative to the plane origin.
  pub region: Rect,
  /// The CTU itself, relative to `region`.
  pub ctu: Rect,
}

/// What a filter stage learns about the CTU it is filtering.
#[derive(Clone, Copy)]
pub struct CtuInfo<'a> {
  pub row: usize,
  pub col: usize,
  pub qp: u8,
  pub bit_depth: usize,
  /// Entropy coder state of the row, passed through untouched.
  pub entropy: &'a (dyn Any + Send + Sync),
  /// CTU rectangle of each plane, relative to the region handed with it.
  pub rects: [Rect; 3],
}

impl std::fmt::Debug for CtuInfo<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CtuInfo")
      .field("row", &self.row)
      .field("col", &self.col)
      .field("qp", &self.qp)
      .field("bit_depth", &self.bit_depth)
      .field("rects", &self.rects)
      .finish_non_exhaustive()
  }
}

/// Frame partitioning into CTU rows and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
  /// Luma width in pixels.
  pub width: usize,
  /// Luma height in pixels.
  pub height: usize,
  pub ctu_size_log2: usize,
  /// Number of CTU columns.
  pub cols: usize,
  /// Number of CTU rows.
  pub rows: usize,
  pub chroma_sampling: ChromaSampling,
}

impl FrameGeometry {
  pub fn new(
    width: usize, height: usize, ctu_size_log2: usize,
    chroma_sampling: ChromaSampling,
  ) -> Self {
    Self {
      width,
      height,
      ctu_size_log2,
      cols: width.align_power_of_two_and_shift(ctu_size_log2),
      rows: height.align_power_of_two_and_shift(ctu_size_log2),
      chroma_sampling,
    }
  }

  #[inline]
  pub fn ctu_size(&self) -> usize {
    1 << self.ctu_size_log2
  }

  #[inline]
  pub fn planes(&self) -> usize {
    self.chroma_sampling.planes()
  }

  #[inline]
  pub fn decimation(&self, pli: usize) -> (usize, usize) {
    if pli == 0 {
      (0, 0)
    } else {
      self.chroma_sampling.get_decimation().unwrap_or((0, 0))
    }
  }

  pub fn plane_dimensions(&self, pli: usize) -> (usize, usize) {
    if pli == 0 {
      (self.width, self.height)
    } else {
      self.chroma_sampling.get_chroma_dimensions(self.width, self.height)
    }
  }

  /// Plane lines covered by CTU row `row`; fewer on a partial last row.
  pub fn row_lines(&self, pli: usize, row: usize) -> Range<usize> {
    let (_, ydec) = self.decimation(pli);
    let (_, h) = self.plane_dimensions(pli);
    self.span(row, ydec, h)
  }

  /// Plane columns covered by CTU column `col`.
  pub fn col_span(&self, pli: usize, col: usize) -> Range<usize> {
    let (xdec, _) = self.decimation(pli);
    let (w, _) = self.plane_dimensions(pli);
    self.span(col, xdec, w)
  }

  fn span(&self, idx: usize, dec: usize, limit: usize) -> Range<usize> {
    let start = (idx << self.ctu_size_log2) >> dec;
    let end = ((idx + 1) << self.ctu_size_log2) >> dec;
    cmp::min(start, limit)..cmp::min(end, limit)
  }

  /// Pixels of CTU (`row`, `col`) in plane `pli`.
  pub fn ctu_rect(&self, pli: usize, row: usize, col: usize) -> Rect {
    let xs = self.col_span(pli, col);
    let ys = self.row_lines(pli, row);
    Rect {
      x: xs.start as isize,
      y: ys.start as isize,
      width: xs.len(),
      height: ys.len(),
    }
  }

  /// Visible area of plane `pli`.
  pub fn plane_rect(&self, pli: usize) -> Rect {
    let (width, height) = self.plane_dimensions(pli);
    Rect { x: 0, y: 0, width, height }
  }

  /// Window a deblock stage may touch while filtering CTU (`row`, `col`):
  /// the CTU extended by [`DEBLOCK_MARGIN`] into its left and top
  /// neighbours, clipped to the frame.
  pub fn deblock_window(&self, pli: usize, row: usize, col: usize) -> CtuWindow {
    let (xdec, ydec) = self.decimation(pli);
    let ctu = self.ctu_rect(pli, row, col);
    let left = cmp::min(DEBLOCK_MARGIN >> xdec, ctu.x as usize);
    let top = cmp::min(DEBLOCK_MARGIN >> ydec, ctu.y as usize);
    Self::window(ctu, left, top, 0, 0)
  }

  /// Window an SAO stage reads while filtering CTU (`row`, `col`): the CTU
  /// plus a ring of [`SAO_MARGIN`] samples, clipped to the frame.
  pub fn sao_window(&self, pli: usize, row: usize, col: usize) -> CtuWindow {
    let (w, h) = self.plane_dimensions(pli);
    let ctu = self.ctu_rect(pli, row, col);
    let left = cmp::min(SAO_MARGIN, ctu.x as usize);
    let top = cmp::min(SAO_MARGIN, ctu.y as usize);
    let right = cmp::min(SAO_MARGIN, w - ctu.right() as usize);
    let bottom = cmp::min(SAO_MARGIN, h - ctu.bottom() as usize);
    Self::window(ctu, left, top, right, bottom)
  }

  fn window(
    ctu: Rect, left: usize, top: usize, right: usize, bottom: usize,
  ) -> CtuWindow {
    CtuWindow {
      region: Rect {
        x: ctu.x - left as isize,
        y: ctu.y - top as isize,
        width: left + ctu.width + right,
        height: top + ctu.height + bottom,
      },
      ctu: Rect {
        x: left as isize,
        y: top as isize,
        width: ctu.width,
        height: ctu.height,
      },
    }
  }
}
