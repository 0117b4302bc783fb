// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

mod plane;

pub use self::plane::*;

use crate::util::Pixel;

/// Padding in luma samples allocated around every frame plane.
pub const FRAME_PADDING: usize = 80;

/// Chroma subsampling format
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ChromaSampling {
  /// Both vertically and horizontally subsampled.
  #[default]
  Cs420,
  /// Horizontally subsampled.
  Cs422,
  /// Not subsampled.
  Cs444,
  /// Monochrome.
  Cs400,
}

impl ChromaSampling {
  /// Provides the amount to right shift the luma plane dimensions to get the
  ///  chroma plane dimensions.
  /// Only values 0 or 1 are ever returned.
  /// Cs400 returns None, as there are no chroma planes.
  pub fn get_decimation(self) -> Option<(usize, usize)> {
    use self::ChromaSampling::*;
    match self {
      Cs420 => Some((1, 1)),
      Cs422 => Some((1, 0)),
      Cs444 => Some((0, 0)),
      Cs400 => None,
    }
  }

  /// Calculates the size of a chroma plane for this sampling type, given the luma plane dimensions.
  pub fn get_chroma_dimensions(
    self, luma_width: usize, luma_height: usize,
  ) -> (usize, usize) {
    if let Some((ss_x, ss_y)) = self.get_decimation() {
      ((luma_width + ss_x) >> ss_x, (luma_height + ss_y) >> ss_y)
    } else {
      (0, 0)
    }
  }

  /// Number of planes carrying samples.
  pub fn planes(self) -> usize {
    if self == ChromaSampling::Cs400 {
      1
    } else {
      3
    }
  }
}

/// Luma plane plus two (possibly empty) chroma planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<T: Pixel> {
  pub planes: [Plane<T>; 3],
}

impl<T: Pixel> Frame<T> {
  /// Allocates a mid-grey frame with [`FRAME_PADDING`] around each plane.
  pub fn new(
    width: usize, height: usize, chroma_sampling: ChromaSampling,
  ) -> Self {
    Self::new_with_padding(width, height, chroma_sampling, FRAME_PADDING)
  }

  pub fn new_with_padding(
    width: usize, height: usize, chroma_sampling: ChromaSampling,
    luma_padding: usize,
  ) -> Self {
    let luma_plane = Plane::new(
      width,
      height,
      0,
      0,
      luma_padding,
      luma_padding,
    );

    let (chroma_width, chroma_height) =
      chroma_sampling.get_chroma_dimensions(width, height);
    let (chroma_decimation_x, chroma_decimation_y) =
      chroma_sampling.get_decimation().unwrap_or((0, 0));
    let chroma_padding_x = luma_padding >> chroma_decimation_x;
    let chroma_padding_y = luma_padding >> chroma_decimation_y;

    Frame {
      planes: [
        luma_plane,
        Plane::new(
          chroma_width,
          chroma_height,
          chroma_decimation_x,
          chroma_decimation_y,
          chroma_padding_x,
          chroma_padding_y,
        ),
        Plane::new(
          chroma_width,
          chroma_height,
          chroma_decimation_x,
          chroma_decimation_y,
          chroma_padding_x,
          chroma_padding_y,
        ),
      ],
    }
  }

  /// Extends the borders of every plane into its padding.
  pub fn pad(&mut self) {
    for plane in self.planes.iter_mut() {
      plane.pad();
    }
  }
}
