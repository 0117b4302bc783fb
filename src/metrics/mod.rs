// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Quality metrics accumulated row by row as the filtered frame completes.

mod psnr;
mod ssim;

pub use self::psnr::*;
pub use self::ssim::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetrics {
  pub y: f64,
  pub u: f64,
  pub v: f64,
}
