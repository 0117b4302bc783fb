// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

use crate::frame::ChromaSampling;
use crate::geometry::{FrameGeometry, DEBLOCK_MARGIN, SAO_MARGIN};

/// Default number of CTU columns a worker claims at once.
pub const MAX_PFILTER_CUS: usize = 4;

/// Smallest and largest supported CTU sizes, as log2 of the luma side.
pub const MIN_CTU_SIZE_LOG2: usize = 4;
pub const MAX_CTU_SIZE_LOG2: usize = 6;

// stage windows must stay inside the adjacent CTUs, chroma included
const _: () =
  assert!(DEBLOCK_MARGIN + SAO_MARGIN < (1 << MIN_CTU_SIZE_LOG2) >> 1);

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The width is invalid.
  #[error("invalid width {0} (expected >= 16, <= 65535)")]
  InvalidWidth(usize),
  /// The height is invalid.
  #[error("invalid height {0} (expected >= 16, <= 65535)")]
  InvalidHeight(usize),
  /// Bit depth is invalid.
  #[error("invalid bit depth {0} (expected 8, 10 or 12)")]
  InvalidBitDepth(usize),
  /// CTU size is invalid.
  #[error(
    "invalid ctu size log2 {actual} (expected >= {min}, <= {max})"
  )]
  InvalidCtuSize {
    /// The actual value.
    actual: usize,
    /// The minimal supported value.
    min: usize,
    /// The maximal supported value.
    max: usize,
  },
  /// Chunk width is invalid.
  #[error("invalid chunk width {0} (expected >= 1)")]
  InvalidChunkCols(usize),
  /// SAO row delay is invalid.
  #[error("invalid sao row delay {0} (expected >= 1)")]
  InvalidSaoRowDelay(usize),
}

/// Decoded picture hash computed while rows complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PictureHashKind {
  /// No hash.
  #[default]
  None,
  /// CRC-16 over every sample, one value per plane.
  Crc,
  /// Position-salted byte checksum, one value per plane.
  Checksum,
}

/// Frame filter configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterConfig {
  /// Luma width in pixels.
  pub width: usize,
  /// Luma height in pixels.
  pub height: usize,
  /// Bit depth.
  pub bit_depth: usize,
  /// Chroma subsampling.
  pub chroma_sampling: ChromaSampling,
  /// CTU size, as log2 of the luma side.
  pub ctu_size_log2: usize,
  /// Most CTU columns claimed by a worker at once.
  pub max_chunk_cols: usize,
  /// Rows below a row whose deblocking must progress before its SAO runs.
  pub sao_row_delay: usize,
  pub enable_deblock: bool,
  pub enable_sao: bool,
  /// Accumulate per-plane squared error against the source frame.
  pub compute_psnr: bool,
  /// Accumulate luma SSIM against the source frame.
  pub compute_ssim: bool,
  pub picture_hash: PictureHashKind,
  /// Number of threads in the worker pool, 0 picks the rayon default.
  pub threads: usize,
}

impl Default for FilterConfig {
  fn default() -> Self {
    FilterConfig {
      width: 640,
      height: 480,
      bit_depth: 8,
      chroma_sampling: ChromaSampling::Cs420,
      ctu_size_log2: MAX_CTU_SIZE_LOG2,
      max_chunk_cols: MAX_PFILTER_CUS,
      sao_row_delay: 1,
      enable_deblock: true,
      enable_sao: true,
      compute_psnr: false,
      compute_ssim: false,
      picture_hash: PictureHashKind::None,
      threads: 0,
    }
  }
}

impl FilterConfig {
  pub const fn with_dimensions(mut self, width: usize, height: usize) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  pub const fn with_bit_depth(mut self, bit_depth: usize) -> Self {
    self.bit_depth = bit_depth;
    self
  }

  pub const fn with_chroma_sampling(
    mut self, chroma_sampling: ChromaSampling,
  ) -> Self {
    self.chroma_sampling = chroma_sampling;
    self
  }

  pub const fn with_ctu_size_log2(mut self, ctu_size_log2: usize) -> Self {
    self.ctu_size_log2 = ctu_size_log2;
    self
  }

  pub const fn with_max_chunk_cols(mut self, cols: usize) -> Self {
    self.max_chunk_cols = cols;
    self
  }

  pub const fn with_sao_row_delay(mut self, rows: usize) -> Self {
    self.sao_row_delay = rows;
    self
  }

  pub const fn with_deblock(mut self, enable: bool) -> Self {
    self.enable_deblock = enable;
    self
  }

  pub const fn with_sao(mut self, enable: bool) -> Self {
    self.enable_sao = enable;
    self
  }

  pub const fn with_psnr(mut self, enable: bool) -> Self {
    self.compute_psnr = enable;
    self
  }

  pub const fn with_ssim(mut self, enable: bool) -> Self {
    self.compute_ssim = enable;
    self
  }

  pub const fn with_picture_hash(mut self, kind: PictureHashKind) -> Self {
    self.picture_hash = kind;
    self
  }

  /// Set the number of workers in the threadpool
  pub const fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` naming the first offending field.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    if self.width < 16 || self.width > u16::MAX as usize {
      return Err(InvalidWidth(self.width));
    }
    if self.height < 16 || self.height > u16::MAX as usize {
      return Err(InvalidHeight(self.height));
    }
    if ![8, 10, 12].contains(&self.bit_depth) {
      return Err(InvalidBitDepth(self.bit_depth));
    }
    if self.ctu_size_log2 < MIN_CTU_SIZE_LOG2
      || self.ctu_size_log2 > MAX_CTU_SIZE_LOG2
    {
      return Err(InvalidCtuSize {
        actual: self.ctu_size_log2,
        min: MIN_CTU_SIZE_LOG2,
        max: MAX_CTU_SIZE_LOG2,
      });
    }
    if self.max_chunk_cols == 0 {
      return Err(InvalidChunkCols(self.max_chunk_cols));
    }
    if self.sao_row_delay == 0 {
      return Err(InvalidSaoRowDelay(self.sao_row_delay));
    }

    Ok(())
  }

  pub fn geometry(&self) -> FrameGeometry {
    FrameGeometry::new(
      self.width,
      self.height,
      self.ctu_size_log2,
      self.chroma_sampling,
    )
  }

  /// Creates the worker pool described by `threads`.
  ///
  /// # Errors
  ///
  /// Returns the rayon error if the pool cannot be spawned.
  pub fn new_thread_pool(
    &self,
  ) -> Result<ThreadPool, rayon::ThreadPoolBuildError> {
    ThreadPoolBuilder::new()
      .num_threads(self.threads)
      .thread_name(|idx| format!("inloop-filter-{idx}"))
      .build()
  }
}
