// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Row-wavefront orchestration of deblocking and SAO for one frame.

mod post;
mod worker;

#[cfg(test)]
mod test;

use std::any::Any;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::config::{FilterConfig, InvalidConfig};
use crate::deblock::{DeblockStage, HevcDeblock};
use crate::frame::Frame;
use crate::gate::{GateStatus, ProgressGate};
use crate::geometry::{CtuInfo, FrameGeometry};
use crate::metrics::FrameMetrics;
use crate::row::RowFilter;
use crate::sao::{HevcSao, SaoParamsMap, SaoStage};
use crate::tiling::*;
use crate::util::Pixel;

use self::post::PostState;

/// Errors surfaced by the frame filter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FilterError {
  /// The configuration is invalid.
  #[error(transparent)]
  InvalidConfig(#[from] InvalidConfig),
  /// A frame handed to `start` does not match the configured geometry.
  #[error(
    "{frame} frame plane {plane} is {actual:?}, expected {expected:?}"
  )]
  FrameMismatch {
    frame: &'static str,
    plane: usize,
    expected: (usize, usize),
    actual: (usize, usize),
  },
  /// The SAO parameter map does not cover the frame's CTUs.
  #[error("sao parameters cover {actual:?} ctus, expected {expected:?}")]
  SaoParamsMismatch { expected: (usize, usize), actual: (usize, usize) },
  /// The frame was abandoned.
  #[error("frame filtering was aborted")]
  Aborted,
  /// Not every row has been filtered yet.
  #[error("frame filtering incomplete ({done} of {total} rows)")]
  Incomplete { done: usize, total: usize },
  /// The worker pool could not be created.
  #[error("failed to build the worker pool")]
  ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Buffers of one frame to filter.
#[derive(Debug)]
pub struct FrameInput<'a, T: Pixel> {
  /// Reconstructed picture; deblocked in place.
  pub recon: &'a mut Frame<T>,
  /// Receives the SAO output, with its borders extended.
  pub output: &'a mut Frame<T>,
  /// Source picture for PSNR and SSIM.
  pub source: Option<&'a Frame<T>>,
  /// SAO parameters of every CTU.
  pub sao: &'a SaoParamsMap,
}

/// What filtering a frame produced besides pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
  pub frame_number: u64,
  pub qp: u8,
  pub psnr: Option<FrameMetrics>,
  /// Mean luma SSIM.
  pub ssim: Option<f64>,
  /// Decoded picture hash per plane.
  pub hash: Option<[u32; 3]>,
}

/// Snapshot of a row's progress, in CTU columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowProgress {
  pub allowed_col: usize,
  pub last_col: usize,
  pub sao_col: usize,
  /// Whether the row has been published to reference consumers.
  pub ready: bool,
}

/// In-loop filter of a sequence of frames with the same geometry.
pub struct FrameFilter<T: Pixel> {
  config: FilterConfig,
  geometry: FrameGeometry,
  deblock: Box<dyn DeblockStage<T>>,
  sao: Box<dyn SaoStage<T>>,
  rows: Box<[RowFilter]>,
  frames: u64,
}

impl<T: Pixel> std::fmt::Debug for FrameFilter<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FrameFilter")
      .field("config", &self.config)
      .field("geometry", &self.geometry)
      .field("frames", &self.frames)
      .finish_non_exhaustive()
  }
}

impl<T: Pixel> FrameFilter<T> {
  /// Creates a filter using [`HevcDeblock`] and [`HevcSao`].
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the config is invalid.
  pub fn new(config: FilterConfig) -> Result<Self, FilterError> {
    let deblock = Box::<HevcDeblock>::default();
    Self::with_stages(config, deblock, Box::new(HevcSao))
  }

  /// Creates a filter running the given stages.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the config is invalid.
  ///
  /// # Panics
  ///
  /// Panics if `T` cannot hold samples of the configured bit depth.
  pub fn with_stages(
    config: FilterConfig, deblock: Box<dyn DeblockStage<T>>,
    sao: Box<dyn SaoStage<T>>,
  ) -> Result<Self, FilterError> {
    config.validate()?;
    assert!(
      8 * mem::size_of::<T>() >= config.bit_depth,
      "The Pixel u{} does not match the Config bit_depth {}",
      8 * mem::size_of::<T>(),
      config.bit_depth
    );

    let geometry = config.geometry();
    let rows = (0..geometry.rows)
      .map(|_| RowFilter::new(geometry.cols, config.max_chunk_cols))
      .collect();
    debug!(
      "frame filter: {}x{} ctus of {} px, chunk {}, sao delay {}",
      geometry.cols,
      geometry.rows,
      geometry.ctu_size(),
      config.max_chunk_cols,
      config.sao_row_delay
    );

    Ok(Self { config, geometry, deblock, sao, rows, frames: 0 })
  }

  #[inline]
  pub fn config(&self) -> &FilterConfig {
    &self.config
  }

  #[inline]
  pub fn geometry(&self) -> &FrameGeometry {
    &self.geometry
  }

  /// Resets every row for a new frame and returns the job that filters it.
  ///
  /// `entropy` is handed untouched to the stages. The filter stays borrowed
  /// until the job is dropped, so one frame is in flight at a time.
  ///
  /// # Errors
  ///
  /// Returns `FrameMismatch` or `SaoParamsMismatch` if a buffer does not
  /// match the configured geometry.
  pub fn start<'a>(
    &'a mut self, input: FrameInput<'a, T>,
    entropy: &'a (dyn Any + Send + Sync), qp: u8,
  ) -> Result<FrameJob<'a, T>, FilterError> {
    self.check_frame("reconstructed", input.recon)?;
    self.check_frame("output", input.output)?;
    if let Some(source) = input.source {
      self.check_frame("source", source)?;
    }
    let expected = (self.geometry.cols, self.geometry.rows);
    let actual = (input.sao.cols(), input.sao.rows());
    if expected != actual {
      return Err(FilterError::SaoParamsMismatch { expected, actual });
    }

    for row in self.rows.iter_mut() {
      row.reset();
    }
    let frame_number = self.frames;
    self.frames += 1;
    debug!("frame {}: start, qp {}", frame_number, qp);

    let filter: &'a FrameFilter<T> = self;
    let post = PostState::new(&filter.config, input.source.is_some());
    Ok(FrameJob {
      filter,
      recon: FrameCell::new(input.recon),
      output: FrameCell::new(input.output),
      source: input.source,
      sao_params: input.sao,
      entropy,
      qp,
      frame_number,
      aborted: AtomicBool::new(false),
      events: ProgressGate::new(),
      rows_done: ProgressGate::new(),
      post: Mutex::new(post),
      finished: false,
    })
  }

  fn check_frame(
    &self, frame: &'static str, f: &Frame<T>,
  ) -> Result<(), FilterError> {
    for pli in 0..self.geometry.planes() {
      let expected = self.geometry.plane_dimensions(pli);
      let cfg = &f.planes[pli].cfg;
      let actual = (cfg.width, cfg.height);
      if expected != actual {
        return Err(FilterError::FrameMismatch {
          frame,
          plane: pli,
          expected,
          actual,
        });
      }
    }
    Ok(())
  }

  /// Releases the per-row state.
  pub fn destroy(self) {
    debug!("frame filter: destroyed after {} frames", self.frames);
  }
}

/// Filtering of one frame, shared by every thread that takes part in it.
///
/// The upstream reconstruction reports progress with
/// [`notify_row_reconstructed`] or [`reconstruct_ctu`]; workers make
/// progress with [`work`], [`run`] or the non-blocking [`drive`] and
/// `process_*` entry points; consumers wait with [`wait_row_ready`].
///
/// [`notify_row_reconstructed`]: FrameJob::notify_row_reconstructed
/// [`reconstruct_ctu`]: FrameJob::reconstruct_ctu
/// [`work`]: FrameJob::work
/// [`run`]: FrameJob::run
/// [`drive`]: FrameJob::drive
/// [`wait_row_ready`]: FrameJob::wait_row_ready
pub struct FrameJob<'a, T: Pixel> {
  filter: &'a FrameFilter<T>,
  recon: FrameCell<'a, T>,
  output: FrameCell<'a, T>,
  source: Option<&'a Frame<T>>,
  sao_params: &'a SaoParamsMap,
  entropy: &'a (dyn Any + Send + Sync),
  qp: u8,
  frame_number: u64,
  aborted: AtomicBool,
  /// Bumped on every state change; idle workers sleep on it.
  events: ProgressGate,
  /// Rows published to reference consumers.
  rows_done: ProgressGate,
  post: Mutex<PostState>,
  finished: bool,
}

impl<'a, T: Pixel> FrameJob<'a, T> {
  #[inline]
  pub fn geometry(&self) -> &FrameGeometry {
    &self.filter.geometry
  }

  #[inline]
  pub fn frame_number(&self) -> u64 {
    self.frame_number
  }

  /// Reports that columns `0..=col` of `row` are reconstructed, allowing
  /// them to be deblocked.
  ///
  /// # Panics
  ///
  /// Panics if `row` or `col` is outside the frame.
  pub fn notify_row_reconstructed(&self, row: usize, col: usize) {
    assert!(row < self.filter.geometry.rows, "row {} out of range", row);
    if self.is_aborted() {
      return;
    }
    if self.filter.rows[row].notify_reconstructed(col) {
      trace!(
        "frame {}: row {} reconstructed up to {}",
        self.frame_number,
        row,
        col
      );
      self.events.bump();
    }
  }

  /// Lets `f` write CTU (`row`, `col`) of the reconstruction, then reports
  /// it as reconstructed.
  ///
  /// CTUs of a row must be reconstructed left to right, and not after the
  /// column has been reported through
  /// [`notify_row_reconstructed`](FrameJob::notify_row_reconstructed).
  ///
  /// # Errors
  ///
  /// Returns `Aborted` without calling `f` if the frame was abandoned.
  ///
  /// # Panics
  ///
  /// Panics if the CTU is outside the frame or was already released.
  pub fn reconstruct_ctu<F>(
    &self, row: usize, col: usize, f: F,
  ) -> Result<(), FilterError>
  where
    F: FnOnce(&mut [PlaneRegionMut<'_, T>]),
  {
    if self.is_aborted() {
      return Err(FilterError::Aborted);
    }
    let geom = &self.filter.geometry;
    assert!(row < geom.rows, "row {} out of range", row);
    self.filter.rows[row].claim_reconstruction(col);
    {
      // SAFETY: the CTU is claimed for reconstruction and no filter window
      // covering it is claimable before it is reported.
      let mut regions = unsafe {
        self.regions_mut(&self.recon, |pli| geom.ctu_rect(pli, row, col))
      };
      f(&mut regions);
    }
    self.notify_row_reconstructed(row, col);
    Ok(())
  }

  /// Abandons the frame: no further chunks are claimed and every waiter
  /// returns.
  pub fn abort(&self) {
    if !self.aborted.swap(true, Ordering::SeqCst) {
      warn!("frame {}: filtering aborted", self.frame_number);
      for row in self.filter.rows.iter() {
        row.release();
      }
      self.rows_done.release();
      self.events.release();
    }
  }

  #[inline]
  pub fn is_aborted(&self) -> bool {
    self.aborted.load(Ordering::SeqCst)
  }

  #[inline]
  pub fn is_complete(&self) -> bool {
    self.rows_done.progress() == Some(self.filter.geometry.rows)
  }

  /// Blocks until `row` is fully filtered and post-processed.
  ///
  /// # Errors
  ///
  /// Returns `Aborted` if the frame was abandoned.
  ///
  /// # Panics
  ///
  /// Panics if `row` is outside the frame.
  pub fn wait_row_ready(&self, row: usize) -> Result<(), FilterError> {
    assert!(row < self.filter.geometry.rows, "row {} out of range", row);
    match self.rows_done.wait_until_at_least(row + 1) {
      GateStatus::Reached(_) => Ok(()),
      GateStatus::Released => Err(FilterError::Aborted),
    }
  }

  /// Blocks until the whole frame is filtered.
  ///
  /// # Errors
  ///
  /// Returns `Aborted` if the frame was abandoned.
  pub fn wait_complete(&self) -> Result<(), FilterError> {
    match self.filter.geometry.rows {
      0 => Ok(()),
      rows => self.wait_row_ready(rows - 1),
    }
  }

  /// Progress of `row`, or `None` once the frame was abandoned.
  ///
  /// Later stages are sampled first, so the snapshot never shows a stage
  /// ahead of the one it depends on.
  ///
  /// # Panics
  ///
  /// Panics if `row` is outside the frame.
  pub fn row_progress(&self, row: usize) -> Option<RowProgress> {
    assert!(row < self.filter.geometry.rows, "row {} out of range", row);
    let task = &self.filter.rows[row];
    let ready = self.rows_done.progress()? > row;
    let sao_col = task.sao_col().progress()?;
    let last_col = task.last_col().progress()?;
    let allowed_col = task.allowed_col().progress()?;
    Some(RowProgress { allowed_col, last_col, sao_col, ready })
  }

  /// Consumes the job, returning what post-processing gathered.
  ///
  /// # Errors
  ///
  /// Returns `Aborted` for an abandoned frame and `Incomplete` if rows are
  /// still outstanding.
  pub fn finish(mut self) -> Result<FrameSummary, FilterError> {
    self.finished = true;
    if self.is_aborted() {
      return Err(FilterError::Aborted);
    }
    let total = self.filter.geometry.rows;
    let done = self.rows_done.value();
    if done < total {
      return Err(FilterError::Incomplete { done, total });
    }
    let post = self.post.lock().unwrap_or_else(PoisonError::into_inner);
    let summary = post.summary(
      self.frame_number,
      self.qp,
      self.filter.config.bit_depth,
      self.filter.geometry.planes(),
    );
    debug!("frame {}: {:?}", self.frame_number, summary);
    Ok(summary)
  }

  fn ctu_info(&self, row: usize, col: usize, rects: [Rect; 3]) -> CtuInfo<'a> {
    CtuInfo {
      row,
      col,
      qp: self.qp,
      bit_depth: self.filter.config.bit_depth,
      entropy: self.entropy,
      rects,
    }
  }

  /// One mutable region per plane.
  ///
  /// # Safety
  ///
  /// The caller must own the returned rectangles exclusively.
  unsafe fn regions_mut<'b>(
    &self, cell: &'b FrameCell<'a, T>, mut rect: impl FnMut(usize) -> Rect,
  ) -> Vec<PlaneRegionMut<'b, T>> {
    (0..self.filter.geometry.planes())
      .map(|pli| cell.region_mut(pli, rect(pli)))
      .collect()
  }

  /// One read-only region per plane.
  ///
  /// # Safety
  ///
  /// Nobody may write the returned rectangles while they are live.
  unsafe fn regions<'b>(
    &self, cell: &'b FrameCell<'a, T>, mut rect: impl FnMut(usize) -> Rect,
  ) -> Vec<PlaneRegion<'b, T>> {
    (0..self.filter.geometry.planes())
      .map(|pli| cell.region(pli, rect(pli)))
      .collect()
  }
}

impl<T: Pixel> Drop for FrameJob<'_, T> {
  fn drop(&mut self) {
    if !self.finished && !self.is_aborted() && !self.is_complete() {
      warn!(
        "frame {}: dropping unfinished filter job ({} of {} rows)",
        self.frame_number,
        self.rows_done.value(),
        self.filter.geometry.rows
      );
    }
  }
}

impl<T: Pixel> std::fmt::Debug for FrameJob<'_, T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FrameJob")
      .field("frame_number", &self.frame_number)
      .field("qp", &self.qp)
      .field("aborted", &self.is_aborted())
      .field("rows_done", &self.rows_done.value())
      .finish_non_exhaustive()
  }
}
