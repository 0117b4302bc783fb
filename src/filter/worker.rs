// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::cmp;
use std::ops::Range;

use crossbeam::utils::Backoff;
use itertools::izip;
use log::trace;
use rayon::ThreadPool;

use super::FrameJob;
use crate::gate::GateStatus;
use crate::row::{lookahead_limit, Claim};
use crate::tiling::*;
use crate::util::Pixel;

impl<'a, T: Pixel> FrameJob<'a, T> {
  /// Deblocks the next claimable chunk of `row`, if any.
  ///
  /// Returns whether a chunk was processed. Never blocks.
  ///
  /// # Panics
  ///
  /// Panics if `row` is outside the frame.
  pub fn process_row(&self, row: usize) -> bool {
    assert!(row < self.filter.geometry.rows, "row {} out of range", row);
    if self.is_aborted() {
      return false;
    }
    let rows = &self.filter.rows;
    let task = &rows[row];
    let Some(mut limit) = task.allowed_col().progress() else {
      return false;
    };
    if row > 0 {
      let Some(above) = rows[row - 1].last_col().progress() else {
        return false;
      };
      limit = cmp::min(limit, lookahead_limit(above, task.cols()));
    }

    let Claim::Chunk(range) = task.claim_deblock(limit) else {
      return false;
    };
    trace!("frame {}: deblock row {} {:?}", self.frame_number, row, range);
    if self.deblock_chunk(row, range.clone()) {
      if task.finish_deblock(range) {
        trace!("frame {}: row {} deblocked", self.frame_number, row);
      }
      self.events.bump();
    }
    true
  }

  /// Applies SAO to the next claimable chunk of `row`, if any.
  ///
  /// Returns whether a chunk was processed. Never blocks.
  ///
  /// # Panics
  ///
  /// Panics if `row` is outside the frame.
  pub fn process_sao(&self, row: usize) -> bool {
    assert!(row < self.filter.geometry.rows, "row {} out of range", row);
    if self.is_aborted() {
      return false;
    }
    let rows = &self.filter.rows;
    let task = &rows[row];
    let cols = task.cols();
    let last = cmp::min(row + self.filter.config.sao_row_delay, rows.len() - 1);
    let mut limit = cols;
    for dep in &rows[row..=last] {
      let Some(done) = dep.last_col().progress() else {
        return false;
      };
      limit = cmp::min(limit, lookahead_limit(done, cols));
    }

    let Claim::Chunk(range) = task.claim_sao(limit) else {
      return false;
    };
    trace!("frame {}: sao row {} {:?}", self.frame_number, row, range);
    if self.sao_chunk(row, range.clone()) {
      if task.finish_sao(range) {
        trace!("frame {}: row {} sao done", self.frame_number, row);
      }
      self.events.bump();
    }
    true
  }

  /// Makes one pass over the rows that are not yet published, doing every
  /// piece of work found claimable.
  ///
  /// Returns whether anything was done. Never blocks.
  pub fn drive(&self) -> bool {
    let Some(first) = self.rows_done.progress() else {
      return false;
    };
    let mut progressed = false;
    for row in first..self.filter.geometry.rows {
      progressed |= self.process_row(row);
      progressed |= self.process_sao(row);
      progressed |= self.process_row_post(row);
    }
    progressed
  }

  /// Processes work until the frame is complete or abandoned, sleeping
  /// whenever nothing is claimable.
  pub fn work(&self, worker: usize) {
    let backoff = Backoff::new();
    loop {
      let Some(seen) = self.events.progress() else { break };
      if self.is_complete() {
        break;
      }
      if self.drive() {
        backoff.reset();
        continue;
      }
      if !backoff.is_completed() {
        backoff.snooze();
        continue;
      }
      if self.events.wait_until_at_least(seen + 1) == GateStatus::Released {
        break;
      }
      backoff.reset();
    }
    trace!("frame {}: worker {} exits", self.frame_number, worker);
  }

  /// Runs `workers` workers on `pool` and returns once they all exit.
  pub fn run(&self, pool: &ThreadPool, workers: usize) {
    pool.scope(|s| {
      for worker in 0..cmp::max(workers, 1) {
        s.spawn(move |_| self.work(worker));
      }
    });
  }

  fn deblock_chunk(&self, row: usize, cols: Range<usize>) -> bool {
    let geom = &self.filter.geometry;
    for col in cols {
      if self.is_aborted() {
        return false;
      }
      if !self.filter.config.enable_deblock {
        continue;
      }
      let mut rects = [Rect::default(); 3];
      // SAFETY: the claim protocol gives this thread exclusive access to the
      // deblock window of a claimed CTU.
      let mut planes = unsafe {
        self.regions_mut(&self.recon, |pli| {
          let window = geom.deblock_window(pli, row, col);
          rects[pli] = window.ctu;
          window.region
        })
      };
      let ctu = self.ctu_info(row, col, rects);
      self.filter.deblock.filter_ctu(&ctu, &mut planes);
    }
    true
  }

  fn sao_chunk(&self, row: usize, cols: Range<usize>) -> bool {
    let geom = &self.filter.geometry;
    for col in cols {
      if self.is_aborted() {
        return false;
      }
      let mut rects = [Rect::default(); 3];
      // SAFETY: deblocking has left every sample of the SAO window, and the
      // CTU of the output is written by the claiming thread only.
      let (src, mut dst) = unsafe {
        let src = self.regions(&self.recon, |pli| {
          let window = geom.sao_window(pli, row, col);
          rects[pli] = window.ctu;
          window.region
        });
        let dst =
          self.regions_mut(&self.output, |pli| geom.ctu_rect(pli, row, col));
        (src, dst)
      };
      if self.filter.config.enable_sao {
        let ctu = self.ctu_info(row, col, rects);
        let params = self.sao_params.resolve(row, col);
        self.filter.sao.apply(&ctu, params, &src, &mut dst);
      } else {
        for (src, dst, rect) in izip!(&src, &mut dst, rects) {
          let Rect { x, y, width, height } = rect;
          dst.copy_from(&src.subregion(Area::Rect { x, y, width, height }));
        }
      }
    }
    true
  }
}
