// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::sync::PoisonError;

use log::debug;

use super::{FrameJob, FrameSummary};
use crate::config::{FilterConfig, PictureHashKind};
use crate::hash::PlaneHasher;
use crate::metrics::{PsnrAccumulator, SsimAccumulator};
use crate::tiling::*;
use crate::util::Pixel;

/// Per-frame accumulators fed by the post-row pass, in row order.
#[derive(Debug)]
pub(super) struct PostState {
  psnr: Option<PsnrAccumulator>,
  ssim: Option<SsimAccumulator>,
  hash: Option<[PlaneHasher; 3]>,
}

impl PostState {
  pub(super) fn new(config: &FilterConfig, has_source: bool) -> Self {
    let psnr = (config.compute_psnr && has_source)
      .then(PsnrAccumulator::default);
    let ssim = (config.compute_ssim && has_source)
      .then(|| SsimAccumulator::new(config.width, config.bit_depth));
    let hash = (config.picture_hash != PictureHashKind::None)
      .then(|| [PlaneHasher::new(config.picture_hash, config.bit_depth); 3]);
    Self { psnr, ssim, hash }
  }

  pub(super) fn summary(
    &self, frame_number: u64, qp: u8, bit_depth: usize, planes: usize,
  ) -> FrameSummary {
    FrameSummary {
      frame_number,
      qp,
      psnr: self.psnr.as_ref().map(|psnr| psnr.finish(bit_depth)),
      ssim: self.ssim.as_ref().map(SsimAccumulator::finish),
      hash: self.hash.as_ref().map(|hashers| {
        let mut hash = [0; 3];
        for (pli, h) in hashers.iter().enumerate().take(planes) {
          hash[pli] = h.finish();
        }
        hash
      }),
    }
  }
}

impl<'a, T: Pixel> FrameJob<'a, T> {
  /// Finalizes `row` once SAO has covered it and every row above it has
  /// been finalized: extends the output borders, feeds the metrics and
  /// hashes, then publishes the row.
  ///
  /// Returns whether the row was finalized. Never blocks on progress.
  pub fn process_row_post(&self, row: usize) -> bool {
    if self.is_aborted() || self.rows_done.progress() != Some(row) {
      return false;
    }
    let task = &self.filter.rows[row];
    if task.sao_col().progress() != Some(task.cols()) || !task.claim_post() {
      return false;
    }

    let geom = &self.filter.geometry;
    let last = row + 1 == geom.rows;
    {
      let mut post = self.post.lock().unwrap_or_else(PoisonError::into_inner);
      for pli in 0..geom.planes() {
        let lines = geom.row_lines(pli, row);
        let rect = Rect {
          y: lines.start as isize,
          height: lines.len(),
          ..geom.plane_rect(pli)
        };
        // SAFETY: SAO has written every CTU of this row, and no later row
        // writes these lines of the output.
        let rec = unsafe {
          self.output.extend_borders(pli, lines.clone(), row == 0, last);
          self.output.region(pli, rect)
        };
        if let (Some(psnr), Some(source)) = (post.psnr.as_mut(), self.source)
        {
          psnr.add(pli, &PlaneRegion::new(&source.planes[pli], rect), &rec);
        }
        if let Some(hashers) = post.hash.as_mut() {
          for (y, line) in lines.zip(rec.rows_iter()) {
            hashers[pli].update_line(y, line);
          }
        }
      }
      if let (Some(ssim), Some(source)) = (post.ssim.as_mut(), self.source) {
        let rect = Rect {
          height: geom.row_lines(0, row).end,
          ..geom.plane_rect(0)
        };
        // SAFETY: every line above the end of this row is final.
        let rec = unsafe { self.output.region(0, rect) };
        ssim.add_lines(&PlaneRegion::new(&source.planes[0], rect), &rec);
      }
    }

    self.rows_done.advance_to_at_least(row + 1);
    self.events.bump();
    if last {
      debug!("frame {}: all {} rows filtered", self.frame_number, geom.rows);
    }
    true
  }
}
