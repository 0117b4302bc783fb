// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Per-row work partitioning shared by every worker of a frame.

use crossbeam::utils::CachePadded;
use std::cmp;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::gate::ProgressGate;

/// Result of asking a row for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
  /// The caller now exclusively owns these columns.
  Chunk(Range<usize>),
  /// Nothing is claimable until some dependency progresses.
  NotReady,
  /// Every column has been claimed.
  Done,
  /// The frame was abandoned.
  Aborted,
}

/// Number of columns a dependent CTU may be processed up to, given that
/// `done` columns of the row it depends on are complete.
///
/// Work on column `c` needs column `c + 1` of the dependency finished, since
/// the windows of diagonally adjacent CTUs overlap; a fully finished row
/// releases everything.
#[inline]
pub fn lookahead_limit(done: usize, cols: usize) -> usize {
  if done >= cols {
    cols
  } else {
    done.saturating_sub(1)
  }
}

/// State of one CTU row of the frame being filtered.
///
/// Deblocking is serial along the row: a chunk becomes claimable only once
/// the chunk before it has completed, because it filters across the shared
/// edge. SAO chunks only depend on deblocking, so any number of workers can
/// hold disjoint SAO chunks of the same row at once; completions are
/// recorded per column and `sao_col` follows the contiguous prefix.
#[derive(Debug)]
pub struct RowFilter {
  cols: usize,
  chunk: usize,
  /// Columns reconstructed upstream (`allowedCol`).
  allowed_col: CachePadded<ProgressGate>,
  /// Columns deblocked (`lastCol`).
  last_col: CachePadded<ProgressGate>,
  /// Columns through SAO, contiguous from the left.
  sao_col: CachePadded<ProgressGate>,
  deblock_next: CachePadded<AtomicUsize>,
  sao_next: CachePadded<AtomicUsize>,
  recon_next: AtomicUsize,
  sao_done: Box<[AtomicBool]>,
  post_claimed: AtomicBool,
}

impl RowFilter {
  pub fn new(cols: usize, chunk: usize) -> Self {
    assert!(chunk > 0);
    Self {
      cols,
      chunk,
      allowed_col: Default::default(),
      last_col: Default::default(),
      sao_col: Default::default(),
      deblock_next: Default::default(),
      sao_next: Default::default(),
      recon_next: AtomicUsize::new(0),
      sao_done: (0..cols).map(|_| AtomicBool::new(false)).collect(),
      post_claimed: AtomicBool::new(false),
    }
  }

  /// Rearms the row for a new frame.
  pub fn reset(&mut self) {
    self.allowed_col.reset();
    self.last_col.reset();
    self.sao_col.reset();
    *self.deblock_next.get_mut() = 0;
    *self.sao_next.get_mut() = 0;
    *self.recon_next.get_mut() = 0;
    for done in self.sao_done.iter_mut() {
      *done.get_mut() = false;
    }
    *self.post_claimed.get_mut() = false;
  }

  #[inline]
  pub fn cols(&self) -> usize {
    self.cols
  }

  #[inline]
  pub fn allowed_col(&self) -> &ProgressGate {
    &self.allowed_col
  }

  #[inline]
  pub fn last_col(&self) -> &ProgressGate {
    &self.last_col
  }

  #[inline]
  pub fn sao_col(&self) -> &ProgressGate {
    &self.sao_col
  }

  /// Records that columns `0..=col` are reconstructed.
  pub fn notify_reconstructed(&self, col: usize) -> bool {
    assert!(col < self.cols, "column {} out of {}", col, self.cols);
    self.allowed_col.advance_to_at_least(col + 1)
  }

  /// Reserves column `col` for reconstruction. Columns must be reserved in
  /// increasing order and before they are reported as reconstructed.
  pub fn claim_reconstruction(&self, col: usize) {
    assert!(col < self.cols, "column {} out of {}", col, self.cols);
    let prev = self.recon_next.fetch_max(col + 1, Ordering::SeqCst);
    assert!(prev <= col, "column {} reconstructed twice or out of order", col);
    if let Some(allowed) = self.allowed_col.progress() {
      assert!(allowed <= col, "column {} already released to filtering", col);
    }
  }

  /// Claims the next deblock chunk, ending no later than `limit`.
  pub fn claim_deblock(&self, limit: usize) -> Claim {
    let start = self.deblock_next.load(Ordering::SeqCst);
    if start >= self.cols {
      return Claim::Done;
    }
    let Some(last) = self.last_col.progress() else {
      return Claim::Aborted;
    };
    if last != start {
      // the previous chunk is still being filtered
      return Claim::NotReady;
    }
    let end = cmp::min(cmp::min(start + self.chunk, limit), self.cols);
    if end <= start {
      return Claim::NotReady;
    }
    match self.deblock_next.compare_exchange(
      start,
      end,
      Ordering::SeqCst,
      Ordering::SeqCst,
    ) {
      Ok(_) => Claim::Chunk(start..end),
      Err(_) => Claim::NotReady,
    }
  }

  /// Publishes a finished deblock chunk. Returns `true` when the row is
  /// fully deblocked.
  pub fn finish_deblock(&self, range: Range<usize>) -> bool {
    if let Some(last) = self.last_col.progress() {
      assert_eq!(
        last, range.start,
        "deblock chunk {:?} finished out of order",
        range
      );
    }
    self.last_col.advance_to_at_least(range.end);
    range.end == self.cols
  }

  /// Claims the next SAO chunk, ending no later than `limit`.
  pub fn claim_sao(&self, limit: usize) -> Claim {
    let mut start = self.sao_next.load(Ordering::SeqCst);
    loop {
      if start >= self.cols {
        return Claim::Done;
      }
      if self.sao_col.is_released() {
        return Claim::Aborted;
      }
      let end = cmp::min(cmp::min(start + self.chunk, limit), self.cols);
      if end <= start {
        return Claim::NotReady;
      }
      match self.sao_next.compare_exchange(
        start,
        end,
        Ordering::SeqCst,
        Ordering::SeqCst,
      ) {
        Ok(_) => return Claim::Chunk(start..end),
        Err(current) => start = current,
      }
    }
  }

  /// Publishes a finished SAO chunk. Returns `true` for exactly one caller:
  /// the one whose completion made the whole row contiguous.
  pub fn finish_sao(&self, range: Range<usize>) -> bool {
    for col in range {
      let was_done = self.sao_done[col].swap(true, Ordering::SeqCst);
      assert!(!was_done, "sao of column {} ran twice", col);
    }
    let Some(mut done) = self.sao_col.progress() else {
      return false;
    };
    while done < self.cols && self.sao_done[done].load(Ordering::SeqCst) {
      done += 1;
    }
    self.sao_col.advance_to_at_least(done) && done == self.cols
  }

  /// Claims the post-filter pass of the row, once.
  pub fn claim_post(&self) -> bool {
    self
      .post_claimed
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
  }

  /// Forces every gate of the row to its released state.
  pub fn release(&self) {
    self.allowed_col.release();
    self.last_col.release();
    self.sao_col.release();
  }
}
