// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Monotonic progress counters that threads can wait on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Value a released gate is forced to.
const RELEASED: usize = usize::MAX;

/// Outcome of waiting on a [`ProgressGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
  /// The gate reached the requested value; carries the value observed.
  Reached(usize),
  /// The gate was released before the value was reached.
  Released,
}

/// An atomic counter that only ever moves forward.
///
/// Writers publish progress with [`advance_to_at_least`], readers poll
/// [`value`] or block in [`wait_until_at_least`]. Every advance is a
/// `SeqCst` store, so data written before an advance is visible to any
/// thread that observes the new value.
///
/// [`advance_to_at_least`]: ProgressGate::advance_to_at_least
/// [`value`]: ProgressGate::value
/// [`wait_until_at_least`]: ProgressGate::wait_until_at_least
#[derive(Debug, Default)]
pub struct ProgressGate {
  value: AtomicUsize,
  waiters: AtomicUsize,
  lock: Mutex<()>,
  cond: Condvar,
}

impl ProgressGate {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of the counter. A released gate reads as `usize::MAX`.
  #[inline]
  pub fn value(&self) -> usize {
    self.value.load(Ordering::SeqCst)
  }

  /// Snapshot of the counter, or `None` once the gate has been released.
  #[inline]
  pub fn progress(&self) -> Option<usize> {
    match self.value() {
      RELEASED => None,
      v => Some(v),
    }
  }

  #[inline]
  pub fn is_released(&self) -> bool {
    self.value() == RELEASED
  }

  /// Raises the counter to `target` if it is lower.
  ///
  /// Returns `true` if this call moved the counter.
  pub fn advance_to_at_least(&self, target: usize) -> bool {
    let prev = self.value.fetch_max(target, Ordering::SeqCst);
    let moved = prev < target;
    if moved {
      self.wake();
    }
    moved
  }

  /// Adds one to the counter, saturating below the released value.
  pub fn bump(&self) {
    let moved = self
      .value
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        (v < RELEASED - 1).then_some(v + 1)
      })
      .is_ok();
    if moved {
      self.wake();
    }
  }

  /// Forces the gate to its terminal state, waking every waiter.
  pub fn release(&self) {
    self.value.store(RELEASED, Ordering::SeqCst);
    self.wake();
  }

  /// Returns the gate to zero. Requires exclusive access, so nobody can be
  /// waiting.
  pub fn reset(&mut self) {
    *self.value.get_mut() = 0;
  }

  /// Blocks until the counter reaches `target` or the gate is released.
  pub fn wait_until_at_least(&self, target: usize) -> GateStatus {
    if let Some(status) = self.check(target) {
      return status;
    }

    self.waiters.fetch_add(1, Ordering::SeqCst);
    let mut guard = self.guard();
    let status = loop {
      if let Some(status) = self.check(target) {
        break status;
      }
      guard = self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner);
    };
    drop(guard);
    self.waiters.fetch_sub(1, Ordering::SeqCst);
    status
  }

  #[inline]
  fn check(&self, target: usize) -> Option<GateStatus> {
    match self.value() {
      RELEASED => Some(GateStatus::Released),
      v if v >= target => Some(GateStatus::Reached(v)),
      _ => None,
    }
  }

  fn guard(&self) -> MutexGuard<'_, ()> {
    self.lock.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn wake(&self) {
    if self.waiters.load(Ordering::SeqCst) > 0 {
      // a waiter between its last check and `wait` holds the lock
      drop(self.guard());
      self.cond.notify_all();
    }
  }
}
