// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Decoded picture hashes, fed one line at a time in raster order.

use crate::config::PictureHashKind;
use crate::util::*;

const CRC_POLY: u32 = 0x1021;

/// Running hash of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneHasher {
  kind: PictureHashKind,
  bit_depth: usize,
  state: u32,
}

impl PlaneHasher {
  pub fn new(kind: PictureHashKind, bit_depth: usize) -> Self {
    let state = match kind {
      PictureHashKind::Crc => 0xffff,
      _ => 0,
    };
    Self { kind, bit_depth, state }
  }

  /// Feeds line `y` of the plane.
  pub fn update_line<T: Pixel>(&mut self, y: usize, line: &[T]) {
    match self.kind {
      PictureHashKind::None => {}
      PictureHashKind::Crc => {
        for &px in line {
          let v = u32::cast_from(px);
          self.state = crc_byte(self.state, v & 0xff);
          if self.bit_depth > 8 {
            self.state = crc_byte(self.state, v >> 8);
          }
        }
      }
      PictureHashKind::Checksum => {
        for (x, &px) in line.iter().enumerate() {
          let v = u32::cast_from(px);
          let mask = ((x & 0xff) ^ (y & 0xff) ^ (x >> 8) ^ (y >> 8)) as u32;
          self.state = self.state.wrapping_add((v & 0xff) ^ mask);
          if self.bit_depth > 8 {
            self.state = self.state.wrapping_add((v >> 8) ^ mask);
          }
        }
      }
    }
  }

  /// Hash of everything fed so far.
  pub fn finish(&self) -> u32 {
    match self.kind {
      PictureHashKind::Crc => {
        (0..16).fold(self.state, |crc, _| {
          let msb = (crc >> 15) & 1;
          ((crc << 1) & 0xffff) ^ (msb * CRC_POLY)
        })
      }
      _ => self.state,
    }
  }
}

#[inline]
fn crc_byte(mut crc: u32, byte: u32) -> u32 {
  for bit in (0..8).rev() {
    let msb = (crc >> 15) & 1;
    let bit_val = (byte >> bit) & 1;
    crc = (((crc << 1) + bit_val) & 0xffff) ^ (msb * CRC_POLY);
  }
  crc
}
