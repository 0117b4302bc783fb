// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::geometry::CtuInfo;
use crate::tiling::*;
use crate::util::*;

/// Sample adaptive offset of one CTU.
///
/// `src` holds, per plane, the deblocked CTU plus a ring of
/// [`SAO_MARGIN`](crate::geometry::SAO_MARGIN) samples where the frame has
/// them; the CTU sits at `ctu.rects[pli]` inside each source region. `dst`
/// covers exactly the CTU and must be written in full.
pub trait SaoStage<T: Pixel>: Send + Sync {
  fn apply(
    &self, ctu: &CtuInfo<'_>, params: &SaoParams, src: &[PlaneRegion<'_, T>],
    dst: &mut [PlaneRegionMut<'_, T>],
  );
}

/// How one component of a CTU is offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaoType {
  #[default]
  Off,
  /// Band offset starting at the given band (0..32).
  Band(u8),
  /// Edge offset along the given class: 0 horizontal, 1 vertical,
  /// 2 diagonal 135 degrees, 3 diagonal 45 degrees.
  Edge(u8),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaoComponent {
  pub kind: SaoType,
  /// Band offsets for four consecutive bands, or edge offsets for the
  /// valley, concave, convex and peak categories.
  pub offsets: [i8; 4],
}

/// SAO parameters decided for one CTU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaoParams {
  /// Reuse the parameters of the CTU on the left.
  pub merge_left: bool,
  /// Reuse the parameters of the CTU above.
  pub merge_up: bool,
  pub components: [SaoComponent; 3],
}

/// SAO parameters of a whole frame, in CTU raster order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaoParamsMap {
  cols: usize,
  rows: usize,
  data: Vec<SaoParams>,
}

impl SaoParamsMap {
  pub fn new(cols: usize, rows: usize) -> Self {
    Self { cols, rows, data: vec![SaoParams::default(); cols * rows] }
  }

  #[inline]
  pub fn cols(&self) -> usize {
    self.cols
  }

  #[inline]
  pub fn rows(&self) -> usize {
    self.rows
  }

  #[inline]
  pub fn get(&self, row: usize, col: usize) -> &SaoParams {
    &self.data[row * self.cols + col]
  }

  #[inline]
  pub fn get_mut(&mut self, row: usize, col: usize) -> &mut SaoParams {
    &mut self.data[row * self.cols + col]
  }

  /// Follows merge flags to the parameters that actually apply to
  /// (`row`, `col`). A merge towards a missing neighbour is ignored.
  pub fn resolve(&self, mut row: usize, mut col: usize) -> &SaoParams {
    loop {
      let params = self.get(row, col);
      if params.merge_left && col > 0 {
        col -= 1;
      } else if params.merge_up && row > 0 {
        row -= 1;
      } else {
        return params;
      }
    }
  }
}

const EO_OFFSETS: [(isize, isize, isize, isize); 4] = [
  (-1, 0, 1, 0),
  (0, -1, 0, 1),
  (-1, -1, 1, 1),
  (1, -1, -1, 1),
];

/// HEVC band and edge offset.
///
/// Edge offset leaves samples whose neighbours fall outside the frame
/// unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct HevcSao;

impl HevcSao {
  fn apply_plane<T: Pixel>(
    comp: &SaoComponent, bit_depth: usize, ctu: Rect, src: &PlaneRegion<'_, T>,
    dst: &mut PlaneRegionMut<'_, T>,
  ) {
    let max = (1 << bit_depth) - 1;
    let (cx, cy) = (ctu.x as usize, ctu.y as usize);
    debug_assert_eq!((ctu.width, ctu.height), (dst.width(), dst.height()));

    match comp.kind {
      SaoType::Off => {
        dst.copy_from(&src.subregion(Area::Rect {
          x: ctu.x,
          y: ctu.y,
          width: ctu.width,
          height: ctu.height,
        }));
      }
      SaoType::Band(position) => {
        let band_shift = bit_depth - 5;
        let mut band_table = [0i32; 32];
        for (k, &offset) in comp.offsets.iter().enumerate() {
          band_table[(position as usize + k) & 31] = offset as i32;
        }
        for y in 0..ctu.height {
          let src_row = &src[cy + y][cx..cx + ctu.width];
          for (d, &s) in dst[y].iter_mut().zip(src_row) {
            let sample = i32::cast_from(s);
            let band = (sample >> band_shift) as usize & 31;
            *d = T::cast_from((sample + band_table[band]).clamp(0, max));
          }
        }
      }
      SaoType::Edge(class) => {
        let (dx0, dy0, dx1, dy1) = EO_OFFSETS[class as usize & 3];
        let offset_table = [
          comp.offsets[0] as i32,
          comp.offsets[1] as i32,
          0,
          -(comp.offsets[2] as i32),
          -(comp.offsets[3] as i32),
        ];
        let (w, h) = (src.width() as isize, src.height() as isize);
        let inside = |x: isize, y: isize| x >= 0 && x < w && y >= 0 && y < h;

        for y in 0..ctu.height {
          let sy = (cy + y) as isize;
          for x in 0..ctu.width {
            let sx = (cx + x) as isize;
            let sample = i32::cast_from(src[sy as usize][sx as usize]);
            let (nx0, ny0, nx1, ny1) = (sx + dx0, sy + dy0, sx + dx1, sy + dy1);
            dst[y][x] = if inside(nx0, ny0) && inside(nx1, ny1) {
              let n0 = i32::cast_from(src[ny0 as usize][nx0 as usize]);
              let n1 = i32::cast_from(src[ny1 as usize][nx1 as usize]);
              let edge_idx =
                (2 + (sample - n0).signum() + (sample - n1).signum()) as usize;
              T::cast_from((sample + offset_table[edge_idx]).clamp(0, max))
            } else {
              T::cast_from(sample)
            };
          }
        }
      }
    }
  }
}

impl<T: Pixel> SaoStage<T> for HevcSao {
  fn apply(
    &self, ctu: &CtuInfo<'_>, params: &SaoParams, src: &[PlaneRegion<'_, T>],
    dst: &mut [PlaneRegionMut<'_, T>],
  ) {
    for (pli, (src, dst)) in src.iter().zip(dst.iter_mut()).enumerate() {
      Self::apply_plane(
        &params.components[pli],
        ctu.bit_depth,
        ctu.rects[pli],
        src,
        dst,
      );
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::frame::Plane;

  fn run(comp: SaoComponent, src: &Plane<u8>, window: Rect, ctu: Rect) -> Plane<u8> {
    let mut dst = Plane::<u8>::new(src.cfg.width, src.cfg.height, 0, 0, 0, 0);
    let abs = Rect {
      x: window.x + ctu.x,
      y: window.y + ctu.y,
      width: ctu.width,
      height: ctu.height,
    };
    let info = CtuInfo {
      row: 0,
      col: 0,
      qp: 30,
      bit_depth: 8,
      entropy: &(),
      rects: [ctu; 3],
    };
    let params = SaoParams {
      components: [comp, SaoComponent::default(), SaoComponent::default()],
      ..Default::default()
    };
    let src_regions = [PlaneRegion::new(src, window)];
    let mut dst_regions = [PlaneRegionMut::new(&mut dst, abs)];
    HevcSao.apply(&info, &params, &src_regions, &mut dst_regions);
    dst
  }

  fn ramp() -> Plane<u8> {
    let mut plane = Plane::<u8>::new(16, 16, 0, 0, 0, 0);
    for y in 0..16 {
      for (x, v) in plane.row_mut(y).iter_mut().enumerate() {
        *v = (x * 8 + y) as u8;
      }
    }
    plane
  }

  #[test]
  fn merge_flags_follow_neighbours() {
    let mut map = SaoParamsMap::new(3, 2);
    map.get_mut(0, 0).components[0].kind = SaoType::Band(4);
    map.get_mut(0, 1).merge_left = true;
    map.get_mut(1, 1).merge_up = true;
    map.get_mut(1, 0).merge_left = true;

    assert_eq!(SaoType::Band(4), map.resolve(1, 1).components[0].kind);
    assert_eq!(map.get(1, 0), map.resolve(1, 0));
    assert_eq!(SaoType::Off, map.resolve(0, 2).components[0].kind);
  }

  #[test]
  fn band_offset_hits_selected_bands_only() {
    let src = ramp();
    let full = Rect { x: 0, y: 0, width: 16, height: 16 };
    let comp = SaoComponent { kind: SaoType::Band(2), offsets: [5, -3, 0, 0] };
    let dst = run(comp, &src, full, full);

    // band 2 covers 16..24, band 3 covers 24..32
    assert_eq!(16 + 5, dst.p(2, 0));
    assert_eq!(24 - 3, dst.p(3, 0));
    assert_eq!(8, dst.p(1, 0));
    assert_eq!(src.p(9, 9), dst.p(9, 9));
  }

  #[test]
  fn edge_offset_skips_frame_border() {
    let mut src = Plane::<u8>::new(16, 16, 0, 0, 0, 0);
    for y in 0..16 {
      for (x, v) in src.row_mut(y).iter_mut().enumerate() {
        *v = if x % 2 == 0 { 50 } else { 60 };
      }
    }
    let full = Rect { x: 0, y: 0, width: 16, height: 16 };
    let comp = SaoComponent { kind: SaoType::Edge(0), offsets: [2, 0, 0, 3] };
    let dst = run(comp, &src, full, full);

    assert_eq!(50, dst.p(0, 5));
    assert_eq!(57, dst.p(1, 5));
    assert_eq!(52, dst.p(2, 5));
    assert_eq!(60, dst.p(15, 5));
  }

  #[test]
  fn edge_offset_uses_ring_samples() {
    let src = ramp();
    let window = Rect { x: 3, y: 3, width: 10, height: 10 };
    let ctu = Rect { x: 1, y: 1, width: 8, height: 8 };
    let comp = SaoComponent { kind: SaoType::Edge(1), offsets: [1, 1, 1, 1] };
    let dst = run(comp, &src, window, ctu);

    // a vertical ramp is monotonic, so no category applies anywhere
    for y in 4..12 {
      for x in 4..12 {
        assert_eq!(src.p(x, y), dst.p(x, y));
      }
    }
  }
}
