// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::*;
use crate::config::PictureHashKind;
use crate::frame::ChromaSampling;
use crate::hash::PlaneHasher;
use crate::metrics::{PsnrAccumulator, SsimAccumulator};
use crate::sao::{SaoComponent, SaoParams, SaoType};

use interpolate_name::interpolate_test;
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

use std::cmp;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread;

const QP: u8 = 37;

fn test_config() -> FilterConfig {
  FilterConfig::default()
    .with_dimensions(200, 136)
    .with_ctu_size_log2(5)
    .with_max_chunk_cols(2)
}

/// Frame of flat 8x8 blocks with a little noise, so that deblocking has
/// edges to work on.
fn blocky_frame<T: Pixel>(
  config: &FilterConfig, rng: &mut ChaChaRng,
) -> Frame<T> {
  let mut frame =
    Frame::new(config.width, config.height, config.chroma_sampling);
  let max = (1u32 << config.bit_depth) - 1;
  let step = 1u32 << (config.bit_depth - 8);
  for plane in frame.planes.iter_mut().take(config.chroma_sampling.planes()) {
    let (width, height) = (plane.cfg.width, plane.cfg.height);
    let blocks_x = (width + 7) / 8;
    let bases: Vec<u32> = (0..blocks_x * ((height + 7) / 8))
      .map(|_| rng.gen_range(step * 16..=max - step * 16))
      .collect();
    for y in 0..height {
      for (x, px) in plane.row_mut(y)[..width].iter_mut().enumerate() {
        let noise = rng.gen_range(0..=step * 4);
        let v = bases[(y / 8) * blocks_x + x / 8] + noise - step * 2;
        *px = T::cast_from(v as u16);
      }
    }
  }
  frame.pad();
  frame
}

fn random_sao(geometry: &FrameGeometry, rng: &mut ChaChaRng) -> SaoParamsMap {
  let mut map = SaoParamsMap::new(geometry.cols, geometry.rows);
  for row in 0..geometry.rows {
    for col in 0..geometry.cols {
      let mut params = SaoParams {
        merge_left: rng.gen_ratio(1, 6),
        merge_up: rng.gen_ratio(1, 6),
        ..Default::default()
      };
      for comp in params.components.iter_mut() {
        *comp = SaoComponent {
          kind: match rng.gen_range(0..3) {
            0 => SaoType::Off,
            1 => SaoType::Band(rng.gen_range(0..29)),
            _ => SaoType::Edge(rng.gen_range(0..4)),
          },
          offsets: [
            rng.gen_range(0..=7),
            rng.gen_range(0..=7),
            -rng.gen_range(0..=7),
            -rng.gen_range(0..=7),
          ],
        };
      }
      *map.get_mut(row, col) = params;
    }
  }
  map
}

fn ctu_info(
  config: &FilterConfig, row: usize, col: usize, rects: [Rect; 3],
) -> CtuInfo<'static> {
  CtuInfo {
    row,
    col,
    qp: QP,
    bit_depth: config.bit_depth,
    entropy: &(),
    rects,
  }
}

/// Single-threaded raster-order filtering: every CTU deblocked, then every
/// CTU offset. Returns the deblocked reconstruction and the padded output.
fn reference_filter<T: Pixel>(
  config: &FilterConfig, recon: &Frame<T>, sao: &SaoParamsMap,
) -> (Frame<T>, Frame<T>) {
  let geometry = config.geometry();
  let planes = geometry.planes();
  let mut recon = recon.clone();
  let mut output = recon.clone();

  if config.enable_deblock {
    for row in 0..geometry.rows {
      for col in 0..geometry.cols {
        let mut rects = [Rect::default(); 3];
        let mut regions: Vec<_> = recon
          .planes
          .iter_mut()
          .take(planes)
          .enumerate()
          .map(|(pli, plane)| {
            let window = geometry.deblock_window(pli, row, col);
            rects[pli] = window.ctu;
            PlaneRegionMut::new(plane, window.region)
          })
          .collect();
        let ctu = ctu_info(config, row, col, rects);
        HevcDeblock::default().filter_ctu(&ctu, &mut regions);
      }
    }
  }

  for row in 0..geometry.rows {
    for col in 0..geometry.cols {
      let mut rects = [Rect::default(); 3];
      let src: Vec<_> = (0..planes)
        .map(|pli| {
          let window = geometry.sao_window(pli, row, col);
          rects[pli] = window.ctu;
          PlaneRegion::new(&recon.planes[pli], window.region)
        })
        .collect();
      let mut dst: Vec<_> = output
        .planes
        .iter_mut()
        .take(planes)
        .enumerate()
        .map(|(pli, plane)| {
          PlaneRegionMut::new(plane, geometry.ctu_rect(pli, row, col))
        })
        .collect();
      if config.enable_sao {
        let ctu = ctu_info(config, row, col, rects);
        HevcSao.apply(&ctu, sao.resolve(row, col), &src, &mut dst);
      } else {
        for (pli, dst) in dst.iter_mut().enumerate() {
          let Rect { x, y, width, height } = rects[pli];
          dst.copy_from(&src[pli].subregion(Area::Rect { x, y, width, height }));
        }
      }
    }
  }
  output.pad();
  (recon, output)
}

struct Filtered<T: Pixel> {
  recon: Frame<T>,
  output: Frame<T>,
  summary: FrameSummary,
}

/// Filters `recon` with `workers` workers while the CTUs are reported in
/// raster order from the calling thread.
fn filter_threaded<T: Pixel>(
  config: FilterConfig, workers: usize, recon: &Frame<T>,
  source: Option<&Frame<T>>, sao: &SaoParamsMap,
) -> Filtered<T> {
  let geometry = config.geometry();
  let mut filter = FrameFilter::new(config).unwrap();
  let pool = config.with_threads(workers).new_thread_pool().unwrap();
  let mut recon = recon.clone();
  let mut output =
    Frame::new(config.width, config.height, config.chroma_sampling);

  let summary = {
    let input =
      FrameInput { recon: &mut recon, output: &mut output, source, sao };
    let job = filter.start(input, &(), QP).unwrap();
    thread::scope(|s| {
      s.spawn(|| job.run(&pool, workers));
      for row in 0..geometry.rows {
        for col in 0..geometry.cols {
          job.notify_row_reconstructed(row, col);
        }
      }
    });
    assert!(job.is_complete());
    job.finish().unwrap()
  };
  Filtered { recon, output, summary }
}

fn check_against_reference<T: Pixel>(config: FilterConfig, workers: usize) {
  let mut rng = ChaChaRng::from_seed([0; 32]);
  let input = blocky_frame::<T>(&config, &mut rng);
  let sao = random_sao(&config.geometry(), &mut rng);

  let (recon, output) = reference_filter(&config, &input, &sao);
  let filtered = filter_threaded(config, workers, &input, None, &sao);

  assert!(recon != input || !config.enable_deblock);
  assert_eq!(recon, filtered.recon);
  assert_eq!(output, filtered.output);
}

#[interpolate_test(one_worker, 1)]
#[interpolate_test(two_workers, 2)]
#[interpolate_test(four_workers, 4)]
#[interpolate_test(eight_workers, 8)]
fn matches_raster_order_reference(workers: usize) {
  check_against_reference::<u8>(test_config(), workers);
}

#[interpolate_test(cs420, ChromaSampling::Cs420)]
#[interpolate_test(cs422, ChromaSampling::Cs422)]
#[interpolate_test(cs444, ChromaSampling::Cs444)]
#[interpolate_test(cs400, ChromaSampling::Cs400)]
fn chroma_sampling(cs: ChromaSampling) {
  check_against_reference::<u8>(test_config().with_chroma_sampling(cs), 3);
}

#[interpolate_test(ten_bit, 10)]
#[interpolate_test(twelve_bit, 12)]
fn high_bit_depth(bit_depth: usize) {
  let config = test_config().with_bit_depth(bit_depth);
  check_against_reference::<u16>(config, 4);
}

#[interpolate_test(chunk_1_delay_1, 1, 1)]
#[interpolate_test(chunk_4_delay_1, 4, 1)]
#[interpolate_test(chunk_3_delay_2, 3, 2)]
#[interpolate_test(chunk_2_delay_9, 2, 9)]
fn scheduling_parameters(chunk: usize, delay: usize) {
  let config = test_config()
    .with_ctu_size_log2(4)
    .with_max_chunk_cols(chunk)
    .with_sao_row_delay(delay);
  check_against_reference::<u8>(config, 4);
}

#[interpolate_test(single_ctu, 16, 16)]
#[interpolate_test(single_row, 100, 16)]
#[interpolate_test(single_column, 16, 100)]
#[interpolate_test(partial_edges, 70, 50)]
fn small_frames(width: usize, height: usize) {
  let config =
    test_config().with_dimensions(width, height).with_ctu_size_log2(4);
  check_against_reference::<u8>(config, 2);
}

#[test]
fn four_rows_of_eight_ctus() {
  let config = FilterConfig::default()
    .with_dimensions(128, 64)
    .with_ctu_size_log2(4)
    .with_max_chunk_cols(2)
    .with_sao_row_delay(1);
  assert_eq!((8, 4), (config.geometry().cols, config.geometry().rows));
  check_against_reference::<u8>(config, 2);
}

#[interpolate_test(no_deblock, false, true)]
#[interpolate_test(no_sao, true, false)]
#[interpolate_test(neither, false, false)]
fn disabled_stages(deblock: bool, sao: bool) {
  let config = test_config().with_deblock(deblock).with_sao(sao);
  check_against_reference::<u8>(config, 2);
}

#[test]
fn disabled_stages_copy_the_reconstruction() {
  let config = test_config().with_deblock(false).with_sao(false);
  let mut rng = ChaChaRng::from_seed([1; 32]);
  let input = blocky_frame::<u8>(&config, &mut rng);
  let sao = random_sao(&config.geometry(), &mut rng);

  let filtered = filter_threaded(config, 2, &input, None, &sao);
  assert_eq!(input, filtered.recon);
  assert_eq!(input, filtered.output);
}

/// Stage wrappers checking, on every call, that the CTUs each stage depends
/// on are already done.
struct Ledger {
  cols: usize,
  rows: usize,
  delay: usize,
  deblocked: Vec<AtomicBool>,
  offsets: Vec<AtomicUsize>,
}

impl Ledger {
  fn new(geometry: &FrameGeometry, delay: usize) -> Arc<Self> {
    let n = geometry.cols * geometry.rows;
    Arc::new(Self {
      cols: geometry.cols,
      rows: geometry.rows,
      delay,
      deblocked: (0..n).map(|_| AtomicBool::new(false)).collect(),
      offsets: (0..n).map(|_| AtomicUsize::new(0)).collect(),
    })
  }

  fn deblocked(&self, row: usize, col: usize) -> bool {
    self.deblocked[row * self.cols + col].load(Ordering::SeqCst)
  }
}

struct LedgerDeblock(Arc<Ledger>);
struct LedgerSao(Arc<Ledger>);

impl DeblockStage<u8> for LedgerDeblock {
  fn filter_ctu(
    &self, ctu: &CtuInfo<'_>, planes: &mut [PlaneRegionMut<'_, u8>],
  ) {
    let ledger = &self.0;
    let (row, col) = (ctu.row, ctu.col);
    assert!(!ledger.deblocked(row, col), "({row}, {col}) deblocked twice");
    if col > 0 {
      assert!(ledger.deblocked(row, col - 1), "({row}, {col}) before left");
    }
    if row > 0 {
      let next = cmp::min(col + 1, ledger.cols - 1);
      assert!(ledger.deblocked(row - 1, next), "({row}, {col}) before above");
    }
    HevcDeblock::default().filter_ctu(ctu, planes);
    ledger.deblocked[row * ledger.cols + col].store(true, Ordering::SeqCst);
  }
}

impl SaoStage<u8> for LedgerSao {
  fn apply(
    &self, ctu: &CtuInfo<'_>, params: &SaoParams, src: &[PlaneRegion<'_, u8>],
    dst: &mut [PlaneRegionMut<'_, u8>],
  ) {
    let ledger = &self.0;
    let (row, col) = (ctu.row, ctu.col);
    let next = cmp::min(col + 1, ledger.cols - 1);
    let first = row.saturating_sub(1);
    let last = cmp::min(row + ledger.delay, ledger.rows - 1);
    for dep in first..=last {
      assert!(
        ledger.deblocked(dep, next),
        "sao ({row}, {col}) before deblock ({dep}, {next})"
      );
    }
    HevcSao.apply(ctu, params, src, dst);
    ledger.offsets[row * ledger.cols + col].fetch_add(1, Ordering::SeqCst);
  }
}

#[interpolate_test(delay_1, 1)]
#[interpolate_test(delay_2, 2)]
fn stages_run_after_their_dependencies(delay: usize) {
  let config = test_config()
    .with_ctu_size_log2(4)
    .with_max_chunk_cols(3)
    .with_sao_row_delay(delay);
  let geometry = config.geometry();
  let ledger = Ledger::new(&geometry, delay);
  let mut filter = FrameFilter::with_stages(
    config,
    Box::new(LedgerDeblock(ledger.clone())),
    Box::new(LedgerSao(ledger.clone())),
  )
  .unwrap();
  let pool = config.with_threads(4).new_thread_pool().unwrap();

  let mut rng = ChaChaRng::from_seed([2; 32]);
  let mut recon = blocky_frame::<u8>(&config, &mut rng);
  let mut output = recon.clone();
  let sao = random_sao(&geometry, &mut rng);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();

  thread::scope(|s| {
    let runner = s.spawn(|| job.run(&pool, 4));
    s.spawn(|| {
      for row in 0..geometry.rows {
        for col in 0..geometry.cols {
          job.notify_row_reconstructed(row, col);
        }
      }
    });
    // snapshots must show every stage behind the one it depends on
    let mut seen = vec![
      RowProgress { allowed_col: 0, last_col: 0, sao_col: 0, ready: false };
      geometry.rows
    ];
    while !job.is_complete() && !runner.is_finished() {
      for (row, prev) in seen.iter_mut().enumerate() {
        let p = job.row_progress(row).unwrap();
        assert!(p.sao_col <= p.last_col, "{p:?}");
        assert!(p.last_col <= p.allowed_col, "{p:?}");
        assert!(p.allowed_col <= geometry.cols, "{p:?}");
        assert!(!p.ready || p.sao_col == geometry.cols, "{p:?}");
        assert!(p.sao_col >= prev.sao_col && p.last_col >= prev.last_col);
        assert!(p.allowed_col >= prev.allowed_col);
        *prev = p;
      }
      thread::yield_now();
    }
  });
  job.finish().unwrap();

  assert!(ledger.deblocked.iter().all(|d| d.load(Ordering::SeqCst)));
  assert!(ledger.offsets.iter().all(|n| n.load(Ordering::SeqCst) == 1));
}

#[test]
fn rows_become_ready_in_order() {
  let config = test_config().with_ctu_size_log2(4);
  let geometry = config.geometry();
  let mut filter = FrameFilter::<u8>::new(config).unwrap();
  let pool = config.with_threads(3).new_thread_pool().unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();

  thread::scope(|s| {
    s.spawn(|| job.run(&pool, 3));
    let consumer = s.spawn(|| {
      for row in 0..geometry.rows {
        job.wait_row_ready(row).unwrap();
        let p = job.row_progress(row).unwrap();
        assert!(p.ready);
        assert_eq!(geometry.cols, p.sao_col);
      }
    });
    for row in 0..geometry.rows {
      for col in 0..geometry.cols {
        job.notify_row_reconstructed(row, col);
      }
    }
    consumer.join().unwrap();
  });
  job.wait_complete().unwrap();
  job.finish().unwrap();
}

#[test]
fn reconstruction_streams_into_the_filter() {
  let config = test_config();
  let geometry = config.geometry();
  let mut rng = ChaChaRng::from_seed([3; 32]);
  let content = blocky_frame::<u8>(&config, &mut rng);
  let sao = random_sao(&geometry, &mut rng);
  let (expected_recon, expected_output) =
    reference_filter(&config, &content, &sao);

  let mut filter = FrameFilter::new(config).unwrap();
  let pool = config.with_threads(4).new_thread_pool().unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  {
    let input = FrameInput {
      recon: &mut recon,
      output: &mut output,
      source: None,
      sao: &sao,
    };
    let job = filter.start(input, &(), QP).unwrap();
    thread::scope(|s| {
      s.spawn(|| job.run(&pool, 4));
      s.spawn(|| {
        for row in 0..geometry.rows {
          for col in 0..geometry.cols {
            job
              .reconstruct_ctu(row, col, |planes| {
                for (pli, region) in planes.iter_mut().enumerate() {
                  let rect = geometry.ctu_rect(pli, row, col);
                  region.copy_from(&PlaneRegion::new(&content.planes[pli], rect));
                }
              })
              .unwrap();
          }
        }
      });
    });
    job.finish().unwrap();
  }

  // padding of the reconstruction is not maintained
  for pli in 0..3 {
    for y in 0..geometry.plane_dimensions(pli).1 {
      let width = geometry.plane_dimensions(pli).0;
      assert_eq!(
        &expected_recon.planes[pli].row(y)[..width],
        &recon.planes[pli].row(y)[..width]
      );
    }
  }
  assert_eq!(expected_output, output);
}

#[test]
fn post_processing_matches_whole_frame_metrics() {
  let config = test_config()
    .with_psnr(true)
    .with_ssim(true)
    .with_picture_hash(PictureHashKind::Crc);
  let mut rng = ChaChaRng::from_seed([4; 32]);
  let source = blocky_frame::<u8>(&config, &mut rng);
  let recon = blocky_frame::<u8>(&config, &mut rng);
  let sao = random_sao(&config.geometry(), &mut rng);

  let filtered = filter_threaded(config, 4, &recon, Some(&source), &sao);
  let (_, output) = reference_filter(&config, &recon, &sao);
  assert_eq!(output, filtered.output);

  let mut psnr = PsnrAccumulator::default();
  let mut hash = [0; 3];
  for pli in 0..3 {
    let rect = config.geometry().plane_rect(pli);
    psnr.add(
      pli,
      &PlaneRegion::new(&source.planes[pli], rect),
      &PlaneRegion::new(&output.planes[pli], rect),
    );
    let mut hasher = PlaneHasher::new(PictureHashKind::Crc, 8);
    for y in 0..rect.height {
      hasher.update_line(y, &output.planes[pli].row(y)[..rect.width]);
    }
    hash[pli] = hasher.finish();
  }
  let rect = config.geometry().plane_rect(0);
  let mut ssim = SsimAccumulator::new(config.width, config.bit_depth);
  ssim.add_lines(
    &PlaneRegion::new(&source.planes[0], rect),
    &PlaneRegion::new(&output.planes[0], rect),
  );

  let summary = filtered.summary;
  assert_eq!(0, summary.frame_number);
  assert_eq!(QP, summary.qp);
  assert_eq!(Some(psnr.finish(8)), summary.psnr);
  assert_eq!(Some(ssim.finish()), summary.ssim);
  assert_eq!(Some(hash), summary.hash);
}

#[test]
fn metrics_need_a_source() {
  let config = test_config().with_psnr(true).with_ssim(true);
  let mut rng = ChaChaRng::from_seed([5; 32]);
  let recon = blocky_frame::<u8>(&config, &mut rng);
  let sao = SaoParamsMap::new(config.geometry().cols, config.geometry().rows);

  let summary = filter_threaded(config, 2, &recon, None, &sao).summary;
  assert_eq!(None, summary.psnr);
  assert_eq!(None, summary.ssim);
  assert_eq!(None, summary.hash);
}

#[test]
fn drive_runs_the_frame_on_one_thread() {
  let config = test_config();
  let geometry = config.geometry();
  let mut rng = ChaChaRng::from_seed([6; 32]);
  let input = blocky_frame::<u8>(&config, &mut rng);
  let sao = random_sao(&geometry, &mut rng);
  let (_, expected) = reference_filter(&config, &input, &sao);

  let mut filter = FrameFilter::new(config).unwrap();
  let mut recon = input.clone();
  let mut output = Frame::new(config.width, config.height, config.chroma_sampling);
  {
    let input = FrameInput {
      recon: &mut recon,
      output: &mut output,
      source: None,
      sao: &sao,
    };
    let job = filter.start(input, &(), QP).unwrap();
    assert!(!job.drive());
    assert!(!job.process_row(0));

    // a single column of the first row is not enough to deblock anything
    job.notify_row_reconstructed(0, 0);
    assert!(job.process_row(0));
    assert!(!job.process_row(1));
    assert!(!job.process_sao(0));

    for row in 0..geometry.rows {
      job.notify_row_reconstructed(row, geometry.cols - 1);
    }
    while job.drive() {}
    assert!(job.is_complete());
    job.finish().unwrap();
  }
  assert_eq!(expected, output);
}

#[test]
fn finishing_early_reports_missing_rows() {
  let config = test_config();
  let geometry = config.geometry();
  let mut filter = FrameFilter::<u8>::new(config).unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();

  match job.finish() {
    Err(FilterError::Incomplete { done, total }) => {
      assert_eq!((0, geometry.rows), (done, total));
    }
    r => panic!("unexpected {r:?}"),
  }
}

#[test]
fn abort_releases_every_waiter() {
  let config = test_config().with_ctu_size_log2(4);
  let geometry = config.geometry();
  let mut filter = FrameFilter::<u8>::new(config).unwrap();
  let pool = config.with_threads(3).new_thread_pool().unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();

  thread::scope(|s| {
    let workers = s.spawn(|| job.run(&pool, 3));
    let waiter = s.spawn(|| job.wait_row_ready(geometry.rows - 1));

    job.notify_row_reconstructed(0, geometry.cols - 1);
    job.notify_row_reconstructed(1, 2);
    while job.row_progress(1).unwrap().last_col < 3 {
      thread::yield_now();
    }
    assert!(!job.row_progress(0).unwrap().ready);
    job.abort();

    workers.join().unwrap();
    assert!(matches!(waiter.join().unwrap(), Err(FilterError::Aborted)));
  });

  assert!(job.is_aborted());
  assert_eq!(None, job.row_progress(0));
  assert!(!job.drive());
  assert!(matches!(job.wait_complete(), Err(FilterError::Aborted)));
  assert!(matches!(
    job.reconstruct_ctu(2, 0, |_| unreachable!()),
    Err(FilterError::Aborted)
  ));
  job.notify_row_reconstructed(2, 0);
  assert!(matches!(job.finish(), Err(FilterError::Aborted)));
}

#[test]
fn abort_before_any_work() {
  let config = test_config();
  let geometry = config.geometry();
  let mut filter = FrameFilter::<u8>::new(config).unwrap();
  let pool = config.with_threads(2).new_thread_pool().unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();

  job.abort();
  job.abort();
  job.run(&pool, 2);
  assert!(matches!(job.wait_row_ready(0), Err(FilterError::Aborted)));
}

/// Stages that hold one CTU until the frame is abandoned, counting every
/// call made after that.
struct Tripwire {
  on_sao: bool,
  at: (usize, usize),
  entered: AtomicBool,
  aborted: AtomicBool,
  calls: AtomicUsize,
  late: AtomicUsize,
}

impl Tripwire {
  fn enter(&self, sao: bool, ctu: &CtuInfo<'_>) {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.aborted.load(Ordering::SeqCst) {
      self.late.fetch_add(1, Ordering::SeqCst);
    }
    if sao == self.on_sao && (ctu.row, ctu.col) == self.at {
      self.entered.store(true, Ordering::SeqCst);
      while !self.aborted.load(Ordering::SeqCst) {
        thread::yield_now();
      }
    }
  }
}

struct TripDeblock(Arc<Tripwire>);
struct TripSao(Arc<Tripwire>);

impl DeblockStage<u8> for TripDeblock {
  fn filter_ctu(
    &self, ctu: &CtuInfo<'_>, planes: &mut [PlaneRegionMut<'_, u8>],
  ) {
    self.0.enter(false, ctu);
    HevcDeblock::default().filter_ctu(ctu, planes);
  }
}

impl SaoStage<u8> for TripSao {
  fn apply(
    &self, ctu: &CtuInfo<'_>, params: &SaoParams, src: &[PlaneRegion<'_, u8>],
    dst: &mut [PlaneRegionMut<'_, u8>],
  ) {
    self.0.enter(true, ctu);
    HevcSao.apply(ctu, params, src, dst);
  }
}

#[interpolate_test(during_deblock, false, 1, 1)]
#[interpolate_test(during_sao, true, 0, 1)]
fn no_stage_starts_after_abort(on_sao: bool, row: usize, col: usize) {
  let config = test_config().with_ctu_size_log2(4).with_max_chunk_cols(3);
  let geometry = config.geometry();
  let wire = Arc::new(Tripwire {
    on_sao,
    at: (row, col),
    entered: AtomicBool::new(false),
    aborted: AtomicBool::new(false),
    calls: AtomicUsize::new(0),
    late: AtomicUsize::new(0),
  });
  let mut filter = FrameFilter::with_stages(
    config,
    Box::new(TripDeblock(wire.clone())),
    Box::new(TripSao(wire.clone())),
  )
  .unwrap();
  let pool = config.with_threads(1).new_thread_pool().unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();
  // every CTU is claimable as soon as its dependencies allow
  for row in 0..geometry.rows {
    job.notify_row_reconstructed(row, geometry.cols - 1);
  }

  thread::scope(|s| {
    let runner = s.spawn(|| job.run(&pool, 1));
    while !wire.entered.load(Ordering::SeqCst) {
      assert!(!runner.is_finished(), "({row}, {col}) was never filtered");
      thread::yield_now();
    }
    job.abort();
    wire.aborted.store(true, Ordering::SeqCst);
    runner.join().unwrap();
  });

  assert!(!job.drive());
  for row in 0..geometry.rows {
    assert!(!job.process_row(row));
    assert!(!job.process_sao(row));
  }
  assert_eq!(0, wire.late.load(Ordering::SeqCst));
  assert!(wire.calls.load(Ordering::SeqCst) < 2 * geometry.cols * geometry.rows);
  assert!(matches!(job.finish(), Err(FilterError::Aborted)));
}

#[test]
#[should_panic(expected = "out of range")]
fn waiting_past_the_last_row_panics() {
  let config = test_config();
  let geometry = config.geometry();
  let mut filter = FrameFilter::<u8>::new(config).unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();
  for row in 0..geometry.rows {
    job.notify_row_reconstructed(row, geometry.cols - 1);
  }
  while job.drive() {}
  assert!(job.is_complete());
  let _ = job.wait_row_ready(geometry.rows);
}

#[test]
#[should_panic(expected = "out of range")]
fn progress_past_the_last_row_panics() {
  let config = test_config();
  let geometry = config.geometry();
  let mut filter = FrameFilter::<u8>::new(config).unwrap();
  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = recon.clone();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  let job = filter.start(input, &(), QP).unwrap();
  let _ = job.row_progress(geometry.rows);
}

#[test]
fn filter_is_reused_across_frames() {
  let config = test_config();
  let geometry = config.geometry();
  let mut filter = FrameFilter::new(config).unwrap();
  let pool = config.with_threads(3).new_thread_pool().unwrap();
  let mut rng = ChaChaRng::from_seed([7; 32]);

  for frame_number in 0..3 {
    let input = blocky_frame::<u8>(&config, &mut rng);
    let sao = random_sao(&geometry, &mut rng);
    let (_, expected) = reference_filter(&config, &input, &sao);

    let mut recon = input.clone();
    let mut output =
      Frame::new(config.width, config.height, config.chroma_sampling);
    let input = FrameInput {
      recon: &mut recon,
      output: &mut output,
      source: None,
      sao: &sao,
    };
    let job = filter.start(input, &(), QP).unwrap();
    assert_eq!(frame_number, job.frame_number());
    thread::scope(|s| {
      s.spawn(|| job.run(&pool, 3));
      for row in 0..geometry.rows {
        job.notify_row_reconstructed(row, geometry.cols - 1);
      }
    });
    let summary = job.finish().unwrap();
    assert_eq!(frame_number, summary.frame_number);
    assert_eq!(expected, output);
  }
  filter.destroy();
}

#[test]
fn start_checks_buffers() {
  let config = test_config();
  let geometry = config.geometry();
  let mut filter = FrameFilter::<u8>::new(config).unwrap();
  let sao = SaoParamsMap::new(geometry.cols, geometry.rows);

  let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
  let mut output = Frame::new(config.width, 64, config.chroma_sampling);
  let input =
    FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
  match filter.start(input, &(), QP) {
    Err(FilterError::FrameMismatch { frame, plane, expected, actual }) => {
      assert_eq!("output", frame);
      assert_eq!(0, plane);
      assert_eq!((config.width, config.height), expected);
      assert_eq!((config.width, 64), actual);
    }
    r => panic!("unexpected {r:?}"),
  }

  let small = SaoParamsMap::new(geometry.cols - 1, geometry.rows);
  let mut output = recon.clone();
  let input = FrameInput {
    recon: &mut recon,
    output: &mut output,
    source: None,
    sao: &small,
  };
  assert!(matches!(
    filter.start(input, &(), QP),
    Err(FilterError::SaoParamsMismatch { .. })
  ));
}

#[test]
fn invalid_config_is_rejected() {
  let config = test_config().with_sao_row_delay(0);
  assert!(matches!(
    FrameFilter::<u8>::new(config),
    Err(FilterError::InvalidConfig(InvalidConfig::InvalidSaoRowDelay(0)))
  ));
}

#[test]
#[should_panic]
fn pixel_type_must_hold_bit_depth() {
  let _ = FrameFilter::<u8>::new(test_config().with_bit_depth(10));
}
