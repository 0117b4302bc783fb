// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! In-loop deblocking and sample adaptive offset (SAO) filtering of
//! reconstructed frames, scheduled as a wavefront over CTU rows.
//!
//! Reconstruction reports finished CTUs through a [`FrameJob`]; any number
//! of workers then claim chunks of contiguous CTUs whose dependencies are
//! met. Deblocking runs in place on the reconstruction, SAO writes a
//! separate output frame, and each row is published to consumers once its
//! borders are extended and its metrics gathered.
//!
//! ```no_run
//! use inloop_filter::*;
//!
//! # fn main() -> Result<(), FilterError> {
//! let config = FilterConfig::default().with_threads(4);
//! let geometry = config.geometry();
//! let mut filter = FrameFilter::<u8>::new(config)?;
//! let pool = config.new_thread_pool()?;
//!
//! let mut recon = Frame::new(config.width, config.height, config.chroma_sampling);
//! let mut output = recon.clone();
//! let sao = SaoParamsMap::new(geometry.cols, geometry.rows);
//! let input = FrameInput { recon: &mut recon, output: &mut output, source: None, sao: &sao };
//!
//! let job = filter.start(input, &(), 32)?;
//! std::thread::scope(|s| {
//!   s.spawn(|| job.run(&pool, 4));
//!   for row in 0..geometry.rows {
//!     job.notify_row_reconstructed(row, geometry.cols - 1);
//!   }
//! });
//! let summary = job.finish()?;
//! # let _ = summary;
//! # Ok(())
//! # }
//! ```

#![deny(bare_trait_objects)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod deblock;
pub mod filter;
pub mod frame;
pub mod gate;
pub mod geometry;
pub mod hash;
pub mod metrics;
pub mod row;
pub mod sao;
pub mod tiling;
pub mod util;

pub use crate::config::{FilterConfig, InvalidConfig, PictureHashKind};
pub use crate::deblock::{DeblockStage, HevcDeblock};
pub use crate::filter::{
  FilterError, FrameFilter, FrameInput, FrameJob, FrameSummary, RowProgress,
};
pub use crate::frame::{ChromaSampling, Frame, Plane};
pub use crate::geometry::{CtuInfo, FrameGeometry};
pub use crate::metrics::FrameMetrics;
pub use crate::sao::{
  HevcSao, SaoComponent, SaoParams, SaoParamsMap, SaoStage, SaoType,
};
pub use crate::util::Pixel;
