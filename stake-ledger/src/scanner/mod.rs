// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

mod block;
mod config;
mod coordinator;
mod watermark;

pub use block::{BlockOutcome, BlockProcessor};
pub use config::{ScanConfig, WORKER_RANGE};
pub use coordinator::{resolve_start_height, ScanCoordinator, ScanReport};
pub use watermark::ContiguousWatermark;
