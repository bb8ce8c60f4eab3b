// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::classifier::CoinstakePosition;
use crate::error::{LedgerError, LedgerResult};
use crate::prevout_cache::DEFAULT_PREVOUT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

pub const WORKER_RANGE: RangeInclusive<usize> = 2..=20;

/// Configuration of a scan pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Key of the checkpoint row owned by this scan
    #[serde(default = "default_scan_id")]
    pub scan_id: String,

    /// First height to scan when no checkpoint exists. Defaults to the earliest identity
    /// first-seen height.
    #[serde(default)]
    pub start_height: Option<u64>,

    /// Heights dispatched per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Blocks processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Committed blocks between checkpoint writes
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// How long in-flight blocks may finish after cancellation
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Blocks kept below the tip
    #[serde(default)]
    pub finality_depth: u64,

    #[serde(default)]
    pub coinstake_position: CoinstakePosition,

    #[serde(default = "default_prevout_cache_capacity")]
    pub prevout_cache_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_id: default_scan_id(),
            start_height: None,
            batch_size: default_batch_size(),
            workers: default_workers(),
            checkpoint_interval: default_checkpoint_interval(),
            drain_timeout_ms: default_drain_timeout_ms(),
            finality_depth: 0,
            coinstake_position: CoinstakePosition::default(),
            prevout_cache_capacity: default_prevout_cache_capacity(),
        }
    }
}

impl ScanConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.scan_id.trim().is_empty() {
            return Err(LedgerError::Config("scan_id must not be empty".into()));
        }
        if !WORKER_RANGE.contains(&self.workers) {
            return Err(LedgerError::Config(format!(
                "workers must be within {}..={}, got {}",
                WORKER_RANGE.start(),
                WORKER_RANGE.end(),
                self.workers
            )));
        }
        if self.batch_size == 0 {
            return Err(LedgerError::Config("batch_size must be positive".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(LedgerError::Config(
                "checkpoint_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_scan_id() -> String {
    "main".to_string()
}

fn default_batch_size() -> u64 {
    500
}

fn default_workers() -> usize {
    8
}

fn default_checkpoint_interval() -> u64 {
    100
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_prevout_cache_capacity() -> usize {
    DEFAULT_PREVOUT_CACHE_CAPACITY
}
