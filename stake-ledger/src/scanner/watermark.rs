// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

/// Highest height below which every block has been processed.
///
/// Blocks complete out of order; heights above the first hole are parked until the hole closes.
#[derive(Debug, Clone)]
pub struct ContiguousWatermark {
    start: u64,
    next: u64,
    parked: BTreeSet<u64>,
}

impl ContiguousWatermark {
    /// Watermark for a window beginning at `start`
    pub fn new(start: u64) -> Self {
        Self {
            start,
            next: start,
            parked: BTreeSet::new(),
        }
    }

    /// Marks `height` processed. Returns true when the watermark moved.
    pub fn complete(&mut self, height: u64) -> bool {
        if height < self.next {
            return false;
        }
        if height > self.next {
            self.parked.insert(height);
            return false;
        }
        self.next += 1;
        while self.parked.remove(&self.next) {
            self.next += 1;
        }
        true
    }

    /// Last height of the gap-free prefix, None until the first block of the window completes.
    pub fn committed(&self) -> Option<u64> {
        (self.next > self.start).then(|| self.next - 1)
    }

    /// Completed heights waiting on a hole
    pub fn parked(&self) -> usize {
        self.parked.len()
    }
}
