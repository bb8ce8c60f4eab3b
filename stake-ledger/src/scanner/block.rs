// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::classifier::{classify, BlockClass, CoinstakePosition};
use crate::error::LedgerResult;
use crate::extractor::{BlockContext, StakeExtractor};
use crate::ledger::LedgerWriter;
use crate::rpc::ChainSource;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    pub is_pos: bool,
    pub inserted: usize,
}

/// Fetch, classify, extract and record one block. Shared by the scanner and gap backfill.
pub struct BlockProcessor {
    source: Arc<dyn ChainSource>,
    extractor: Arc<StakeExtractor>,
    writer: LedgerWriter,
    position: CoinstakePosition,
}

impl BlockProcessor {
    pub fn new(
        source: Arc<dyn ChainSource>,
        extractor: Arc<StakeExtractor>,
        writer: LedgerWriter,
        position: CoinstakePosition,
    ) -> Self {
        Self {
            source,
            extractor,
            writer,
            position,
        }
    }

    pub fn extractor(&self) -> &Arc<StakeExtractor> {
        &self.extractor
    }

    pub async fn process(
        &self,
        height: u64,
        tracked: &HashSet<String>,
    ) -> LedgerResult<BlockOutcome> {
        let block = self.source.block_at(height, true).await?;
        let coinstake = match classify(&block, self.position) {
            BlockClass::ProofOfStake { coinstake } => coinstake,
            BlockClass::ProofOfWork => return Ok(BlockOutcome::default()),
            BlockClass::Excluded { txid } => {
                debug!(
                    "[Scanner] Block {} coinstake {} spends a coinbase, skipped",
                    height, txid
                );
                return Ok(BlockOutcome::default());
            }
            BlockClass::Unknown { reason } => {
                warn!("[Scanner] Block {} not classified: {}", height, reason);
                return Ok(BlockOutcome::default());
            }
        };

        let events = self
            .extractor
            .extract(BlockContext::from(&block), coinstake, tracked)
            .await?;
        let inserted = self.writer.record(&events).await?;
        Ok(BlockOutcome {
            is_pos: true,
            inserted,
        })
    }
}
