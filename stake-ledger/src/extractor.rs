// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Stake Extractor
//!
//! Turns the coinstake of a proof-of-stake block into candidate stake events for the tracked
//! identities it pays.
//!
//! ## Reward
//! - total reward = sum of coinstake outputs - sum of resolved input values
//! - each paid identity receives `total_reward * paid_to_identity / total_outputs`
//! - when an input cannot be resolved the reward is unknown and the event carries the gross
//!   amount paid
//! - a non-positive reward produces no events
//!
//! ## Attribution
//! The owner of the output spent by the first input is the staker:
//! - staker == paid identity -> `direct`
//! - staker != paid identity -> `indirect`, staker kept as source address
//! - staker not resolvable -> `unknown`

use crate::error::{LedgerError, LedgerResult};
use crate::prevout_cache::PrevOutCache;
use crate::rpc::ChainSource;
use crate::types::{Amount, Attribution, RawBlock, RawTransaction, StakeEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Block fields copied onto every event
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    pub height: u64,
    pub hash: &'a str,
    pub time: i64,
}

impl<'a> From<&'a RawBlock> for BlockContext<'a> {
    fn from(block: &'a RawBlock) -> Self {
        Self {
            height: block.height,
            hash: &block.hash,
            time: block.time,
        }
    }
}

/// What could be learned about the coinstake's inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputResolution {
    /// Sum of input values, None when any input is unresolvable
    pub input_total: Option<Amount>,
    /// Owner of the output spent by the first input
    pub staker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Payout {
    address: String,
    first_index: u32,
    gross: Amount,
}

pub struct StakeExtractor {
    source: Arc<dyn ChainSource>,
    cache: Arc<PrevOutCache>,
}

impl StakeExtractor {
    pub fn new(source: Arc<dyn ChainSource>, cache: Arc<PrevOutCache>) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &Arc<PrevOutCache> {
        &self.cache
    }

    /// Candidate events for every tracked identity paid by `coinstake`.
    ///
    /// Transient RPC failures propagate so the caller can retry or skip the whole block.
    pub async fn extract(
        &self,
        block: BlockContext<'_>,
        coinstake: &RawTransaction,
        tracked: &HashSet<String>,
    ) -> LedgerResult<Vec<StakeEvent>> {
        if coinstake.has_coinbase_input() {
            return Ok(vec![]);
        }
        let payouts = tracked_payouts(coinstake, tracked);
        if payouts.is_empty() {
            return Ok(vec![]);
        }

        let inputs = self.resolve_inputs(coinstake).await?;
        let total_output = coinstake.total_output();
        let total_reward = inputs.input_total.map(|input_total| total_output - input_total);

        if let Some(reward) = total_reward {
            if reward <= 0 {
                debug!(
                    "[Extractor] Coinstake {} at height {} has non-positive reward {}",
                    coinstake.txid, block.height, reward
                );
                return Ok(vec![]);
            }
        }

        let events = payouts
            .into_iter()
            .filter_map(|payout| {
                let amount = match total_reward {
                    Some(reward) => share(reward, payout.gross, total_output),
                    None => payout.gross,
                };
                let (attribution, source_address) = attribute(&payout.address, &inputs.staker);
                (amount > 0).then(|| StakeEvent {
                    identity_address: payout.address,
                    txid: coinstake.txid.clone(),
                    output_index: payout.first_index,
                    block_height: block.height,
                    block_hash: block.hash.to_string(),
                    block_time: block.time,
                    amount,
                    attribution,
                    source_address,
                })
            })
            .collect();
        Ok(events)
    }

    /// Resolves every coinstake input. Only missing previous outputs are absorbed; any other
    /// failure is returned.
    pub async fn resolve_inputs(&self, coinstake: &RawTransaction) -> LedgerResult<InputResolution> {
        let mut input_total: Option<Amount> = Some(0);
        let mut staker = None;
        for (position, input) in coinstake.vin.iter().enumerate() {
            match self.cache.resolve_input(self.source.as_ref(), input).await {
                Ok(resolved) => {
                    input_total = input_total.map(|total| total + resolved.value);
                    if position == 0 {
                        staker = resolved.address;
                    }
                }
                Err(LedgerError::NotFound(reason)) => {
                    debug!(
                        "[Extractor] Input {} of {} unresolvable: {}",
                        position, coinstake.txid, reason
                    );
                    input_total = None;
                }
                Err(e) => return Err(e),
            }
        }
        if coinstake.vin.is_empty() {
            input_total = None;
        }
        Ok(InputResolution {
            input_total,
            staker,
        })
    }
}

/// One payout per tracked address, in output order, keyed by the first output paying it.
fn tracked_payouts(coinstake: &RawTransaction, tracked: &HashSet<String>) -> Vec<Payout> {
    let mut payouts: Vec<Payout> = Vec::new();
    for out in &coinstake.vout {
        let value = out.satoshis();
        if value <= 0 {
            continue;
        }
        let Some(address) = out.address() else {
            continue;
        };
        if !tracked.contains(address) {
            continue;
        }
        match payouts.iter_mut().find(|p| p.address == address) {
            Some(payout) => payout.gross += value,
            None => payouts.push(Payout {
                address: address.to_string(),
                first_index: out.n,
                gross: value,
            }),
        }
    }
    payouts
}

fn share(reward: Amount, gross: Amount, total_output: Amount) -> Amount {
    if total_output <= 0 {
        return 0;
    }
    (reward as i128 * gross as i128 / total_output as i128) as Amount
}

fn attribute(identity: &str, staker: &Option<String>) -> (Attribution, Option<String>) {
    match staker {
        Some(owner) if owner == identity => (Attribution::Direct, Some(owner.clone())),
        Some(owner) => (Attribution::Indirect, Some(owner.clone())),
        None => (Attribution::Unknown, None),
    }
}
