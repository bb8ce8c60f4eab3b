// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block classification.
//!
//! The daemon's `validationtype` field is the only signal used: "stake" means proof-of-stake,
//! "work" means proof-of-work, anything else is reported as unknown and never guessed.

use crate::types::RawBlock;
use crate::types::RawTransaction;
use serde::{Deserialize, Serialize};

pub const VALIDATION_STAKE: &str = "stake";
pub const VALIDATION_WORK: &str = "work";

/// Where the staking transaction sits inside a proof-of-stake block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinstakePosition {
    /// Final transaction of the block (Verus)
    #[default]
    Last,
    /// Transaction right after the coinbase (Peercoin lineage)
    Second,
}

impl CoinstakePosition {
    fn locate<'a>(&self, txs: &'a [RawTransaction]) -> Option<&'a RawTransaction> {
        match self {
            CoinstakePosition::Last => txs.last(),
            CoinstakePosition::Second => txs.get(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockClass<'a> {
    ProofOfStake { coinstake: &'a RawTransaction },
    ProofOfWork,
    /// Staking block whose reward transaction spends a coinbase input
    Excluded { txid: &'a str },
    Unknown { reason: String },
}

impl BlockClass<'_> {
    pub fn is_pos(&self) -> bool {
        matches!(self, BlockClass::ProofOfStake { .. })
    }
}

pub fn classify(block: &RawBlock, position: CoinstakePosition) -> BlockClass<'_> {
    match block.validationtype.as_deref() {
        Some(VALIDATION_STAKE) => {}
        Some(VALIDATION_WORK) => return BlockClass::ProofOfWork,
        Some(other) => {
            return BlockClass::Unknown {
                reason: format!("unrecognised validationtype '{other}'"),
            }
        }
        None => {
            return BlockClass::Unknown {
                reason: "missing validationtype".to_string(),
            }
        }
    }

    let Some(coinstake) = position.locate(&block.tx) else {
        return BlockClass::Unknown {
            reason: format!(
                "stake block {} has no transaction at position {:?}",
                block.height, position
            ),
        };
    };

    if coinstake.has_coinbase_input() {
        return BlockClass::Excluded {
            txid: &coinstake.txid,
        };
    }

    BlockClass::ProofOfStake { coinstake }
}
