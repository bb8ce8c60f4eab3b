// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Builders for chain fixtures used by tests.

use crate::rpc::mock::MockChainSource;
use crate::types::{
    AddressUtxo, Amount, RawBlock, RawTransaction, ScriptPubKey, TxInput, TxOutput,
};

pub const GENESIS_TIME: i64 = 1_600_000_000;
pub const BLOCK_SPACING_SECS: i64 = 60;

pub fn block_hash(height: u64) -> String {
    format!("{:064x}", height)
}

pub fn block_time(height: u64) -> i64 {
    GENESIS_TIME + height as i64 * BLOCK_SPACING_SECS
}

pub fn input(prev_txid: &str, vout: u32) -> TxInput {
    TxInput {
        txid: Some(prev_txid.to_string()),
        vout: Some(vout),
        ..Default::default()
    }
}

pub fn coinbase_input() -> TxInput {
    TxInput {
        coinbase: Some("03a0860100".to_string()),
        ..Default::default()
    }
}

pub fn output(n: u32, address: &str, value: Amount) -> TxOutput {
    TxOutput {
        value: value as f64 / crate::types::COIN as f64,
        value_sat: Some(value),
        n,
        script_pub_key: ScriptPubKey {
            addresses: vec![address.to_string()],
        },
    }
}

pub fn tx(txid: &str, vin: Vec<TxInput>, vout: Vec<TxOutput>) -> RawTransaction {
    RawTransaction {
        txid: txid.to_string(),
        vin,
        vout,
    }
}

pub fn coinbase_tx(height: u64, address: &str, value: Amount) -> RawTransaction {
    tx(
        &format!("coinbase-{height}"),
        vec![coinbase_input()],
        vec![output(0, address, value)],
    )
}

pub fn block(height: u64, validationtype: Option<&str>, txs: Vec<RawTransaction>) -> RawBlock {
    RawBlock {
        hash: block_hash(height),
        height,
        time: block_time(height),
        validationtype: validationtype.map(str::to_string),
        tx: txs,
    }
}

pub fn pos_block(height: u64, txs: Vec<RawTransaction>) -> RawBlock {
    block(height, Some("stake"), txs)
}

pub fn work_block(height: u64, miner: &str) -> RawBlock {
    block(height, Some("work"), vec![coinbase_tx(height, miner, 3 * crate::types::COIN)])
}

pub fn utxo(address: &str, txid: &str, output_index: u32, satoshis: Amount, height: u64) -> AddressUtxo {
    AddressUtxo {
        address: address.to_string(),
        txid: txid.to_string(),
        output_index,
        satoshis,
        height,
    }
}

/// Adds a PoS block at `height` whose coinstake spends one `stake_value` output owned by
/// `staker` and pays `payouts`. The funding transaction is registered with the mock.
///
/// Returns the coinstake txid.
pub fn add_stake_block(
    chain: &MockChainSource,
    height: u64,
    staker: &str,
    stake_value: Amount,
    payouts: &[(&str, Amount)],
) -> String {
    let funding_txid = format!("funding-{height}");
    chain.add_transaction(tx(
        &funding_txid,
        vec![input("genesis", 0)],
        vec![output(0, staker, stake_value)],
    ));
    let coinstake_txid = format!("coinstake-{height}");
    let vout = payouts
        .iter()
        .enumerate()
        .map(|(n, (address, value))| output(n as u32, address, *value))
        .collect();
    let coinstake = tx(&coinstake_txid, vec![input(&funding_txid, 0)], vout);
    chain.add_block(pos_block(
        height,
        vec![coinbase_tx(height, staker, 0), coinstake],
    ));
    coinstake_txid
}

/// Fills `from..=to` with proof-of-work blocks, except the heights in `skip`.
pub fn fill_work_blocks(chain: &MockChainSource, from: u64, to: u64, skip: &[u64]) {
    for height in from..=to {
        if !skip.contains(&height) {
            chain.add_block(work_block(height, "RMiner"));
        }
    }
}
