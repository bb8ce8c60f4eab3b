// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain payloads returned by the daemon and the ledger records derived from them.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Amount in base units (1 coin = 100_000_000)
pub type Amount = i64;

pub const COIN: Amount = 100_000_000;

// ============================================================================
// Daemon payloads
// ============================================================================

/// Block as returned by `getblock <hash> 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    pub hash: String,
    pub height: u64,
    pub time: i64,
    /// "stake" or "work". Absent on daemons that do not report it.
    #[serde(default)]
    pub validationtype: Option<String>,
    #[serde(default)]
    pub tx: Vec<RawTransaction>,
}

/// Block header fields as returned by `getblock <hash> 1`; transaction ids are ignored.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BlockSummary {
    pub hash: String,
    pub height: u64,
    pub time: i64,
    #[serde(default)]
    pub validationtype: Option<String>,
}

impl From<BlockSummary> for RawBlock {
    fn from(summary: BlockSummary) -> Self {
        Self {
            hash: summary.hash,
            height: summary.height,
            time: summary.time,
            validationtype: summary.validationtype,
            tx: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
}

impl RawTransaction {
    pub fn has_coinbase_input(&self) -> bool {
        self.vin.iter().any(|input| input.coinbase.is_some())
    }

    pub fn output(&self, index: u32) -> Option<&TxOutput> {
        self.vout.iter().find(|out| out.n == index)
    }

    pub fn total_output(&self) -> Amount {
        self.vout.iter().map(TxOutput::satoshis).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    /// Spent value, present when the daemon runs with the spent index.
    #[serde(rename = "valueSat", default, skip_serializing_if = "Option::is_none")]
    pub value_sat: Option<Amount>,
    /// Spent address, present when the daemon runs with the spent index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl TxInput {
    /// The previous output this input spends, or None for coinbase inputs.
    pub fn prevout(&self) -> Option<OutPoint> {
        match (&self.txid, self.vout) {
            (Some(txid), Some(vout)) if self.coinbase.is_none() => Some(OutPoint {
                txid: txid.clone(),
                index: vout,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub value: f64,
    #[serde(rename = "valueSat", default, skip_serializing_if = "Option::is_none")]
    pub value_sat: Option<Amount>,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
}

impl TxOutput {
    pub fn satoshis(&self) -> Amount {
        self.value_sat
            .unwrap_or_else(|| (self.value * COIN as f64).round() as Amount)
    }

    /// First address the output pays to
    pub fn address(&self) -> Option<&str> {
        self.script_pub_key.addresses.first().map(String::as_str)
    }

    pub fn pays_to(&self, address: &str) -> bool {
        self.script_pub_key.addresses.iter().any(|a| a == address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Entry of `getaddressutxos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUtxo {
    pub address: String,
    pub txid: String,
    #[serde(rename = "outputIndex")]
    pub output_index: u32,
    pub satoshis: Amount,
    pub height: u64,
}

/// Identity creation data derived from `getidentityhistory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityHistory {
    pub name: Option<String>,
    pub first_seen_height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: String,
    pub index: u32,
}

// ============================================================================
// Ledger records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub address: String,
    pub display_name: String,
    pub first_seen_height: u64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Attribution {
    /// Reward paid back to the owner of the staked input
    Direct,
    /// Reward paid to an identity other than the owner of the staked input
    Indirect,
    /// Owner of the staked input could not be resolved
    Unknown,
}

/// Natural key of a stake event
pub type EventKey = OutPoint;

/// Place of an event in ledger order: (height, txid, output index)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventPosition {
    pub height: u64,
    pub key: EventKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeEvent {
    pub identity_address: String,
    pub txid: String,
    pub output_index: u32,
    pub block_height: u64,
    pub block_hash: String,
    pub block_time: i64,
    pub amount: Amount,
    pub attribution: Attribution,
    pub source_address: Option<String>,
}

impl StakeEvent {
    pub fn key(&self) -> EventKey {
        OutPoint {
            txid: self.txid.clone(),
            index: self.output_index,
        }
    }

    pub fn position(&self) -> EventPosition {
        EventPosition {
            height: self.block_height,
            key: self.key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub value: Amount,
    pub creation_height: u64,
    pub creation_time: i64,
    pub is_spent: bool,
    pub is_eligible: bool,
    pub spent_txid: Option<String>,
    pub spent_height: Option<u64>,
    pub spent_time: Option<i64>,
}

impl Utxo {
    pub fn key(&self) -> OutPoint {
        OutPoint {
            txid: self.txid.clone(),
            index: self.output_index,
        }
    }
}

/// Marks a locally unspent output as consumed during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentMark {
    pub outpoint: OutPoint,
    pub spent_txid: Option<String>,
    pub spent_height: u64,
    pub spent_time: i64,
}

/// A height the scanner skipped after exhausting retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanGap {
    pub scan_id: String,
    pub height: u64,
    pub reason: String,
    pub attempts: u32,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityStatistics {
    pub address: String,
    pub total_stakes: u64,
    pub total_rewards: Amount,
    pub first_stake_time: Option<i64>,
    pub last_stake_time: Option<i64>,
    pub mean_interval_secs: Option<f64>,
    pub median_interval_secs: Option<f64>,
    pub observed_principal: Amount,
    pub apy_estimate: Option<f64>,
    pub rank: Option<u64>,
    pub percentile: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Complete,
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_attribution_round_trips_through_text() {
        for attribution in [Attribution::Direct, Attribution::Indirect, Attribution::Unknown] {
            let text = attribution.as_ref().to_string();
            assert_eq!(Attribution::from_str(&text).unwrap(), attribution);
        }
        assert_eq!(Attribution::Indirect.to_string(), "indirect");
        assert!(Attribution::from_str("delegated").is_err());
    }

    #[test]
    fn test_output_value_prefers_satoshi_field() {
        let out: TxOutput = serde_json::from_value(serde_json::json!({
            "value": 1.5,
            "valueSat": 150000001,
            "n": 0,
            "scriptPubKey": {"addresses": ["RAddr"]}
        }))
        .unwrap();
        assert_eq!(out.satoshis(), 150_000_001);
        assert_eq!(out.address(), Some("RAddr"));

        let out: TxOutput =
            serde_json::from_value(serde_json::json!({"value": 0.1, "n": 1})).unwrap();
        assert_eq!(out.satoshis(), 10_000_000);
        assert_eq!(out.address(), None);
    }

    #[test]
    fn test_coinbase_input_has_no_prevout() {
        let tx: RawTransaction = serde_json::from_value(serde_json::json!({
            "txid": "aa",
            "vin": [{"coinbase": "03abcdef"}],
            "vout": []
        }))
        .unwrap();
        assert!(tx.has_coinbase_input());
        assert_eq!(tx.vin[0].prevout(), None);
    }

    #[test]
    fn test_block_parses_daemon_shape() {
        let block: RawBlock = serde_json::from_value(serde_json::json!({
            "hash": "00ff",
            "height": 12,
            "time": 1700000000,
            "validationtype": "stake",
            "confirmations": 3,
            "tx": [{
                "txid": "t1",
                "vin": [{"txid": "p1", "vout": 2, "sequence": 4294967295u64}],
                "vout": [{"value": 10.0, "n": 0, "scriptPubKey": {"addresses": ["RA"]}}]
            }]
        }))
        .unwrap();
        assert_eq!(block.validationtype.as_deref(), Some("stake"));
        assert_eq!(
            block.tx[0].vin[0].prevout(),
            Some(OutPoint {
                txid: "p1".into(),
                index: 2
            })
        );
        assert_eq!(block.tx[0].total_output(), 10 * COIN);
    }
}
