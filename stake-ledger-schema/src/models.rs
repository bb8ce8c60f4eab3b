// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row types. Timestamp bookkeeping columns are filled by column defaults and never selected.

use crate::schema::{
    identities, identity_statistics, scan_checkpoints, scan_enrollments, scan_gaps, stake_events,
    utxos,
};
use diesel::{Insertable, Queryable, Selectable};
use serde::Serialize;

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = identities, check_for_backend(diesel::pg::Pg))]
pub struct Identity {
    pub address: String,
    pub display_name: String,
    pub first_seen_height: i64,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = stake_events, check_for_backend(diesel::pg::Pg))]
pub struct StakeEvent {
    pub identity_address: String,
    pub txid: String,
    pub output_index: i32,
    pub block_height: i64,
    pub block_hash: String,
    pub block_time: i64,
    pub amount: i64,
    /// One of `direct`, `indirect`, `unknown`
    pub attribution: String,
    pub source_address: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = utxos, check_for_backend(diesel::pg::Pg))]
pub struct Utxo {
    pub address: String,
    pub txid: String,
    pub output_index: i32,
    pub value: i64,
    pub creation_height: i64,
    pub creation_time: i64,
    pub is_spent: bool,
    pub is_eligible: bool,
    pub spent_txid: Option<String>,
    pub spent_height: Option<i64>,
    pub spent_time: Option<i64>,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = scan_checkpoints, check_for_backend(diesel::pg::Pg))]
pub struct ScanCheckpoint {
    pub scan_id: String,
    pub last_height: i64,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = scan_enrollments, check_for_backend(diesel::pg::Pg))]
pub struct ScanEnrollment {
    pub scan_id: String,
    pub address: String,
    pub covered_from: i64,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = scan_gaps, check_for_backend(diesel::pg::Pg))]
pub struct ScanGap {
    pub scan_id: String,
    pub height: i64,
    pub reason: String,
    pub attempts: i32,
    pub resolved: bool,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = identity_statistics, check_for_backend(diesel::pg::Pg))]
pub struct IdentityStatistics {
    pub address: String,
    pub total_stakes: i64,
    pub total_rewards: i64,
    pub first_stake_time: Option<i64>,
    pub last_stake_time: Option<i64>,
    pub mean_interval_secs: Option<f64>,
    pub median_interval_secs: Option<f64>,
    pub observed_principal: i64,
    pub apy_estimate: Option<f64>,
    pub rank: Option<i64>,
    pub percentile: Option<f64>,
}
