// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Statistics Aggregator
//!
//! Only `direct` events count towards an identity's totals. Indirect and unknown events stay in
//! the ledger but are invisible here until backfill re-attributes them.
//!
//! Ranking orders identities with at least one direct stake by
//! `(total_stakes desc, total_rewards desc, address asc)`; percentile is
//! `100 * (n - rank) / (n - 1)`, or 100 for a single ranked identity.

use crate::error::LedgerResult;
use crate::metrics::LedgerMetrics;
use crate::store::LedgerStore;
use crate::types::{Amount, Attribution, Identity, IdentityStatistics, StakeEvent};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::info;

const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_YEAR: f64 = 365.25 * SECONDS_PER_DAY as f64;

pub fn compute_statistics(
    identities: &[Identity],
    direct_events: &[StakeEvent],
    principals: &HashMap<String, Amount>,
) -> Vec<IdentityStatistics> {
    let mut times: HashMap<&str, Vec<i64>> = HashMap::new();
    let mut rewards: HashMap<&str, Amount> = HashMap::new();
    for event in direct_events
        .iter()
        .filter(|e| e.attribution == Attribution::Direct)
    {
        times
            .entry(event.identity_address.as_str())
            .or_default()
            .push(event.block_time);
        *rewards.entry(event.identity_address.as_str()).or_default() += event.amount;
    }

    let mut rows: Vec<IdentityStatistics> = identities
        .iter()
        .map(|identity| {
            let address = identity.address.as_str();
            let principal = principals.get(address).copied().unwrap_or(0);
            let mut stake_times = times.remove(address).unwrap_or_default();
            stake_times.sort_unstable();
            let total_rewards = rewards.get(address).copied().unwrap_or(0);
            let first = stake_times.first().copied();
            let last = stake_times.last().copied();
            let intervals: Vec<f64> = stake_times
                .windows(2)
                .map(|pair| (pair[1] - pair[0]) as f64)
                .collect();
            IdentityStatistics {
                address: identity.address.clone(),
                total_stakes: stake_times.len() as u64,
                total_rewards,
                first_stake_time: first,
                last_stake_time: last,
                mean_interval_secs: mean(&intervals),
                median_interval_secs: median(intervals),
                observed_principal: principal,
                apy_estimate: match (first, last) {
                    (Some(first), Some(last)) => apy_estimate(total_rewards, principal, last - first),
                    _ => None,
                },
                rank: None,
                percentile: None,
            }
        })
        .collect();

    rows.sort_by(ranking_order);
    let ranked = rows.iter().filter(|row| row.total_stakes > 0).count() as u64;
    for (position, row) in rows.iter_mut().filter(|row| row.total_stakes > 0).enumerate() {
        let rank = position as u64 + 1;
        row.rank = Some(rank);
        row.percentile = Some(percentile(rank, ranked));
    }
    rows
}

/// Ranked rows first in rank order, then the rest by address.
fn ranking_order(a: &IdentityStatistics, b: &IdentityStatistics) -> Ordering {
    b.total_stakes
        .cmp(&a.total_stakes)
        .then_with(|| b.total_rewards.cmp(&a.total_rewards))
        .then_with(|| a.address.cmp(&b.address))
}

fn percentile(rank: u64, ranked: u64) -> f64 {
    if ranked <= 1 {
        return 100.0;
    }
    100.0 * (ranked - rank) as f64 / (ranked - 1) as f64
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Rewards annualised over the observed staking span (at least one day), as a percentage of
/// the currently observed principal.
fn apy_estimate(total_rewards: Amount, principal: Amount, span_secs: i64) -> Option<f64> {
    if principal <= 0 {
        return None;
    }
    let years = span_secs.max(SECONDS_PER_DAY) as f64 / SECONDS_PER_YEAR;
    Some(total_rewards as f64 / years / principal as f64 * 100.0)
}

/// Recomputes every identity's row from the ledger and replaces the table in one transaction.
pub async fn rebuild_statistics(
    store: &dyn LedgerStore,
    metrics: &LedgerMetrics,
) -> LedgerResult<Vec<IdentityStatistics>> {
    let identities = store.identities().await?;
    let direct = store.stake_events(Some(Attribution::Direct), None).await?;
    let principals = store.unspent_balances().await?;

    let rows = compute_statistics(&identities, &direct, &principals);
    store.replace_statistics(&rows).await?;

    let ranked = rows.iter().filter(|row| row.rank.is_some()).count();
    metrics.statistics_rebuilds.inc();
    metrics.ranked_identities.set(ranked as i64);
    info!(
        "[Statistics] Rebuilt {} identity rows from {} direct events ({} ranked)",
        rows.len(),
        direct.len(),
        ranked
    );
    Ok(rows)
}
