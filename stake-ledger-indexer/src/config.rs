// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Indexer configuration, loaded from YAML with `${VAR}` environment substitution.

use anyhow::{anyhow, bail, Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use stake_ledger::rpc::RpcClientConfig;
use stake_ledger::scanner::ScanConfig;
use stake_ledger::utxo::UtxoConfig;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub rpc: RpcClientConfig,
    /// Identities to track. Registered (or refreshed) at startup.
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub utxo: UtxoConfig,
    /// Pause between two scan → reconcile → statistics cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Minimum time between two gap and attribution backfill passes
    #[serde(default = "default_backfill_interval_secs")]
    pub backfill_interval_secs: u64,
    /// Gaps and unknown events handled per backfill pass
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub address: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_backfill_interval_secs() -> u64 {
    600
}

fn default_backfill_batch() -> usize {
    100
}

impl IndexerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read indexer config file: {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let contents = substitute_env_vars(contents)?;
        let config: IndexerConfig =
            serde_yaml::from_str(&contents).context("Failed to parse indexer config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.rpc.url)
            .with_context(|| format!("Invalid rpc.url '{}'", self.rpc.url))?;
        self.scan.validate()?;
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be positive");
        }
        if self.backfill_batch == 0 {
            bail!("backfill_batch must be positive");
        }

        let mut seen = HashSet::new();
        for entry in &self.identities {
            if entry.address.trim().is_empty() {
                bail!("identity address must not be empty");
            }
            if !seen.insert(entry.address.as_str()) {
                return Err(anyhow!("identity {} is listed twice", entry.address));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backfill_interval(&self) -> Duration {
        Duration::from_secs(self.backfill_interval_secs)
    }

    /// First-seen height given to identities whose history the daemon cannot report
    pub fn fallback_first_seen_height(&self) -> u64 {
        self.scan.start_height.unwrap_or(0)
    }
}

/// Replaces `${VAR_NAME}` with the variable's value. Unset variables keep their placeholder.
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    let result = re.replace_all(content, |caps: &Captures| match std::env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            warn!(
                "[Config] Environment variable {} not found, keeping placeholder",
                &caps[1]
            );
            caps[0].to_string()
        }
    });
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const MINIMAL: &str = "rpc:\n  url: http://127.0.0.1:27486\n";

    #[test]
    #[serial]
    fn test_substitute_env_vars() {
        std::env::set_var("LEDGER_TEST_RPC_USER", "verus");
        std::env::remove_var("LEDGER_TEST_MISSING");

        let input = "user: ${LEDGER_TEST_RPC_USER}\nagain: ${LEDGER_TEST_RPC_USER}\n\
                     password: ${LEDGER_TEST_MISSING}\nbroken: ${LEDGER_TEST_RPC_USER";
        let result = substitute_env_vars(input).unwrap();

        assert_eq!(
            result,
            "user: verus\nagain: verus\npassword: ${LEDGER_TEST_MISSING}\nbroken: ${LEDGER_TEST_RPC_USER"
        );
        std::env::remove_var("LEDGER_TEST_RPC_USER");
    }

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = IndexerConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.backfill_interval(), Duration::from_secs(600));
        assert_eq!(config.scan, ScanConfig::default());
        assert_eq!(config.utxo.maturity_window, 150);
        assert!(config.identities.is_empty());
        assert_eq!(config.fallback_first_seen_height(), 0);
    }

    #[test]
    #[serial]
    fn test_full_config_from_file() {
        std::env::set_var("LEDGER_TEST_RPC_PASSWORD", "s3cret");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
rpc:
  url: http://127.0.0.1:27486
  user: verus
  password: ${{LEDGER_TEST_RPC_PASSWORD}}
  max_in_flight: 4
identities:
  - address: RAlice
    display_name: alice@
  - address: RBob
scan:
  scan_id: mainnet
  start_height: 800000
  workers: 4
  finality_depth: 10
  coinstake_position: second
utxo:
  maturity_window: 100
poll_interval_secs: 30
"#
        )
        .unwrap();

        let config = IndexerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rpc.password.as_deref(), Some("s3cret"));
        assert_eq!(config.rpc.max_in_flight, 4);
        assert_eq!(config.identities.len(), 2);
        assert_eq!(config.identities[0].display_name.as_deref(), Some("alice@"));
        assert_eq!(config.identities[1].display_name, None);
        assert_eq!(config.scan.scan_id, "mainnet");
        assert_eq!(config.scan.workers, 4);
        assert_eq!(config.scan.finality_depth, 10);
        assert_eq!(config.utxo.maturity_window, 100);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.fallback_first_seen_height(), 800_000);
        std::env::remove_var("LEDGER_TEST_RPC_PASSWORD");
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let cases = [
            "rpc:\n  url: not a url\n",
            "rpc:\n  url: http://127.0.0.1:27486\nscan:\n  workers: 1\n",
            "rpc:\n  url: http://127.0.0.1:27486\npoll_interval_secs: 0\n",
            "rpc:\n  url: http://127.0.0.1:27486\nidentities:\n  - address: RA\n  - address: RA\n",
            "rpc:\n  url: http://127.0.0.1:27486\nidentities:\n  - address: ' '\n",
        ];
        for yaml in cases {
            assert!(IndexerConfig::from_yaml(yaml).is_err(), "accepted: {yaml}");
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = IndexerConfig::from_file(Path::new("/nonexistent/indexer.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/indexer.yaml"));
    }
}
