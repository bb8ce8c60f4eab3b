// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::LedgerResult;
use crate::rpc::ChainSource;
use crate::store::LedgerStore;
use crate::types::Identity;
use std::sync::Arc;
use tracing::{info, warn};

/// Registers tracked identities, seeding their first-seen height from the chain.
pub struct IdentityRegistry {
    source: Arc<dyn ChainSource>,
    store: Arc<dyn LedgerStore>,
    fallback_first_seen: u64,
}

impl IdentityRegistry {
    /// `fallback_first_seen` is used when the daemon cannot report an identity's history.
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn LedgerStore>,
        fallback_first_seen: u64,
    ) -> Self {
        Self {
            source,
            store,
            fallback_first_seen,
        }
    }

    /// Upserts the identity. The display name is refreshed; the first-seen height is kept at
    /// the lowest value ever observed.
    pub async fn register_identity(
        &self,
        address: &str,
        display_name: Option<&str>,
    ) -> LedgerResult<Identity> {
        let (history_name, first_seen_height) = match self.source.identity_history(address).await
        {
            Ok(history) => (
                history.name,
                history.first_seen_height.unwrap_or(self.fallback_first_seen),
            ),
            Err(e) if e.is_block_local() => {
                warn!(
                    "[Registry] No history for {}, using height {}: {:?}",
                    address, self.fallback_first_seen, e
                );
                (None, self.fallback_first_seen)
            }
            Err(e) => return Err(e),
        };

        let identity = Identity {
            address: address.to_string(),
            display_name: display_name
                .map(str::to_string)
                .or(history_name)
                .unwrap_or_else(|| address.to_string()),
            first_seen_height,
        };
        self.store.upsert_identity(&identity).await?;
        info!(
            "[Registry] Registered {} ({}) first seen at {}",
            identity.address, identity.display_name, identity.first_seen_height
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::rpc::mock::MockChainSource;
    use crate::store::MemoryLedgerStore;
    use crate::types::IdentityHistory;

    fn registry(chain: &Arc<MockChainSource>, store: &Arc<MemoryLedgerStore>) -> IdentityRegistry {
        IdentityRegistry::new(chain.clone(), store.clone(), 1_000)
    }

    #[tokio::test]
    async fn test_history_seeds_first_seen_and_name() {
        let chain = Arc::new(MockChainSource::new());
        let store = Arc::new(MemoryLedgerStore::new());
        chain.set_identity_history(
            "iAlice",
            IdentityHistory {
                name: Some("alice.VRSC@".into()),
                first_seen_height: Some(420),
            },
        );

        let identity = registry(&chain, &store)
            .register_identity("iAlice", None)
            .await
            .unwrap();
        assert_eq!(identity.first_seen_height, 420);
        assert_eq!(identity.display_name, "alice.VRSC@");
        assert_eq!(store.identities().await.unwrap(), vec![identity]);
    }

    #[tokio::test]
    async fn test_unknown_identity_falls_back_to_configured_height() {
        let chain = Arc::new(MockChainSource::new());
        let store = Arc::new(MemoryLedgerStore::new());

        let identity = registry(&chain, &store)
            .register_identity("RPlain", Some("plain"))
            .await
            .unwrap();
        assert_eq!(identity.first_seen_height, 1_000);
        assert_eq!(identity.display_name, "plain");
    }

    #[tokio::test]
    async fn test_reregistration_keeps_earliest_height() {
        let chain = Arc::new(MockChainSource::new());
        let store = Arc::new(MemoryLedgerStore::new());
        chain.set_identity_history(
            "iAlice",
            IdentityHistory {
                name: None,
                first_seen_height: Some(420),
            },
        );
        let registry = registry(&chain, &store);
        registry.register_identity("iAlice", Some("a")).await.unwrap();

        chain.set_identity_history(
            "iAlice",
            IdentityHistory {
                name: None,
                first_seen_height: Some(9_000),
            },
        );
        registry.register_identity("iAlice", Some("b")).await.unwrap();

        let stored = store.identities().await.unwrap();
        assert_eq!(stored[0].first_seen_height, 420);
        assert_eq!(stored[0].display_name, "b");
    }

    #[tokio::test]
    async fn test_non_chain_errors_propagate() {
        struct Broken;

        #[async_trait::async_trait]
        impl ChainSource for Broken {
            async fn block_count(&self) -> LedgerResult<u64> {
                Ok(0)
            }
            async fn block_hash(&self, _: u64) -> LedgerResult<String> {
                unimplemented!()
            }
            async fn block(&self, _: &str, _: bool) -> LedgerResult<crate::types::RawBlock> {
                unimplemented!()
            }
            async fn address_utxos(
                &self,
                _: &[String],
            ) -> LedgerResult<Vec<crate::types::AddressUtxo>> {
                unimplemented!()
            }
            async fn raw_transaction(&self, _: &str) -> LedgerResult<crate::types::RawTransaction> {
                unimplemented!()
            }
            async fn identity_history(&self, _: &str) -> LedgerResult<IdentityHistory> {
                Err(LedgerError::Config("bad credentials".into()))
            }
        }

        let registry = IdentityRegistry::new(
            Arc::new(Broken),
            Arc::new(MemoryLedgerStore::new()),
            0,
        );
        let err = registry.register_identity("iAlice", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }
}
