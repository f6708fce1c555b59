//! UTXO Service (spec §4.7): refreshes the UTXO Store for one or more
//! addresses against a [`UtxoChainProvider`], sequentially per address
//! (the spec frames this component without the Balance Service's
//! concurrent fan-out).
//!
//! Grounded on this codebase's `utxo_manager.rs::refresh_utxos` loop
//! (per-address scan, error collection without aborting the batch),
//! adapted to call into [`UtxoStore::reconcile`] and to surface each
//! address's outcome instead of panicking on the first failure.

use crate::chain::ChainId;
use crate::error::FetchError;
use crate::provider::UtxoChainProvider;
use crate::utxo_store::{ReconcileStats, UtxoStore};

#[derive(Debug)]
pub struct AddressRefreshOutcome {
    pub address: String,
    pub stats: Option<ReconcileStats>,
    pub error: Option<FetchError>,
}

/// Aggregate shape for [`refresh`] (spec §4.7): folds every address's
/// [`AddressRefreshOutcome`] into the single summary a caller actually
/// wants to show.
#[derive(Debug)]
pub struct RefreshSummary {
    pub addresses_scanned: usize,
    pub utxos_found: usize,
    pub total_balance: u64,
    pub errors: Vec<FetchError>,
}

/// refresh-addresses: scans each address in turn, reconciles it into
/// `store`, and updates its `last_scanned`/`has_activity` metadata.
/// One address's failure does not stop the remaining addresses.
pub async fn refresh_addresses(
    store: &mut UtxoStore,
    chain: ChainId,
    provider: &dyn UtxoChainProvider,
    addresses: &[String],
) -> Vec<AddressRefreshOutcome> {
    let mut outcomes = Vec::with_capacity(addresses.len());
    for address in addresses {
        match provider.list_utxos(address).await {
            Ok(remote) => {
                let stats = store.reconcile(chain, address, &remote);
                let has_inbound = remote.iter().any(|u| u.address == *address);
                store.touch_scanned(chain, address, has_inbound);
                outcomes.push(AddressRefreshOutcome {
                    address: address.clone(),
                    stats: Some(stats),
                    error: None,
                });
            }
            Err(e) => {
                outcomes.push(AddressRefreshOutcome {
                    address: address.clone(),
                    stats: None,
                    error: Some(e),
                });
            }
        }
    }
    outcomes
}

/// refresh: spec §4.7's public entry point. Runs [`refresh_addresses`]
/// then folds the per-address outcomes into the `{addresses_scanned,
/// utxos_found, total_balance, errors[]}` shape the spec names.
pub async fn refresh(
    store: &mut UtxoStore,
    chain: ChainId,
    provider: &dyn UtxoChainProvider,
    addresses: &[String],
) -> RefreshSummary {
    let outcomes = refresh_addresses(store, chain, provider, addresses).await;

    let addresses_scanned = outcomes.len();
    let errors: Vec<FetchError> = outcomes.iter().filter_map(|o| o.error.clone()).collect();
    let utxos_found = store.get_utxos(chain, None).len();
    let total_balance = store.get_balance(chain);

    tracing::info!(
        addresses_scanned,
        utxos_found,
        total_balance,
        errors = errors.len(),
        "utxo store reconcile summary"
    );

    RefreshSummary {
        addresses_scanned,
        utxos_found,
        total_balance,
        errors,
    }
}
