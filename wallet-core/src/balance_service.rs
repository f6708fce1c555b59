//! Balance Service (spec §4.6): bounded-concurrency fan-out over the
//! refresh policy, backed by an [`AccountChainProvider`] for native and
//! token balances.
//!
//! Grounded on this codebase's `sync_service.rs` (bounded concurrent
//! fan-out over addresses with an overall deadline, partial-failure
//! collection into a stats struct) generalized from its fixed worker
//! count to a `Semaphore`-bounded `buffer_unordered` pool per spec §6,
//! and using `tokio::time::timeout` for both the per-fetch and batch
//! deadlines rather than the teacher's manual elapsed-time polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::balance_cache::{BalanceCache, BalanceCacheEntry, CacheKey};
use crate::chain::ChainId;
use crate::config::WalletConfig;
use crate::error::FetchError;
use crate::provider::AccountChainProvider;
use crate::refresh_policy::{self, RefreshDecision};
use crate::utxo_store::AddressMetadata;

/// One (chain, address, token) unit of work for a refresh batch.
#[derive(Debug, Clone)]
pub struct BalanceQuery {
    pub chain: ChainId,
    pub address: String,
    /// Empty for native balance, an ERC-20 contract address otherwise.
    pub token: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct BalanceResult {
    pub chain: ChainId,
    pub address: String,
    pub token: String,
    pub balance: Option<String>,
    pub from_cache: bool,
    /// True when `balance` came from (or fell back to) a cache entry
    /// older than `config.default_staleness_secs` (spec §4.6 step 5).
    pub stale: bool,
    pub error: Option<FetchError>,
}

fn sort_key(r: &BalanceResult) -> (String, String, String) {
    (r.chain.as_str().to_string(), r.address.clone(), r.token.clone())
}

fn is_stale(cache: &BalanceCache, key: &CacheKey, config: &WalletConfig) -> bool {
    cache
        .get(key)
        .map(|e| e.age_secs(chrono::Utc::now()) > config.default_staleness_secs)
        .unwrap_or(false)
}

/// refresh-batch: partitions `queries` into cache-hit and
/// refresh-required sets per the refresh policy, fans the latter out
/// with bounded concurrency, and returns one [`BalanceResult`] per
/// query in canonical `(chain, address, token)` order.
///
/// The batch deadline bounds total wall-clock time but never discards
/// work that already finished: every query still in flight when the
/// deadline elapses gets a `DeadlineExceeded` result falling back to
/// its stale cache entry, rather than vanishing from the output (spec
/// §4.6/§5: partial results are returned, not discarded).
pub async fn refresh_batch(
    config: &WalletConfig,
    cache: &mut BalanceCache,
    metadata_lookup: impl Fn(ChainId, &str) -> Option<AddressMetadata>,
    provider: Arc<dyn AccountChainProvider>,
    queries: Vec<BalanceQuery>,
) -> Vec<BalanceResult> {
    let started_at = tokio::time::Instant::now();
    let mut results = Vec::with_capacity(queries.len());
    let mut to_fetch = Vec::new();
    let mut cache_hits = 0usize;

    for query in queries {
        let meta = metadata_lookup(query.chain, &query.address);
        let decision = refresh_policy::decide(config, query.chain, &query.address, cache, meta.as_ref());
        match decision {
            RefreshDecision::CacheOk => {
                let key = CacheKey {
                    chain: query.chain,
                    address: query.address.clone(),
                    token: query.token.clone(),
                };
                let balance = cache.get(&key).map(|e| e.balance.clone());
                let stale = is_stale(cache, &key, config);
                cache_hits += 1;
                results.push(BalanceResult {
                    chain: query.chain,
                    address: query.address,
                    token: query.token,
                    balance,
                    from_cache: true,
                    stale,
                    error: None,
                });
            }
            RefreshDecision::RefreshRequired => to_fetch.push(query),
        }
    }

    let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
    let batch_deadline = Duration::from_secs(config.batch_deadline_secs);
    let max_concurrent = config.max_concurrent;

    let mut pending: HashMap<usize, BalanceQuery> =
        to_fetch.iter().cloned().enumerate().collect();
    let mut stream = stream::iter(to_fetch.into_iter().enumerate().map(|(idx, query)| {
        let provider = provider.clone();
        async move {
            let outcome = tokio::time::timeout(fetch_timeout, fetch_one(provider, &query))
                .await
                .unwrap_or(Err(FetchError::DeadlineExceeded));
            (idx, query, outcome)
        }
    }))
    .buffer_unordered(max_concurrent);

    let deadline = tokio::time::Instant::now() + batch_deadline;
    let mut refreshed = 0usize;
    let mut errors = 0usize;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some((idx, query, outcome))) => {
                pending.remove(&idx);
                let key = CacheKey {
                    chain: query.chain,
                    address: query.address.clone(),
                    token: query.token.clone(),
                };
                match outcome {
                    Ok(balance) => {
                        refreshed += 1;
                        cache.set(BalanceCacheEntry {
                            chain: query.chain,
                            address: query.address.clone(),
                            token: query.token.clone(),
                            balance: balance.clone(),
                            unconfirmed_delta: None,
                            symbol: query.symbol.clone(),
                            decimals: query.decimals,
                            updated_at: chrono::Utc::now(),
                        });
                        results.push(BalanceResult {
                            chain: query.chain,
                            address: query.address,
                            token: query.token,
                            balance: Some(balance),
                            from_cache: false,
                            stale: false,
                            error: None,
                        });
                    }
                    Err(e) => {
                        errors += 1;
                        let stale_balance = cache.get(&key).map(|entry| entry.balance.clone());
                        let stale = is_stale(cache, &key, config);
                        results.push(BalanceResult {
                            chain: query.chain,
                            address: query.address,
                            token: query.token,
                            balance: stale_balance,
                            from_cache: true,
                            stale,
                            error: Some(e),
                        });
                    }
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }

    // Anything still pending when the batch deadline fires never got a
    // chance to run (or finish); it still gets a result, not silence.
    for (_, query) in pending {
        errors += 1;
        let key = CacheKey {
            chain: query.chain,
            address: query.address.clone(),
            token: query.token.clone(),
        };
        let stale_balance = cache.get(&key).map(|entry| entry.balance.clone());
        let stale = is_stale(cache, &key, config);
        results.push(BalanceResult {
            chain: query.chain,
            address: query.address,
            token: query.token,
            balance: stale_balance,
            from_cache: true,
            stale,
            error: Some(FetchError::DeadlineExceeded),
        });
    }

    results.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    tracing::info!(
        refreshed,
        cache_hits,
        errors,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "balance service batch complete"
    );
    results
}

/// Asynchronous mode (spec §4.6): runs a refresh batch detached from
/// the caller on its own `tokio` task with its own deadline, for
/// callers (e.g. a terminal UI) that render the cached view immediately
/// and want the refresh to land in the background. The cache is owned
/// by the task for its duration and handed back on completion so the
/// caller can persist it.
pub fn spawn_detached_refresh(
    config: WalletConfig,
    mut cache: BalanceCache,
    metadata_lookup: impl Fn(ChainId, &str) -> Option<AddressMetadata> + Send + 'static,
    provider: Arc<dyn AccountChainProvider>,
    queries: Vec<BalanceQuery>,
) -> tokio::task::JoinHandle<(BalanceCache, Vec<BalanceResult>)> {
    tokio::spawn(async move {
        let started_at = tokio::time::Instant::now();
        let results = refresh_batch(&config, &mut cache, metadata_lookup, provider, queries).await;
        tracing::info!(
            count = results.len(),
            errors = results.iter().filter(|r| r.error.is_some()).count(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "background async refresh task completion"
        );
        (cache, results)
    })
}

async fn fetch_one(
    provider: Arc<dyn AccountChainProvider>,
    query: &BalanceQuery,
) -> Result<String, FetchError> {
    if query.token.is_empty() {
        let balance = provider.get_native_balance(&query.address).await?;
        Ok(crate::amount::format_amount(balance.amount, balance.decimals))
    } else {
        let balance = provider
            .get_token_balance(&query.address, &query.token)
            .await?;
        Ok(crate::amount::format_amount(balance.amount, balance.decimals))
    }
}
