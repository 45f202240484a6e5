use clap::ValueEnum;
use ethers::types::{Address, U256};
use futures_util::future::try_join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::time::sleep;

use crate::chain::{BalanceSource, BlockSource, EventSource};
use crate::config::CollectionConfig;
use crate::error::IndexError;
use crate::ledger::OwnershipLedger;
use crate::models::{CollectionKind, OwnershipSnapshot};
use crate::pagination::BlockWindows;
use crate::timestamps::BlockTimestamps;

/// What to do when a block window cannot be fetched.
///
/// `Strict` aborts the whole run (exact ownership required); `BestEffort`
/// logs the window and carries on with what arrived. The choice belongs to
/// the caller, never to the fetch code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchPolicy {
    Strict,
    BestEffort,
}

/// Block range and pacing shared by every paginated scan in a run.
#[derive(Debug, Clone, Copy)]
pub struct RangeSettings {
    pub from_block: u64,
    pub to_block: u64,
    pub window_size: u64,
    pub delay_ms: u64,
}

impl RangeSettings {
    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Replay one collection's transfer history into an ownership snapshot.
///
/// Windows are walked in ascending order with a fixed inter-window delay
/// (provider courtesy, not correctness). Within the run, events are
/// de-duplicated by `(block, log_index, token_id)` so that refetched or
/// boundary-straddling observations cannot move an acquisition timestamp.
pub async fn replay_collection<C>(
    chain: &C,
    collection: &CollectionConfig,
    range: RangeSettings,
    policy: FetchPolicy,
) -> Result<OwnershipSnapshot, IndexError>
where
    C: EventSource + BlockSource,
{
    let mut ledger = OwnershipLedger::new(collection.kind);
    let mut timestamps = BlockTimestamps::new(chain);
    let mut seen: HashSet<(u64, u64, U256)> = HashSet::new();
    let mut first_window = true;

    for (start, end) in BlockWindows::new(range.from_block, range.to_block, range.window_size) {
        if !first_window {
            sleep(range.delay()).await;
        }
        first_window = false;

        let events = match chain.transfer_events(collection, start, end).await {
            Ok(events) => events,
            Err(err) => {
                let window_err = IndexError::TransientWindow {
                    collection: collection.kind,
                    from: start,
                    to: end,
                    reason: err.to_string(),
                };
                match policy {
                    FetchPolicy::Strict => return Err(window_err.into_fatal()),
                    FetchPolicy::BestEffort => {
                        log::warn!("{window_err}; skipping window");
                        continue;
                    }
                }
            }
        };

        log::debug!(
            "{}: {} events in blocks {start}-{end}",
            collection.kind,
            events.len()
        );

        // The source contract guarantees ascending order inside a window and
        // windows arrive in ascending order, so application order is the
        // event total order by construction.
        for event in events {
            if !seen.insert(event.dedup_key()) {
                continue;
            }
            let acquired_at = timestamps.resolve(event.block_number).await?;
            ledger.apply(&event, acquired_at);
        }
    }

    let snapshot = ledger.finalize();
    log::info!(
        "{}: replay complete, {} wallets hold items ({} block timestamps resolved)",
        collection.kind,
        snapshot.wallet_count(),
        timestamps.cached_blocks()
    );
    Ok(snapshot)
}

/// Replay all collections concurrently. Each collection owns an independent
/// ledger; nothing mutable is shared across the joined futures.
pub async fn run_replay<C>(
    chain: &C,
    catalogue: &[CollectionConfig],
    range: RangeSettings,
    policy: FetchPolicy,
) -> Result<HashMap<CollectionKind, OwnershipSnapshot>, IndexError>
where
    C: EventSource + BlockSource,
{
    let snapshots = try_join_all(
        catalogue
            .iter()
            .map(|collection| replay_collection(chain, collection, range, policy)),
    )
    .await?;
    Ok(snapshots
        .into_iter()
        .map(|snapshot| (snapshot.collection, snapshot))
        .collect())
}

/// Every distinct recipient ever observed in any collection's transfer
/// events: the candidate universe for the balance sweep. Always best-effort;
/// the sweep exists precisely because the event history may be unreliable.
pub async fn candidate_wallets<C>(
    chain: &C,
    catalogue: &[CollectionConfig],
    range: RangeSettings,
) -> Result<Vec<Address>, IndexError>
where
    C: EventSource,
{
    let mut universe: BTreeSet<Address> = BTreeSet::new();
    for collection in catalogue {
        let mut first_window = true;
        for (start, end) in BlockWindows::new(range.from_block, range.to_block, range.window_size)
        {
            if !first_window {
                sleep(range.delay()).await;
            }
            first_window = false;

            match chain.transfer_events(collection, start, end).await {
                Ok(events) => {
                    universe.extend(
                        events
                            .iter()
                            .filter(|e| !e.is_burn())
                            .map(|e| e.to),
                    );
                }
                Err(err) => {
                    let window_err = IndexError::TransientWindow {
                        collection: collection.kind,
                        from: start,
                        to: end,
                        reason: err.to_string(),
                    };
                    log::warn!("{window_err}; candidate scan continues");
                }
            }
        }
    }
    Ok(universe.into_iter().collect())
}

/// Current holdings for one collection without event replay: one batched
/// balance query per token id across the whole candidate universe. Cannot
/// recover acquisition timestamps; trades that fidelity for robustness.
pub async fn sweep_collection<C>(
    chain: &C,
    collection: &CollectionConfig,
    universe: &[Address],
    delay_ms: u64,
) -> Result<OwnershipSnapshot, IndexError>
where
    C: BalanceSource,
{
    let mut ledger = OwnershipLedger::new(collection.kind);
    if universe.is_empty() {
        return Ok(ledger.finalize());
    }

    for raw_id in 0..collection.token_count {
        if raw_id > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        let token_id = U256::from(raw_id);
        let token_ids = vec![token_id; universe.len()];
        let balances = chain
            .balance_of_batch(collection, universe, &token_ids)
            .await
            .map_err(|err| IndexError::SweepFetch {
                collection: collection.kind,
                token_id: raw_id,
                reason: err.to_string(),
            })?;

        for (wallet, balance) in universe.iter().zip(balances) {
            if !balance.is_zero() {
                ledger.observe_balance(*wallet, token_id);
            }
        }
    }

    Ok(ledger.finalize())
}

/// Sweep all collections against a shared candidate universe.
pub async fn run_sweep<C>(
    chain: &C,
    catalogue: &[CollectionConfig],
    universe: &[Address],
    delay_ms: u64,
) -> Result<HashMap<CollectionKind, OwnershipSnapshot>, IndexError>
where
    C: BalanceSource,
{
    let snapshots = try_join_all(
        catalogue
            .iter()
            .map(|collection| sweep_collection(chain, collection, universe, delay_ms)),
    )
    .await?;
    Ok(snapshots
        .into_iter()
        .map(|snapshot| (snapshot.collection, snapshot))
        .collect())
}
