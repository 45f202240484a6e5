use ethers::types::{Address, U256};
use std::collections::{BTreeMap, HashMap};

use crate::models::{CollectionKind, Holding, OwnershipSnapshot, TransferEvent};

/// Single-writer aggregator that folds a collection's transfer events (or
/// sweep observations) into per-wallet holdings with first-acquisition
/// timestamps.
///
/// Events must be applied in ascending `(block_number, log_index)` order;
/// the fetch path guarantees that by construction. The ledger itself never
/// errors: events referencing tokens it has never seen minted are taken at
/// face value, and contradictory observations are absorbed by [`collapse`].
///
/// [`collapse`]: OwnershipLedger::collapse
pub struct OwnershipLedger {
    collection: CollectionKind,
    wallets: HashMap<Address, Vec<Holding>>,
}

impl OwnershipLedger {
    pub fn new(collection: CollectionKind) -> Self {
        OwnershipLedger {
            collection,
            wallets: HashMap::new(),
        }
    }

    /// Fold one transfer event into the ledger. `acquired_at` is the
    /// timestamp of the event's block, resolved by the caller.
    ///
    /// Recipient side first: a burn credits nobody, and a wallet that
    /// re-receives a token id it already holds keeps its original
    /// `acquired_at` (first-seen wins while held continuously). Sender side:
    /// any non-mint removes the sender's holding for that token id, except
    /// that a self-transfer leaves the episode intact.
    pub fn apply(&mut self, event: &TransferEvent, acquired_at: i64) {
        debug_assert_eq!(event.collection, self.collection);

        if !event.is_burn() {
            self.insert_first_seen(
                event.to,
                Holding {
                    token_id: event.token_id,
                    acquired_at: Some(acquired_at),
                },
            );
        }

        if !event.is_mint() && event.from != event.to {
            if let Some(held) = self.wallets.get_mut(&event.from) {
                held.retain(|h| h.token_id != event.token_id);
                if held.is_empty() {
                    // Memory hygiene only; presence of empty wallets is not
                    // an observable state.
                    self.wallets.remove(&event.from);
                }
            }
        }
    }

    /// Record a positive balance seen by the sweep fallback. Sweep holdings
    /// carry no timestamp, and retried sweeps may observe the same pair
    /// twice; duplicates are collapsed in the post-processing pass.
    pub fn observe_balance(&mut self, wallet: Address, token_id: U256) {
        self.wallets.entry(wallet).or_default().push(Holding {
            token_id,
            acquired_at: None,
        });
    }

    fn insert_first_seen(&mut self, wallet: Address, holding: Holding) {
        let held = self.wallets.entry(wallet).or_default();
        if !held.iter().any(|h| h.token_id == holding.token_id) {
            held.push(holding);
        }
    }

    /// Idempotent post-processing: per wallet, merge holdings that share a
    /// token id into one carrying the minimum non-null `acquired_at`, and
    /// drop wallets left with nothing. Guards against duplicate observations
    /// from fetch retries and overlapping windows.
    pub fn collapse(&mut self) {
        for held in self.wallets.values_mut() {
            let mut merged: BTreeMap<U256, Option<i64>> = BTreeMap::new();
            for holding in held.drain(..) {
                merged
                    .entry(holding.token_id)
                    .and_modify(|ts| {
                        *ts = match (*ts, holding.acquired_at) {
                            (Some(a), Some(b)) => Some(a.min(b)),
                            (Some(a), None) | (None, Some(a)) => Some(a),
                            (None, None) => None,
                        }
                    })
                    .or_insert(holding.acquired_at);
            }
            held.extend(merged.into_iter().map(|(token_id, acquired_at)| Holding {
                token_id,
                acquired_at,
            }));
        }
        self.wallets.retain(|_, held| !held.is_empty());
    }

    /// Collapse and seal the ledger into its terminal snapshot.
    pub fn finalize(mut self) -> OwnershipSnapshot {
        self.collapse();
        OwnershipSnapshot::new(self.collection, self.wallets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn event(from: Address, to: Address, token: u64, block: u64, log_index: u64) -> TransferEvent {
        TransferEvent {
            collection: CollectionKind::Pets,
            token_id: U256::from(token),
            from,
            to,
            block_number: block,
            log_index,
            quantity: U256::one(),
        }
    }

    fn mint(to: Address, token: u64, block: u64) -> TransferEvent {
        event(Address::zero(), to, token, block, 0)
    }

    fn holdings(snapshot: &OwnershipSnapshot, wallet: Address) -> Vec<Holding> {
        snapshot
            .holdings(&wallet)
            .map(|h| h.to_vec())
            .unwrap_or_default()
    }

    #[test]
    fn test_mint_only_history_credits_each_recipient() {
        let mut ledger = OwnershipLedger::new(CollectionKind::Pets);
        ledger.apply(&mint(addr(1), 0, 10), 1_000);
        ledger.apply(&mint(addr(1), 1, 11), 1_100);
        ledger.apply(&mint(addr(2), 0, 12), 1_200);

        let snapshot = ledger.finalize();
        assert_eq!(
            holdings(&snapshot, addr(1)),
            vec![
                Holding { token_id: U256::from(0u64), acquired_at: Some(1_000) },
                Holding { token_id: U256::from(1u64), acquired_at: Some(1_100) },
            ]
        );
        assert_eq!(
            holdings(&snapshot, addr(2)),
            vec![Holding { token_id: U256::from(0u64), acquired_at: Some(1_200) }]
        );
    }

    #[test]
    fn test_transfer_moves_holding_and_restamps_acquisition() {
        // Mint token 3 to X at ts 1000, transfer X -> Y at ts 1200.
        let mut ledger = OwnershipLedger::new(CollectionKind::Pets);
        ledger.apply(&mint(addr(10), 3, 10), 1_000);
        ledger.apply(&event(addr(10), addr(20), 3, 12, 0), 1_200);

        let snapshot = ledger.finalize();
        assert!(snapshot.holdings(&addr(10)).is_none());
        assert_eq!(
            holdings(&snapshot, addr(20)),
            vec![Holding { token_id: U256::from(3u64), acquired_at: Some(1_200) }]
        );
    }

    #[test]
    fn test_burn_removes_holding_without_crediting_anyone() {
        let mut ledger = OwnershipLedger::new(CollectionKind::Pets);
        ledger.apply(&mint(addr(1), 7, 10), 1_000);
        ledger.apply(&event(addr(1), Address::zero(), 7, 11, 0), 1_100);

        let snapshot = ledger.finalize();
        assert_eq!(snapshot.wallet_count(), 0);
    }

    #[test]
    fn test_re_receipt_keeps_original_timestamp_while_held() {
        // Partial transfers of the same id arrive as separate events; the
        // recipient's acquired_at must stay at the first one.
        let mut ledger = OwnershipLedger::new(CollectionKind::Pets);
        ledger.apply(&mint(addr(1), 4, 10), 1_000);
        ledger.apply(&mint(addr(1), 4, 15), 1_500);

        let snapshot = ledger.finalize();
        assert_eq!(
            holdings(&snapshot, addr(1)),
            vec![Holding { token_id: U256::from(4u64), acquired_at: Some(1_000) }]
        );
    }

    #[test]
    fn test_out_and_back_in_restarts_the_episode() {
        let mut ledger = OwnershipLedger::new(CollectionKind::Pets);
        ledger.apply(&mint(addr(1), 4, 10), 1_000);
        ledger.apply(&event(addr(1), addr(2), 4, 11, 0), 1_100);
        ledger.apply(&event(addr(2), addr(1), 4, 12, 0), 1_200);

        let snapshot = ledger.finalize();
        // The active episode began at 1200; the pre-transfer 1000 is gone.
        assert_eq!(
            holdings(&snapshot, addr(1)),
            vec![Holding { token_id: U256::from(4u64), acquired_at: Some(1_200) }]
        );
        assert!(snapshot.holdings(&addr(2)).is_none());
    }

    #[test]
    fn test_duplicate_application_is_idempotent() {
        let mut once = OwnershipLedger::new(CollectionKind::Pets);
        once.apply(&mint(addr(1), 2, 10), 1_000);
        once.apply(&event(addr(1), addr(2), 2, 12, 0), 1_200);

        let mut twice = OwnershipLedger::new(CollectionKind::Pets);
        for ev in [
            mint(addr(1), 2, 10),
            mint(addr(1), 2, 10),
            event(addr(1), addr(2), 2, 12, 0),
            event(addr(1), addr(2), 2, 12, 0),
        ] {
            let ts = if ev.block_number == 10 { 1_000 } else { 1_200 };
            twice.apply(&ev, ts);
        }

        let a = once.finalize();
        let b = twice.finalize();
        assert_eq!(holdings(&a, addr(1)), holdings(&b, addr(1)));
        assert_eq!(holdings(&a, addr(2)), holdings(&b, addr(2)));
        assert_eq!(a.wallet_count(), b.wallet_count());
    }

    #[test]
    fn test_self_transfer_keeps_the_holding() {
        let mut ledger = OwnershipLedger::new(CollectionKind::Pets);
        ledger.apply(&mint(addr(1), 9, 10), 1_000);
        ledger.apply(&event(addr(1), addr(1), 9, 11, 0), 1_100);

        let snapshot = ledger.finalize();
        assert_eq!(
            holdings(&snapshot, addr(1)),
            vec![Holding { token_id: U256::from(9u64), acquired_at: Some(1_000) }]
        );
    }

    #[test]
    fn test_collapse_merges_duplicates_to_minimum_timestamp() {
        let mut ledger = OwnershipLedger::new(CollectionKind::Pets);
        ledger.observe_balance(addr(1), U256::from(5u64));
        ledger.apply(&mint(addr(1), 5, 20), 2_000);
        // A second, unconditional observation of the same pair.
        ledger.observe_balance(addr(1), U256::from(5u64));

        ledger.collapse();
        ledger.collapse(); // idempotent

        let snapshot = ledger.finalize();
        assert_eq!(
            holdings(&snapshot, addr(1)),
            vec![Holding { token_id: U256::from(5u64), acquired_at: Some(2_000) }]
        );
    }

    #[test]
    fn test_sweep_only_observations_have_no_timestamp() {
        let mut ledger = OwnershipLedger::new(CollectionKind::Armor);
        ledger.observe_balance(addr(3), U256::from(1u64));
        ledger.observe_balance(addr(3), U256::from(1u64));

        let snapshot = ledger.finalize();
        assert_eq!(
            holdings(&snapshot, addr(3)),
            vec![Holding { token_id: U256::from(1u64), acquired_at: None }]
        );
    }
}
