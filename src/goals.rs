use ethers::types::{Address, U256};
use std::collections::{BTreeMap, HashMap};

use crate::config::CollectionConfig;
use crate::error::IndexError;
use crate::models::{CollectionKind, Goal, GoalResult, GoalRule, OwnershipSnapshot};

/// Evaluate the goal table against the finalized snapshots.
///
/// Snapshots are complete before any rule is looked at; there is no
/// incremental evaluation. A rule that names an unknown collection or a
/// token id outside the collection's configured space is a configuration
/// bug and fails loudly instead of producing an empty report.
pub fn classify(
    snapshots: &HashMap<CollectionKind, OwnershipSnapshot>,
    goals: &[Goal],
    catalogue: &[CollectionConfig],
) -> Result<Vec<GoalResult>, IndexError> {
    goals
        .iter()
        .map(|goal| classify_goal(snapshots, goal, catalogue))
        .collect()
}

fn classify_goal(
    snapshots: &HashMap<CollectionKind, OwnershipSnapshot>,
    goal: &Goal,
    catalogue: &[CollectionConfig],
) -> Result<GoalResult, IndexError> {
    let collection = goal.rule.collection();
    let config = catalogue
        .iter()
        .find(|c| c.kind == collection)
        .ok_or_else(|| IndexError::Classification {
            goal: goal.id.to_string(),
            reason: format!("collection {collection} is not in the catalogue"),
        })?;
    let snapshot = snapshots
        .get(&collection)
        .ok_or_else(|| IndexError::Classification {
            goal: goal.id.to_string(),
            reason: format!("no snapshot was built for collection {collection}"),
        })?;

    // Earliest non-null timestamp wins if the same wallet qualifies more
    // than once; BTreeMap gives the address-ordered, deduplicated output.
    let mut rows: BTreeMap<Address, Option<i64>> = BTreeMap::new();
    let mut add = |wallet: Address, ts: Option<i64>| {
        rows.entry(wallet)
            .and_modify(|existing| {
                *existing = match (*existing, ts) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (Some(a), None) | (None, Some(a)) => Some(a),
                    (None, None) => None,
                }
            })
            .or_insert(ts);
    };

    match goal.rule {
        GoalRule::OwnsSpecificToken { token_id, .. } => {
            if token_id >= U256::from(config.token_count) {
                return Err(IndexError::Classification {
                    goal: goal.id.to_string(),
                    reason: format!(
                        "token id {token_id} is outside {collection}'s space of {} tokens",
                        config.token_count
                    ),
                });
            }
            for (wallet, holdings) in snapshot.wallets() {
                if let Some(holding) = holdings.iter().find(|h| h.token_id == token_id) {
                    add(*wallet, holding.acquired_at);
                }
            }
        }
        GoalRule::OwnsAtLeastDistinct { count, .. } => {
            if count == 0 || count as u64 > config.token_count {
                return Err(IndexError::Classification {
                    goal: goal.id.to_string(),
                    reason: format!(
                        "distinct-count threshold {count} is unsatisfiable for {collection} \
                         with {} tokens",
                        config.token_count
                    ),
                });
            }
            for (wallet, holdings) in snapshot.wallets() {
                if holdings.len() >= count {
                    add(*wallet, crossing_timestamp(holdings, count));
                }
            }
        }
    }

    Ok(GoalResult {
        goal_seq: goal.seq,
        goal_id: goal.id.to_string(),
        rows: rows.into_iter().collect(),
    })
}

/// The moment a wallet first held `count` distinct token ids: the maximum
/// `acquired_at` among its `count` earliest-acquired holdings. Unknown when
/// fewer than `count` holdings carry timestamps (sweep-derived data).
fn crossing_timestamp(holdings: &[crate::models::Holding], count: usize) -> Option<i64> {
    let mut stamped: Vec<i64> = holdings.iter().filter_map(|h| h.acquired_at).collect();
    if stamped.len() < count {
        return None;
    }
    stamped.sort_unstable();
    Some(stamped[count - 1])
}
