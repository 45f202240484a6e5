use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ethers::abi::{self, ParamType};
use ethers::contract::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, Log, H256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::CollectionConfig;
use crate::models::{CollectionKind, TransferEvent};

/// ERC1155 TransferSingle(operator, from, to, id, value) topic.
static TRANSFER_SINGLE_TOPIC: Lazy<H256> = Lazy::new(|| {
    H256::from(keccak256(
        "TransferSingle(address,address,address,uint256,uint256)",
    ))
});

/// ERC1155 TransferBatch(operator, from, to, ids, values) topic.
static TRANSFER_BATCH_TOPIC: Lazy<H256> = Lazy::new(|| {
    H256::from(keccak256(
        "TransferBatch(address,address,address,uint256[],uint256[])",
    ))
});

abigen!(
    Erc1155,
    r#"[
        function balanceOfBatch(address[] accounts, uint256[] ids) external view returns (uint256[])
    ]"#
);

/// Transfer-event feed for one collection over one block window. Events come
/// back in ascending `(block_number, log_index)` order with no gaps inside
/// the window; callers must not assume anything beyond that.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn transfer_events(
        &self,
        collection: &CollectionConfig,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>>;
}

/// Block-number to wall-clock mapping.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block_timestamp(&self, block_number: u64) -> Result<i64>;
}

/// Batched `balanceOfBatch` lookup. The result is positional: `balances[i]`
/// belongs to `(owners[i], token_ids[i])` and the three slices always have
/// the same length.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance_of_batch(
        &self,
        collection: &CollectionConfig,
        owners: &[Address],
        token_ids: &[U256],
    ) -> Result<Vec<U256>>;
}

/// JSON-RPC client over HTTP implementing the three source contracts, with
/// bounded-backoff retry around every call.
pub struct EthersChain {
    provider: Arc<Provider<Http>>,
    retries: usize,
}

impl EthersChain {
    pub fn connect(rpc_url: &str, retries: usize) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("invalid RPC url `{rpc_url}`"))?;
        Ok(EthersChain {
            provider: Arc::new(provider),
            retries: retries.max(1),
        })
    }

    /// Current head block, used as the default replay upper bound.
    pub async fn latest_block(&self) -> Result<u64> {
        let provider = self.provider.clone();
        with_retry("eth_blockNumber", self.retries, || {
            let p = provider.clone();
            async move { p.get_block_number().await.map_err(anyhow::Error::from) }
        })
        .await
        .map(|n| n.as_u64())
    }

    async fn logs_for_topic(
        &self,
        collection: &CollectionConfig,
        topic: H256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(collection.address)
            .topic0(topic)
            .from_block(from_block)
            .to_block(to_block);
        let context = format!(
            "eth_getLogs({} blocks {from_block}-{to_block})",
            collection.kind
        );
        with_retry(&context, self.retries, || {
            let p = self.provider.clone();
            let f = filter.clone();
            async move { p.get_logs(&f).await.map_err(anyhow::Error::from) }
        })
        .await
    }
}

#[async_trait]
impl EventSource for EthersChain {
    async fn transfer_events(
        &self,
        collection: &CollectionConfig,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>> {
        let mut events = Vec::new();
        for topic in [*TRANSFER_SINGLE_TOPIC, *TRANSFER_BATCH_TOPIC] {
            let logs = self
                .logs_for_topic(collection, topic, from_block, to_block)
                .await?;
            for log in &logs {
                match decode_transfer_log(collection.kind, log) {
                    Some(decoded) => events.extend(decoded),
                    None => log::debug!(
                        "skipping undecodable {} log at block {:?} index {:?}",
                        collection.kind,
                        log.block_number,
                        log.log_index
                    ),
                }
            }
        }
        // Stable: batch rows sharing a log keep their in-payload order.
        events.sort_by_key(|e| e.ordering_key());
        Ok(events)
    }
}

#[async_trait]
impl BlockSource for EthersChain {
    async fn block_timestamp(&self, block_number: u64) -> Result<i64> {
        let context = format!("eth_getBlockByNumber({block_number})");
        let block = with_retry(&context, self.retries, || {
            let p = self.provider.clone();
            async move { p.get_block(block_number).await.map_err(anyhow::Error::from) }
        })
        .await?
        .ok_or_else(|| anyhow!("block {block_number} not found"))?;
        Ok(block.timestamp.as_u64() as i64)
    }
}

#[async_trait]
impl BalanceSource for EthersChain {
    async fn balance_of_batch(
        &self,
        collection: &CollectionConfig,
        owners: &[Address],
        token_ids: &[U256],
    ) -> Result<Vec<U256>> {
        if owners.len() != token_ids.len() {
            bail!(
                "balanceOfBatch inputs must be positional: {} owners vs {} token ids",
                owners.len(),
                token_ids.len()
            );
        }
        let contract = Erc1155::new(collection.address, self.provider.clone());
        let context = format!(
            "balanceOfBatch({} x{} wallets)",
            collection.kind,
            owners.len()
        );
        let balances = with_retry(&context, self.retries, || {
            let call = contract.balance_of_batch(owners.to_vec(), token_ids.to_vec());
            async move { call.call().await.map_err(anyhow::Error::from) }
        })
        .await?;
        if balances.len() != owners.len() {
            bail!(
                "balanceOfBatch returned {} balances for {} inputs",
                balances.len(),
                owners.len()
            );
        }
        Ok(balances)
    }
}

/// Decode one raw log into transfer events. A TransferSingle log yields one
/// event; a TransferBatch log yields one per `(id, value)` pair, all sharing
/// the log's `(block, log_index)`. Returns `None` for logs that do not match
/// either shape (pending logs without block data included).
pub(crate) fn decode_transfer_log(
    collection: CollectionKind,
    log: &Log,
) -> Option<Vec<TransferEvent>> {
    let block_number = log.block_number?.as_u64();
    let log_index = log.log_index?.as_u64();
    if log.topics.len() < 4 {
        return None;
    }
    // Topics carry 32-byte words with the address in the low 20 bytes;
    // topics[1] is the operator, which ownership does not care about.
    let from = Address::from_slice(&log.topics[2].as_bytes()[12..]);
    let to = Address::from_slice(&log.topics[3].as_bytes()[12..]);

    let make = |token_id: U256, quantity: U256| TransferEvent {
        collection,
        token_id,
        from,
        to,
        block_number,
        log_index,
        quantity,
    };

    if log.topics[0] == *TRANSFER_SINGLE_TOPIC {
        if log.data.len() < 64 {
            return None;
        }
        let token_id = U256::from_big_endian(&log.data[0..32]);
        let quantity = U256::from_big_endian(&log.data[32..64]);
        return Some(vec![make(token_id, quantity)]);
    }

    if log.topics[0] == *TRANSFER_BATCH_TOPIC {
        let tokens = abi::decode(
            &[
                ParamType::Array(Box::new(ParamType::Uint(256))),
                ParamType::Array(Box::new(ParamType::Uint(256))),
            ],
            &log.data,
        )
        .ok()?;
        let ids = tokens.first()?.clone().into_array()?;
        let values = tokens.get(1)?.clone().into_array()?;
        if ids.len() != values.len() {
            return None;
        }
        let events = ids
            .into_iter()
            .zip(values)
            .filter_map(|(id, value)| Some(make(id.into_uint()?, value.into_uint()?)))
            .collect();
        return Some(events);
    }

    None
}

const RETRY_BASE_MS: u64 = 250;
const RETRY_CAP_MS: u64 = 4_000;

/// Exponential backoff with a hard cap; streaks past the cap stay flat.
pub(crate) fn bounded_backoff_ms(base_ms: u64, attempt: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let clamped = attempt.min(8);
    base_ms
        .saturating_mul(1u64 << clamped)
        .min(cap_ms.max(base_ms))
}

/// Provider faults worth another attempt are transport-shaped; protocol
/// rejections are not going to change on a resend.
pub(crate) fn is_retryable_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let non_retryable = [
        "method not found",
        "-32601",
        "invalid params",
        "-32602",
        "execution reverted",
        "revert",
        "parse error",
        "-32700",
    ];
    !non_retryable.iter().any(|needle| msg.contains(needle))
}

/// Run `op` with bounded exponential backoff between attempts. The retry
/// loop never reorders results; it only re-issues the identical request.
async fn with_retry<T, Op, Fut>(context: &str, attempts: usize, mut op: Op) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = err.to_string();
                if !is_retryable_rpc_error(&message) || attempt == attempts {
                    return Err(anyhow!(
                        "{context} failed on attempt {attempt}/{attempts}: {message}"
                    ));
                }
                let backoff = bounded_backoff_ms(RETRY_BASE_MS, attempt as u32, RETRY_CAP_MS);
                log::warn!("{context} attempt {attempt}/{attempts} failed ({message}); retrying in {backoff}ms");
                sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
    unreachable!("retry loop always returns within the attempt budget")
}
