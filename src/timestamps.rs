use std::collections::HashMap;

use crate::chain::BlockSource;
use crate::error::IndexError;

/// Per-run memo of block number -> block timestamp.
///
/// Many events in a window share a block, and the repeated `eth_getBlock`
/// lookups dominate a replay's call budget otherwise. A failed resolution is
/// fatal: a missing timestamp would corrupt every downstream
/// earliest-acquisition value.
pub struct BlockTimestamps<'a, B: BlockSource + ?Sized> {
    source: &'a B,
    cache: HashMap<u64, i64>,
}

impl<'a, B: BlockSource + ?Sized> BlockTimestamps<'a, B> {
    pub fn new(source: &'a B) -> Self {
        BlockTimestamps {
            source,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, block_number: u64) -> Result<i64, IndexError> {
        if let Some(ts) = self.cache.get(&block_number) {
            return Ok(*ts);
        }
        let ts = self
            .source
            .block_timestamp(block_number)
            .await
            .map_err(|err| IndexError::Timestamp {
                block: block_number,
                reason: err.to_string(),
            })?;
        self.cache.insert(block_number, ts);
        Ok(ts)
    }

    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }
}
