use crate::events::{ChainEvent, EventAbi};
use crate::rpc::RpcClient;
use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::warn;

/// Chain-side operations the poll cycle depends on.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn current_height(&self) -> Result<u64>;

    /// Decoded events in the inclusive range, in the order the chain reports them.
    async fn events_in_range(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>>;

    async fn block_timestamp(&self, block_number: u64) -> Result<u64>;
}

/// [`EventSource`] reading the exchange contract through JSON-RPC.
pub struct RpcEventSource {
    client: RpcClient,
    contract_address: Address,
    abi: EventAbi,
}

impl RpcEventSource {
    pub fn new(client: RpcClient, contract_address: Address, abi: EventAbi) -> Self {
        Self {
            client,
            contract_address,
            abi,
        }
    }
}

#[async_trait]
impl EventSource for RpcEventSource {
    async fn current_height(&self) -> Result<u64> {
        self.client.get_latest_block().await
    }

    async fn events_in_range(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>> {
        let logs = self
            .client
            .get_logs(from_block, to_block, self.contract_address, self.abi.selector())
            .await?;

        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                continue;
            }

            let block_timestamp = match (log.block_timestamp, log.block_number) {
                (Some(timestamp), _) => timestamp,
                (None, Some(block_number)) => match timestamps.get(&block_number) {
                    Some(timestamp) => *timestamp,
                    None => {
                        let timestamp = self.block_timestamp(block_number).await?;
                        timestamps.insert(block_number, timestamp);
                        timestamp
                    }
                },
                (None, None) => chrono::Utc::now().timestamp() as u64,
            };

            match self.abi.decode(&log, block_timestamp) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping undecodable {} log (TX {:?}, block {:?}) in blocks {}-{}: {:#}",
                    self.abi.name(),
                    log.transaction_hash,
                    log.block_number,
                    from_block,
                    to_block,
                    e
                ),
            }
        }

        Ok(events)
    }

    /// Falls back to the current time when the node does not return the block.
    async fn block_timestamp(&self, block_number: u64) -> Result<u64> {
        match self.client.get_block_timestamp(block_number).await? {
            Some(timestamp) => Ok(timestamp),
            None => {
                warn!(
                    "Block {} not returned by node, using current time",
                    block_number
                );
                Ok(chrono::Utc::now().timestamp() as u64)
            }
        }
    }
}
