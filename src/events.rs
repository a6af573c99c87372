use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::{Event, JsonAbi};
use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashMap;
use std::path::Path;

/// One `TokensBought` occurrence, validated and typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub transaction_hash: B256,
    pub buyer: Address,
    pub token_amount: U256,
    pub total_cost: U256,
    pub fee: U256,
    pub price: U256,
    pub project_address: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
}

/// Event definition taken from the exchange contract's ABI artifact.
#[derive(Debug, Clone)]
pub struct EventAbi {
    event: Event,
}

impl EventAbi {
    pub fn load(path: &Path, event_name: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ABI file {}", path.display()))?;
        Self::from_json(&raw, event_name)
            .with_context(|| format!("Invalid ABI file {}", path.display()))
    }

    /// Accepts either a bare ABI array or a build artifact with an `abi` field.
    pub fn from_json(raw: &str, event_name: &str) -> Result<Self> {
        let abi: JsonAbi = match serde_json::from_str(raw) {
            Ok(abi) => abi,
            Err(_) => {
                let artifact: serde_json::Value =
                    serde_json::from_str(raw).context("ABI is not valid JSON")?;
                let abi = artifact
                    .get("abi")
                    .cloned()
                    .context("ABI artifact has no `abi` field")?;
                serde_json::from_value(abi).context("Malformed `abi` field")?
            }
        };

        let event = match abi.event(event_name).map(Vec::as_slice) {
            Some([event]) => event.clone(),
            Some([]) | None => bail!("Event {event_name} not found in ABI"),
            Some(_) => bail!("Event {event_name} is overloaded in ABI"),
        };
        Ok(EventAbi { event })
    }

    pub fn name(&self) -> &str {
        &self.event.name
    }

    /// topic0 used to filter logs.
    pub fn selector(&self) -> B256 {
        self.event.selector()
    }

    /// Decodes `log` into a [`ChainEvent`]. `block_timestamp` is used when the
    /// log does not carry one itself.
    pub fn decode(&self, log: &Log, block_timestamp: u64) -> Result<ChainEvent> {
        let transaction_hash = log
            .transaction_hash
            .context("Log is missing its transaction hash")?;
        let block_number = log
            .block_number
            .with_context(|| format!("Log {transaction_hash:?} is missing its block number"))?;

        let decoded = self
            .event
            .decode_log(log.data())
            .with_context(|| format!("Failed to decode log of {transaction_hash:?}"))?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut params: HashMap<&str, DynSolValue> = HashMap::new();
        for input in &self.event.inputs {
            let value = if input.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let value = value.with_context(|| {
                format!("Log {transaction_hash:?} has no value for `{}`", input.name)
            })?;
            params.insert(input.name.as_str(), value);
        }

        Ok(ChainEvent {
            transaction_hash,
            buyer: address_param(&params, "buyer")?,
            token_amount: uint_param(&params, "tokenAmount")?,
            total_cost: uint_param(&params, "totalCost")?,
            fee: uint_param(&params, "fee")?,
            price: uint_param(&params, "price")?,
            project_address: address_param(&params, "projectAddress")?,
            block_number,
            block_timestamp: log.block_timestamp.unwrap_or(block_timestamp),
        })
    }
}

fn address_param(params: &HashMap<&str, DynSolValue>, name: &str) -> Result<Address> {
    params
        .get(name)
        .ok_or_else(|| anyhow!("Event has no `{name}` parameter"))?
        .as_address()
        .ok_or_else(|| anyhow!("Parameter `{name}` is not an address"))
}

fn uint_param(params: &HashMap<&str, DynSolValue>, name: &str) -> Result<U256> {
    params
        .get(name)
        .ok_or_else(|| anyhow!("Event has no `{name}` parameter"))?
        .as_uint()
        .map(|(value, _)| value)
        .ok_or_else(|| anyhow!("Parameter `{name}` is not an unsigned integer"))
}
