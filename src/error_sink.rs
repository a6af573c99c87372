use crate::events::ChainEvent;
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, warn};

pub const PROJECT_NOT_FOUND: &str = "project not found";

/// Destination for events that could not be registered, kept for later reconciliation.
pub trait ErrorSink: Send + Sync {
    fn append_unregistered_event(&self, event: &ChainEvent, reason: &str) -> Result<()>;
}

/// One entry of the error file. Raw on-chain integers are kept as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisteredEvent {
    pub transaction_hash: String,
    pub buyer: String,
    pub token_amount: String,
    pub total_cost: String,
    pub fee: String,
    pub price: String,
    pub project_address: String,
    pub block_number: u64,
    pub timestamp: u64,
    pub reason: String,
    pub logged_at: String,
}

impl UnregisteredEvent {
    pub fn new(event: &ChainEvent, reason: &str) -> Self {
        UnregisteredEvent {
            transaction_hash: format!("{:?}", event.transaction_hash),
            buyer: format!("{:?}", event.buyer),
            token_amount: event.token_amount.to_string(),
            total_cost: event.total_cost.to_string(),
            fee: event.fee.to_string(),
            price: event.price.to_string(),
            project_address: format!("{:?}", event.project_address),
            block_number: event.block_number,
            timestamp: event.block_timestamp,
            reason: reason.to_string(),
            logged_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Rebuilds the typed event, failing on any field that no longer parses.
    pub fn to_chain_event(&self) -> Result<ChainEvent> {
        Ok(ChainEvent {
            transaction_hash: B256::from_str(&self.transaction_hash)
                .with_context(|| format!("Invalid transaction hash {}", self.transaction_hash))?,
            buyer: Address::from_str(&self.buyer)
                .with_context(|| format!("Invalid buyer address {}", self.buyer))?,
            token_amount: parse_amount("tokenAmount", &self.token_amount)?,
            total_cost: parse_amount("totalCost", &self.total_cost)?,
            fee: parse_amount("fee", &self.fee)?,
            price: parse_amount("price", &self.price)?,
            project_address: Address::from_str(&self.project_address).with_context(|| {
                format!("Invalid project address {}", self.project_address)
            })?,
            block_number: self.block_number,
            block_timestamp: self.timestamp,
        })
    }
}

fn parse_amount(field: &str, raw: &str) -> Result<U256> {
    U256::from_str_radix(raw, 10).with_context(|| format!("Invalid {field} value {raw:?}"))
}

/// Error sink writing a pretty-printed JSON array to a file.
pub struct JsonFileErrorSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileErrorSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current entries; a missing or unreadable file counts as empty.
    pub fn entries(&self) -> Vec<UnregisteredEvent> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_entries()
    }

    /// Drops every entry for which `keep` returns false. The file is re-read
    /// first so entries appended in the meantime survive.
    pub fn retain<F>(&self, mut keep: F) -> Result<usize>
    where
        F: FnMut(&UnregisteredEvent) -> bool,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_entries();
        let before = entries.len();
        entries.retain(|entry| keep(entry));
        if entries.len() != before {
            self.write_entries(&entries)?;
        }
        Ok(before - entries.len())
    }

    fn read_entries(&self) -> Vec<UnregisteredEvent> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Could not read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            return Vec::new();
        }

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(
                "Error file {} is not a valid entry list, starting a new one: {}",
                self.path.display(),
                e
            );
            Vec::new()
        })
    }

    fn write_entries(&self, entries: &[UnregisteredEvent]) -> Result<()> {
        if let Some(directory) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create {}", directory.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

impl ErrorSink for JsonFileErrorSink {
    fn append_unregistered_event(&self, event: &ChainEvent, reason: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_entries();
        let entry = UnregisteredEvent::new(event, reason);
        if entries
            .iter()
            .any(|existing| existing.transaction_hash == entry.transaction_hash)
        {
            debug!(
                "TX {} already in {}, not logging it again",
                entry.transaction_hash,
                self.path.display()
            );
            return Ok(());
        }
        entries.push(entry);
        self.write_entries(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(hash_byte: u8) -> ChainEvent {
        ChainEvent {
            transaction_hash: B256::repeat_byte(hash_byte),
            buyer: Address::repeat_byte(1),
            token_amount: U256::from(25_000_000u64),
            total_cost: U256::from(1_500_000u64),
            fee: U256::from(15_000u64),
            price: U256::from(60_000u64),
            project_address: Address::repeat_byte(2),
            block_number: 4242,
            block_timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn appends_to_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileErrorSink::new(dir.path().join("data").join("registry_errors.json"));

        sink.append_unregistered_event(&event(1), PROJECT_NOT_FOUND)
            .unwrap();
        sink.append_unregistered_event(&event(2), PROJECT_NOT_FOUND)
            .unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reason, PROJECT_NOT_FOUND);
        assert_eq!(entries[1].transaction_hash, format!("{:?}", B256::repeat_byte(2)));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.path()).unwrap()).unwrap();
        assert_eq!(raw[0]["tokenAmount"], "25000000");
        assert_eq!(raw[0]["blockNumber"], 4242);
    }

    #[test]
    fn repeated_event_is_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileErrorSink::new(dir.path().join("registry_errors.json"));

        sink.append_unregistered_event(&event(4), PROJECT_NOT_FOUND)
            .unwrap();
        sink.append_unregistered_event(&event(4), PROJECT_NOT_FOUND)
            .unwrap();
        sink.append_unregistered_event(&event(5), PROJECT_NOT_FOUND)
            .unwrap();

        let hashes: Vec<String> = sink
            .entries()
            .into_iter()
            .map(|e| e.transaction_hash)
            .collect();
        assert_eq!(
            hashes,
            vec![
                format!("{:?}", B256::repeat_byte(4)),
                format!("{:?}", B256::repeat_byte(5))
            ]
        );
    }

    #[test]
    fn corrupt_file_is_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry_errors.json");
        std::fs::write(&path, "{ not json").unwrap();
        let sink = JsonFileErrorSink::new(&path);

        sink.append_unregistered_event(&event(3), "invalid amount")
            .unwrap();
        assert_eq!(sink.entries().len(), 1);
    }

    #[test]
    fn retain_drops_resolved_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileErrorSink::new(dir.path().join("registry_errors.json"));
        for byte in 1..=3 {
            sink.append_unregistered_event(&event(byte), PROJECT_NOT_FOUND)
                .unwrap();
        }

        let resolved = format!("{:?}", B256::repeat_byte(2));
        let removed = sink.retain(|entry| entry.transaction_hash != resolved).unwrap();

        assert_eq!(removed, 1);
        let remaining: Vec<u64> = sink.entries().iter().map(|e| e.block_number).collect();
        assert_eq!(remaining.len(), 2);
        assert!(sink.entries().iter().all(|e| e.transaction_hash != resolved));
    }

    #[test]
    fn entries_convert_back_to_events() {
        let original = event(5);
        let entry = UnregisteredEvent::new(&original, PROJECT_NOT_FOUND);
        assert_eq!(entry.to_chain_event().unwrap(), original);

        let broken = UnregisteredEvent {
            fee: "12abc".to_string(),
            ..entry
        };
        assert!(broken.to_chain_event().is_err());
    }
}
