use crate::config::PollSettings;
use crate::error_sink::{JsonFileErrorSink, UnregisteredEvent};
use crate::registration::{Registration, register_event};
use crate::registry::Registry;
use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub registered: usize,
    pub already_registered: usize,
    pub still_pending: usize,
    pub invalid: usize,
}

/// Replays the error file through the normal registration path.
///
/// Entries that end up registered (now, or by an earlier run) are removed
/// from the file; everything else stays for the next attempt.
pub fn reconcile_unregistered<R>(
    registry: &R,
    sink: &JsonFileErrorSink,
    settings: &PollSettings,
) -> Result<ReconcileSummary>
where
    R: Registry + ?Sized,
{
    let entries = sink.entries();
    if entries.is_empty() {
        info!("No unregistered events to reconcile");
        return Ok(ReconcileSummary::default());
    }
    info!("Reconciling {} unregistered event(s)", entries.len());

    let mut summary = ReconcileSummary::default();
    let mut resolved: HashSet<String> = HashSet::new();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in &entries {
        if !seen.insert(entry.transaction_hash.clone()) {
            continue;
        }

        let event = match entry.to_chain_event() {
            Ok(event) => event,
            Err(e) => {
                summary.invalid += 1;
                warn!("Cannot replay entry {}: {:#}", entry.transaction_hash, e);
                continue;
            }
        };

        match register_event(registry, &event, settings)? {
            Registration::Registered(record) => {
                summary.registered += 1;
                info!(
                    "Registered TX {:?} for project {}",
                    record.transaction_hash, record.project_id
                );
                resolved.insert(entry.transaction_hash.clone());
            }
            Registration::Duplicate => {
                summary.already_registered += 1;
                resolved.insert(entry.transaction_hash.clone());
            }
            Registration::ProjectNotFound => summary.still_pending += 1,
            Registration::InvalidAmount(reason) => {
                summary.invalid += 1;
                warn!("TX {} still invalid: {}", entry.transaction_hash, reason);
            }
        }
    }

    let removed = sink.retain(|entry: &UnregisteredEvent| {
        !resolved.contains(&entry.transaction_hash)
    })?;
    info!("Removed {} resolved entries from {}", removed, sink.path().display());

    Ok(summary)
}
