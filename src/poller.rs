//! One polling pass over the chain.
//!
//! A pass scans from the block after the checkpoint up to the current height
//! in pages of at most `max_block_range` blocks, registering every
//! `TokensBought` event it has not seen before. The checkpoint advances after
//! each page, so a crash loses at most one page of work; re-scanned events are
//! dropped by the registry's transaction-hash check.

use crate::checkpoint::CheckpointStore;
use crate::config::PollSettings;
use crate::error_sink::{ErrorSink, PROJECT_NOT_FOUND};
use crate::events::ChainEvent;
use crate::registration::{Registration, register_event};
use crate::registry::Registry;
use crate::scheduler::PollJob;
use crate::source::EventSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Inclusive block range fetched in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub current_height: u64,
    pub pages_scanned: usize,
    pub events_seen: usize,
    pub registered: usize,
    pub duplicates: usize,
    pub unregistered: usize,
}

/// First block to scan. Gaps wider than the look-back window are not backfilled.
pub fn start_block(checkpoint: Option<u64>, current_height: u64, max_look_back_blocks: u64) -> u64 {
    match checkpoint {
        Some(last) if current_height.saturating_sub(last) <= max_look_back_blocks => {
            last.saturating_add(1)
        }
        _ => current_height.saturating_sub(max_look_back_blocks),
    }
}

/// Splits `[from_block, to_block]` into consecutive windows of at most `max_block_range` blocks.
pub fn scan_windows(from_block: u64, to_block: u64, max_block_range: u64) -> Vec<ScanWindow> {
    let max_block_range = max_block_range.max(1);
    let mut windows = Vec::new();
    let mut start = from_block;

    while start <= to_block {
        let end = start.saturating_add(max_block_range - 1).min(to_block);
        windows.push(ScanWindow {
            from_block: start,
            to_block: end,
        });
        if end == to_block {
            break;
        }
        start = end + 1;
    }

    windows
}

pub struct PollCycle<S, R, C, E> {
    source: S,
    registry: R,
    checkpoint: C,
    error_sink: E,
    settings: PollSettings,
}

impl<S, R, C, E> PollCycle<S, R, C, E>
where
    S: EventSource,
    R: Registry,
    C: CheckpointStore,
    E: ErrorSink,
{
    pub fn new(source: S, registry: R, checkpoint: C, error_sink: E, settings: PollSettings) -> Self {
        Self {
            source,
            registry,
            checkpoint,
            error_sink,
            settings,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn checkpoint(&self) -> &C {
        &self.checkpoint
    }

    pub fn error_sink(&self) -> &E {
        &self.error_sink
    }

    /// Runs one pass and logs its outcome. Never fails; the next pass retries.
    pub async fn run_one_cycle(&self) {
        let start = Instant::now();
        match self.try_run_cycle().await {
            Ok(report) if report.pages_scanned > 0 => info!(
                "Cycle done in {:?}: {} page(s), {} event(s), {} registered, {} duplicate(s), {} unregistered",
                start.elapsed(),
                report.pages_scanned,
                report.events_seen,
                report.registered,
                report.duplicates,
                report.unregistered
            ),
            Ok(_) => {}
            Err(e) => error!("Poll cycle aborted: {:#}", e),
        }
    }

    /// Runs one pass, stopping at the first page that fails.
    ///
    /// Pages completed before the failure keep their checkpoint.
    pub async fn try_run_cycle(&self) -> Result<CycleReport> {
        let current_height = self
            .source
            .current_height()
            .await
            .context("Failed to fetch current block height")?;

        let last_checkpoint = self.checkpoint.read();
        let from_block = start_block(
            last_checkpoint,
            current_height,
            self.settings.max_look_back_blocks,
        );

        let mut report = CycleReport {
            current_height,
            ..CycleReport::default()
        };

        if from_block > current_height {
            debug!("No new blocks to scan, current block is {}", current_height);
            self.save_checkpoint(current_height);
            return Ok(report);
        }

        match last_checkpoint {
            Some(last) if from_block == last.saturating_add(1) => {}
            Some(last) => info!(
                "Checkpoint {} is more than {} blocks behind, resuming from {}",
                last, self.settings.max_look_back_blocks, from_block
            ),
            None => info!(
                "No checkpoint found, starting from the last {} blocks",
                self.settings.max_look_back_blocks
            ),
        }
        info!("Scanning blocks {} to {}", from_block, current_height);

        let windows = scan_windows(from_block, current_height, self.settings.max_block_range);
        let page_count = windows.len();
        for (index, window) in windows.into_iter().enumerate() {
            self.scan_window(window, &mut report).await.with_context(|| {
                format!(
                    "Aborted at blocks {}-{}",
                    window.from_block, window.to_block
                )
            })?;

            self.save_checkpoint(window.to_block);
            report.pages_scanned += 1;

            if index + 1 < page_count && !self.settings.request_delay.is_zero() {
                sleep(self.settings.request_delay).await;
            }
        }

        Ok(report)
    }

    async fn scan_window(&self, window: ScanWindow, report: &mut CycleReport) -> Result<()> {
        debug!("Scanning batch {} to {}", window.from_block, window.to_block);

        let events = self
            .source
            .events_in_range(window.from_block, window.to_block)
            .await?;
        if !events.is_empty() {
            info!(
                "Found {} event(s) in blocks {}-{}",
                events.len(),
                window.from_block,
                window.to_block
            );
        }

        for event in &events {
            report.events_seen += 1;
            match register_event(&self.registry, event, &self.settings).with_context(|| {
                format!("Failed to register TX {:?}", event.transaction_hash)
            })? {
                Registration::Registered(record) => {
                    report.registered += 1;
                    info!(
                        "Registered TX {:?} | project {} | buyer {:?} | amount {}",
                        record.transaction_hash,
                        record.project_id,
                        record.user_who_buys,
                        record.token_amount
                    );
                }
                Registration::Duplicate => {
                    report.duplicates += 1;
                    debug!("Skipped TX {:?}, already registered", event.transaction_hash);
                }
                Registration::ProjectNotFound => {
                    report.unregistered += 1;
                    warn!(
                        "Project not found for address {:?}, TX {:?} sent to error log",
                        event.project_address, event.transaction_hash
                    );
                    self.report_unregistered(event, PROJECT_NOT_FOUND);
                }
                Registration::InvalidAmount(reason) => {
                    report.unregistered += 1;
                    warn!(
                        "Rejected TX {:?}: {}",
                        event.transaction_hash, reason
                    );
                    self.report_unregistered(event, &reason);
                }
            }
        }

        Ok(())
    }

    fn report_unregistered(&self, event: &ChainEvent, reason: &str) {
        if let Err(e) = self.error_sink.append_unregistered_event(event, reason) {
            error!(
                "Failed to record unregistered TX {:?} (block {}): {:#}",
                event.transaction_hash, event.block_number, e
            );
        }
    }

    fn save_checkpoint(&self, block_number: u64) {
        if let Err(e) = self.checkpoint.write(block_number) {
            error!("Failed to save checkpoint {}: {:#}", block_number, e);
        }
    }
}

#[async_trait]
impl<S, R, C, E> PollJob for PollCycle<S, R, C, E>
where
    S: EventSource + 'static,
    R: Registry + 'static,
    C: CheckpointStore + 'static,
    E: ErrorSink + 'static,
{
    async fn run_one_cycle(&self) {
        PollCycle::run_one_cycle(self).await
    }
}
