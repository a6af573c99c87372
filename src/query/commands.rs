use crate::checkpoint::CheckpointStore;
use crate::config::PollSettings;
use crate::error_sink::JsonFileErrorSink;
use crate::query::formatters::{
    OutputFormat, format_checkpoint, format_reconcile_summary, format_stats, format_transactions,
    format_unregistered,
};
use crate::reconcile::reconcile_unregistered;
use crate::registry::Registry;
use crate::repository::{TransactionFilter, TransactionRepository};
use alloy_primitives::Address;
use anyhow::Result;
use std::str::FromStr;

#[derive(Default)]
pub struct TransactionQuery {
    pub buyer: Option<String>,
    pub project: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: usize,
    pub offset: usize,
}

fn parse_address(label: &str, value: &Option<String>) -> Result<Option<Address>> {
    value
        .as_ref()
        .map(|addr| {
            Address::from_str(addr).map_err(|_| anyhow::anyhow!("Invalid {} address: {}", label, addr))
        })
        .transpose()
}

pub fn cmd_transactions(
    repo: &TransactionRepository,
    query: TransactionQuery,
    format: &OutputFormat,
) -> Result<()> {
    let block_range = match (query.from_block, query.to_block) {
        (None, None) => None,
        (from, to) => Some((from.unwrap_or(0), to.unwrap_or(i64::MAX as u64))),
    };
    let filter = TransactionFilter {
        buyer: parse_address("buyer", &query.buyer)?,
        project_token_address: parse_address("project", &query.project)?,
        block_range,
    };

    let records = repo.query_transactions(&filter, query.limit, query.offset)?;
    println!("{}", format_transactions(&records, format));

    Ok(())
}

pub fn cmd_stats(repo: &TransactionRepository, format: &OutputFormat) -> Result<()> {
    let stats = repo.get_statistics()?;
    println!("{}", format_stats(&stats, format));

    Ok(())
}

pub fn cmd_checkpoint(store: &dyn CheckpointStore, format: &OutputFormat) -> Result<()> {
    println!("{}", format_checkpoint(store.read(), format));

    Ok(())
}

pub fn cmd_unregistered(sink: &JsonFileErrorSink, format: &OutputFormat) -> Result<()> {
    println!("{}", format_unregistered(&sink.entries(), format));

    Ok(())
}

pub fn cmd_reconcile(
    registry: &dyn Registry,
    sink: &JsonFileErrorSink,
    settings: &PollSettings,
    format: &OutputFormat,
) -> Result<()> {
    let summary = reconcile_unregistered(registry, sink, settings)?;
    println!("{}", format_reconcile_summary(&summary, format));

    Ok(())
}
