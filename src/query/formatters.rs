use crate::error_sink::UnregisteredEvent;
use crate::reconcile::ReconcileSummary;
use crate::repository::{TransactionRecord, TransactionStats};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

fn finish_csv(wtr: Writer<Vec<u8>>) -> String {
    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

pub fn format_transactions(records: &[TransactionRecord], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_transactions_table(records),
        OutputFormat::Json => format_transactions_json(records),
        OutputFormat::Csv => format_transactions_csv(records),
    }
}

fn format_transactions_table(records: &[TransactionRecord]) -> String {
    if records.is_empty() {
        return "No transactions found.".to_string();
    }

    let mut table = new_table(vec![
        "Block", "Buyer", "Project", "Tokens", "Cost", "Fee", "Price", "Tx Hash",
    ]);
    for record in records {
        table.add_row(vec![
            Cell::new(record.block_number),
            Cell::new(format!("{:#}", record.user_who_buys)),
            Cell::new(record.project_id),
            Cell::new(record.token_amount),
            Cell::new(record.wusdt_amount),
            Cell::new(record.fees_wusdt),
            Cell::new(record.token_price),
            Cell::new(format_tx_hash(&format!("{:?}", record.transaction_hash))),
        ]);
    }

    table.to_string()
}

fn format_transactions_json(records: &[TransactionRecord]) -> String {
    let json_records: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "transaction_hash": format!("{:?}", r.transaction_hash),
                "block_number": r.block_number,
                "block_timestamp": r.block_timestamp,
                "project_id": r.project_id,
                "project_token_address": format!("{:?}", r.project_token_address),
                "buyer": format!("{:?}", r.user_who_buys),
                "token_amount": r.token_amount,
                "wusdt_amount": r.wusdt_amount,
                "token_price": r.token_price,
                "fees_wusdt": r.fees_wusdt,
                "status": r.status.as_str(),
                "transaction_type": r.transaction_type.as_str(),
                "market_type": r.market_type.as_str(),
                "receipt_link": r.receipt_link,
            })
        })
        .collect();

    serde_json::to_string_pretty(&json_records).unwrap_or_else(|_| "[]".to_string())
}

fn format_transactions_csv(records: &[TransactionRecord]) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record([
        "block_number",
        "transaction_hash",
        "buyer",
        "project_id",
        "project_token_address",
        "token_amount",
        "wusdt_amount",
        "fees_wusdt",
        "token_price",
        "receipt_link",
    ]);

    for record in records {
        let _ = wtr.write_record([
            &record.block_number.to_string(),
            &format!("{:?}", record.transaction_hash),
            &format!("{:?}", record.user_who_buys),
            &record.project_id.to_string(),
            &format!("{:?}", record.project_token_address),
            &record.token_amount.to_string(),
            &record.wusdt_amount.to_string(),
            &record.fees_wusdt.to_string(),
            &record.token_price.to_string(),
            &record.receipt_link,
        ]);
    }

    finish_csv(wtr)
}

pub fn format_stats(stats: &TransactionStats, format: &OutputFormat) -> String {
    let block = |b: Option<u64>| b.map_or("N/A".to_string(), |b| b.to_string());
    let rows = [
        ("total_transactions", "Total Transactions", stats.total_transactions.to_string()),
        ("unique_buyers", "Unique Buyers", stats.unique_buyers.to_string()),
        ("unique_projects", "Unique Projects", stats.unique_projects.to_string()),
        ("total_token_amount", "Tokens Sold", stats.total_token_amount.to_string()),
        ("total_wusdt_amount", "Volume (WUSDT)", stats.total_wusdt_amount.to_string()),
        ("total_fees_wusdt", "Fees (WUSDT)", stats.total_fees_wusdt.to_string()),
        ("earliest_block", "Earliest Block", block(stats.earliest_block)),
        ("latest_block", "Latest Block", block(stats.latest_block)),
    ];

    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Metric", "Value"]);
            for (_, label, value) in &rows {
                table.add_row(vec![Cell::new(label), Cell::new(value)]);
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "total_transactions": stats.total_transactions,
            "unique_buyers": stats.unique_buyers,
            "unique_projects": stats.unique_projects,
            "total_token_amount": stats.total_token_amount,
            "total_wusdt_amount": stats.total_wusdt_amount,
            "total_fees_wusdt": stats.total_fees_wusdt,
            "earliest_block": stats.earliest_block,
            "latest_block": stats.latest_block,
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["metric", "value"]);
            for (key, _, value) in &rows {
                let _ = wtr.write_record([*key, value.as_str()]);
            }
            finish_csv(wtr)
        }
    }
}

pub fn format_checkpoint(checkpoint: Option<u64>, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => json!({ "last_polled_block": checkpoint }).to_string(),
        OutputFormat::Csv => format!(
            "last_polled_block\n{}\n",
            checkpoint.map_or(String::new(), |b| b.to_string())
        ),
        OutputFormat::Table => match checkpoint {
            Some(block) => format!("Last polled block: {block}"),
            None => "No checkpoint recorded yet.".to_string(),
        },
    }
}

pub fn format_unregistered(entries: &[UnregisteredEvent], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if entries.is_empty() {
                return "No unregistered events.".to_string();
            }
            let mut table = new_table(vec!["Block", "Project", "Reason", "Logged At", "Tx Hash"]);
            for entry in entries {
                table.add_row(vec![
                    Cell::new(entry.block_number),
                    Cell::new(&entry.project_address),
                    Cell::new(&entry.reason),
                    Cell::new(&entry.logged_at),
                    Cell::new(format_tx_hash(&entry.transaction_hash)),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record([
                "block_number",
                "transaction_hash",
                "project_address",
                "buyer",
                "token_amount",
                "total_cost",
                "reason",
                "logged_at",
            ]);
            for entry in entries {
                let _ = wtr.write_record([
                    &entry.block_number.to_string(),
                    &entry.transaction_hash,
                    &entry.project_address,
                    &entry.buyer,
                    &entry.token_amount,
                    &entry.total_cost,
                    &entry.reason,
                    &entry.logged_at,
                ]);
            }
            finish_csv(wtr)
        }
    }
}

pub fn format_reconcile_summary(summary: &ReconcileSummary, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => json!({
            "registered": summary.registered,
            "already_registered": summary.already_registered,
            "still_pending": summary.still_pending,
            "invalid": summary.invalid,
        })
        .to_string(),
        OutputFormat::Csv => format!(
            "registered,already_registered,still_pending,invalid\n{},{},{},{}\n",
            summary.registered, summary.already_registered, summary.still_pending, summary.invalid
        ),
        OutputFormat::Table => {
            let mut table = new_table(vec!["Outcome", "Events"]);
            table.add_row(vec![Cell::new("Registered"), Cell::new(summary.registered)]);
            table.add_row(vec![
                Cell::new("Already registered"),
                Cell::new(summary.already_registered),
            ]);
            table.add_row(vec![
                Cell::new("Project still missing"),
                Cell::new(summary.still_pending),
            ]);
            table.add_row(vec![Cell::new("Invalid"), Cell::new(summary.invalid)]);
            table.to_string()
        }
    }
}

fn format_tx_hash(hash: &str) -> String {
    if hash.len() <= 12 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}
