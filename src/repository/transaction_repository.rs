use super::models::{MarketType, TransactionRecord, TransactionStatus, TransactionType};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, ToSql, params, params_from_iter};
use std::str::FromStr;

pub struct TransactionRepository<'a> {
    conn: &'a rusqlite::Connection,
}

#[derive(Debug, Default)]
pub struct TransactionFilter {
    pub buyer: Option<Address>,
    pub project_token_address: Option<Address>,
    pub block_range: Option<(u64, u64)>,
}

#[derive(Debug)]
pub struct TransactionStats {
    pub total_transactions: usize,
    pub unique_buyers: usize,
    pub unique_projects: usize,
    pub total_token_amount: f64,
    pub total_wusdt_amount: f64,
    pub total_fees_wusdt: f64,
    pub earliest_block: Option<u64>,
    pub latest_block: Option<u64>,
}

impl<'a> TransactionRepository<'a> {
    const INSERT_TRANSACTION: &'static str = "INSERT OR IGNORE INTO project_token_transactions (
            transaction_hash, project_id, project_token_address, user_who_buys,
            token_amount, wusdt_amount, token_price, fees_wusdt,
            status, transaction_type, market_type, receipt_link,
            block_number, block_timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

    const SELECT_TRANSACTION: &'static str = "SELECT id, transaction_hash, project_id,
            project_token_address, user_who_buys, token_amount, wusdt_amount, token_price,
            fees_wusdt, status, transaction_type, market_type, receipt_link,
            block_number, block_timestamp
        FROM project_token_transactions";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Inserts `record` unless its transaction hash is already registered.
    /// Returns whether a row was written.
    pub fn insert(&self, record: &TransactionRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_TRANSACTION,
            params![
                format!("{:?}", record.transaction_hash),
                record.project_id,
                format!("{:?}", record.project_token_address),
                format!("{:?}", record.user_who_buys),
                record.token_amount,
                record.wusdt_amount,
                record.token_price,
                record.fees_wusdt,
                record.status.as_str(),
                record.transaction_type.as_str(),
                record.market_type.as_str(),
                record.receipt_link,
                to_sql_int(record.block_number)?,
                to_sql_int(record.block_timestamp)?,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn find_by_transaction_hash(&self, hash: &B256) -> Result<Option<TransactionRecord>> {
        let query = format!(
            "{} WHERE transaction_hash = ?1 COLLATE NOCASE",
            Self::SELECT_TRANSACTION
        );
        let record = self
            .conn
            .query_row(&query, params![format!("{hash:?}")], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    pub fn query_transactions(
        &self,
        filter: &TransactionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(buyer) = filter.buyer {
            conditions.push("user_who_buys = ? COLLATE NOCASE");
            params.push(Box::new(format!("{buyer:?}")));
        }

        if let Some(project) = filter.project_token_address {
            conditions.push("project_token_address = ? COLLATE NOCASE");
            params.push(Box::new(format!("{project:?}")));
        }

        if let Some((start, end)) = filter.block_range {
            conditions.push("block_number >= ?");
            params.push(Box::new(to_sql_int(start)?));
            conditions.push("block_number <= ?");
            params.push(Box::new(to_sql_int(end)?));
        }

        let mut query = Self::SELECT_TRANSACTION.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(&format!(
            " ORDER BY block_number DESC, id DESC LIMIT {limit} OFFSET {offset}"
        ));

        let mut stmt = self.conn.prepare(&query)?;
        let records = stmt
            .query_map(params_from_iter(params), Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn get_statistics(&self) -> Result<TransactionStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT user_who_buys), COUNT(DISTINCT project_id),
                    COALESCE(SUM(token_amount), 0), COALESCE(SUM(wusdt_amount), 0),
                    COALESCE(SUM(fees_wusdt), 0), MIN(block_number), MAX(block_number)
             FROM project_token_transactions",
            [],
            |row| {
                Ok(TransactionStats {
                    total_transactions: row.get::<_, i64>(0)? as usize,
                    unique_buyers: row.get::<_, i64>(1)? as usize,
                    unique_projects: row.get::<_, i64>(2)? as usize,
                    total_token_amount: row.get(3)?,
                    total_wusdt_amount: row.get(4)?,
                    total_fees_wusdt: row.get(5)?,
                    earliest_block: row.get::<_, Option<i64>>(6)?.map(|b| b as u64),
                    latest_block: row.get::<_, Option<i64>>(7)?.map(|b| b as u64),
                })
            },
        )?;
        Ok(stats)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<TransactionRecord> {
        Ok(TransactionRecord {
            id: row.get(0)?,
            transaction_hash: parse_column(row, 1)?,
            project_id: row.get(2)?,
            project_token_address: parse_column(row, 3)?,
            user_who_buys: parse_column(row, 4)?,
            token_amount: row.get(5)?,
            wusdt_amount: row.get(6)?,
            token_price: row.get(7)?,
            fees_wusdt: row.get(8)?,
            status: parse_column::<TransactionStatus>(row, 9)?,
            transaction_type: parse_column::<TransactionType>(row, 10)?,
            market_type: parse_column::<MarketType>(row, 11)?,
            receipt_link: row.get(12)?,
            block_number: row.get::<_, i64>(13)? as u64,
            block_timestamp: row.get::<_, i64>(14)? as u64,
        })
    }
}

// SQLite integers are signed 64-bit.
fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow::anyhow!("Value {value} does not fit in an SQLite integer"))
}

fn parse_column<T>(row: &Row, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    row.get::<_, String>(index)?.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Database, ProjectRepository};
    use alloy_primitives::address;

    fn record(hash_byte: u8, project_id: i64, block_number: u64) -> TransactionRecord {
        TransactionRecord {
            id: None,
            transaction_hash: B256::repeat_byte(hash_byte),
            project_id,
            project_token_address: address!("0x2222222222222222222222222222222222222222"),
            user_who_buys: Address::repeat_byte(hash_byte),
            token_amount: 25.0,
            wusdt_amount: 1.5,
            token_price: 0.06,
            fees_wusdt: 0.015,
            status: TransactionStatus::Approved,
            transaction_type: TransactionType::BuyProjectToken,
            market_type: MarketType::Primary,
            receipt_link: format!("https://polygonscan.com/tx/{:?}", B256::repeat_byte(hash_byte)),
            block_number,
            block_timestamp: 1_700_000_000 + block_number,
        }
    }

    fn seeded() -> (Database, i64) {
        let db = Database::new(":memory:").unwrap();
        let project = ProjectRepository::new(&db.conn)
            .insert(
                "Solar Farm",
                &address!("0x2222222222222222222222222222222222222222"),
            )
            .unwrap();
        (db, project.id)
    }

    #[test]
    fn duplicate_hash_is_ignored() {
        let (db, project_id) = seeded();
        let repo = TransactionRepository::new(&db.conn);

        assert!(repo.insert(&record(1, project_id, 100)).unwrap());
        assert!(!repo.insert(&record(1, project_id, 101)).unwrap());

        let stored = repo
            .find_by_transaction_hash(&B256::repeat_byte(1))
            .unwrap()
            .unwrap();
        assert_eq!(stored.block_number, 100);
        assert_eq!(repo.get_statistics().unwrap().total_transactions, 1);
    }

    #[test]
    fn round_trips_every_column() {
        let (db, project_id) = seeded();
        let repo = TransactionRepository::new(&db.conn);
        let original = record(7, project_id, 4242);
        repo.insert(&original).unwrap();

        let stored = repo
            .find_by_transaction_hash(&original.transaction_hash)
            .unwrap()
            .unwrap();
        assert!(stored.id.is_some());
        assert_eq!(TransactionRecord { id: None, ..stored }, original);
    }

    #[test]
    fn filters_by_buyer_and_block_range() {
        let (db, project_id) = seeded();
        let repo = TransactionRepository::new(&db.conn);
        for (byte, block) in [(1u8, 100u64), (2, 150), (3, 200)] {
            repo.insert(&record(byte, project_id, block)).unwrap();
        }

        let by_buyer = repo
            .query_transactions(
                &TransactionFilter {
                    buyer: Some(Address::repeat_byte(2)),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(by_buyer.len(), 1);
        assert_eq!(by_buyer[0].block_number, 150);

        let in_range = repo
            .query_transactions(
                &TransactionFilter {
                    block_range: Some((120, 250)),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        let blocks: Vec<u64> = in_range.iter().map(|r| r.block_number).collect();
        assert_eq!(blocks, vec![200, 150]);
    }

    #[test]
    fn hash_and_buyer_match_regardless_of_case() {
        let (db, project_id) = seeded();
        let repo = TransactionRepository::new(&db.conn);
        let buyer = address!("0x29afc9bcce5a78fc266f184f9ba8b39e66289c61");
        repo.insert(&TransactionRecord {
            user_who_buys: buyer,
            ..record(0xab, project_id, 500)
        })
        .unwrap();
        db.conn
            .execute(
                "UPDATE project_token_transactions
                 SET transaction_hash = '0x' || upper(substr(transaction_hash, 3)),
                     user_who_buys = '0x29afc9bcce5a78fC266f184f9BA8b39E66289c61'",
                [],
            )
            .unwrap();

        let stored = repo
            .find_by_transaction_hash(&B256::repeat_byte(0xab))
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_who_buys, buyer);
        assert!(!repo.insert(&record(0xab, project_id, 501)).unwrap());

        let by_buyer = repo
            .query_transactions(
                &TransactionFilter {
                    buyer: Some(buyer),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(by_buyer.len(), 1);
    }

    #[test]
    fn statistics_aggregate_amounts() {
        let (db, project_id) = seeded();
        let repo = TransactionRepository::new(&db.conn);

        let empty = repo.get_statistics().unwrap();
        assert_eq!(empty.total_transactions, 0);
        assert_eq!(empty.earliest_block, None);

        repo.insert(&record(1, project_id, 100)).unwrap();
        repo.insert(&record(2, project_id, 300)).unwrap();

        let stats = repo.get_statistics().unwrap();
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.unique_buyers, 2);
        assert_eq!(stats.unique_projects, 1);
        assert_eq!(stats.total_wusdt_amount, 3.0);
        assert_eq!(stats.earliest_block, Some(100));
        assert_eq!(stats.latest_block, Some(300));
    }
}
