use crate::repository::{
    Database, Project, ProjectRepository, TransactionRecord, TransactionRepository,
};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lookups and inserts the poll cycle needs from the persistent registry.
pub trait Registry: Send + Sync {
    fn find_by_transaction_hash(&self, hash: &B256) -> Result<Option<TransactionRecord>>;

    fn find_project_by_token_address(&self, token_address: &Address) -> Result<Option<Project>>;

    /// Stores `record`; when its hash is already present the stored row is returned instead.
    fn insert_transaction_record(&self, record: TransactionRecord) -> Result<TransactionRecord>;
}

/// [`Registry`] backed by the SQLite database.
#[derive(Clone)]
pub struct SqliteRegistry {
    db: Arc<Mutex<Database>>,
}

impl SqliteRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn database(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Registry for SqliteRegistry {
    fn find_by_transaction_hash(&self, hash: &B256) -> Result<Option<TransactionRecord>> {
        let db = self.database();
        TransactionRepository::new(&db.conn).find_by_transaction_hash(hash)
    }

    fn find_project_by_token_address(&self, token_address: &Address) -> Result<Option<Project>> {
        let db = self.database();
        ProjectRepository::new(&db.conn).find_by_token_address(token_address)
    }

    fn insert_transaction_record(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let db = self.database();
        let repo = TransactionRepository::new(&db.conn);
        repo.insert(&record)?;
        repo.find_by_transaction_hash(&record.transaction_hash)?
            .with_context(|| {
                format!(
                    "Transaction {:?} missing right after insert",
                    record.transaction_hash
                )
            })
    }
}
