use anyhow::{Context, Result};
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    /// Opens (or creates) the registry. Accepts `sqlite:`-prefixed URLs and `:memory:`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {db_path}"))?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    // Addresses and hashes are hex text; rows written by other tools may be checksummed,
    // so they compare case-insensitively.
    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                token_address TEXT NOT NULL UNIQUE COLLATE NOCASE
            )",
            [],
        )?;

        // One row per on-chain purchase; the unique hash is what makes registration idempotent.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS project_token_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_hash TEXT NOT NULL UNIQUE COLLATE NOCASE,
                project_id INTEGER NOT NULL,
                project_token_address TEXT NOT NULL COLLATE NOCASE,
                user_who_buys TEXT NOT NULL COLLATE NOCASE,
                token_amount REAL NOT NULL,
                wusdt_amount REAL NOT NULL,
                token_price REAL NOT NULL,
                fees_wusdt REAL NOT NULL,
                status TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                market_type TEXT NOT NULL,
                receipt_link TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_block_number
             ON project_token_transactions(block_number)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_buyer
             ON project_token_transactions(user_who_buys)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_project
             ON project_token_transactions(project_token_address)",
            [],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creation_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("registry.db").display());

        Database::new(&url).unwrap();
        let db = Database::new(&url).unwrap();

        let tables: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('projects', 'project_token_transactions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
