use super::models::Project;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use std::str::FromStr;

pub struct ProjectRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ProjectRepository<'a> {
    const INSERT_PROJECT: &'static str =
        "INSERT INTO projects (name, token_address) VALUES (?1, ?2)";

    const SELECT_BY_TOKEN_ADDRESS: &'static str =
        "SELECT id, name, token_address FROM projects WHERE token_address = ?1 COLLATE NOCASE";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, name: &str, token_address: &Address) -> Result<Project> {
        self.conn.execute(
            Self::INSERT_PROJECT,
            params![name, format!("{token_address:?}")],
        )?;
        Ok(Project {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            token_address: *token_address,
        })
    }

    pub fn find_by_token_address(&self, token_address: &Address) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                Self::SELECT_BY_TOKEN_ADDRESS,
                params![format!("{token_address:?}")],
                Self::map_row,
            )
            .optional()?;
        Ok(project)
    }

    fn map_row(row: &Row) -> rusqlite::Result<Project> {
        let address: String = row.get(2)?;
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            token_address: Address::from_str(&address).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        })
    }
}
