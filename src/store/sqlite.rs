//! SQLite-backed warrant store.
//!
//! Follows the temp-table-then-merge pattern of the warehouse loader:
//! each run stages its batches into `bnmp_*_temp` tables and the merge
//! step moves them into the permanent tables inside one transaction, so
//! readers never observe a half-loaded batch.

use chrono::NaiveDate;
use log::info;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::WarrantStore;
use crate::api::types::{DetailedWarrant, SeenRef, UnparsedWarrant};
use crate::error::Result;
use crate::parser::{ParsedWarrant, COLUMNS};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn parsed_columns_ddl() -> String {
    COLUMNS
        .iter()
        .map(|col| {
            if *col == "id" {
                "id TEXT PRIMARY KEY".to_string()
            } else {
                format!("{} TEXT", col)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

const RAW_COLUMNS: &str = "id TEXT PRIMARY KEY, tipo_peca TEXT, numero_processo TEXT, \
     data_raspagem TEXT, data_visto_em TEXT, bulk_json TEXT, detail_json TEXT";

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_permanent_tables()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_permanent_tables()?;
        Ok(store)
    }

    /// The connection is behind a mutex so the store stays usable from a
    /// blocking-task context. A poisoned lock still holds a valid
    /// connection, so recover it instead of panicking.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_permanent_tables(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS raw_mandados ({})", RAW_COLUMNS),
            [],
        )?;
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS mandados ({})", parsed_columns_ddl()),
            [],
        )?;
        Ok(())
    }
}

impl WarrantStore for SqliteStore {
    fn setup(&self) -> Result<()> {
        info!("Creating and truncating temporary warrant tables");
        let conn = self.conn();
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS bnmp_new_temp ({})", RAW_COLUMNS),
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS bnmp_old_ids_temp \
             (id TEXT PRIMARY KEY, numero_processo TEXT)",
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS bnmp_mandados_temp ({})",
                parsed_columns_ddl()
            ),
            [],
        )?;
        // Truncation keeps the tables empty whether freshly created or not.
        conn.execute("DELETE FROM bnmp_new_temp", [])?;
        conn.execute("DELETE FROM bnmp_old_ids_temp", [])?;
        conn.execute("DELETE FROM bnmp_mandados_temp", [])?;
        Ok(())
    }

    fn known_ids(&self) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM raw_mandados")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    fn bump_last_seen(&self, seen: &HashSet<SeenRef>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (id, process_number) in seen {
            tx.execute(
                "INSERT OR REPLACE INTO bnmp_old_ids_temp (id, numero_processo) VALUES (?1, ?2)",
                params![id, process_number],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_new(&self, warrants: &[DetailedWarrant]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for warrant in warrants {
            tx.execute(
                "INSERT OR REPLACE INTO bnmp_new_temp \
                 (id, tipo_peca, numero_processo, data_raspagem, data_visto_em, bulk_json, detail_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    warrant.bulk.id,
                    warrant.bulk.doc_type,
                    warrant.bulk.process_number,
                    warrant.bulk.first_seen.format("%Y-%m-%d").to_string(),
                    warrant.bulk.last_seen.format("%Y-%m-%d").to_string(),
                    warrant.bulk.raw,
                    warrant.detail,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn merge_new(&self) -> Result<()> {
        info!("Inserting staged warrants into 'raw_mandados'");
        let conn = self.conn();
        conn.execute(
            "INSERT INTO raw_mandados \
             SELECT * FROM bnmp_new_temp \
             WHERE id NOT IN (SELECT id FROM raw_mandados)",
            [],
        )?;
        Ok(())
    }

    fn unparsed(&self) -> Result<Vec<UnparsedWarrant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT data_raspagem, data_visto_em, detail_json FROM raw_mandados \
             WHERE id NOT IN (SELECT id FROM mandados)",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UnparsedWarrant {
                    scrape_date: row.get::<_, NaiveDate>(0)?,
                    last_seen: row.get::<_, NaiveDate>(1)?,
                    detail: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_parsed(&self, rows: &[ParsedWarrant]) -> Result<()> {
        let column_list = COLUMNS.join(", ");
        let placeholders = (1..=COLUMNS.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO bnmp_mandados_temp ({}) VALUES ({})",
            column_list, placeholders
        );

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.to_row()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn merge(&self, today: NaiveDate) -> Result<()> {
        info!("Merging staged batches into permanent tables");
        let today = today.format("%Y-%m-%d").to_string();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO mandados \
             SELECT * FROM bnmp_mandados_temp \
             WHERE id NOT IN (SELECT id FROM mandados)",
            [],
        )?;
        tx.execute(
            "UPDATE raw_mandados SET data_visto_em = ?1 \
             WHERE id IN (SELECT id FROM bnmp_old_ids_temp)",
            params![today],
        )?;
        tx.execute(
            "UPDATE mandados SET data_visto_em = ?1 \
             WHERE id IN (SELECT id FROM bnmp_old_ids_temp)",
            params![today],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        info!("Dropping temporary warrant tables");
        let conn = self.conn();
        conn.execute("DROP TABLE IF EXISTS bnmp_new_temp", [])?;
        conn.execute("DROP TABLE IF EXISTS bnmp_old_ids_temp", [])?;
        conn.execute("DROP TABLE IF EXISTS bnmp_mandados_temp", [])?;
        Ok(())
    }
}
