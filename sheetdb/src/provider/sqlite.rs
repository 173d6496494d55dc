use super::{CellRef, Row, RowHandle, SheetProvider};
use crate::error::{Result, SheetDbError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A workbook persisted in a local SQLite file.
///
/// Sheets and their rows live in two tables; each row is stored as a JSON
/// array of cell strings keyed by its 1-based position.
pub struct SqliteWorkbook {
    conn: Mutex<Connection>,
}

impl SqliteWorkbook {
    /// Open or create the workbook at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let wb = SqliteWorkbook {
            conn: Mutex::new(conn),
        };
        wb.initialize_tables()?;
        Ok(wb)
    }

    /// Open an in-memory workbook (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let wb = SqliteWorkbook {
            conn: Mutex::new(conn),
        };
        wb.initialize_tables()?;
        Ok(wb)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sheets (
                name TEXT PRIMARY KEY,
                hidden INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sheet_rows (
                sheet TEXT NOT NULL,
                row_no INTEGER NOT NULL,
                values_json TEXT NOT NULL,
                PRIMARY KEY (sheet, row_no)
            );
            ",
        )?;
        Ok(())
    }

    pub fn is_hidden(&self, sheet: &str) -> Result<bool> {
        let hidden: Option<bool> = self
            .conn()
            .query_row(
                "SELECT hidden FROM sheets WHERE name = ?1",
                params![sheet],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hidden.unwrap_or(false))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn require_sheet(conn: &Connection, sheet: &str) -> Result<()> {
    if sheet_present(conn, sheet)? {
        Ok(())
    } else {
        Err(SheetDbError::remote(format!("Sheet '{sheet}' does not exist")))
    }
}

fn sheet_present(conn: &Connection, sheet: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sheets WHERE name = ?1",
            params![sheet],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn read_row(conn: &Connection, sheet: &str, row_no: u32) -> Result<Option<Row>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT values_json FROM sheet_rows WHERE sheet = ?1 AND row_no = ?2",
            params![sheet, row_no],
            |row| row.get(0),
        )
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(SheetDbError::from))
        .transpose()
}

fn write_row(conn: &Connection, sheet: &str, row_no: u32, values: &Row) -> Result<()> {
    let json = serde_json::to_string(values)?;
    conn.execute(
        "INSERT OR REPLACE INTO sheet_rows (sheet, row_no, values_json) VALUES (?1, ?2, ?3)",
        params![sheet, row_no, json],
    )?;
    Ok(())
}

#[async_trait]
impl SheetProvider for SqliteWorkbook {
    async fn get_all_rows(&self, sheet: &str) -> Result<Vec<Row>> {
        let conn = self.conn();
        require_sheet(&conn, sheet)?;

        let mut stmt = conn.prepare(
            "SELECT row_no, values_json FROM sheet_rows WHERE sheet = ?1 ORDER BY row_no",
        )?;
        let stored = stmt
            .query_map(params![sheet], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut rows: Vec<Row> = Vec::new();
        for (row_no, json) in stored {
            let index = RowHandle(row_no).index();
            if rows.len() < index {
                rows.resize(index, Row::new());
            }
            rows.push(serde_json::from_str(&json)?);
        }
        Ok(rows)
    }

    async fn append_row(&self, sheet: &str, values: Row) -> Result<()> {
        let conn = self.conn();
        require_sheet(&conn, sheet)?;
        let last: u32 = conn.query_row(
            "SELECT COALESCE(MAX(row_no), 0) FROM sheet_rows WHERE sheet = ?1",
            params![sheet],
            |row| row.get(0),
        )?;
        write_row(&conn, sheet, last + 1, &values)
    }

    async fn update_row(&self, sheet: &str, row: RowHandle, values: Row) -> Result<()> {
        let conn = self.conn();
        require_sheet(&conn, sheet)?;
        write_row(&conn, sheet, row.get(), &values)
    }

    async fn delete_row(&self, sheet: &str, row: RowHandle) -> Result<()> {
        let mut conn = self.conn();
        require_sheet(&conn, sheet)?;

        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM sheet_rows WHERE sheet = ?1 AND row_no = ?2",
            params![sheet, row.get()],
        )?;
        if removed == 0 {
            return Err(SheetDbError::remote(format!(
                "Row {row} is outside sheet '{sheet}'"
            )));
        }
        // Two steps so the (sheet, row_no) key never collides mid-update.
        tx.execute(
            "UPDATE sheet_rows SET row_no = -(row_no - 1) WHERE sheet = ?1 AND row_no > ?2",
            params![sheet, row.get()],
        )?;
        tx.execute(
            "UPDATE sheet_rows SET row_no = -row_no WHERE sheet = ?1 AND row_no < 0",
            params![sheet],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn sheet_exists(&self, sheet: &str) -> Result<bool> {
        sheet_present(&self.conn(), sheet)
    }

    async fn create_sheet(&self, sheet: &str, header: &[String]) -> Result<()> {
        let mut conn = self.conn();
        if sheet_present(&conn, sheet)? {
            return Err(SheetDbError::remote(format!("Sheet '{sheet}' already exists")));
        }
        let tx = conn.transaction()?;
        tx.execute("INSERT INTO sheets (name) VALUES (?1)", params![sheet])?;
        write_row(&tx, sheet, 1, &header.to_vec())?;
        tx.commit()?;
        Ok(())
    }

    async fn delete_sheet(&self, sheet: &str) -> Result<()> {
        let mut conn = self.conn();
        require_sheet(&conn, sheet)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sheet_rows WHERE sheet = ?1", params![sheet])?;
        tx.execute("DELETE FROM sheets WHERE name = ?1", params![sheet])?;
        tx.commit()?;
        Ok(())
    }

    async fn clear_sheet(&self, sheet: &str) -> Result<()> {
        let conn = self.conn();
        require_sheet(&conn, sheet)?;
        conn.execute(
            "DELETE FROM sheet_rows WHERE sheet = ?1 AND row_no > 1",
            params![sheet],
        )?;
        Ok(())
    }

    async fn hide_sheet(&self, sheet: &str) -> Result<()> {
        let conn = self.conn();
        require_sheet(&conn, sheet)?;
        conn.execute(
            "UPDATE sheets SET hidden = 1 WHERE name = ?1",
            params![sheet],
        )?;
        Ok(())
    }

    async fn get_value(&self, sheet: &str, cell: CellRef) -> Result<String> {
        let conn = self.conn();
        require_sheet(&conn, sheet)?;
        let row = read_row(&conn, sheet, cell.row)?;
        Ok(row
            .and_then(|r| r.into_iter().nth(cell.column.saturating_sub(1) as usize))
            .unwrap_or_default())
    }

    async fn set_value(&self, sheet: &str, cell: CellRef, value: String) -> Result<()> {
        let conn = self.conn();
        require_sheet(&conn, sheet)?;
        let mut row = read_row(&conn, sheet, cell.row)?.unwrap_or_default();
        let index = cell.column.saturating_sub(1) as usize;
        if row.len() <= index {
            row.resize(index + 1, String::new());
        }
        row[index] = value;
        write_row(&conn, sheet, cell.row, &row)
    }
}
