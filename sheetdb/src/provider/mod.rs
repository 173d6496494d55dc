//! The capability contract of a row-oriented backing store.
//!
//! Every operation is one independent round trip. Rows are addressed by
//! 1-based position; row 1 of every sheet is its header.

pub mod cancel;
pub mod memory;
pub mod sqlite;

pub use cancel::{CancelHandle, CancellableProvider};
pub use memory::{MemoryWorkbook, ProviderCall};
pub use sqlite::SqliteWorkbook;

use crate::config::ConnectionString;
use crate::error::{Result, SheetDbError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One row of cell values, left to right.
pub type Row = Vec<String>;

/// A 1-based physical row position. Row 1 is the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowHandle(pub u32);

impl RowHandle {
    pub const HEADER: RowHandle = RowHandle(1);

    /// Handle of the `index`-th row of a whole-sheet read (0 is the header).
    pub fn from_index(index: usize) -> RowHandle {
        RowHandle(u32::try_from(index).map_or(u32::MAX, |i| i.saturating_add(1)))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Zero-based index into a whole-sheet read.
    pub fn index(self) -> usize {
        self.0.saturating_sub(1) as usize
    }
}

impl fmt::Display for RowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single cell, both coordinates 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub row: u32,
    pub column: u32,
}

impl CellRef {
    pub fn new(row: u32, column: u32) -> Self {
        CellRef { row, column }
    }

    /// A1 notation, e.g. `B7`.
    pub fn to_a1(&self) -> String {
        format!("{}{}", column_letters(self.column), self.row)
    }

    pub fn parse(a1: &str) -> Option<CellRef> {
        let split = a1.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = a1.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let column = letters.chars().try_fold(0u32, |acc, c| {
            let digit = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
            acc.checked_mul(26)?.checked_add(digit)
        })?;
        let row = digits.parse::<u32>().ok().filter(|r| *r > 0)?;
        Some(CellRef { row, column })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Spreadsheet column letters for a 1-based column (`1` → `A`, `27` → `AA`).
pub fn column_letters(column: u32) -> String {
    let mut n = column;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Operations every backing store offers.
#[async_trait]
pub trait SheetProvider: Send + Sync {
    /// Every row of a sheet, header first.
    async fn get_all_rows(&self, sheet: &str) -> Result<Vec<Row>>;

    async fn append_row(&self, sheet: &str, values: Row) -> Result<()>;

    async fn update_row(&self, sheet: &str, row: RowHandle, values: Row) -> Result<()>;

    /// Remove a row; every row below it moves up by one.
    async fn delete_row(&self, sheet: &str, row: RowHandle) -> Result<()>;

    async fn sheet_exists(&self, sheet: &str) -> Result<bool>;

    async fn create_sheet(&self, sheet: &str, header: &[String]) -> Result<()>;

    async fn delete_sheet(&self, sheet: &str) -> Result<()>;

    /// Remove every row after the header.
    async fn clear_sheet(&self, sheet: &str) -> Result<()>;

    async fn hide_sheet(&self, sheet: &str) -> Result<()>;

    /// Value of one cell; empty when the cell was never written.
    async fn get_value(&self, sheet: &str, cell: CellRef) -> Result<String>;

    async fn set_value(&self, sheet: &str, cell: CellRef, value: String) -> Result<()>;
}

/// Open a provider described by a connection string.
///
/// `Provider=memory` and `Provider=sqlite;Path=...` are served locally;
/// any other provider needs an adapter supplied by the caller.
pub fn open(connection: &ConnectionString) -> Result<Arc<dyn SheetProvider>> {
    match connection.provider().to_ascii_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryWorkbook::new())),
        "sqlite" => {
            let path = connection.path().ok_or_else(|| {
                SheetDbError::MissingConfiguration(
                    "'Path' is required for the sqlite provider".into(),
                )
            })?;
            Ok(Arc::new(SqliteWorkbook::open(std::path::Path::new(path))?))
        }
        other => Err(SheetDbError::MissingConfiguration(format!(
            "No adapter is available for provider '{other}'; pass one to the context builder"
        ))),
    }
}
