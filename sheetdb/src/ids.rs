//! Primary-key allocation from a hidden counter table.
//!
//! Allocation is a single unlocked read-modify-write of the table's `LastId`
//! cell. Two processes allocating for the same table at the same time can
//! both read the same value and hand out overlapping ranges; run one writer
//! per store.

use crate::error::{Result, SheetDbError};
use crate::provider::{CellRef, SheetProvider};
use std::ops::RangeInclusive;

pub const METADATA_TABLE: &str = "__sheetdb_metadata";
pub const METADATA_HEADER: [&str; 2] = ["TableName", "LastId"];

const LAST_ID_COLUMN: u32 = 2;

/// Issues contiguous id ranges per table.
pub struct IdAllocator<'a> {
    provider: &'a dyn SheetProvider,
}

impl<'a> IdAllocator<'a> {
    pub fn new(provider: &'a dyn SheetProvider) -> Self {
        IdAllocator { provider }
    }

    /// Reserve `count` ids for `table`: `last + 1 ..= last + count`.
    ///
    /// A `count` of zero returns an empty range without touching the store.
    #[allow(clippy::reversed_empty_ranges)]
    pub async fn allocate(&self, table: &str, count: usize) -> Result<RangeInclusive<i64>> {
        if count == 0 {
            return Ok(1..=0);
        }
        let count = i64::try_from(count)
            .map_err(|_| SheetDbError::remote(format!("Cannot allocate {count} ids")))?;

        self.ensure_table().await?;

        let rows = self.provider.get_all_rows(METADATA_TABLE).await?;
        let existing = rows
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.first().is_some_and(|name| name.trim() == table));

        let (range, last) = match existing {
            Some((index, row)) => {
                let raw = row.get(1).map(|c| c.trim()).unwrap_or("");
                let last_id = if raw.is_empty() {
                    0
                } else {
                    raw.parse::<i64>().map_err(|_| {
                        SheetDbError::remote(format!(
                            "LastId '{raw}' for table '{table}' is not a number"
                        ))
                    })?
                };
                let next = last_id + count;
                let cell = CellRef::new((index + 1) as u32, LAST_ID_COLUMN);
                self.provider
                    .set_value(METADATA_TABLE, cell, next.to_string())
                    .await?;
                (last_id + 1..=next, next)
            }
            None => {
                self.provider
                    .append_row(METADATA_TABLE, vec![table.to_string(), count.to_string()])
                    .await?;
                (1..=count, count)
            }
        };

        log::info!("Allocated ids {}..={} for '{}'", range.start(), range.end(), table);
        log::debug!("'{table}' LastId is now {last}");
        Ok(range)
    }

    /// Current `LastId` for a table, 0 when nothing was allocated yet.
    pub async fn last_id(&self, table: &str) -> Result<i64> {
        if !self.provider.sheet_exists(METADATA_TABLE).await? {
            return Ok(0);
        }
        let rows = self.provider.get_all_rows(METADATA_TABLE).await?;
        Ok(rows
            .iter()
            .skip(1)
            .find(|row| row.first().is_some_and(|name| name.trim() == table))
            .and_then(|row| row.get(1))
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0))
    }

    async fn ensure_table(&self) -> Result<()> {
        if self.provider.sheet_exists(METADATA_TABLE).await? {
            return Ok(());
        }
        let header: Vec<String> = METADATA_HEADER.iter().map(|h| h.to_string()).collect();
        self.provider.create_sheet(METADATA_TABLE, &header).await?;
        self.provider.hide_sheet(METADATA_TABLE).await?;
        log::debug!("Created id table '{METADATA_TABLE}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryWorkbook, ProviderCall};

    #[tokio::test]
    async fn test_first_allocation_creates_hidden_table() {
        let workbook = MemoryWorkbook::new();
        let ids = IdAllocator::new(&workbook);

        assert_eq!(ids.allocate("Product", 3).await.unwrap(), 1..=3);
        assert!(workbook.is_hidden(METADATA_TABLE));
        assert_eq!(
            workbook.rows(METADATA_TABLE).unwrap(),
            vec![vec!["TableName", "LastId"], vec!["Product", "3"]]
        );
    }

    #[tokio::test]
    async fn test_allocation_continues_from_last_id() {
        let workbook = MemoryWorkbook::new().with_sheet(
            METADATA_TABLE,
            vec![
                vec!["TableName", "LastId"],
                vec!["Category", "4"],
                vec!["Product", "41"],
            ],
        );
        let ids = IdAllocator::new(&workbook);

        assert_eq!(ids.allocate("Product", 5).await.unwrap(), 42..=46);
        assert_eq!(ids.last_id("Product").await.unwrap(), 46);
        assert_eq!(ids.last_id("Category").await.unwrap(), 4);

        let writes: Vec<_> = workbook
            .mutations()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::SetValue { cell, value, .. } => Some((cell.to_a1(), value)),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![("B3".to_string(), "46".to_string())]);
    }

    #[tokio::test]
    async fn test_zero_count_touches_nothing() {
        let workbook = MemoryWorkbook::new();
        let range = IdAllocator::new(&workbook).allocate("Product", 0).await.unwrap();
        assert!(range.is_empty());
        assert!(workbook.calls().is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_allocations_do_not_overlap() {
        let workbook = MemoryWorkbook::new();
        let ids = IdAllocator::new(&workbook);
        let first = ids.allocate("Order", 2).await.unwrap();
        let second = ids.allocate("Order", 2).await.unwrap();
        assert_eq!((first, second), (1..=2, 3..=4));
        assert_eq!(ids.last_id("Order").await.unwrap(), 4);
        assert_eq!(ids.last_id("Missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_an_error() {
        let workbook = MemoryWorkbook::new().with_sheet(
            METADATA_TABLE,
            vec![vec!["TableName", "LastId"], vec!["Product", "many"]],
        );
        let err = IdAllocator::new(&workbook).allocate("Product", 1).await.unwrap_err();
        assert!(matches!(err, SheetDbError::Remote(_)));
    }
}
