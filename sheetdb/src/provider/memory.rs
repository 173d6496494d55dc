use super::{CellRef, Row, RowHandle, SheetProvider};
use crate::error::{Result, SheetDbError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A provider call as recorded in the [`MemoryWorkbook`] journal.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    GetAllRows { sheet: String },
    AppendRow { sheet: String, values: Row },
    UpdateRow { sheet: String, row: RowHandle, values: Row },
    DeleteRow { sheet: String, row: RowHandle },
    SheetExists { sheet: String },
    CreateSheet { sheet: String, header: Row },
    DeleteSheet { sheet: String },
    ClearSheet { sheet: String },
    HideSheet { sheet: String },
    GetValue { sheet: String, cell: CellRef },
    SetValue { sheet: String, cell: CellRef, value: String },
}

impl ProviderCall {
    pub fn sheet(&self) -> &str {
        match self {
            ProviderCall::GetAllRows { sheet }
            | ProviderCall::AppendRow { sheet, .. }
            | ProviderCall::UpdateRow { sheet, .. }
            | ProviderCall::DeleteRow { sheet, .. }
            | ProviderCall::SheetExists { sheet }
            | ProviderCall::CreateSheet { sheet, .. }
            | ProviderCall::DeleteSheet { sheet }
            | ProviderCall::ClearSheet { sheet }
            | ProviderCall::HideSheet { sheet }
            | ProviderCall::GetValue { sheet, .. }
            | ProviderCall::SetValue { sheet, .. } => sheet,
        }
    }

    /// Whether the call changes the workbook.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            ProviderCall::GetAllRows { .. }
                | ProviderCall::SheetExists { .. }
                | ProviderCall::GetValue { .. }
        )
    }
}

#[derive(Debug, Clone, Default)]
struct Sheet {
    rows: Vec<Row>,
    hidden: bool,
}

type FailurePredicate = Box<dyn Fn(&ProviderCall) -> bool + Send + Sync>;

/// An in-process workbook.
///
/// Every call is journaled before it runs, and a failure predicate can make
/// selected calls fail with a remote error, which is how tests observe call
/// accounting and partial-failure behavior.
#[derive(Default)]
pub struct MemoryWorkbook {
    sheets: Mutex<BTreeMap<String, Sheet>>,
    journal: Mutex<Vec<ProviderCall>>,
    fail_when: Mutex<Option<FailurePredicate>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a sheet with rows (header first), replacing any existing one.
    pub fn with_sheet(self, name: &str, rows: Vec<Vec<&str>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(str::to_string).collect())
            .collect();
        lock(&self.sheets).insert(
            name.to_string(),
            Sheet {
                rows,
                hidden: false,
            },
        );
        self
    }

    /// Current rows of a sheet, without touching the journal.
    pub fn rows(&self, sheet: &str) -> Option<Vec<Row>> {
        lock(&self.sheets).get(sheet).map(|s| s.rows.clone())
    }

    pub fn is_hidden(&self, sheet: &str) -> bool {
        lock(&self.sheets).get(sheet).is_some_and(|s| s.hidden)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        lock(&self.sheets).keys().cloned().collect()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.journal).clone()
    }

    /// Calls that changed the workbook, in order.
    pub fn mutations(&self) -> Vec<ProviderCall> {
        lock(&self.journal)
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.journal).clear();
    }

    /// Fail every subsequent call matching `predicate`.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&ProviderCall) -> bool + Send + Sync + 'static,
    {
        *lock(&self.fail_when) = Some(Box::new(predicate));
    }

    pub fn stop_failing(&self) {
        *lock(&self.fail_when) = None;
    }

    fn record(&self, call: ProviderCall) -> Result<()> {
        let fail = lock(&self.fail_when)
            .as_ref()
            .is_some_and(|predicate| predicate(&call));
        log::debug!("memory workbook: {call:?}");
        lock(&self.journal).push(call.clone());
        if fail {
            return Err(SheetDbError::remote(format!("injected failure on {call:?}")));
        }
        Ok(())
    }

    fn with_sheet_mut<R>(&self, sheet: &str, f: impl FnOnce(&mut Sheet) -> Result<R>) -> Result<R> {
        let mut sheets = lock(&self.sheets);
        let found = sheets
            .get_mut(sheet)
            .ok_or_else(|| SheetDbError::remote(format!("Sheet '{sheet}' does not exist")))?;
        f(found)
    }
}

#[async_trait]
impl SheetProvider for MemoryWorkbook {
    async fn get_all_rows(&self, sheet: &str) -> Result<Vec<Row>> {
        self.record(ProviderCall::GetAllRows {
            sheet: sheet.to_string(),
        })?;
        self.with_sheet_mut(sheet, |s| Ok(s.rows.clone()))
    }

    async fn append_row(&self, sheet: &str, values: Row) -> Result<()> {
        self.record(ProviderCall::AppendRow {
            sheet: sheet.to_string(),
            values: values.clone(),
        })?;
        self.with_sheet_mut(sheet, |s| {
            s.rows.push(values);
            Ok(())
        })
    }

    async fn update_row(&self, sheet: &str, row: RowHandle, values: Row) -> Result<()> {
        self.record(ProviderCall::UpdateRow {
            sheet: sheet.to_string(),
            row,
            values: values.clone(),
        })?;
        self.with_sheet_mut(sheet, |s| {
            let index = row.index();
            if s.rows.len() <= index {
                s.rows.resize(index + 1, Row::new());
            }
            s.rows[index] = values;
            Ok(())
        })
    }

    async fn delete_row(&self, sheet: &str, row: RowHandle) -> Result<()> {
        self.record(ProviderCall::DeleteRow {
            sheet: sheet.to_string(),
            row,
        })?;
        self.with_sheet_mut(sheet, |s| {
            let index = row.index();
            if row.get() == 0 || index >= s.rows.len() {
                return Err(SheetDbError::remote(format!(
                    "Row {row} is outside sheet '{sheet}'"
                )));
            }
            s.rows.remove(index);
            Ok(())
        })
    }

    async fn sheet_exists(&self, sheet: &str) -> Result<bool> {
        self.record(ProviderCall::SheetExists {
            sheet: sheet.to_string(),
        })?;
        Ok(lock(&self.sheets).contains_key(sheet))
    }

    async fn create_sheet(&self, sheet: &str, header: &[String]) -> Result<()> {
        self.record(ProviderCall::CreateSheet {
            sheet: sheet.to_string(),
            header: header.to_vec(),
        })?;
        let mut sheets = lock(&self.sheets);
        if sheets.contains_key(sheet) {
            return Err(SheetDbError::remote(format!("Sheet '{sheet}' already exists")));
        }
        sheets.insert(
            sheet.to_string(),
            Sheet {
                rows: vec![header.to_vec()],
                hidden: false,
            },
        );
        Ok(())
    }

    async fn delete_sheet(&self, sheet: &str) -> Result<()> {
        self.record(ProviderCall::DeleteSheet {
            sheet: sheet.to_string(),
        })?;
        lock(&self.sheets)
            .remove(sheet)
            .map(|_| ())
            .ok_or_else(|| SheetDbError::remote(format!("Sheet '{sheet}' does not exist")))
    }

    async fn clear_sheet(&self, sheet: &str) -> Result<()> {
        self.record(ProviderCall::ClearSheet {
            sheet: sheet.to_string(),
        })?;
        self.with_sheet_mut(sheet, |s| {
            s.rows.truncate(1);
            Ok(())
        })
    }

    async fn hide_sheet(&self, sheet: &str) -> Result<()> {
        self.record(ProviderCall::HideSheet {
            sheet: sheet.to_string(),
        })?;
        self.with_sheet_mut(sheet, |s| {
            s.hidden = true;
            Ok(())
        })
    }

    async fn get_value(&self, sheet: &str, cell: CellRef) -> Result<String> {
        self.record(ProviderCall::GetValue {
            sheet: sheet.to_string(),
            cell,
        })?;
        self.with_sheet_mut(sheet, |s| {
            Ok(s.rows
                .get(RowHandle(cell.row).index())
                .and_then(|r| r.get(cell.column.saturating_sub(1) as usize))
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn set_value(&self, sheet: &str, cell: CellRef, value: String) -> Result<()> {
        self.record(ProviderCall::SetValue {
            sheet: sheet.to_string(),
            cell,
            value: value.clone(),
        })?;
        self.with_sheet_mut(sheet, |s| {
            let row_index = RowHandle(cell.row).index();
            let column_index = cell.column.saturating_sub(1) as usize;
            if s.rows.len() <= row_index {
                s.rows.resize(row_index + 1, Row::new());
            }
            let row = &mut s.rows[row_index];
            if row.len() <= column_index {
                row.resize(column_index + 1, String::new());
            }
            row[column_index] = value;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_rows_shift_up_on_delete() {
        let wb = MemoryWorkbook::new().with_sheet(
            "Product",
            vec![vec!["Id", "Title"], vec!["1", "a"], vec!["2", "b"], vec!["3", "c"]],
        );

        wb.delete_row("Product", RowHandle(2)).await.unwrap();
        assert_eq!(
            wb.get_all_rows("Product").await.unwrap(),
            vec![row(&["Id", "Title"]), row(&["2", "b"]), row(&["3", "c"])]
        );

        assert!(wb.delete_row("Product", RowHandle(9)).await.is_err());
    }

    #[tokio::test]
    async fn test_create_clear_hide_delete() {
        let wb = MemoryWorkbook::new();
        wb.create_sheet("Log", &row(&["At", "Message"])).await.unwrap();
        assert!(wb.create_sheet("Log", &row(&["At"])).await.is_err());

        wb.append_row("Log", row(&["now", "hi"])).await.unwrap();
        wb.clear_sheet("Log").await.unwrap();
        assert_eq!(wb.rows("Log").unwrap(), vec![row(&["At", "Message"])]);

        wb.hide_sheet("Log").await.unwrap();
        assert!(wb.is_hidden("Log"));

        wb.delete_sheet("Log").await.unwrap();
        assert!(!wb.sheet_exists("Log").await.unwrap());
    }

    #[tokio::test]
    async fn test_cells_pad_on_write() {
        let wb = MemoryWorkbook::new().with_sheet("Meta", vec![vec!["TableName", "LastId"]]);
        assert_eq!(wb.get_value("Meta", CellRef::new(3, 2)).await.unwrap(), "");

        wb.set_value("Meta", CellRef::new(3, 2), "12".into()).await.unwrap();
        assert_eq!(wb.get_value("Meta", CellRef::new(3, 2)).await.unwrap(), "12");
        assert_eq!(wb.rows("Meta").unwrap()[2], row(&["", "12"]));
    }

    #[tokio::test]
    async fn test_journal_and_injected_failure() {
        let wb = MemoryWorkbook::new().with_sheet("Product", vec![vec!["Id"]]);
        wb.fail_when(|call| matches!(call, ProviderCall::AppendRow { .. }));

        let err = wb.append_row("Product", row(&["1"])).await.unwrap_err();
        assert!(matches!(err, SheetDbError::Remote(_)));
        assert_eq!(wb.rows("Product").unwrap().len(), 1);

        wb.stop_failing();
        wb.append_row("Product", row(&["1"])).await.unwrap();
        let _ = wb.get_all_rows("Product").await.unwrap();

        assert_eq!(wb.calls().len(), 3);
        assert_eq!(wb.mutations().len(), 2);
        assert!(wb.calls().iter().all(|c| c.sheet() == "Product"));
    }
}
