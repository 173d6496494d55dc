use super::{CellRef, Row, RowHandle, SheetProvider};
use crate::error::{Result, SheetDbError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Signals cancellation to every [`CancellableProvider`] created with it.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Wraps a provider so every call races a cancellation signal.
///
/// Cancelling aborts only the call in flight (and fails any later call with
/// [`SheetDbError::Cancelled`]); calls that already completed stay applied.
pub struct CancellableProvider {
    inner: Arc<dyn SheetProvider>,
    signal: watch::Receiver<bool>,
}

impl CancellableProvider {
    pub fn new(inner: Arc<dyn SheetProvider>) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            CancellableProvider { inner, signal: rx },
            CancelHandle { tx: Arc::new(tx) },
        )
    }

    async fn guard<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let mut signal = self.signal.clone();
        let cancelled = *signal.borrow_and_update();
        if cancelled {
            return Err(SheetDbError::Cancelled);
        }
        tokio::select! {
            result = call => result,
            _ = cancellation(&mut signal) => {
                log::debug!("provider call cancelled");
                Err(SheetDbError::Cancelled)
            }
        }
    }
}

async fn cancellation(signal: &mut watch::Receiver<bool>) {
    loop {
        if signal.changed().await.is_err() {
            // Sender dropped: cancellation can no longer happen.
            std::future::pending::<()>().await;
        }
        let cancelled = *signal.borrow_and_update();
        if cancelled {
            return;
        }
    }
}

#[async_trait]
impl SheetProvider for CancellableProvider {
    async fn get_all_rows(&self, sheet: &str) -> Result<Vec<Row>> {
        self.guard(self.inner.get_all_rows(sheet)).await
    }

    async fn append_row(&self, sheet: &str, values: Row) -> Result<()> {
        self.guard(self.inner.append_row(sheet, values)).await
    }

    async fn update_row(&self, sheet: &str, row: RowHandle, values: Row) -> Result<()> {
        self.guard(self.inner.update_row(sheet, row, values)).await
    }

    async fn delete_row(&self, sheet: &str, row: RowHandle) -> Result<()> {
        self.guard(self.inner.delete_row(sheet, row)).await
    }

    async fn sheet_exists(&self, sheet: &str) -> Result<bool> {
        self.guard(self.inner.sheet_exists(sheet)).await
    }

    async fn create_sheet(&self, sheet: &str, header: &[String]) -> Result<()> {
        self.guard(self.inner.create_sheet(sheet, header)).await
    }

    async fn delete_sheet(&self, sheet: &str) -> Result<()> {
        self.guard(self.inner.delete_sheet(sheet)).await
    }

    async fn clear_sheet(&self, sheet: &str) -> Result<()> {
        self.guard(self.inner.clear_sheet(sheet)).await
    }

    async fn hide_sheet(&self, sheet: &str) -> Result<()> {
        self.guard(self.inner.hide_sheet(sheet)).await
    }

    async fn get_value(&self, sheet: &str, cell: CellRef) -> Result<String> {
        self.guard(self.inner.get_value(sheet, cell)).await
    }

    async fn set_value(&self, sheet: &str, cell: CellRef, value: String) -> Result<()> {
        self.guard(self.inner.set_value(sheet, cell, value)).await
    }
}
