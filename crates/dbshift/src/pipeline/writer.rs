//! Transactional batch writes with per-row failure isolation.

use std::time::Instant;

use tracing::{debug, warn};

use crate::adapter::DatabaseAdapter;
use crate::config::WriteMode;
use crate::core::{BatchResult, Row, RowError};

/// Writes one batch of rows inside a single transaction.
///
/// In [`WriteMode::Partial`] a failing row is recorded and skipped, and the
/// remaining rows commit. In [`WriteMode::Atomic`] any failing row rolls the
/// whole batch back. A connectivity error always rolls back and marks every
/// row failed, since nothing in the batch can be trusted to have landed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchWriter {
    mode: WriteMode,
}

impl BatchWriter {
    pub fn new(mode: WriteMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub async fn write<A: DatabaseAdapter + ?Sized>(
        &self,
        adapter: &A,
        table: &str,
        schema: Option<&str>,
        rows: &[Row],
    ) -> BatchResult {
        let started = Instant::now();
        if rows.is_empty() {
            return BatchResult::empty();
        }

        let mut tx = match adapter.begin(table, schema).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!("{}: could not open transaction: {}", table, e);
                return BatchResult::all_failed(rows.len(), &e.to_string(), started.elapsed());
            }
        };

        let mut errors = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let Err(e) = tx.insert_row(row).await else {
                continue;
            };

            if e.is_connectivity() {
                let message = e.to_string();
                warn!("{}: connection lost at row {}, rolling back: {}", table, index, message);
                if let Err(rb) = tx.rollback().await {
                    debug!("{}: rollback after connection loss failed: {}", table, rb);
                }
                return BatchResult::all_failed(rows.len(), &message, started.elapsed());
            }

            if self.mode == WriteMode::Atomic {
                let message = e.to_string();
                if let Err(rb) = tx.rollback().await {
                    debug!("{}: rollback failed: {}", table, rb);
                }
                return atomic_failure(rows.len(), index, &message, started);
            }

            debug!("{}: row {} rejected: {}", table, index, e);
            errors.push(RowError::new(index, e.to_string()));
        }

        if let Err(e) = tx.commit().await {
            warn!("{}: commit failed: {}", table, e);
            return BatchResult::all_failed(
                rows.len(),
                &format!("commit failed: {}", e),
                started.elapsed(),
            );
        }

        BatchResult {
            success: errors.is_empty(),
            processed_rows: rows.len() - errors.len(),
            errors,
            duration: started.elapsed(),
        }
    }
}

fn atomic_failure(rows: usize, failed_at: usize, message: &str, started: Instant) -> BatchResult {
    let errors = (0..rows)
        .map(|i| {
            if i == failed_at {
                RowError::new(i, message)
            } else {
                RowError::new(i, format!("rolled back: row {} failed: {}", failed_at, message))
            }
        })
        .collect();
    BatchResult {
        success: false,
        processed_rows: 0,
        errors,
        duration: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDefinition, TableSchema};
    use crate::drivers::{MemoryAdapter, MemoryDatabase};

    async fn setup() -> (MemoryDatabase, MemoryAdapter) {
        let mut table = TableSchema::new("users", None);
        table.columns = vec![
            ColumnDefinition::new("id", "integer", false),
            ColumnDefinition::new("email", "varchar", true),
        ];
        table.primary_key = vec!["id".into()];
        let db = MemoryDatabase::new();
        db.create_table(table);
        let mut adapter = MemoryAdapter::new(db.clone());
        adapter.connect().await.unwrap();
        (db, adapter)
    }

    fn rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| Row::new().with("id", i).with("email", format!("u{}@example.com", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_partial_mode_skips_bad_row() {
        let (db, adapter) = setup().await;
        db.reject_value("users", "id", 3);

        let result = BatchWriter::new(WriteMode::Partial)
            .write(&adapter, "users", None, &rows(5))
            .await;

        assert!(!result.success);
        assert_eq!(result.processed_rows, 4);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 2);
        assert_eq!(db.rows("users").len(), 4);
    }

    #[tokio::test]
    async fn test_atomic_mode_rolls_back() {
        let (db, adapter) = setup().await;
        db.reject_value("users", "id", 2);

        let result = BatchWriter::new(WriteMode::Atomic)
            .write(&adapter, "users", None, &rows(4))
            .await;

        assert!(!result.success);
        assert_eq!(result.processed_rows, 0);
        assert_eq!(result.errors.len(), 4);
        assert!(result.errors[0].message.starts_with("rolled back: row 1"));
        assert!(db.rows("users").is_empty());
    }

    #[tokio::test]
    async fn test_connection_loss_fails_whole_batch() {
        let (db, adapter) = setup().await;
        db.drop_connection_after(2);

        let result = BatchWriter::new(WriteMode::Partial)
            .write(&adapter, "users", None, &rows(5))
            .await;

        assert_eq!(result.processed_rows, 0);
        assert_eq!(result.failed_rows(), 5);
        assert!(db.rows("users").is_empty());
        // The writer stops at the first connectivity error.
        assert_eq!(db.insert_attempts(), 3);
    }

    #[tokio::test]
    async fn test_clean_batch_commits() {
        let (db, adapter) = setup().await;
        let result = adapter.insert_batch("users", &rows(3), None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.processed_rows, 3);
        assert_eq!(db.rows("users").len(), 3);

        let empty = BatchWriter::default().write(&adapter, "users", None, &[]).await;
        assert!(empty.success);
        assert_eq!(empty.processed_rows, 0);
    }
}
