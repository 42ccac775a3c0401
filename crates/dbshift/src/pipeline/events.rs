//! Migration events and the observers that receive them.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something that happened during a migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    Info {
        message: String,
    },
    TableStarted {
        table: String,
        target_table: String,
        total_rows: u64,
    },
    /// Emitted after every batch.
    Progress {
        table: String,
        offset_start: u64,
        offset_end: u64,
        migrated: u64,
        total: u64,
    },
    /// A row that was not written. `offset` is the batch offset and `index`
    /// the row's position within that batch.
    RowError {
        table: String,
        offset: u64,
        index: usize,
        message: String,
    },
    /// A mapped column that the target table does not have.
    ColumnDropped {
        table: String,
        source_column: String,
        target_column: String,
    },
    BatchFailed {
        table: String,
        offset: u64,
        message: String,
    },
    TableFinished {
        table: String,
        migrated: u64,
        failed: u64,
        cancelled: bool,
    },
}

/// Receives migration events. Must not block.
pub trait MigrationObserver: Send + Sync {
    fn on_event(&self, event: &MigrationEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MigrationObserver for NoopObserver {
    fn on_event(&self, _event: &MigrationEvent) {}
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MigrationObserver for TracingObserver {
    fn on_event(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::Info { message } => info!("{}", message),
            MigrationEvent::TableStarted {
                table,
                target_table,
                total_rows,
            } => info!("{} -> {}: {} rows", table, target_table, total_rows),
            MigrationEvent::Progress {
                table,
                offset_start,
                offset_end,
                migrated,
                total,
            } => {
                let pct = if *total > 0 {
                    (*migrated as f64 / *total as f64) * 100.0
                } else {
                    100.0
                };
                info!(
                    "{}: rows {}-{} done, {}/{} migrated ({:.1}%)",
                    table, offset_start, offset_end, migrated, total, pct
                );
            }
            MigrationEvent::RowError {
                table,
                offset,
                index,
                message,
            } => debug!("{}: row {} of batch at {} failed: {}", table, index, offset, message),
            MigrationEvent::ColumnDropped {
                table,
                source_column,
                target_column,
            } => warn!(
                "{}: column {} maps to {} which the target does not have; dropped",
                table, source_column, target_column
            ),
            MigrationEvent::BatchFailed {
                table,
                offset,
                message,
            } => warn!("{}: batch at offset {} failed: {}", table, offset, message),
            MigrationEvent::TableFinished {
                table,
                migrated,
                failed,
                cancelled,
            } => {
                if *cancelled {
                    warn!("{}: cancelled after {} rows ({} failed)", table, migrated, failed);
                } else {
                    info!("{}: finished, {} migrated, {} failed", table, migrated, failed);
                }
            }
        }
    }
}

/// Forwards events to an unbounded channel.
///
/// Sending never waits. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<MigrationEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MigrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MigrationObserver for ChannelObserver {
    fn on_event(&self, event: &MigrationEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Fans events out to several observers in order.
#[derive(Clone, Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn MigrationObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl MigrationObserver for CompositeObserver {
    fn on_event(&self, event: &MigrationEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards() {
        let (observer, mut rx) = ChannelObserver::new();
        let composite = CompositeObserver::new()
            .with(Arc::new(NoopObserver))
            .with(Arc::new(observer));
        composite.on_event(&MigrationEvent::Info {
            message: "hello".into(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            MigrationEvent::Info {
                message: "hello".into()
            }
        );
    }

    #[test]
    fn test_channel_observer_survives_closed_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_event(&MigrationEvent::Info {
            message: "nobody listening".into(),
        });
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_value(MigrationEvent::BatchFailed {
            table: "users".into(),
            offset: 2000,
            message: "connection reset".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "batch_failed");
        assert_eq!(json["offset"], 2000);
    }
}
