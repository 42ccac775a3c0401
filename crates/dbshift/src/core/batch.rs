//! Per-batch write results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A row that could not be written, by zero-based position in its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub index: usize,
    pub message: String,
}

impl RowError {
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

/// Outcome of one batch write.
///
/// Produced once per call. Results are never merged; callers accumulate them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    /// Rows committed to the target.
    pub processed_rows: usize,
    pub errors: Vec<RowError>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl BatchResult {
    /// Result for a batch with nothing to write.
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Result where every row failed with the same message.
    pub fn all_failed(rows: usize, message: &str, duration: Duration) -> Self {
        Self {
            success: false,
            processed_rows: 0,
            errors: (0..rows).map(|i| RowError::new(i, message)).collect(),
            duration,
        }
    }

    pub fn failed_rows(&self) -> usize {
        self.errors.len()
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_failed_indexes_every_row() {
        let result = BatchResult::all_failed(3, "connection reset", Duration::from_millis(5));
        assert!(!result.success);
        assert_eq!(result.processed_rows, 0);
        let indexes: Vec<_> = result.errors.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_serializes_duration_as_millis() {
        let result = BatchResult {
            success: true,
            processed_rows: 10,
            errors: vec![],
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1500);
    }
}
