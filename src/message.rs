use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock::ScalarTimestamp;
use crate::error::Result;
use crate::vector_clock::VectorTimestamp;

/// A measurement stamped with both clocks. Immutable once encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub scalar: ScalarTimestamp,
    pub vector: VectorTimestamp,
    pub value: f64,
}

impl Message {
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Stable sort by scalar time.
pub fn sort_by_scalar(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.scalar.cmp(&b.scalar));
}

/// Stable insertion sort driven by [`VectorTimestamp::display_less`].
///
/// `slice::sort_by` may panic on a comparator that is not a total order,
/// and concurrent vectors make this one partial. Concurrent neighbours keep
/// their relative order.
pub fn sort_by_vector(messages: &mut [Message]) {
    for i in 1..messages.len() {
        let mut j = i;
        while j > 0 && messages[j].vector.display_less(&messages[j - 1].vector) {
            messages.swap(j, j - 1);
            j -= 1;
        }
    }
}

// -----------------------------------------------------------------------------
// MessageBatch — rolling buffer between batch ticks
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MessageBatch {
    messages: Vec<Message>,
}

impl MessageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// `None` when there is nothing to average.
    pub fn mean(&self) -> Option<f64> {
        if self.messages.is_empty() {
            return None;
        }
        let sum: f64 = self.messages.iter().map(|m| m.value).sum();
        Some(sum / self.messages.len() as f64)
    }

    /// Averages and sorts the buffer, then clears it.
    pub fn drain_report(&mut self) -> BatchReport {
        let mean = self.mean();
        let mut by_scalar = std::mem::take(&mut self.messages);
        let mut by_vector = by_scalar.clone();
        sort_by_scalar(&mut by_scalar);
        sort_by_vector(&mut by_vector);

        BatchReport {
            count: by_scalar.len(),
            mean,
            by_scalar,
            by_vector,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub count: usize,
    pub mean: Option<f64>,
    pub by_scalar: Vec<Message>,
    pub by_vector: Vec<Message>,
}

impl BatchReport {
    /// Whether both orderings list the same values in the same order.
    pub fn orderings_agree(&self) -> bool {
        self.by_scalar.iter().zip(&self.by_vector).all(|(a, b)| a == b)
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════╗")?;
        match self.mean {
            Some(mean) => writeln!(f, "║  BATCH  messages={:<5} mean={:<14.4} ║", self.count, mean)?,
            None => writeln!(f, "║  BATCH  no data this interval                ║")?,
        }
        writeln!(f, "╠══ by scalar time ════════════════════════════╣")?;
        for m in &self.by_scalar {
            writeln!(f, "║  {}  {}", m.scalar, m.value)?;
        }
        writeln!(f, "╠══ by vector clock ═══════════════════════════╣")?;
        for m in &self.by_vector {
            writeln!(f, "║  {}  {}", m.vector, m.value)?;
        }
        write!(f, "╚══════════════════════════════════════════════╝")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(secs: i64, vector: &[(&str, u64)], value: f64) -> Message {
        Message {
            scalar: ScalarTimestamp {
                time: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            },
            vector: VectorTimestamp::new(
                vector.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ),
            value,
        }
    }

    fn values(messages: &[Message]) -> Vec<f64> {
        messages.iter().map(|m| m.value).collect()
    }

    #[test]
    fn test_mean_of_batch() {
        let mut batch = MessageBatch::new();
        for (i, v) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            batch.push(msg(i as i64, &[("A", i as u64)], v));
        }
        assert_eq!(batch.mean(), Some(2.0));
    }

    #[test]
    fn test_empty_batch_has_no_mean() {
        let mut batch = MessageBatch::new();
        assert_eq!(batch.mean(), None);
        let report = batch.drain_report();
        assert_eq!(report.count, 0);
        assert!(report.mean.is_none());
        assert!(report.to_string().contains("no data"));
    }

    #[test]
    fn test_drain_clears_buffer() {
        let mut batch = MessageBatch::new();
        batch.push(msg(0, &[("A", 1)], 4.0));
        let report = batch.drain_report();
        assert_eq!(report.count, 1);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_orderings_agree_on_causal_chain() {
        let first = msg(1, &[("A", 1), ("B", 0)], 1.0);
        let second = msg(2, &[("A", 1), ("B", 1)], 2.0);
        let third = msg(3, &[("A", 2), ("B", 1)], 3.0);

        let mut batch = MessageBatch::new();
        batch.push(third);
        batch.push(first);
        batch.push(second);

        let report = batch.drain_report();
        assert_eq!(report.mean, Some(2.0));
        assert_eq!(values(&report.by_scalar), vec![1.0, 2.0, 3.0]);
        assert_eq!(values(&report.by_vector), vec![1.0, 2.0, 3.0]);
        assert!(report.orderings_agree());
    }

    #[test]
    fn test_orderings_may_diverge_on_concurrent_events() {
        let a = msg(2, &[("A", 1), ("B", 0)], 10.0);
        let b = msg(1, &[("A", 0), ("B", 1)], 20.0);

        let mut batch = MessageBatch::new();
        batch.push(a);
        batch.push(b);

        let report = batch.drain_report();
        assert_eq!(values(&report.by_scalar), vec![20.0, 10.0]);
        assert_eq!(values(&report.by_vector), vec![10.0, 20.0]);
        assert!(!report.orderings_agree());
    }

    #[test]
    fn test_vector_sort_is_stable_for_equal_vectors() {
        let mut messages = vec![
            msg(0, &[("A", 1)], 1.0),
            msg(0, &[("A", 1)], 2.0),
            msg(0, &[("A", 0)], 0.0),
        ];
        sort_by_vector(&mut messages);
        assert_eq!(values(&messages), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_message_encoding() {
        let m = msg(5, &[("127.0.0.1:9000", 3)], 0.7);
        let raw = m.to_bytes().unwrap();
        let text = std::str::from_utf8(&raw).unwrap();
        assert!(text.contains("\"value\":0.7"));
        assert_eq!(Message::from_bytes(&raw).unwrap(), m);
        assert!(Message::from_bytes(b"[1,2,3]").is_err());
    }
}
