use std::collections::VecDeque;

use crate::ingest::StoredReading;

pub const DEFAULT_CAPACITY: usize = 200;

/// The most recent readings, oldest first. Nothing survives a restart.
#[derive(Debug)]
pub struct ReadingStore {
    readings: VecDeque<StoredReading>,
    capacity: usize,
}

impl ReadingStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, reading: StoredReading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    pub fn snapshot(&self) -> Vec<StoredReading> {
        self.readings.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&StoredReading> {
        self.readings.back()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::risk;

    fn reading(n: usize) -> StoredReading {
        StoredReading {
            device_id: "dev-1".to_string(),
            timestamp: format!("t{n}"),
            temperature: Some(n as f64),
            humidity: None,
            pressure: None,
            gas_resistance: None,
            assessment: risk::assess(Some(n as f64), None, None),
        }
    }

    #[test]
    fn keeps_only_the_newest_entries() {
        let mut store = ReadingStore::default();
        for n in 0..DEFAULT_CAPACITY + 5 {
            store.push(reading(n));
        }

        assert_eq!(store.len(), DEFAULT_CAPACITY);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.first().unwrap().timestamp, "t5");
        assert_eq!(snapshot.last().unwrap().timestamp, "t204");
        assert_eq!(store.latest().unwrap().timestamp, "t204");
    }

    #[test]
    fn empty_store_has_no_latest() {
        let store = ReadingStore::new(3);
        assert!(store.latest().is_none());
        assert!(store.snapshot().is_empty());
    }
}
