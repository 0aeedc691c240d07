//! Append-only episodic log.
//!
//! Records are never mutated or removed. The only change a record can see is
//! being marked as consolidated into a batch, which happens at most once.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anima_core::{EventRecord, MemoryIntegrityError};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EpisodicEntry {
    pub record: Arc<EventRecord>,
    /// Batch this record was merged into
    pub consolidated_into: Option<Uuid>,
}

#[derive(Debug, Default)]
struct LogInner {
    entries: Vec<EpisodicEntry>,
    index: HashMap<String, usize>,
    /// Positions not yet consolidated, oldest first
    open: BTreeSet<usize>,
}

/// Writer side. Held by intake (appends) and the scheduler (marks).
#[derive(Debug, Clone, Default)]
pub struct EpisodicLog {
    inner: Arc<RwLock<LogInner>>,
}

/// Read-only view handed to collaborators.
#[derive(Debug, Clone)]
pub struct EpisodicReader {
    inner: Arc<RwLock<LogInner>>,
}

// A poisoned lock only means a reader panicked mid-read; the data is append-only
// and still consistent, so keep serving it.
fn read(lock: &RwLock<LogInner>) -> RwLockReadGuard<'_, LogInner> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write(lock: &RwLock<LogInner>) -> RwLockWriteGuard<'_, LogInner> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl EpisodicLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> EpisodicReader {
        EpisodicReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn append(&self, record: EventRecord) -> Result<Arc<EventRecord>, MemoryIntegrityError> {
        let mut inner = write(&self.inner);
        if inner.index.contains_key(&record.id) {
            return Err(MemoryIntegrityError::DuplicateRecord(record.id));
        }
        let record = Arc::new(record);
        let position = inner.entries.len();
        inner.index.insert(record.id.clone(), position);
        inner.open.insert(position);
        inner.entries.push(EpisodicEntry {
            record: Arc::clone(&record),
            consolidated_into: None,
        });
        Ok(record)
    }

    pub fn contains(&self, id: &str) -> bool {
        read(&self.inner).index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        read(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<EpisodicEntry> {
        let inner = read(&self.inner);
        inner.index.get(id).map(|&i| inner.entries[i].clone())
    }

    pub fn consolidated_count(&self) -> usize {
        let inner = read(&self.inner);
        inner.entries.len() - inner.open.len()
    }

    pub fn unconsolidated_len(&self) -> usize {
        read(&self.inner).open.len()
    }

    /// Unconsolidated records, oldest first.
    pub fn unconsolidated(&self) -> Vec<Arc<EventRecord>> {
        self.oldest_unconsolidated(usize::MAX)
    }

    /// At most `limit` unconsolidated records, oldest first.
    pub fn oldest_unconsolidated(&self, limit: usize) -> Vec<Arc<EventRecord>> {
        let inner = read(&self.inner);
        inner
            .open
            .iter()
            .take(limit)
            .map(|&p| Arc::clone(&inner.entries[p].record))
            .collect()
    }

    /// Unconsolidated records accepted after `cycle`.
    ///
    /// Walks back from the newest record, so the cost follows the size of the
    /// window rather than the log.
    pub fn unconsolidated_after(&self, cycle: u64) -> usize {
        let inner = read(&self.inner);
        inner
            .open
            .iter()
            .rev()
            .take_while(|&&p| inner.entries[p].record.cycle > cycle)
            .count()
    }

    /// Entries appended at or after `position`, oldest first.
    pub fn appended_since(&self, position: usize) -> Vec<EpisodicEntry> {
        let inner = read(&self.inner);
        inner.entries[position.min(inner.entries.len())..].to_vec()
    }

    /// Mark every id as consolidated into `batch`.
    ///
    /// All ids are checked before any is marked, so a failure leaves the log
    /// untouched.
    pub fn mark_consolidated(&self, ids: &[String], batch: Uuid) -> Result<(), MemoryIntegrityError> {
        let mut inner = write(&self.inner);
        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(&position) = inner.index.get(id) else {
                return Err(MemoryIntegrityError::MissingRecord(id.clone()));
            };
            if let Some(existing) = inner.entries[position].consolidated_into {
                return Err(MemoryIntegrityError::AlreadyConsolidated {
                    id: id.clone(),
                    batch: existing,
                });
            }
            if positions.contains(&position) {
                return Err(MemoryIntegrityError::DuplicateRecord(id.clone()));
            }
            positions.push(position);
        }
        for position in positions {
            inner.entries[position].consolidated_into = Some(batch);
            inner.open.remove(&position);
        }
        Ok(())
    }
}

impl EpisodicReader {
    pub fn len(&self) -> usize {
        read(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<EpisodicEntry> {
        let inner = read(&self.inner);
        inner.index.get(id).map(|&i| inner.entries[i].clone())
    }

    /// The `count` most recent entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<EpisodicEntry> {
        let inner = read(&self.inner);
        let start = inner.entries.len().saturating_sub(count);
        inner.entries[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anima_core::EventKind;
    use serde_json::json;

    fn record(id: &str, cycle: u64) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            sequence: cycle,
            source: "world".to_string(),
            kind: EventKind::Observation,
            payload: json!({}),
            novelty_score: None,
            timestamp: 0,
            cycle,
        }
    }

    #[test]
    fn test_append_rejects_duplicate_ids() {
        let log = EpisodicLog::new();
        log.append(record("a", 1)).unwrap();
        assert_eq!(
            log.append(record("a", 2)).unwrap_err(),
            MemoryIntegrityError::DuplicateRecord("a".to_string())
        );
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_mark_is_all_or_nothing() {
        let log = EpisodicLog::new();
        log.append(record("a", 1)).unwrap();
        log.append(record("b", 2)).unwrap();

        let batch = Uuid::new_v4();
        let err = log
            .mark_consolidated(&["a".to_string(), "missing".to_string()], batch)
            .unwrap_err();
        assert_eq!(err, MemoryIntegrityError::MissingRecord("missing".to_string()));
        assert_eq!(log.unconsolidated().len(), 2);

        log.mark_consolidated(&["a".to_string()], batch).unwrap();
        assert_eq!(log.get("a").unwrap().consolidated_into, Some(batch));
        assert_eq!(log.consolidated_count(), 1);

        let again = log.mark_consolidated(&["a".to_string()], Uuid::new_v4());
        assert!(matches!(
            again,
            Err(MemoryIntegrityError::AlreadyConsolidated { .. })
        ));
    }

    #[test]
    fn test_reader_sees_appends() {
        let log = EpisodicLog::new();
        let reader = log.reader();
        for i in 0..5 {
            log.append(record(&format!("e{}", i), i)).unwrap();
        }
        assert_eq!(reader.len(), 5);
        let recent = reader.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].record.id, "e3");
        assert!(reader.get("e0").is_some());
    }

    #[test]
    fn test_unconsolidated_index_follows_marks() {
        let log = EpisodicLog::new();
        for i in 1..=6 {
            log.append(record(&format!("e{}", i), i)).unwrap();
        }
        log.mark_consolidated(&["e2".to_string(), "e5".to_string()], Uuid::new_v4())
            .unwrap();

        let oldest: Vec<_> = log
            .oldest_unconsolidated(3)
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(oldest, ["e1", "e3", "e4"]);
        assert_eq!(log.unconsolidated_len(), 4);
        assert_eq!(log.consolidated_count(), 2);
        // e6 and e4 are after cycle 3; e5 is already consolidated
        assert_eq!(log.unconsolidated_after(3), 2);
        assert_eq!(log.appended_since(4).len(), 2);
        assert!(log.appended_since(10).is_empty());
    }
}
