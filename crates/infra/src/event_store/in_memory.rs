use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use keel_core::{AggregateId, EventId, GlobalIndexToken};

use super::backend::{EntryPosition, EventEntry, EventEntryStore, StorageError, TrackedEntry};
use super::query::EventCriteria;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    aggregate_type: String,
    aggregate_identifier: AggregateId,
}

impl StreamKey {
    fn new(aggregate_type: &str, aggregate_identifier: &AggregateId) -> Self {
        Self {
            aggregate_type: aggregate_type.to_string(),
            aggregate_identifier: aggregate_identifier.clone(),
        }
    }

    fn of(entry: &EventEntry) -> Self {
        Self::new(&entry.aggregate_type, &entry.aggregate_identifier)
    }
}

#[derive(Debug, Default)]
struct Entries {
    /// All events in insertion order; the global index is position + 1.
    log: Vec<EventEntry>,
    /// Per stream: sequence number -> position in `log`.
    streams: HashMap<StreamKey, BTreeMap<u64, usize>>,
    event_identifiers: HashSet<EventId>,
    snapshots: HashMap<StreamKey, BTreeMap<u64, EventEntry>>,
}

/// In-memory event entry store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventEntryStore {
    inner: RwLock<Entries>,
}

impl InMemoryEventEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events (snapshots excluded).
    pub fn event_count(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.log.len())
    }

    pub fn snapshot_count(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<usize, StorageError> {
        Ok(self
            .read()?
            .snapshots
            .get(&StreamKey::new(aggregate_type, aggregate_identifier))
            .map_or(0, BTreeMap::len))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Entries>, StorageError> {
        self.inner
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Entries>, StorageError> {
        self.inner
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".to_string()))
    }
}

fn duplicate_position(entry: &EventEntry) -> StorageError {
    StorageError::DuplicateKey(format!(
        "{}/{} already has an event with sequence number {}",
        entry.aggregate_type, entry.aggregate_identifier, entry.sequence_number
    ))
}

fn duplicate_identifier(entry: &EventEntry) -> StorageError {
    StorageError::DuplicateKey(format!("event {} already stored", entry.event_identifier))
}

impl EventEntryStore for InMemoryEventEntryStore {
    fn persist_events(&self, entries: Vec<EventEntry>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut inner = self.write()?;

        // Validate the whole batch before touching anything.
        let mut batch_positions = HashSet::new();
        let mut batch_identifiers = HashSet::new();
        for entry in &entries {
            let key = StreamKey::of(entry);
            let taken = inner
                .streams
                .get(&key)
                .is_some_and(|s| s.contains_key(&entry.sequence_number));
            if taken || !batch_positions.insert((key, entry.sequence_number)) {
                return Err(duplicate_position(entry));
            }
            if inner.event_identifiers.contains(&entry.event_identifier)
                || !batch_identifiers.insert(entry.event_identifier)
            {
                return Err(duplicate_identifier(entry));
            }
        }

        for entry in entries {
            let position = inner.log.len();
            inner
                .streams
                .entry(StreamKey::of(&entry))
                .or_default()
                .insert(entry.sequence_number, position);
            inner.event_identifiers.insert(entry.event_identifier);
            inner.log.push(entry);
        }
        Ok(())
    }

    fn fetch_stream_batch(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first_sequence: u64,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        let inner = self.read()?;
        let Some(stream) = inner
            .streams
            .get(&StreamKey::new(aggregate_type, aggregate_identifier))
        else {
            return Ok(Vec::new());
        };
        Ok(stream
            .range(first_sequence..)
            .take(batch_size)
            .map(|(_, position)| inner.log[*position].clone())
            .collect())
    }

    fn load_last_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<Option<EventEntry>, StorageError> {
        Ok(self
            .read()?
            .snapshots
            .get(&StreamKey::new(aggregate_type, aggregate_identifier))
            .and_then(|s| s.values().next_back().cloned()))
    }

    fn persist_snapshot(&self, entry: EventEntry) -> Result<(), StorageError> {
        self.write()?
            .snapshots
            .entry(StreamKey::of(&entry))
            .or_default()
            .insert(entry.sequence_number, entry);
        Ok(())
    }

    fn prune_snapshots(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        keep: usize,
    ) -> Result<usize, StorageError> {
        let mut inner = self.write()?;
        let Some(snapshots) = inner
            .snapshots
            .get_mut(&StreamKey::new(aggregate_type, aggregate_identifier))
        else {
            return Ok(0);
        };

        let mut pruned = 0;
        while snapshots.len() > keep {
            snapshots.pop_first();
            pruned += 1;
        }
        Ok(pruned)
    }

    fn fetch_filtered_batch(
        &self,
        criteria: &EventCriteria,
        after: Option<&EntryPosition>,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        let inner = self.read()?;
        let mut matching: Vec<&EventEntry> = inner
            .log
            .iter()
            .filter(|e| criteria.matches(e))
            .filter(|e| after.is_none_or(|p| e.position() > *p))
            .collect();
        matching.sort_by_key(|e| e.position());
        Ok(matching.into_iter().take(batch_size).cloned().collect())
    }

    fn fetch_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedEntry>, StorageError> {
        let inner = self.read()?;
        let start = after.map_or(0, |t| t.global_index() as usize);
        Ok(inner
            .log
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(position, entry)| TrackedEntry {
                token: GlobalIndexToken::new(position as u64 + 1),
                entry: entry.clone(),
            })
            .collect())
    }
}
