//! Sparse tile cache
//!
//! Tiles are stored row by row: z coordinate -> x coordinate -> record. A
//! record exists from the moment its coordinate is first needed until the
//! cache is flushed (or the record is evicted).

use std::collections::HashMap;

use crate::queue::RequestHandle;
use crate::sink::{TileSink, UiHandle};
use crate::transport::{FetchError, TileImage};
use crate::viewport::{Coord, Rect};

/// Identifies one record instance; never reused within a cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

/// Where a tile is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TileState {
    /// Fetch queued or in flight
    Pending,
    /// Fetched with an image
    Loaded,
    /// Fetched, server had nothing to show
    Empty,
    /// Fetch failed
    Failed,
    /// Not requested, or its request was stopped
    Idle,
}

/// One cached tile
#[derive(Debug)]
pub struct TileRecord {
    pub id: RecordId,
    pub coord: Coord,
    /// Pixel rectangle inside the map container
    pub bounds: Rect,
    pub ui: UiHandle,
    pub pending: Option<RequestHandle>,
    pub image: Option<TileImage>,
    pub fetched: bool,
    pub error: Option<FetchError>,
}

impl TileRecord {
    pub fn state(&self) -> TileState {
        if self.pending.is_some() {
            TileState::Pending
        } else if self.image.is_some() {
            TileState::Loaded
        } else if self.error.is_some() {
            TileState::Failed
        } else if self.fetched {
            TileState::Empty
        } else {
            TileState::Idle
        }
    }
}

#[derive(Default)]
pub struct TileCache {
    rows: HashMap<i64, HashMap<i64, TileRecord>>,
    len: usize,
    next_id: u64,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.get(coord).is_some()
    }

    pub fn get(&self, coord: Coord) -> Option<&TileRecord> {
        self.rows.get(&coord.z).and_then(|row| row.get(&coord.x))
    }

    pub fn get_mut(&mut self, coord: Coord) -> Option<&mut TileRecord> {
        self.rows.get_mut(&coord.z).and_then(|row| row.get_mut(&coord.x))
    }

    /// Return the record at `coord`, creating it (and its UI element) if absent.
    ///
    /// A new record has no pending request and no image.
    pub fn ensure<S: TileSink + ?Sized>(&mut self, coord: Coord, bounds: Rect, sink: &mut S) -> &mut TileRecord {
        let row = self.rows.entry(coord.z).or_default();
        let len = &mut self.len;
        let next_id = &mut self.next_id;

        row.entry(coord.x).or_insert_with(|| {
            *len += 1;
            let id = RecordId(*next_id);
            *next_id += 1;
            TileRecord {
                id,
                coord,
                bounds,
                ui: sink.create(coord, bounds),
                pending: None,
                image: None,
                fetched: false,
                error: None,
            }
        })
    }

    /// Remove a single record
    pub fn remove(&mut self, coord: Coord) -> Option<TileRecord> {
        let row = self.rows.get_mut(&coord.z)?;
        let record = row.remove(&coord.x)?;
        if row.is_empty() {
            self.rows.remove(&coord.z);
        }
        self.len -= 1;
        Some(record)
    }

    /// Empty the cache, handing back every record so the caller can cancel
    /// requests and detach elements. The cache is already empty while the
    /// returned records are processed.
    pub fn flush_all(&mut self) -> Vec<TileRecord> {
        let rows = std::mem::take(&mut self.rows);
        self.len = 0;

        let mut flushed = Vec::new();
        for (_, mut row) in rows {
            flushed.extend(row.drain().map(|(_, record)| record));
        }
        flushed
    }

    /// Remove every record matching the predicate
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&TileRecord) -> bool) -> Vec<TileRecord> {
        let doomed: Vec<Coord> = self
            .iter()
            .filter(|record| predicate(record))
            .map(|record| record.coord)
            .collect();

        doomed.into_iter().filter_map(|coord| self.remove(coord)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileRecord> {
        self.rows.values().flat_map(|row| row.values())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TileRecord> {
        self.rows.values_mut().flat_map(|row| row.values_mut())
    }

    /// Count records per state
    pub fn state_counts(&self) -> HashMap<TileState, usize> {
        let mut counts = HashMap::new();
        for record in self.iter() {
            *counts.entry(record.state()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::viewport::tile_bounds;

    fn ensure_at(cache: &mut TileCache, sink: &mut MemorySink, x: i64, z: i64) -> RecordId {
        let coord = Coord::new(x, z);
        cache.ensure(coord, tile_bounds(coord, 32.0), sink).id
    }

    #[test]
    fn test_get_absent() {
        let cache = TileCache::new();
        assert!(cache.get(Coord::new(0, 0)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut cache = TileCache::new();
        let mut sink = MemorySink::new();

        let first = ensure_at(&mut cache, &mut sink, 3, 4);
        let second = ensure_at(&mut cache, &mut sink, 3, 4);

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(sink.len(), 1);

        let record = cache.get(Coord::new(3, 4)).unwrap();
        assert!(record.pending.is_none());
        assert!(record.image.is_none());
        assert_eq!(record.state(), TileState::Idle);
    }

    #[test]
    fn test_distinct_coordinates_get_distinct_records() {
        let mut cache = TileCache::new();
        let mut sink = MemorySink::new();

        let a = ensure_at(&mut cache, &mut sink, 0, 0);
        let b = ensure_at(&mut cache, &mut sink, 1, 0);
        let c = ensure_at(&mut cache, &mut sink, 0, 1);

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.iter().count(), 3);
    }

    #[test]
    fn test_flush_all_returns_everything_and_empties() {
        let mut cache = TileCache::new();
        let mut sink = MemorySink::new();
        for z in -2..2 {
            for x in -2..2 {
                ensure_at(&mut cache, &mut sink, x, z);
            }
        }

        let flushed = cache.flush_all();
        assert_eq!(flushed.len(), 16);
        assert!(cache.is_empty());
        assert_eq!(cache.iter().count(), 0);

        // A flush of an empty cache is harmless
        assert!(cache.flush_all().is_empty());
    }

    #[test]
    fn test_recreated_record_has_new_id() {
        let mut cache = TileCache::new();
        let mut sink = MemorySink::new();

        let before = ensure_at(&mut cache, &mut sink, 5, 5);
        cache.flush_all();
        let after = ensure_at(&mut cache, &mut sink, 5, 5);
        assert_ne!(before, after);
    }

    #[test]
    fn test_remove_where() {
        let mut cache = TileCache::new();
        let mut sink = MemorySink::new();
        for x in 0..6 {
            ensure_at(&mut cache, &mut sink, x, 0);
        }

        let removed = cache.remove_where(|r| r.coord.x >= 4);
        assert_eq!(removed.len(), 2);
        assert_eq!(cache.len(), 4);
        assert!(!cache.contains(Coord::new(5, 0)));
        assert!(cache.contains(Coord::new(3, 0)));
    }
}
