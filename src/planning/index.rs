use chrono::NaiveDate;

use crate::model::DateRange;

use super::ReservationKey;

/// Stable back-reference from an occupied range to the atom that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomRef {
    pub reservation: ReservationKey,
    /// Position of the atom inside its reservation's atom list.
    pub atom: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub range: DateRange,
    pub owner: AtomRef,
}

/// Occupied ranges of a single room, sorted by `range.begin`.
///
/// Entries never overlap, so the ends are sorted as well. Every lookup is a
/// binary search over one of the two orders.
#[derive(Debug, Clone, Default)]
pub struct RoomIndex {
    entries: Vec<IndexEntry>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Insert an entry maintaining sort order. The caller guarantees the range is free.
    pub fn insert(&mut self, entry: IndexEntry) {
        debug_assert!(self.is_free(&entry.range), "RoomIndex::insert on occupied range");
        let pos = self
            .entries
            .partition_point(|e| e.range.begin < entry.range.begin);
        self.entries.insert(pos, entry);
    }

    /// Remove the entry at `range` if it belongs to `owner`.
    pub fn remove(&mut self, owner: AtomRef, range: &DateRange) -> Option<IndexEntry> {
        let pos = self
            .entries
            .binary_search_by_key(&range.begin, |e| e.range.begin)
            .ok()?;
        if self.entries[pos].owner != owner {
            return None;
        }
        Some(self.entries.remove(pos))
    }

    /// Entries overlapping `query` (half-open), in date order.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &IndexEntry> {
        // Everything at index >= right starts at or after query.end → can't overlap.
        let right = self.entries.partition_point(|e| e.range.begin < query.end);
        // Ends are sorted too: everything before left ends at or before query.begin.
        let left = self.entries[..right].partition_point(|e| e.range.end <= query.begin);
        self.entries[left..right].iter()
    }

    pub fn is_free(&self, query: &DateRange) -> bool {
        self.overlapping(query).next().is_none()
    }

    /// The entry covering `date`, if any.
    pub fn occupied_at(&self, date: NaiveDate) -> Option<&IndexEntry> {
        let pos = self.entries.partition_point(|e| e.range.begin <= date);
        pos.checked_sub(1)
            .map(|i| &self.entries[i])
            .filter(|e| e.range.end > date)
    }

    /// Begin of the first entry starting on or after `date`.
    pub fn next_begin_from(&self, date: NaiveDate) -> Option<NaiveDate> {
        let pos = self.entries.partition_point(|e| e.range.begin < date);
        self.entries.get(pos).map(|e| e.range.begin)
    }

    /// `[first begin, last end)`, or `None` for an empty room.
    pub fn extent(&self) -> Option<DateRange> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        Some(DateRange {
            begin: first.range.begin,
            end: last.range.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 1, 1).unwrap() + chrono::Duration::days(n)
    }

    fn range(from: i64, to: i64) -> DateRange {
        DateRange::new(day(from), day(to))
    }

    fn entry(key: u64, from: i64, to: i64) -> IndexEntry {
        IndexEntry {
            range: range(from, to),
            owner: AtomRef {
                reservation: ReservationKey(key),
                atom: 0,
            },
        }
    }

    #[test]
    fn insert_keeps_order() {
        let mut idx = RoomIndex::new();
        idx.insert(entry(1, 6, 8));
        idx.insert(entry(2, 0, 2));
        idx.insert(entry(3, 3, 5));
        let begins: Vec<_> = idx.iter().map(|e| e.range.begin).collect();
        assert_eq!(begins, vec![day(0), day(3), day(6)]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut idx = RoomIndex::new();
        idx.insert(entry(1, 0, 2));
        idx.insert(entry(2, 4, 7));
        idx.insert(entry(3, 20, 22));
        let hits: Vec<_> = idx.overlapping(&range(5, 10)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range, range(4, 7));
    }

    #[test]
    fn adjacent_ranges_are_free() {
        let mut idx = RoomIndex::new();
        idx.insert(entry(1, 2, 4));
        assert!(idx.is_free(&range(4, 6)));
        assert!(idx.is_free(&range(0, 2)));
        assert!(!idx.is_free(&range(3, 4)));
        assert!(!idx.is_free(&range(0, 10)));
    }

    #[test]
    fn empty_index_is_free() {
        let idx = RoomIndex::new();
        assert!(idx.is_free(&range(0, 1000)));
        assert!(idx.extent().is_none());
        assert!(idx.next_begin_from(day(0)).is_none());
    }

    #[test]
    fn occupied_at_respects_half_open_end() {
        let mut idx = RoomIndex::new();
        idx.insert(entry(1, 1, 3));
        assert!(idx.occupied_at(day(0)).is_none());
        assert!(idx.occupied_at(day(1)).is_some());
        assert!(idx.occupied_at(day(2)).is_some());
        assert!(idx.occupied_at(day(3)).is_none());
    }

    #[test]
    fn next_begin_includes_same_day() {
        let mut idx = RoomIndex::new();
        idx.insert(entry(1, 1, 3));
        idx.insert(entry(2, 6, 9));
        assert_eq!(idx.next_begin_from(day(1)), Some(day(1)));
        assert_eq!(idx.next_begin_from(day(2)), Some(day(6)));
        assert_eq!(idx.next_begin_from(day(7)), None);
    }

    #[test]
    fn remove_checks_owner() {
        let mut idx = RoomIndex::new();
        let e = entry(1, 1, 3);
        idx.insert(e);
        let stranger = AtomRef {
            reservation: ReservationKey(99),
            atom: 0,
        };
        assert!(idx.remove(stranger, &e.range).is_none());
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.remove(e.owner, &e.range), Some(e));
        assert!(idx.is_empty());
    }

    #[test]
    fn extent_spans_first_to_last() {
        let mut idx = RoomIndex::new();
        idx.insert(entry(1, 6, 12));
        idx.insert(entry(2, 2, 4));
        assert_eq!(idx.extent(), Some(range(2, 12)));
    }
}
