mod error;
mod index;
#[cfg(test)]
mod tests;

pub use error::PlanningError;
pub use index::{AtomRef, IndexEntry, RoomIndex};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::model::*;

/// Returned by [`PlanningBoard::get_available_days_from`] when no later
/// reservation limits the stay.
pub const UNBOUNDED_DAYS: u32 = u32::MAX;

/// Board-local handle of an active reservation. Keys grow monotonically, so
/// ordering by key is insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReservationKey(pub(crate) u64);

/// Active reservations plus one occupancy index per room.
///
/// Invariant: inside every [`RoomIndex`], no two ranges overlap.
#[derive(Debug, Clone, Default)]
pub struct PlanningBoard {
    reservations: BTreeMap<ReservationKey, Reservation>,
    /// Persisted id → board key. Unpersisted reservations only live under their key.
    by_id: HashMap<Id, ReservationKey>,
    rooms: HashMap<Id, RoomIndex>,
    next_key: u64,
}

impl PlanningBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Drop every reservation and room index.
    pub fn clear(&mut self) {
        self.reservations.clear();
        self.by_id.clear();
        self.rooms.clear();
    }

    pub fn is_free(&self, room_id: Id, range: &DateRange) -> bool {
        if range.is_empty() {
            return false;
        }
        self.rooms
            .get(&room_id)
            .is_none_or(|index| index.is_free(range))
    }

    /// True if every atom of `reservation` fits. Never mutates the board.
    pub fn can_add_reservation(&self, reservation: &Reservation) -> bool {
        self.check_addable(reservation).is_ok()
    }

    /// Insert all atoms of `reservation` or none of them.
    pub fn add_reservation(&mut self, reservation: Reservation) -> Result<ReservationKey, PlanningError> {
        self.check_addable(&reservation)?;
        Ok(self.insert_unchecked(reservation))
    }

    pub fn remove_reservation(&mut self, key: ReservationKey) -> Result<Reservation, PlanningError> {
        let reservation = self
            .reservations
            .remove(&key)
            .ok_or(PlanningError::InvalidArgument("reservation is not on the board"))?;

        for (i, atom) in reservation.atoms.iter().enumerate() {
            let owner = AtomRef { reservation: key, atom: i };
            if let Some(index) = self.rooms.get_mut(&atom.room_id) {
                index.remove(owner, &atom.range);
                if index.is_empty() {
                    self.rooms.remove(&atom.room_id);
                }
            }
        }
        if reservation.is_persisted() {
            self.by_id.remove(&reservation.id);
        }
        Ok(reservation)
    }

    pub fn remove_reservation_by_id(&mut self, id: Id) -> Result<Reservation, PlanningError> {
        let key = self
            .by_id
            .get(&id)
            .copied()
            .ok_or(PlanningError::InvalidArgument("reservation id is not on the board"))?;
        self.remove_reservation(key)
    }

    /// Replace the active reservation carrying the same persisted id.
    /// On conflict the previous version stays on the board.
    pub fn update_reservation(&mut self, reservation: Reservation) -> Result<ReservationKey, PlanningError> {
        reservation.validate().map_err(PlanningError::InvalidArgument)?;
        let previous = self.remove_reservation_by_id(reservation.id)?;
        match self.check_addable(&reservation) {
            Ok(()) => Ok(self.insert_unchecked(reservation)),
            Err(e) => {
                self.insert_unchecked(previous);
                Err(e)
            }
        }
    }

    /// Number of free days in `room_id` starting at `date`.
    ///
    /// `0` if `date` itself is occupied, [`UNBOUNDED_DAYS`] if nothing begins
    /// on or after `date` (including rooms that were never booked).
    pub fn get_available_days_from(&self, room_id: Id, date: NaiveDate) -> u32 {
        let Some(index) = self.rooms.get(&room_id) else {
            return UNBOUNDED_DAYS;
        };
        if index.occupied_at(date).is_some() {
            return 0;
        }
        match index.next_begin_from(date) {
            Some(begin) => u32::try_from((begin - date).num_days()).unwrap_or(UNBOUNDED_DAYS),
            None => UNBOUNDED_DAYS,
        }
    }

    /// Reservations with at least one atom overlapping `range`, in key order.
    pub fn get_reservations_in_period(&self, range: &DateRange) -> Vec<(ReservationKey, &Reservation)> {
        let keys: BTreeSet<ReservationKey> = self
            .rooms
            .values()
            .flat_map(|index| index.overlapping(range).map(|e| e.owner.reservation))
            .collect();
        keys.into_iter()
            .filter_map(|key| self.reservations.get(&key).map(|r| (key, r)))
            .collect()
    }

    /// `[min begin, max end)` over all active atoms; `None` for an empty board.
    pub fn get_planning_extent(&self) -> Option<DateRange> {
        self.rooms
            .values()
            .filter_map(RoomIndex::extent)
            .reduce(|acc, r| acc.hull(&r))
    }

    pub fn reservations(&self) -> impl Iterator<Item = (ReservationKey, &Reservation)> {
        self.reservations.iter().map(|(k, r)| (*k, r))
    }

    pub fn get_reservation(&self, key: ReservationKey) -> Option<&Reservation> {
        self.reservations.get(&key)
    }

    pub fn get_reservation_by_id(&self, id: Id) -> Option<&Reservation> {
        self.by_id.get(&id).and_then(|key| self.reservations.get(key))
    }

    pub fn room_index(&self, room_id: Id) -> Option<&RoomIndex> {
        self.rooms.get(&room_id)
    }

    fn check_addable(&self, reservation: &Reservation) -> Result<(), PlanningError> {
        reservation.validate().map_err(PlanningError::InvalidArgument)?;
        if reservation.is_persisted() && self.by_id.contains_key(&reservation.id) {
            return Err(PlanningError::InvalidArgument("reservation is already on the board"));
        }
        for atom in &reservation.atoms {
            if let Some(index) = self.rooms.get(&atom.room_id)
                && let Some(hit) = index.overlapping(&atom.range).next()
            {
                return Err(PlanningError::Conflict {
                    room_id: atom.room_id,
                    range: hit.range,
                });
            }
        }
        Ok(())
    }

    fn insert_unchecked(&mut self, reservation: Reservation) -> ReservationKey {
        let key = ReservationKey(self.next_key);
        self.next_key += 1;

        for (i, atom) in reservation.atoms.iter().enumerate() {
            self.rooms.entry(atom.room_id).or_default().insert(IndexEntry {
                range: atom.range,
                owner: AtomRef { reservation: key, atom: i },
            });
        }
        if reservation.is_persisted() {
            self.by_id.insert(reservation.id, key);
        }
        self.reservations.insert(key, reservation);
        key
    }
}
